// ============================================================
// Metric Layer
// ============================================================
// Scores generated sentences against their references.
//
//   generated[i]  ──word_tokenize──┐
//                                  ├─▶ sentence BLEU ─▶ mean over i
//   references[i] ─split '\n'──────┘
//       (each line a separate reference, word-tokenized)
//
// A reference string may hold several acceptable sentences
// separated by newlines; the hypothesis is scored against all
// of them at once.

/// Sentence-level BLEU with method-4 smoothing
pub mod bleu;

/// Treebank-style word tokenizer
pub mod tokenize;

use anyhow::{bail, Result};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMetric {
    SentenceBleu,
}

impl FromStr for GenerationMetric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sentence_bleu" => Ok(Self::SentenceBleu),
            other => bail!("Unknown generation metric '{other}' (supported: sentence_bleu)"),
        }
    }
}

/// Mean per-pair score of `hypos` against `refs`.
/// Empty input scores 0.0; differing lengths or an unknown metric are errors.
pub fn generation_metric(hypos: &[String], refs: &[String], metric: &str) -> Result<f64> {
    let metric: GenerationMetric = metric.parse()?;
    if hypos.len() != refs.len() {
        bail!("{} generated sentences but {} references", hypos.len(), refs.len());
    }
    if hypos.is_empty() {
        tracing::warn!("No sentences to score; returning 0.0");
        return Ok(0.0);
    }

    let scores: Vec<f64> = hypos
        .iter()
        .zip(refs)
        .map(|(hypo, reference)| match metric {
            GenerationMetric::SentenceBleu => {
                let references: Vec<Vec<String>> =
                    reference.split('\n').map(tokenize::word_tokenize).collect();
                bleu::sentence_bleu(&references, &tokenize::word_tokenize(hypo))
            }
        })
        .collect();

    tracing::debug!("Scored {} pairs with {:?}", scores.len(), metric);
    Ok(scores.iter().sum::<f64>() / scores.len() as f64)
}
