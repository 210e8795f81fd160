// ============================================================
// Layer 5 — Evaluation Loop
// ============================================================
// Generates a sentence for every validation example and pairs
// it with the example's reference text(s):
//
//   for batch in loader (no shuffle, no teacher forcing):
//     ids  = model.generate(batch)          one row per instance
//     text = tokenizer.decode(ids, skip_special_tokens).trim()
//     generated.push(text); groundtruth.push(batch.tgt_text)
//
// generated[i] always belongs to groundtruth[i].

use anyhow::Result;
use burn::prelude::*;
use tokenizers::Tokenizer;

use crate::data::dataloader::PromptDataLoader;
use crate::infra::checkpoint::GenerationRecord;
use crate::ml::generation::GenerationConfig;
use crate::ml::prompt_model::PromptForGeneration;

/// Parallel lists, one entry per evaluated example.
#[derive(Debug, Clone, Default)]
pub struct EvalOutput {
    pub guids:       Vec<String>,
    pub generated:   Vec<String>,
    pub groundtruth: Vec<String>,
}

impl EvalOutput {
    pub fn len(&self) -> usize {
        self.generated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generated.is_empty()
    }

    pub fn records(&self) -> Vec<GenerationRecord> {
        self.guids
            .iter()
            .zip(&self.generated)
            .zip(&self.groundtruth)
            .map(|((guid, generated), reference)| GenerationRecord {
                guid:      guid.clone(),
                generated: generated.clone(),
                reference: reference.clone(),
            })
            .collect()
    }
}

pub fn evaluate<B: Backend>(
    model:     &PromptForGeneration<B>,
    loader:    &PromptDataLoader<B>,
    tokenizer: &Tokenizer,
    gen_cfg:   &GenerationConfig,
    eos:       u32,
) -> Result<EvalOutput> {
    gen_cfg.validate()?;
    tracing::info!(
        "Generating for {} examples ({:?}, num_beams={})",
        loader.len(), gen_cfg.strategy(), gen_cfg.num_beams
    );

    let mut out = EvalOutput::default();

    for (step, batch) in loader.iter().enumerate() {
        let sequences = model.generate(&batch, gen_cfg, eos)?;

        for ids in &sequences {
            let text = tokenizer
                .decode(ids, true)
                .map_err(|e| anyhow::anyhow!("Decoding error: {e}"))?;
            out.generated.push(text.trim().to_string());
        }
        out.groundtruth.extend(batch.tgt_texts);
        out.guids.extend(batch.guids);

        tracing::debug!("Evaluated batch {} ({} examples so far)", step + 1, out.len());
    }

    anyhow::ensure!(
        out.generated.len() == out.groundtruth.len(),
        "{} generated sentences for {} references",
        out.generated.len(), out.groundtruth.len()
    );
    Ok(out)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::template::PromptTemplate;
    use crate::data::tokenize::{PromptTokenizer, TokenizerConfig};
    use crate::domain::example::InputExample;
    use crate::infra::tokenizer_store::tests::toy_tokenizer;
    use crate::ml::prompt_model::tests::tiny_prompt_model;

    type TestBackend = burn::backend::NdArray;

    fn eval_loader(tokenizer: &Tokenizer, n: usize) -> PromptDataLoader<TestBackend> {
        let config   = TokenizerConfig { max_seq_length: 16, teacher_forcing: false, ..TokenizerConfig::default() };
        let pt       = PromptTokenizer::new(tokenizer, config).unwrap();
        let template = PromptTemplate::parse(r#"{"placeholder":"text_a"} make a sentence {"mask"}"#).unwrap();
        let examples: Vec<InputExample> = (0..n)
            .map(|i| InputExample::new(i.to_string(), "alice employer bank", format!("ref {i}\nalt {i}")))
            .collect();
        PromptDataLoader::new(&examples, &template, &pt, 2, false, Default::default()).unwrap()
    }

    fn quick_generation() -> GenerationConfig {
        GenerationConfig { num_beams: 2, max_new_tokens: Some(3), min_length: 0, ..GenerationConfig::default() }
    }

    #[test]
    fn test_generated_and_groundtruth_have_equal_length() {
        let tok    = toy_tokenizer();
        let model  = tiny_prompt_model::<TestBackend>(100, &Default::default());
        let loader = eval_loader(&tok, 5);

        let out = evaluate(&model, &loader, &tok, &quick_generation(), 0).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out.generated.len(), out.groundtruth.len());
        assert_eq!(out.groundtruth[3], "ref 3\nalt 3");
    }

    #[test]
    fn test_order_follows_the_dataset() {
        let tok    = toy_tokenizer();
        let model  = tiny_prompt_model::<TestBackend>(100, &Default::default());
        let loader = eval_loader(&tok, 3);

        let out = evaluate(&model, &loader, &tok, &quick_generation(), 0).unwrap();
        assert_eq!(out.guids, vec!["0", "1", "2"]);
        let records = out.records();
        assert_eq!(records[1].guid, "1");
        assert_eq!(records[1].reference, "ref 1\nalt 1");
    }

    #[test]
    fn test_generated_text_is_trimmed() {
        let tok    = toy_tokenizer();
        let model  = tiny_prompt_model::<TestBackend>(100, &Default::default());
        let loader = eval_loader(&tok, 2);

        let out = evaluate(&model, &loader, &tok, &quick_generation(), 0).unwrap();
        for text in &out.generated {
            assert_eq!(text, text.trim());
        }
    }

    #[test]
    fn test_invalid_generation_config_is_rejected() {
        let tok    = toy_tokenizer();
        let model  = tiny_prompt_model::<TestBackend>(100, &Default::default());
        let loader = eval_loader(&tok, 1);
        let cfg    = GenerationConfig { num_beams: 0, ..GenerationConfig::default() };
        assert!(evaluate(&model, &loader, &tok, &cfg, 0).is_err());
    }
}
