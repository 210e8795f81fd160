// ============================================================
// Layer 4 — WebNLG Dataset Loader
// ============================================================
// Reads the WebNLG 2017 challenge release from a directory:
//
//   webnlg_2017/
//     train.json
//     dev.json
//     test.json
//
// Each file has the shape
//
//   {"entries": [
//     {"1": {"lexicalisations":   [{"comment": "good", "lex": "..."}],
//            "modifiedtripleset": [{"subject": "...", "property": "...", "object": "..."}]}},
//     {"2": {...}}
//   ]}
//
// Triples are linearised as "subject : property : object" and
// joined with " | ". Only lexicalisations marked "good" are kept.
//
//   train      → one example per good lexicalisation
//   dev / test → one example per entry, all good references
//                joined with '\n' in tgt_text

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::Path};

use crate::domain::example::InputExample;
use crate::domain::traits::{DataProcessor, Split};

#[derive(Debug, Deserialize)]
struct RawFile {
    entries: Vec<BTreeMap<String, RawEntry>>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    lexicalisations:   Vec<RawLexicalisation>,
    modifiedtripleset: Vec<RawTriple>,
}

#[derive(Debug, Deserialize)]
struct RawLexicalisation {
    comment: String,
    lex:     String,
}

#[derive(Debug, Deserialize)]
struct RawTriple {
    subject:  String,
    property: String,
    object:   String,
}

/// Loads WebNLG 2017 splits. Implements DataProcessor from Layer 3.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebNlgProcessor;

impl WebNlgProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl DataProcessor for WebNlgProcessor {
    fn get_examples(&self, data_dir: &Path, split: Split) -> Result<Vec<InputExample>> {
        anyhow::ensure!(
            data_dir.is_dir(),
            "Dataset directory '{}' does not exist",
            data_dir.display()
        );

        let path = data_dir.join(format!("{}.json", split.file_stem()));
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read dataset file '{}'", path.display()))?;
        let raw: RawFile = serde_json::from_str(&json)
            .with_context(|| format!("Malformed WebNLG file '{}'", path.display()))?;

        let examples = build_examples(raw, split);
        tracing::debug!(
            "Loaded {} {:?} examples from '{}'",
            examples.len(),
            split,
            path.display()
        );
        Ok(examples)
    }
}

fn build_examples(raw: RawFile, split: Split) -> Vec<InputExample> {
    let mut examples = Vec::new();

    for entry in raw.entries.into_iter().flat_map(|m| m.into_values()) {
        let source = linearise_triples(&entry.modifiedtripleset);
        let refs: Vec<String> = entry
            .lexicalisations
            .into_iter()
            .filter(|l| l.comment == "good")
            .map(|l| l.lex)
            .collect();

        if refs.is_empty() {
            continue;
        }

        match split {
            Split::Train => {
                for target in refs {
                    let guid = examples.len().to_string();
                    examples.push(InputExample::new(guid, source.clone(), target));
                }
            }
            Split::Validation | Split::Test => {
                let guid = examples.len().to_string();
                examples.push(InputExample::new(guid, source, refs.join("\n")));
            }
        }
    }

    examples
}

/// "s1 : p1 : o1 | s2 : p2 : o2"
fn linearise_triples(triples: &[RawTriple]) -> String {
    triples
        .iter()
        .map(|t| format!("{} : {} : {}", t.subject, t.property, t.object))
        .collect::<Vec<_>>()
        .join(" | ")
}

// ─── DatasetSplits ────────────────────────────────────────────────────────────
/// All three splits of a dataset, loaded together.
#[derive(Debug, Clone)]
pub struct DatasetSplits {
    pub train:      Vec<InputExample>,
    pub validation: Vec<InputExample>,
    pub test:       Vec<InputExample>,
}

impl DatasetSplits {
    pub fn load(processor: &impl DataProcessor, data_dir: &Path) -> Result<Self> {
        Ok(Self {
            train:      processor.get_train_examples(data_dir)?,
            validation: processor.get_dev_examples(data_dir)?,
            test:       processor.get_test_examples(data_dir)?,
        })
    }
}
