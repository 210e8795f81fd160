// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the pretrained model's tokenizer.json, or — when no
// pretrained model is available — builds a word-level
// tokenizer from the training corpus so the whole pipeline
// can still run end to end.
//
// GPT-2 has no dedicated padding token; padding reuses
// <|endoftext|> and relies on the attention mask to hide it.

use anyhow::{Context, Result};
use regex::Regex;
use std::{collections::HashMap, path::PathBuf, str::FromStr};
use tokenizers::Tokenizer;

pub const EOS_TOKEN: &str = "<|endoftext|>";
pub const UNK_TOKEN: &str = "[UNK]";
const TOKENIZER_FILE: &str = "tokenizer.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokenIds {
    pub eos: u32,
    pub pad: u32,
}

/// Resolve the ids of the special tokens the pipeline relies on.
pub fn special_token_ids(tokenizer: &Tokenizer) -> Result<SpecialTokenIds> {
    let eos = tokenizer
        .token_to_id(EOS_TOKEN)
        .with_context(|| format!("Tokenizer has no '{EOS_TOKEN}' token"))?;
    Ok(SpecialTokenIds { eos, pad: eos })
}

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load a previously saved tokenizer from JSON file
    pub fn load(&self) -> Result<Tokenizer> {
        let path = self.dir.join(TOKENIZER_FILE);
        Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))
    }

    pub fn save(&self, tokenizer: &Tokenizer) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;
        let path = self.dir.join(TOKENIZER_FILE);
        tokenizer
            .save(&path, true)
            .map_err(|e| anyhow::anyhow!("Cannot write tokenizer to '{}': {}", path.display(), e))
    }
}

/// Build a word-level vocabulary from texts and load it as a
/// HuggingFace-format tokenizer.
///
/// Splitting mirrors the `Whitespace` pre-tokenizer (`\w+|[^\w\s]+`)
/// so every counted word maps to exactly one vocabulary entry.
pub fn build_word_level(texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
    let splitter = Regex::new(r"\w+|[^\w\s]+")?;

    // ── Step 1: Count words ──────────────────────────────────────────────────
    let mut freq: HashMap<String, usize> = HashMap::new();
    for text in texts {
        for m in splitter.find_iter(&text.to_lowercase()) {
            *freq.entry(m.as_str().to_string()).or_insert(0) += 1;
        }
    }

    // Most frequent first; ties broken alphabetically for stable ids
    let mut words: Vec<(String, usize)> = freq.into_iter().collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    words.truncate(vocab_size.saturating_sub(2));

    // ── Step 2: Vocabulary (special tokens first) ────────────────────────────
    let mut vocab = serde_json::Map::new();
    vocab.insert(EOS_TOKEN.to_string(), 0.into());
    vocab.insert(UNK_TOKEN.to_string(), 1.into());
    let mut next_id = 2usize;
    for (word, _) in &words {
        vocab.insert(word.clone(), next_id.into());
        next_id += 1;
    }

    // ── Step 3: Tokenizer JSON in HuggingFace format ─────────────────────────
    let tokenizer_json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            {"id": 0, "content": EOS_TOKEN, "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": 1, "content": UNK_TOKEN, "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
        ],
        "normalizer": { "type": "Lowercase" },
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": UNK_TOKEN
        }
    });

    tracing::debug!("Word-level vocabulary has {} entries", next_id);
    Tokenizer::from_str(&tokenizer_json.to_string())
        .map_err(|e| anyhow::anyhow!("Cannot build tokenizer: {e}"))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TOY_CORPUS: &[&str] = &[
        "alice employer bank city paris founded",
        "alice works at bank . make a sentence",
        "bank is located in paris and was founded in 1900 x",
    ];

    pub(crate) fn toy_tokenizer() -> Tokenizer {
        let texts: Vec<String> = TOY_CORPUS.iter().map(|s| s.to_string()).collect();
        build_word_level(&texts, 100).unwrap()
    }

    #[test]
    fn test_word_level_encodes_known_words() {
        let tok = toy_tokenizer();
        let enc = tok.encode("Alice works at Bank.", false).unwrap();
        assert_eq!(enc.get_ids().len(), 5);
        assert!(!enc.get_ids().contains(&1));
    }

    #[test]
    fn test_unknown_word_maps_to_unk() {
        let tok = toy_tokenizer();
        let enc = tok.encode("zebra", false).unwrap();
        assert_eq!(enc.get_ids(), &[1]);
    }

    #[test]
    fn test_loading_an_unsaved_tokenizer_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TokenizerStore::new(dir.path()).load().is_err());
    }

    #[test]
    fn test_special_ids() {
        let ids = special_token_ids(&toy_tokenizer()).unwrap();
        assert_eq!(ids.eos, 0);
        assert_eq!(ids.pad, ids.eos);
    }

    #[test]
    fn test_vocab_size_is_capped() {
        let texts: Vec<String> = TOY_CORPUS.iter().map(|s| s.to_string()).collect();
        let tok = build_word_level(&texts, 5).unwrap();
        assert_eq!(tok.get_vocab_size(false), 5);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path().join("run"));

        let built = toy_tokenizer();
        store.save(&built).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(
            built.encode("alice works", false).unwrap().get_ids(),
            loaded.encode("alice works", false).unwrap().get_ids()
        );
    }
}
