// ============================================================
// Layer 3 — InputExample Domain Type
// ============================================================
// One raw record of a conditional generation dataset.
//
// For WebNLG the input is a linearised set of RDF triples:
//   text_a:   "Alice : employer : Bank | Bank : city : Paris"
//   tgt_text: "Alice works at Bank, which is in Paris."
//
// Validation and test records can carry several acceptable
// references; they are stored in `tgt_text` separated by '\n'.

use serde::{Deserialize, Serialize};

/// A raw example, immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputExample {
    /// Running index of the example inside its split
    pub guid: String,

    /// Primary input text (the linearised triples)
    pub text_a: String,

    /// Optional secondary input, empty for WebNLG
    #[serde(default)]
    pub text_b: String,

    /// Target sentence(s); multiple references are '\n'-separated
    pub tgt_text: String,
}

impl InputExample {
    pub fn new(
        guid:     impl Into<String>,
        text_a:   impl Into<String>,
        tgt_text: impl Into<String>,
    ) -> Self {
        Self {
            guid:     guid.into(),
            text_a:   text_a.into(),
            text_b:   String::new(),
            tgt_text: tgt_text.into(),
        }
    }

    /// Iterate over every reference sentence held in `tgt_text`.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.tgt_text.split('\n').filter(|r| !r.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_split_on_newline() {
        let ex = InputExample::new("0", "a : b : c", "First ref.\nSecond ref.");
        let refs: Vec<&str> = ex.references().collect();
        assert_eq!(refs, vec!["First ref.", "Second ref."]);
    }

    #[test]
    fn test_single_reference() {
        let ex = InputExample::new("1", "x", "Only one.");
        assert_eq!(ex.references().count(), 1);
        assert!(ex.text_b.is_empty());
    }
}
