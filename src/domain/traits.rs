// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// A DataProcessor knows how to read one dataset format from a
// directory. The application layer only talks to this trait,
// so WebNLG can be swapped for another data-to-text corpus
// (E2E, DART, ...) by adding one more implementation.

use anyhow::Result;
use std::path::Path;

use crate::domain::example::InputExample;

/// The three conventional dataset splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl Split {
    /// File stem used on disk (`dev` for validation, as in WebNLG releases)
    pub fn file_stem(self) -> &'static str {
        match self {
            Split::Train      => "train",
            Split::Validation => "dev",
            Split::Test       => "test",
        }
    }
}

impl std::str::FromStr for Split {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "train"                      => Ok(Split::Train),
            "validation" | "valid" | "dev" => Ok(Split::Validation),
            "test"                       => Ok(Split::Test),
            other => anyhow::bail!("unknown dataset split '{other}'"),
        }
    }
}

// ─── DataProcessor ────────────────────────────────────────────────────────────
/// Any component that can load examples of one dataset format.
///
/// Implementations:
///   - WebNlgProcessor → WebNLG 2017 challenge JSON
pub trait DataProcessor {
    /// Load every example of `split` found under `data_dir`.
    fn get_examples(&self, data_dir: &Path, split: Split) -> Result<Vec<InputExample>>;

    fn get_train_examples(&self, data_dir: &Path) -> Result<Vec<InputExample>> {
        self.get_examples(data_dir, Split::Train)
    }

    fn get_dev_examples(&self, data_dir: &Path) -> Result<Vec<InputExample>> {
        self.get_examples(data_dir, Split::Validation)
    }

    fn get_test_examples(&self, data_dir: &Path) -> Result<Vec<InputExample>> {
        self.get_examples(data_dir, Split::Test)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_parsing() {
        assert_eq!("dev".parse::<Split>().unwrap(), Split::Validation);
        assert_eq!("Validation".parse::<Split>().unwrap(), Split::Validation);
        assert_eq!("test".parse::<Split>().unwrap(), Split::Test);
        assert!("holdout".parse::<Split>().is_err());
    }

    #[test]
    fn test_file_stems() {
        assert_eq!(Split::Train.file_stem(), "train");
        assert_eq!(Split::Validation.file_stem(), "dev");
    }
}
