// ============================================================
// Layer 3 — WrappedExample Domain Type
// ============================================================
// The prompt template turns an InputExample into an ordered
// list of text spans. Each span knows its role:
//
//   Input — text copied from the example (may be truncated)
//   Text  — fixed template wording, e.g. " Make a sentence"
//   Mask  — the point where the target text is generated
//
// For the template '{"placeholder":"text_a"} Make a sentence {"mask"}'
// the wrapped example looks like:
//
//   [Input "Alice : employer : Bank"] [Text " Make a sentence"] [Mask]

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanRole {
    Input,
    Text,
    Mask,
}

/// One annotated piece of a wrapped example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    pub role: SpanRole,
    /// True for the span whose tokens the loss is computed on
    pub loss: bool,
    /// True for spans the tokenizer may truncate
    pub shortenable: bool,
}

impl TextSpan {
    pub fn input(text: impl Into<String>) -> Self {
        Self { text: text.into(), role: SpanRole::Input, loss: false, shortenable: true }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), role: SpanRole::Text, loss: false, shortenable: false }
    }

    pub fn mask() -> Self {
        Self { text: String::new(), role: SpanRole::Mask, loss: true, shortenable: false }
    }

    pub fn is_mask(&self) -> bool {
        self.role == SpanRole::Mask
    }
}

/// An example after template wrapping, ready for tokenisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedExample {
    pub spans:    Vec<TextSpan>,
    pub guid:     String,
    pub tgt_text: String,
}

impl WrappedExample {
    /// Number of mask spans; a valid template produces exactly one
    pub fn mask_count(&self) -> usize {
        self.spans.iter().filter(|s| s.is_mask()).count()
    }
}

impl std::fmt::Display for WrappedExample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, span) in self.spans.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match span.role {
                SpanRole::Mask => write!(f, "{{<mask> loss}}")?,
                _ => write!(
                    f,
                    "{{{:?} shortenable={}}}",
                    span.text,
                    span.shortenable as u8
                )?,
            }
        }
        write!(f, "] guid={} tgt_text={:?}", self.guid, self.tgt_text)
    }
}
