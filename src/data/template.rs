// ============================================================
// Layer 4 — Prompt Template (text side)
// ============================================================
// Parses a template string and wraps raw examples with it.
//
// Template syntax: free text mixed with JSON-like pieces
//
//   {"placeholder":"text_a"}  → the example's text_a
//   {"placeholder":"text_b"}  → the example's text_b
//   {"mask"}                  → where the target is generated
//
// e.g.  '{"placeholder":"text_a"} Make a sentence {"mask"}'
//
// Whitespace in front of a piece is kept as a single leading
// space on that piece, because GPT-2's byte-level BPE encodes
// " Make" and "Make" as different tokens.
//
// The learnable prefix that goes with this template lives in
// ml/prefix.rs; this file is pure text processing.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::domain::example::InputExample;
use crate::domain::wrapped::{TextSpan, WrappedExample};

pub const DEFAULT_TEMPLATE: &str = r#"{"placeholder":"text_a"} {"mask"}"#;

/// Template of the WebNLG prefix-tuning run; the `train` default.
pub const WEBNLG_TEMPLATE: &str = r#"{"placeholder":"text_a"} Make a sentence {"mask"}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    TextA,
    TextB,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Placeholder { field: Field, prefix_space: bool },
    Text { text: String, prefix_space: bool },
    Mask,
}

/// A parsed prompt template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    source: String,
    pieces: Vec<Piece>,
}

impl PromptTemplate {
    /// Parse a template string. Exactly one `{"mask"}` is required.
    pub fn parse(text: &str) -> Result<Self> {
        let bytes      = text.as_bytes();
        let mut pieces = Vec::new();
        let mut i      = 0usize;

        while i < bytes.len() {
            let mut prefix_space = i > 0 && bytes[i - 1] == b' ';
            while i < bytes.len() && bytes[i] == b' ' {
                prefix_space = true;
                i += 1;
            }
            if i == bytes.len() {
                break;
            }

            if bytes[i] != b'{' {
                let end = text[i..].find('{').map_or(bytes.len(), |off| i + off);
                pieces.push(Piece::Text {
                    text: text[i..end].trim_end_matches(' ').to_string(),
                    prefix_space,
                });
                i = end;
                continue;
            }

            let close = matching_brace(bytes, i).with_context(|| {
                format!("Unbalanced '{{' at byte {i} in template '{text}'")
            })?;

            pieces.push(parse_piece(&text[i..=close], prefix_space)?);
            i = close + 1;
        }

        let masks = pieces.iter().filter(|p| matches!(p, Piece::Mask)).count();
        anyhow::ensure!(
            masks == 1,
            "Template '{text}' must contain exactly one {{\"mask\"}}, found {masks}"
        );

        Ok(Self { source: text.to_string(), pieces })
    }

    /// The template string this was parsed from
    pub fn text(&self) -> &str {
        &self.source
    }

    /// Wrap one example into annotated spans. Pure and deterministic.
    pub fn wrap_one_example(&self, example: &InputExample) -> WrappedExample {
        let spans = self
            .pieces
            .iter()
            .map(|piece| match piece {
                Piece::Placeholder { field, prefix_space } => {
                    let value = match field {
                        Field::TextA => &example.text_a,
                        Field::TextB => &example.text_b,
                    };
                    TextSpan::input(with_prefix(value, *prefix_space))
                }
                Piece::Text { text, prefix_space } => {
                    TextSpan::text(with_prefix(text, *prefix_space))
                }
                Piece::Mask => TextSpan::mask(),
            })
            .collect();

        WrappedExample {
            spans,
            guid:     example.guid.clone(),
            tgt_text: example.tgt_text.clone(),
        }
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_TEMPLATE.to_string(),
            pieces: vec![
                Piece::Placeholder { field: Field::TextA, prefix_space: false },
                Piece::Mask,
            ],
        }
    }
}

fn with_prefix(text: &str, prefix_space: bool) -> String {
    if prefix_space {
        format!(" {text}")
    } else {
        text.to_string()
    }
}

/// Index of the `}` closing the piece that opens at `open`.
/// Nested braces are allowed; braces inside JSON strings are not counted.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth     = 0usize;
    let mut in_string = false;
    let mut escaped   = false;

    for (j, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\'        => escaped = true,
                b'"'         => in_string = false,
                _            => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(j);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse one `{...}` piece. `{"mask"}` is not valid JSON, so the
/// bare-key form is handled before falling back to serde_json.
fn parse_piece(raw: &str, prefix_space: bool) -> Result<Piece> {
    let inner = raw[1..raw.len() - 1].trim();
    if inner == "\"mask\"" {
        return Ok(Piece::Mask);
    }

    let value: Value = serde_json::from_str(raw)
        .with_context(|| format!("Cannot parse template piece {raw}"))?;
    let map = value
        .as_object()
        .with_context(|| format!("Template piece {raw} is not an object"))?;

    let kind = ["mask", "placeholder", "text"]
        .into_iter()
        .find(|key| map.contains_key(*key))
        .with_context(|| format!("Unsupported template piece {raw}"))?;
    if let Some(extra) = map.keys().find(|key| key.as_str() != kind) {
        anyhow::bail!("Unknown key \"{extra}\" in template piece {raw}");
    }

    if kind == "mask" {
        return Ok(Piece::Mask);
    }
    if let Some(name) = map.get("placeholder") {
        let field = match name.as_str() {
            Some("text_a") => Field::TextA,
            Some("text_b") => Field::TextB,
            _ => anyhow::bail!("Unknown placeholder {name} in template piece {raw}"),
        };
        return Ok(Piece::Placeholder { field, prefix_space });
    }
    if let Some(text) = map.get("text").and_then(Value::as_str) {
        return Ok(Piece::Text { text: text.to_string(), prefix_space });
    }

    anyhow::bail!("Unsupported template piece {raw}")
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wrapped::SpanRole;

    fn example() -> InputExample {
        InputExample::new("7", "Alice : employer : Bank", "Alice works at Bank.")
    }

    #[test]
    fn test_webnlg_template_spans() {
        let t       = PromptTemplate::parse(WEBNLG_TEMPLATE).unwrap();
        let wrapped = t.wrap_one_example(&example());

        assert_eq!(wrapped.spans.len(), 3);
        assert_eq!(wrapped.spans[0].text, "Alice : employer : Bank");
        assert_eq!(wrapped.spans[0].role, SpanRole::Input);
        assert!(wrapped.spans[0].shortenable);
        assert_eq!(wrapped.spans[1].text, " Make a sentence");
        assert_eq!(wrapped.spans[1].role, SpanRole::Text);
        assert!(!wrapped.spans[1].shortenable);
        assert!(wrapped.spans[2].is_mask());
        assert!(wrapped.spans[2].loss);
        assert_eq!(wrapped.guid, "7");
        assert_eq!(wrapped.tgt_text, "Alice works at Bank.");
    }

    #[test]
    fn test_wrapping_is_deterministic() {
        let t = PromptTemplate::parse(WEBNLG_TEMPLATE).unwrap();
        let a = t.wrap_one_example(&example());
        let b = t.wrap_one_example(&example());
        assert_eq!(a, b);
    }

    #[test]
    fn test_default_matches_parsed_default() {
        let parsed  = PromptTemplate::parse(DEFAULT_TEMPLATE).unwrap();
        let default = PromptTemplate::default();
        assert_eq!(
            parsed.wrap_one_example(&example()),
            default.wrap_one_example(&example())
        );
    }

    #[test]
    fn test_text_b_and_json_mask_forms() {
        let t = PromptTemplate::parse(
            r#"Data: {"placeholder":"text_a"} and {"placeholder":"text_b"} -> {"mask": null}"#,
        )
        .unwrap();
        let mut ex = example();
        ex.text_b = "extra".into();
        let wrapped = t.wrap_one_example(&ex);

        let texts: Vec<&str> = wrapped.spans.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Data:", " Alice : employer : Bank", " and", " extra", " ->", ""]);
        assert_eq!(wrapped.mask_count(), 1);
    }

    #[test]
    fn test_missing_mask_is_rejected() {
        assert!(PromptTemplate::parse(r#"{"placeholder":"text_a"} hello"#).is_err());
    }

    #[test]
    fn test_two_masks_are_rejected() {
        assert!(PromptTemplate::parse(r#"{"mask"} {"mask"}"#).is_err());
    }

    #[test]
    fn test_unknown_placeholder_is_rejected() {
        assert!(PromptTemplate::parse(r#"{"placeholder":"text_z"} {"mask"}"#).is_err());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(PromptTemplate::parse(r#"{"placeholder":"text_a","bogus":1} {"mask"}"#).is_err());
        assert!(PromptTemplate::parse(r#"{"placeholder":"text_a"} {"mask": null, "shortenable": true}"#).is_err());
        assert!(PromptTemplate::parse(r#"{"placeholder":"text_a"} {"text":"a", "mask": null}"#).is_err());
    }

    #[test]
    fn test_braces_inside_strings_do_not_close_a_piece() {
        let t = PromptTemplate::parse(r#"{"placeholder":"text_a"} {"text":"a}b{c"} {"mask"}"#).unwrap();
        let wrapped = t.wrap_one_example(&example());

        assert_eq!(wrapped.spans.len(), 3);
        assert_eq!(wrapped.spans[1].text, " a}b{c");
        assert!(wrapped.spans[2].is_mask());
    }

    #[test]
    fn test_unbalanced_brace_is_rejected() {
        assert!(PromptTemplate::parse(r#"{"placeholder":"text_a" {"mask"}"#).is_err());
    }
}
