// ============================================================
// Layer 4 — Prompt Tokenizer (wrapper around tokenizers)
// ============================================================
// Turns a WrappedExample into fixed-length id sequences:
//
//   spans  ──encode──▶  parts  ──truncate──▶  concat  ──pad──▶  ids
//
// With teacher forcing the mask span is replaced by
// " " + target (+ EOS) and those tokens carry loss_id = 1.
// Without teacher forcing encoding stops at the mask and the
// last input token is flagged instead, so generation starts
// right after it.
//
// Truncation only ever touches shortenable spans (the example
// input), never the template wording or the target.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::domain::wrapped::WrappedExample;
use crate::infra::tokenizer_store::special_token_ids;

// ─── Truncation policy ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TruncateMethod {
    /// Drop tokens from the start of the shortenable spans
    Head,
    /// Drop tokens from the end of the shortenable spans
    Tail,
    /// Drop from every shortenable span in proportion to its length
    Balanced,
}

impl std::str::FromStr for TruncateMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "head"     => Ok(TruncateMethod::Head),
            "tail"     => Ok(TruncateMethod::Tail),
            "balanced" => Ok(TruncateMethod::Balanced),
            other => anyhow::bail!("unknown truncate method '{other}' (head, tail, balanced)"),
        }
    }
}

impl std::fmt::Display for TruncateMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TruncateMethod::Head     => "head",
            TruncateMethod::Tail     => "tail",
            TruncateMethod::Balanced => "balanced",
        };
        f.write_str(name)
    }
}

/// Tokenisation settings shared by the train and validation loaders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerConfig {
    pub max_seq_length:     usize,
    /// Only meaningful for encoder-decoder models
    pub decoder_max_length: usize,
    pub teacher_forcing:    bool,
    pub predict_eos_token:  bool,
    pub truncate_method:    TruncateMethod,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            max_seq_length:     256,
            decoder_max_length: 256,
            teacher_forcing:    false,
            predict_eos_token:  true,
            truncate_method:    TruncateMethod::Head,
        }
    }
}

/// One example after tokenisation, truncation and padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedExample {
    /// Padded to max_seq_length
    pub input_ids:      Vec<u32>,
    /// 1 = real token, 0 = padding
    pub attention_mask: Vec<u32>,
    /// 1 where the token is a prediction target
    pub loss_ids:       Vec<u32>,
    /// Number of real (non-pad) tokens
    pub real_len:       usize,
    pub guid:           String,
    pub tgt_text:       String,
}

impl TokenizedExample {
    /// The unpadded token ids
    pub fn real_ids(&self) -> &[u32] {
        &self.input_ids[..self.real_len]
    }
}

#[derive(Debug, Default)]
struct Part {
    ids:         Vec<u32>,
    loss_ids:    Vec<u32>,
    shortenable: bool,
}

impl Part {
    fn len(&self) -> usize {
        self.ids.len()
    }

    fn drop_front(&mut self, n: usize) {
        let n = n.min(self.len());
        self.ids.drain(..n);
        self.loss_ids.drain(..n);
    }

    fn drop_back(&mut self, n: usize) {
        let keep = self.len().saturating_sub(n);
        self.ids.truncate(keep);
        self.loss_ids.truncate(keep);
    }
}

// ─── PromptTokenizer ─────────────────────────────────────────────────────────
pub struct PromptTokenizer<'a> {
    tokenizer: &'a Tokenizer,
    eos_id:    u32,
    pad_id:    u32,
    config:    TokenizerConfig,
}

impl<'a> PromptTokenizer<'a> {
    pub fn new(tokenizer: &'a Tokenizer, config: TokenizerConfig) -> Result<Self> {
        anyhow::ensure!(config.max_seq_length > 0, "max_seq_length must be positive");
        anyhow::ensure!(config.decoder_max_length > 0, "decoder_max_length must be positive");
        let ids = special_token_ids(tokenizer)?;
        Ok(Self { tokenizer, eos_id: ids.eos, pad_id: ids.pad, config })
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let enc = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
        Ok(enc.get_ids().to_vec())
    }

    pub fn tokenize_one_example(&self, wrapped: &WrappedExample) -> Result<TokenizedExample> {
        let cfg       = &self.config;
        let mut parts = Vec::with_capacity(wrapped.spans.len());

        for span in &wrapped.spans {
            if span.is_mask() {
                if cfg.teacher_forcing {
                    let target  = wrapped.tgt_text.split('\n').next().unwrap_or_default();
                    let mut ids = self.encode(&format!(" {target}"))?;
                    if cfg.predict_eos_token {
                        ids.push(self.eos_id);
                    }
                    let loss_ids = vec![1; ids.len()];
                    parts.push(Part { ids, loss_ids, shortenable: false });
                    continue;
                }
                // Generation starts after the last input token
                if let Some(last) = parts.iter_mut().rev().find(|p| !p.ids.is_empty()) {
                    if let Some(flag) = last.loss_ids.last_mut() {
                        *flag = 1;
                    }
                }
                break;
            }

            if span.text.is_empty() {
                continue;
            }
            let ids      = self.encode(&span.text)?;
            let loss_ids = vec![span.loss as u32; ids.len()];
            parts.push(Part { ids, loss_ids, shortenable: span.shortenable });
        }

        self.truncate(&mut parts)?;

        let mut input_ids: Vec<u32> = parts.iter().flat_map(|p| p.ids.iter().copied()).collect();
        let mut loss_ids:  Vec<u32> = parts.iter().flat_map(|p| p.loss_ids.iter().copied()).collect();
        let real_len           = input_ids.len();
        let mut attention_mask = vec![1u32; real_len];

        input_ids.resize(cfg.max_seq_length, self.pad_id);
        loss_ids.resize(cfg.max_seq_length, 0);
        attention_mask.resize(cfg.max_seq_length, 0);

        Ok(TokenizedExample {
            input_ids,
            attention_mask,
            loss_ids,
            real_len,
            guid:     wrapped.guid.clone(),
            tgt_text: wrapped.tgt_text.clone(),
        })
    }

    fn truncate(&self, parts: &mut [Part]) -> Result<()> {
        let total  = parts.iter().map(Part::len).sum::<usize>();
        let excess = total.saturating_sub(self.config.max_seq_length);
        if excess == 0 {
            return Ok(());
        }

        match self.config.truncate_method {
            TruncateMethod::Head     => truncate_head(parts, excess),
            TruncateMethod::Tail     => truncate_tail(parts, excess),
            TruncateMethod::Balanced => truncate_balanced(parts, excess),
        }

        let remaining = parts.iter().map(Part::len).sum::<usize>();
        anyhow::ensure!(
            remaining <= self.config.max_seq_length,
            "Truncation cannot fit {} tokens into max_seq_length {}: \
             only the example input is shortenable",
            total,
            self.config.max_seq_length
        );
        Ok(())
    }
}

fn truncate_head(parts: &mut [Part], mut to_trunc: usize) {
    for part in parts.iter_mut().filter(|p| p.shortenable) {
        let n = to_trunc.min(part.len());
        part.drop_front(n);
        to_trunc -= n;
        if to_trunc == 0 {
            break;
        }
    }
}

fn truncate_tail(parts: &mut [Part], mut to_trunc: usize) {
    for part in parts.iter_mut().rev().filter(|p| p.shortenable) {
        let n = to_trunc.min(part.len());
        part.drop_back(n);
        to_trunc -= n;
        if to_trunc == 0 {
            break;
        }
    }
}

fn truncate_balanced(parts: &mut [Part], to_trunc: usize) {
    let lens: Vec<usize> = parts
        .iter()
        .map(|p| if p.shortenable { p.len() } else { 0 })
        .collect();
    let total: usize = lens.iter().sum();
    if total == 0 {
        return;
    }

    let shares: Vec<f64> = lens
        .iter()
        .map(|&l| l as f64 / total as f64 * to_trunc as f64)
        .collect();
    for (part, cut) in parts.iter_mut().zip(round_to_sum(&shares, to_trunc.min(total))) {
        part.drop_back(cut);
    }
}

/// Largest-remainder rounding: integers close to `values` summing to `target`.
fn round_to_sum(values: &[f64], target: usize) -> Vec<usize> {
    let mut out: Vec<usize> = values.iter().map(|v| v.floor() as usize).collect();
    let mut missing = target.saturating_sub(out.iter().sum());

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = values[a] - values[a].floor();
        let fb = values[b] - values[b].floor();
        fb.partial_cmp(&fa).unwrap_or(std::cmp::Ordering::Equal)
    });
    for idx in order {
        if missing == 0 {
            break;
        }
        if values[idx] > 0.0 {
            out[idx] += 1;
            missing -= 1;
        }
    }
    out
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::template::PromptTemplate;
    use crate::domain::example::InputExample;
    use crate::infra::tokenizer_store::tests::toy_tokenizer;

    const TEMPLATE: &str = r#"{"placeholder":"text_a"} Make a sentence {"mask"}"#;

    fn wrapped(text_a: &str, tgt: &str) -> WrappedExample {
        PromptTemplate::parse(TEMPLATE)
            .unwrap()
            .wrap_one_example(&InputExample::new("0", text_a, tgt))
    }

    fn config(max: usize, teacher_forcing: bool, method: TruncateMethod) -> TokenizerConfig {
        TokenizerConfig {
            max_seq_length: max,
            teacher_forcing,
            truncate_method: method,
            ..TokenizerConfig::default()
        }
    }

    #[test]
    fn test_teacher_forcing_marks_target_tokens() {
        let tok = toy_tokenizer();
        let pt  = PromptTokenizer::new(&tok, config(16, true, TruncateMethod::Head)).unwrap();
        let out = pt.tokenize_one_example(&wrapped("alice employer bank", "alice works at bank")).unwrap();

        // 3 input + 3 template + 4 target + eos
        assert_eq!(out.real_len, 11);
        assert_eq!(out.input_ids.len(), 16);
        assert_eq!(&out.loss_ids[..6], &[0, 0, 0, 0, 0, 0]);
        assert_eq!(&out.loss_ids[6..11], &[1, 1, 1, 1, 1]);
        assert!(out.loss_ids[11..].iter().all(|&l| l == 0));
        let eos = special_token_ids(&tok).unwrap().eos;
        assert_eq!(out.input_ids[10], eos);
        assert_eq!(out.attention_mask.iter().sum::<u32>(), 11);
    }

    #[test]
    fn test_generation_mode_stops_at_mask() {
        let tok = toy_tokenizer();
        let pt  = PromptTokenizer::new(&tok, config(16, false, TruncateMethod::Head)).unwrap();
        let out = pt.tokenize_one_example(&wrapped("alice employer bank", "alice works at bank")).unwrap();

        assert_eq!(out.real_len, 6);
        assert_eq!(out.loss_ids[5], 1);
        assert_eq!(out.loss_ids.iter().sum::<u32>(), 1);
        assert_eq!(out.real_ids().len(), 6);
    }

    #[test]
    fn test_head_truncation_drops_input_start() {
        let tok  = toy_tokenizer();
        let full = PromptTokenizer::new(&tok, config(32, false, TruncateMethod::Head)).unwrap()
            .tokenize_one_example(&wrapped("alice employer bank city paris", "x")).unwrap();
        let cut  = PromptTokenizer::new(&tok, config(6, false, TruncateMethod::Head)).unwrap()
            .tokenize_one_example(&wrapped("alice employer bank city paris", "x")).unwrap();

        assert_eq!(cut.real_len, 6);
        // Last 3 input tokens and the 3 template tokens survive
        assert_eq!(cut.real_ids(), &full.real_ids()[2..8]);
    }

    #[test]
    fn test_tail_truncation_drops_input_end() {
        let tok  = toy_tokenizer();
        let full = PromptTokenizer::new(&tok, config(32, false, TruncateMethod::Tail)).unwrap()
            .tokenize_one_example(&wrapped("alice employer bank city paris", "x")).unwrap();
        let cut  = PromptTokenizer::new(&tok, config(6, false, TruncateMethod::Tail)).unwrap()
            .tokenize_one_example(&wrapped("alice employer bank city paris", "x")).unwrap();

        assert_eq!(&cut.real_ids()[..3], &full.real_ids()[..3]);
        assert_eq!(&cut.real_ids()[3..], &full.real_ids()[5..8]);
    }

    #[test]
    fn test_truncation_fails_when_template_alone_is_too_long() {
        let tok = toy_tokenizer();
        let pt  = PromptTokenizer::new(&tok, config(2, false, TruncateMethod::Head)).unwrap();
        assert!(pt.tokenize_one_example(&wrapped("alice", "x")).is_err());
    }

    #[test]
    fn test_round_to_sum_preserves_total() {
        let rounded = round_to_sum(&[1.5, 0.0, 2.5, 1.0], 5);
        assert_eq!(rounded.iter().sum::<usize>(), 5);
        assert_eq!(rounded[1], 0);
    }

    #[test]
    fn test_balanced_truncation_only_shortens_input() {
        let tok = toy_tokenizer();
        let pt  = PromptTokenizer::new(&tok, config(5, false, TruncateMethod::Balanced)).unwrap();
        let out = pt.tokenize_one_example(&wrapped("alice employer bank city", "x")).unwrap();
        assert_eq!(out.real_len, 5);
    }

    #[test]
    fn test_truncate_method_parsing() {
        assert_eq!("head".parse::<TruncateMethod>().unwrap(), TruncateMethod::Head);
        assert_eq!("Balanced".parse::<TruncateMethod>().unwrap(), TruncateMethod::Balanced);
        assert!("middle".parse::<TruncateMethod>().is_err());
        assert_eq!(TruncateMethod::Tail.to_string(), "tail");
    }
}
