// ============================================================
// Layer 2 — Shared Pipeline Steps
// ============================================================
// Steps used by both the `train` and `evaluate` workflows:
//
//   - pick the compute backend
//   - obtain a PLM + tokenizer (pretrained directory, or a small
//     randomly initialised GPT-2 when none is given)
//   - build a data loader for one split
//   - generate for a split and score it

use anyhow::Result;
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::application::train_use_case::TrainConfig;
use crate::data::dataloader::PromptDataLoader;
use crate::data::template::PromptTemplate;
use crate::data::tokenize::{PromptTokenizer, TokenizerConfig};
use crate::domain::example::InputExample;
use crate::infra::plm_loader::PlmLoader;
use crate::infra::tokenizer_store::build_word_level;
use crate::metric::generation_metric;
use crate::ml::evaluator::{evaluate, EvalOutput};
use crate::ml::gpt2::{Gpt2Config, Gpt2Model};
use crate::ml::prompt_model::PromptForGeneration;

pub const METRIC: &str = "sentence_bleu";

// ─── Backend selection ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// GPU through WGPU (Vulkan / Metal / DX12)
    Wgpu,
    /// Pure-Rust CPU backend
    Ndarray,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wgpu"    => Ok(BackendKind::Wgpu),
            "ndarray" => Ok(BackendKind::Ndarray),
            other     => Err(format!("unknown backend '{other}' (wgpu, ndarray)")),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BackendKind::Wgpu    => "wgpu",
            BackendKind::Ndarray => "ndarray",
        })
    }
}

// ─── PLM ─────────────────────────────────────────────────────────────────────
pub struct Plm<B: Backend> {
    pub config:    Gpt2Config,
    pub model:     Gpt2Model<B>,
    pub tokenizer: Tokenizer,
    /// True when the weights are random rather than pretrained
    pub scratch:   bool,
}

/// Load the pretrained model from `model_dir`, or build a scratch one from `corpus`.
pub fn load_plm<B: Backend>(
    cfg:    &TrainConfig,
    corpus: &[InputExample],
    device: &B::Device,
) -> Result<Plm<B>> {
    if let Some(dir) = &cfg.model_dir {
        let plm = PlmLoader::new(dir).load::<B>(device)?;
        ensure_context_fits(cfg, &plm.config)?;
        return Ok(Plm { config: plm.config, model: plm.model, tokenizer: plm.tokenizer, scratch: false });
    }

    tracing::warn!(
        "No --model-dir given: using a randomly initialised GPT-2 and a word-level tokenizer. \
         Scores will be meaningless; use this only to exercise the pipeline."
    );
    let mut texts: Vec<String> = corpus
        .iter()
        .flat_map(|ex| [ex.text_a.clone(), ex.tgt_text.clone()])
        .collect();
    texts.push(cfg.template.clone());

    let tokenizer = build_word_level(&texts, cfg.scratch_vocab_size)?;
    let config    = Gpt2Config::tiny(tokenizer.get_vocab_size(true));
    config.validate()?;
    ensure_context_fits(cfg, &config)?;
    let model = config.init::<B>(device);
    tracing::info!(
        "Scratch GPT-2: {} layers, n_embd={}, vocab={}",
        config.n_layer, config.n_embd, config.vocab_size
    );

    Ok(Plm { config, model, tokenizer, scratch: true })
}

/// Prefix tokens and the longest input row must fit the PLM's position table.
pub fn ensure_context_fits(cfg: &TrainConfig, config: &Gpt2Config) -> Result<()> {
    anyhow::ensure!(
        cfg.max_seq_len + cfg.num_token <= config.n_positions,
        "max_seq_len ({}) + num_token ({}) exceeds the model's {} positions",
        cfg.max_seq_len, cfg.num_token, config.n_positions
    );
    Ok(())
}

// ─── Loaders ─────────────────────────────────────────────────────────────────
pub fn tokenizer_config(cfg: &TrainConfig, teacher_forcing: bool) -> TokenizerConfig {
    TokenizerConfig {
        max_seq_length:     cfg.max_seq_len,
        decoder_max_length: cfg.decoder_max_len,
        teacher_forcing,
        predict_eos_token:  true,
        truncate_method:    cfg.truncate_method,
    }
}

/// Training loaders use teacher forcing and shuffle; evaluation loaders do neither.
pub fn build_loader<B: Backend>(
    examples:  &[InputExample],
    template:  &PromptTemplate,
    tokenizer: &Tokenizer,
    cfg:       &TrainConfig,
    training:  bool,
    device:    &B::Device,
) -> Result<PromptDataLoader<B>> {
    let prompt_tokenizer = PromptTokenizer::new(tokenizer, tokenizer_config(cfg, training))?;
    PromptDataLoader::new(examples, template, &prompt_tokenizer, cfg.batch_size, training, device.clone())
}

// ─── Scoring ─────────────────────────────────────────────────────────────────
/// Generate for every example of `examples` and compute the mean sentence BLEU.
pub fn generate_and_score<B: Backend>(
    model:     &PromptForGeneration<B>,
    examples:  &[InputExample],
    template:  &PromptTemplate,
    tokenizer: &Tokenizer,
    cfg:       &TrainConfig,
    eos:       u32,
    device:    &B::Device,
) -> Result<(EvalOutput, f64)> {
    let loader = build_loader::<B>(examples, template, tokenizer, cfg, false, device)?;
    let output = evaluate(model, &loader, tokenizer, &cfg.generation, eos)?;
    let score  = generation_metric(&output.generated, &output.groundtruth, METRIC)?;
    tracing::info!("{} over {} examples: {:.4}", METRIC, output.len(), score);
    Ok((output, score))
}
