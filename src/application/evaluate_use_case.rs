// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// Scores a template saved by `train --output-dir` on a split:
//
//   Step 1: Read train_config.json from the output dir
//   Step 2: Load the requested split
//   Step 3: Rebuild the PLM (pretrained dir or saved scratch PLM)
//   Step 4: Restore the trained prefix
//   Step 5: Generate + sentence BLEU

use anyhow::{Context, Result};
use burn::prelude::*;
use std::path::Path;

use crate::application::pipeline::{self, BackendKind, Plm};
use crate::application::train_use_case::TrainConfig;
use crate::data::loader::WebNlgProcessor;
use crate::data::template::PromptTemplate;
use crate::domain::traits::{DataProcessor, Split};
use crate::infra::{
    checkpoint::CheckpointManager,
    plm_loader::PlmLoader,
    tokenizer_store::{special_token_ids, TokenizerStore},
};
use crate::ml::prefix::PrefixTuningConfig;
use crate::ml::prompt_model::PromptForGeneration;

#[derive(Debug, Clone)]
pub struct EvaluateConfig {
    pub output_dir: String,
    pub split:      Split,
    pub backend:    BackendKind,
    /// Overrides the saved batch size
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct EvalReport {
    pub num_evaluated: usize,
    pub score:         f64,
}

pub struct EvaluateUseCase {
    config: EvaluateConfig,
}

impl EvaluateUseCase {
    pub fn new(config: EvaluateConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<EvalReport> {
        match self.config.backend {
            BackendKind::Wgpu => {
                let device = burn::backend::wgpu::WgpuDevice::default();
                tracing::info!("Using WGPU device: {:?}", device);
                self.run::<burn::backend::Wgpu>(device)
            }
            BackendKind::Ndarray => {
                tracing::info!("Using NdArray (CPU) backend");
                self.run::<burn::backend::NdArray>(Default::default())
            }
        }
    }

    fn run<B: Backend>(&self, device: B::Device) -> Result<EvalReport> {
        // ── Step 1: Saved configuration ───────────────────────────────────────
        let ckpt    = CheckpointManager::open(&self.config.output_dir)?;
        let mut cfg = ckpt.load_config()?;
        if let Some(batch_size) = self.config.batch_size {
            cfg.batch_size = batch_size;
        }
        cfg.validate()?;

        // ── Step 2: Split ─────────────────────────────────────────────────────
        let examples = WebNlgProcessor::new()
            .get_examples(Path::new(&cfg.dataset_dir), self.config.split)?;
        tracing::info!("Evaluating on {} {:?} examples", examples.len(), self.config.split);

        // ── Step 3: PLM ───────────────────────────────────────────────────────
        let plm = restore_plm::<B>(&cfg, &ckpt, &device)?;
        pipeline::ensure_context_fits(&cfg, &plm.config)?;
        let eos = special_token_ids(&plm.tokenizer)?.eos;

        // ── Step 4: Trained prefix ────────────────────────────────────────────
        let prefix = PrefixTuningConfig::for_plm(&plm.config)
            .with_num_token(cfg.num_token)
            .with_mid_dim(cfg.mid_dim)
            .with_prefix_dropout(cfg.prefix_dropout)
            .init::<B>(&device);
        let prefix = ckpt.load_template(prefix, &device)?;
        let model  = PromptForGeneration::new(plm.model, prefix);

        // ── Step 5: Generate and score ────────────────────────────────────────
        let template = PromptTemplate::parse(&cfg.template)?;
        let (output, score) = pipeline::generate_and_score(
            &model, &examples, &template, &plm.tokenizer, &cfg, eos, &device,
        )?;

        Ok(EvalReport { num_evaluated: output.len(), score })
    }
}

/// Same PLM the template was trained against.
fn restore_plm<B: Backend>(cfg: &TrainConfig, ckpt: &CheckpointManager, device: &B::Device) -> Result<Plm<B>> {
    if let Some(dir) = &cfg.model_dir {
        let plm = PlmLoader::new(dir).load::<B>(device)?;
        return Ok(Plm { config: plm.config, model: plm.model, tokenizer: plm.tokenizer, scratch: false });
    }

    let (config, model) = ckpt
        .load_scratch_plm::<B>(device)?
        .with_context(|| format!("'{}' has neither a model_dir nor a saved scratch PLM", ckpt.dir().display()))?;
    let tokenizer = TokenizerStore::new(ckpt.dir()).load()?;
    Ok(Plm { config, model, tokenizer, scratch: true })
}
