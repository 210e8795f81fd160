// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full prefix-tuning run in order:
//
//   Step 1: Load the WebNLG splits            (Layer 4 - data)
//   Step 2: Load / build PLM + tokenizer      (Layer 6 - infra)
//   Step 3: Parse the template, show example  (Layer 4 - data)
//   Step 4: Training data loader              (Layer 4 - data)
//   Step 5: Attach the prefix to the PLM      (Layer 5 - ml)
//   Step 6: Prepare the output directory      (Layer 6 - infra)
//   Step 7: Run the training loop             (Layer 5 - ml)
//   Step 8: Generate on validation + score    (Layer 5 - ml, metric)
//   Step 9: Persist template and generations  (Layer 6 - infra)
//
// Reference: Burn Book §5 (Training)

use anyhow::Result;
use burn::{module::AutodiffModule, tensor::backend::AutodiffBackend};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::application::pipeline::{self, BackendKind};
use crate::data::loader::{DatasetSplits, WebNlgProcessor};
use crate::data::template::{PromptTemplate, WEBNLG_TEMPLATE};
use crate::data::tokenize::TruncateMethod;
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::MetricsLogger,
    tokenizer_store::{special_token_ids, TokenizerStore},
};
use crate::ml::generation::GenerationConfig;
use crate::ml::prefix::PrefixTuningConfig;
use crate::ml::prompt_model::PromptForGeneration;
use crate::ml::trainer::run_training;

// ─── Training Configuration ──────────────────────────────────────────────────
// Every setting of a run. Saved next to the trained template so
// `evaluate` can rebuild exactly the same pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub dataset_dir:        String,
    /// HuggingFace-style GPT-2 directory; None → scratch model
    pub model_dir:          Option<String>,
    pub output_dir:         Option<String>,
    pub template:           String,
    pub max_seq_len:        usize,
    pub decoder_max_len:    usize,
    pub batch_size:         usize,
    pub epochs:             usize,
    pub lr:                 f64,
    pub num_token:          usize,
    pub mid_dim:            usize,
    pub prefix_dropout:     f64,
    pub truncate_method:    TruncateMethod,
    /// Print the running loss every this many steps (0 = never)
    pub log_every:          usize,
    /// Word-level vocabulary cap in scratch mode
    pub scratch_vocab_size: usize,
    pub generation:         GenerationConfig,
    pub backend:            BackendKind,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            dataset_dir:        "datasets/CondGen/webnlg_2017".to_string(),
            model_dir:          None,
            output_dir:         None,
            template:           WEBNLG_TEMPLATE.to_string(),
            max_seq_len:        256,
            decoder_max_len:    256,
            batch_size:         4,
            epochs:             10,
            lr:                 1e-3,
            num_token:          5,
            mid_dim:            512,
            prefix_dropout:     0.0,
            truncate_method:    TruncateMethod::Head,
            log_every:          100,
            scratch_vocab_size: 5000,
            generation:         GenerationConfig::default(),
            backend:            BackendKind::Wgpu,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(self.epochs > 0, "epochs must be positive");
        anyhow::ensure!(self.lr > 0.0, "lr must be positive, got {}", self.lr);
        anyhow::ensure!(self.num_token > 0, "num_token must be positive");
        anyhow::ensure!(self.mid_dim > 0, "mid_dim must be positive");
        anyhow::ensure!(self.max_seq_len > 1, "max_seq_len must be at least 2");
        anyhow::ensure!(
            (0.0..1.0).contains(&self.prefix_dropout),
            "prefix_dropout must be in [0, 1), got {}", self.prefix_dropout
        );
        self.generation.validate()
    }
}

/// What a finished run reports back to the CLI.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub epoch_losses:  Vec<f64>,
    pub num_evaluated: usize,
    pub score:         f64,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full pipeline on the configured backend
    pub fn execute(&self) -> Result<TrainReport> {
        self.config.validate()?;

        match self.config.backend {
            BackendKind::Wgpu => {
                let device = burn::backend::wgpu::WgpuDevice::default();
                tracing::info!("Using WGPU device: {:?}", device);
                self.run::<burn::backend::Autodiff<burn::backend::Wgpu>>(device)
            }
            BackendKind::Ndarray => {
                tracing::info!("Using NdArray (CPU) backend");
                self.run::<burn::backend::Autodiff<burn::backend::NdArray>>(Default::default())
            }
        }
    }

    fn run<B: AutodiffBackend>(&self, device: B::Device) -> Result<TrainReport> {
        let cfg = &self.config;

        // ── Step 1: Load the dataset splits ───────────────────────────────────
        tracing::info!("Loading WebNLG from '{}'", cfg.dataset_dir);
        let splits = DatasetSplits::load(&WebNlgProcessor::new(), Path::new(&cfg.dataset_dir))?;
        tracing::info!(
            "Loaded {} train, {} validation, {} test examples",
            splits.train.len(), splits.validation.len(), splits.test.len()
        );
        let first = splits.train.first()
            .ok_or_else(|| anyhow::anyhow!("No training examples in '{}'", cfg.dataset_dir))?;

        // ── Step 2: PLM + tokenizer ───────────────────────────────────────────
        let plm = pipeline::load_plm::<B>(cfg, &splits.train, &device)?;
        let eos = special_token_ids(&plm.tokenizer)?.eos;

        // ── Step 3: Template ──────────────────────────────────────────────────
        let template = PromptTemplate::parse(&cfg.template)?;
        println!("{}", template.wrap_one_example(first));

        // ── Step 4: Training data loader ──────────────────────────────────────
        let train_loader = pipeline::build_loader::<B>(
            &splits.train, &template, &plm.tokenizer, cfg, true, &device,
        )?;

        // ── Step 5: Frozen PLM + trainable prefix ─────────────────────────────
        let prefix_cfg = PrefixTuningConfig::for_plm(&plm.config)
            .with_num_token(cfg.num_token)
            .with_mid_dim(cfg.mid_dim)
            .with_prefix_dropout(cfg.prefix_dropout);

        // ── Step 6: Output directory (optional) ───────────────────────────────
        let ckpt = match &cfg.output_dir {
            Some(dir) => {
                let ckpt = CheckpointManager::new(dir)?;
                ckpt.save_config(cfg)?;
                if plm.scratch {
                    ckpt.save_scratch_plm(&plm.config, &plm.model)?;
                    TokenizerStore::new(ckpt.dir()).save(&plm.tokenizer)?;
                }
                Some(ckpt)
            }
            None => None,
        };
        let metrics = match &ckpt {
            Some(ckpt) => Some(MetricsLogger::new(ckpt.dir())?),
            None       => None,
        };

        let model = PromptForGeneration::new(plm.model, prefix_cfg.init::<B>(&device));

        // ── Step 7: Train ─────────────────────────────────────────────────────
        let (model, epoch_losses) = run_training(cfg, model, &train_loader, metrics.as_ref())?;
        if let Some(ckpt) = &ckpt {
            ckpt.save_template(&model.template)?;
        }

        // ── Step 8: Validation generation (inner backend, dropout off) ────────
        let model_valid = model.valid();
        let (output, score) = pipeline::generate_and_score::<B::InnerBackend>(
            &model_valid, &splits.validation, &template, &plm.tokenizer, cfg, eos, &device,
        )?;

        // ── Step 9: Persist generations ───────────────────────────────────────
        if let Some(ckpt) = &ckpt {
            ckpt.save_generations(&output.records())?;
        }

        Ok(TrainReport { epoch_losses, num_evaluated: output.len(), score })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::loader::tests::write_dataset;

    /// Small and fast: scratch PLM on the CPU, a couple of decoding steps.
    pub(crate) fn smoke_config(dataset_dir: &Path, output_dir: Option<&Path>) -> TrainConfig {
        TrainConfig {
            dataset_dir: dataset_dir.display().to_string(),
            output_dir:  output_dir.map(|p| p.display().to_string()),
            max_seq_len: 32,
            batch_size:  2,
            epochs:      1,
            mid_dim:     8,
            generation:  GenerationConfig {
                num_beams:      2,
                max_new_tokens: Some(3),
                min_length:     0,
                ..GenerationConfig::default()
            },
            backend:     BackendKind::Ndarray,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_defaults_match_the_reference_run() {
        let cfg = TrainConfig::default();
        assert_eq!((cfg.batch_size, cfg.epochs, cfg.num_token, cfg.max_seq_len), (4, 10, 5, 256));
        assert_eq!(cfg.lr, 1e-3);
        assert_eq!(cfg.generation.num_beams, 5);
        assert_eq!(cfg.template, r#"{"placeholder":"text_a"} Make a sentence {"mask"}"#);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        assert!(TrainConfig { batch_size: 0, ..TrainConfig::default() }.validate().is_err());
        assert!(TrainConfig { lr: 0.0, ..TrainConfig::default() }.validate().is_err());
        assert!(TrainConfig { prefix_dropout: 1.0, ..TrainConfig::default() }.validate().is_err());
    }

    #[test]
    fn test_end_to_end_scratch_run() {
        let data = tempfile::tempdir().unwrap();
        write_dataset(data.path());

        let report = TrainUseCase::new(smoke_config(data.path(), None)).execute().unwrap();
        assert_eq!(report.epoch_losses.len(), 1);
        assert_eq!(report.num_evaluated, 2);
        assert!((0.0..=1.0).contains(&report.score));
    }

    #[test]
    fn test_output_directory_is_populated() {
        let data = tempfile::tempdir().unwrap();
        let out  = tempfile::tempdir().unwrap();
        write_dataset(data.path());

        TrainUseCase::new(smoke_config(data.path(), Some(out.path()))).execute().unwrap();

        for file in ["train_config.json", "prefix_template.mpk", "metrics.csv",
                     "generations.jsonl", "scratch_plm.mpk", "scratch_plm.json", "tokenizer.json"] {
            assert!(out.path().join(file).exists(), "missing {file}");
        }
        let generations = std::fs::read_to_string(out.path().join("generations.jsonl")).unwrap();
        assert_eq!(generations.lines().count(), 2);
    }

    #[test]
    fn test_empty_training_split_is_an_error() {
        let data = tempfile::tempdir().unwrap();
        for stem in ["train", "dev", "test"] {
            std::fs::write(data.path().join(format!("{stem}.json")), r#"{"entries": []}"#).unwrap();
        }
        assert!(TrainUseCase::new(smoke_config(data.path(), None)).execute().is_err());
    }
}
