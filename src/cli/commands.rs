// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `evaluate`, and all
// their configurable flags. Defaults reproduce the reference
// WebNLG prefix-tuning run.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → usize, f64, etc.)
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

use crate::application::pipeline::BackendKind;
use crate::application::train_use_case::TrainConfig;
use crate::data::template::WEBNLG_TEMPLATE;
use crate::data::tokenize::TruncateMethod;
use crate::ml::generation::GenerationConfig;

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a prefix on WebNLG and score the validation split
    Train(TrainArgs),

    /// Score a prefix saved by `train --output-dir`
    Evaluate(EvaluateArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Directory with train.json, dev.json and test.json
    #[arg(long, default_value = "datasets/CondGen/webnlg_2017")]
    pub dataset_dir: String,

    /// Pretrained GPT-2 directory (config.json, tokenizer.json,
    /// model.safetensors). Without it a small random GPT-2 is used.
    #[arg(long)]
    pub model_dir: Option<String>,

    /// Where to save the trained template, config, metrics and generations
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Prompt template text
    #[arg(long, default_value = WEBNLG_TEMPLATE)]
    pub template: String,

    /// Tokens per input sequence (prompt + target), including padding
    #[arg(long, default_value_t = 256)]
    pub max_seq_len: usize,

    /// Target length budget (kept for encoder-decoder models)
    #[arg(long, default_value_t = 256)]
    pub decoder_max_len: usize,

    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    /// AdamW learning rate for the prefix parameters
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    /// Number of virtual prefix tokens
    #[arg(long, default_value_t = 5)]
    pub num_token: usize,

    /// Hidden size of the prefix reparameterisation MLP
    #[arg(long, default_value_t = 512)]
    pub mid_dim: usize,

    #[arg(long, default_value_t = 0.0)]
    pub prefix_dropout: f64,

    /// head | tail | balanced
    #[arg(long, default_value = "head", value_parser = parse_truncate_method)]
    pub truncate_method: TruncateMethod,

    /// Print the running loss every N steps
    #[arg(long, default_value_t = 100)]
    pub log_every: usize,

    /// Vocabulary cap of the word-level tokenizer (no --model-dir only)
    #[arg(long, default_value_t = 5000)]
    pub scratch_vocab_size: usize,

    #[arg(long, default_value_t = 5)]
    pub num_beams: usize,

    /// Maximum sequence length, prompt included
    #[arg(long, default_value_t = 512)]
    pub max_length: usize,

    /// EOS is blocked until the sequence (prompt included) is this long
    #[arg(long, default_value_t = 5)]
    pub min_length: usize,

    #[arg(long, default_value_t = 1.0)]
    pub repetition_penalty: f64,

    /// wgpu | ndarray
    #[arg(long, default_value = "wgpu")]
    pub backend: BackendKind,
}

fn parse_truncate_method(s: &str) -> Result<TruncateMethod, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            dataset_dir:        a.dataset_dir,
            model_dir:          a.model_dir,
            output_dir:         a.output_dir,
            template:           a.template,
            max_seq_len:        a.max_seq_len,
            decoder_max_len:    a.decoder_max_len,
            batch_size:         a.batch_size,
            epochs:             a.epochs,
            lr:                 a.lr,
            num_token:          a.num_token,
            mid_dim:            a.mid_dim,
            prefix_dropout:     a.prefix_dropout,
            truncate_method:    a.truncate_method,
            log_every:          a.log_every,
            scratch_vocab_size: a.scratch_vocab_size,
            generation: GenerationConfig {
                num_beams:          a.num_beams,
                max_length:         a.max_length,
                min_length:         a.min_length,
                repetition_penalty: a.repetition_penalty,
                ..GenerationConfig::default()
            },
            backend:            a.backend,
        }
    }
}

/// All arguments for the `evaluate` command
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Directory written by `train --output-dir`
    #[arg(long)]
    pub output_dir: String,

    /// validation | test
    #[arg(long, default_value = "validation")]
    pub split: String,

    /// Override the batch size saved with the run
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// wgpu | ndarray
    #[arg(long, default_value = "wgpu")]
    pub backend: BackendKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn train_args(extra: &[&str]) -> TrainConfig {
        let mut argv = vec!["prefix-tuning-gen", "train"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Train(args) => args.into(),
            other => panic!("expected train, got {other:?}"),
        }
    }

    #[test]
    fn test_train_defaults_equal_config_defaults() {
        let cfg = train_args(&[]);
        assert_eq!(cfg, TrainConfig::default());
        assert_eq!(cfg.template, r#"{"placeholder":"text_a"} Make a sentence {"mask"}"#);
    }

    #[test]
    fn test_flags_reach_the_config() {
        let cfg = train_args(&[
            "--epochs", "2", "--num-beams", "1", "--backend", "ndarray",
            "--truncate-method", "tail", "--model-dir", "gpt2",
        ]);
        assert_eq!(cfg.epochs, 2);
        assert_eq!(cfg.generation.num_beams, 1);
        assert_eq!(cfg.backend, BackendKind::Ndarray);
        assert_eq!(cfg.truncate_method, TruncateMethod::Tail);
        assert_eq!(cfg.model_dir.as_deref(), Some("gpt2"));
    }

    #[test]
    fn test_bad_backend_is_rejected() {
        assert!(Cli::try_parse_from(["prefix-tuning-gen", "train", "--backend", "cuda"]).is_err());
    }

    #[test]
    fn test_evaluate_requires_output_dir() {
        assert!(Cli::try_parse_from(["prefix-tuning-gen", "evaluate"]).is_err());
        assert!(Cli::try_parse_from(["prefix-tuning-gen", "evaluate", "--output-dir", "run"]).is_ok());
    }
}
