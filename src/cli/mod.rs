// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, built on `clap`.
// All work is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`    — prefix-tunes GPT-2 on WebNLG, then scores
//                   the validation split with sentence BLEU
//   2. `evaluate` — reloads a saved prefix and scores a split
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, TrainArgs};

/// The main CLI struct
#[derive(Parser, Debug)]
#[command(
    name = "prefix-tuning-gen",
    version,
    about = "Prefix-tune a frozen GPT-2 for WebNLG data-to-text generation."
)]
pub struct Cli {
    /// The subcommand to run (train or evaluate)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route to the matching use case
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Evaluate(args) => run_evaluate(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting prefix tuning on '{}'", args.dataset_dir);

    let report = TrainUseCase::new(args.into()).execute()?;

    println!("{}", report.score);
    tracing::info!(
        "Done: {} epochs, final avg_loss={:.4}, {} validation examples scored",
        report.epoch_losses.len(),
        report.epoch_losses.last().copied().unwrap_or(f64::NAN),
        report.num_evaluated
    );
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::evaluate_use_case::{EvaluateConfig, EvaluateUseCase};

    let config = EvaluateConfig {
        output_dir: args.output_dir,
        split:      args.split.parse()?,
        backend:    args.backend,
        batch_size: args.batch_size,
    };
    let report = EvaluateUseCase::new(config).execute()?;

    println!("{}", report.score);
    tracing::info!("{} examples scored", report.num_evaluated);
    Ok(())
}
