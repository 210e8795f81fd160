// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Prefix tuning: the GPT-2 weights stay frozen, AdamW only sees
// the template's parameters.
//
//   for epoch in 0..epochs:
//     for batch in loader (reshuffled every epoch):
//       loss  = model.forward_loss(batch)
//       grads = loss.backward()           ← PLM params are no_grad
//       template = AdamW.step(lr, template, grads of template)
//
// The running loss resets at the start of every epoch and is
// printed as `Epoch e, average loss: x` whenever
// step % log_every == 1 (steps and epochs count from 0, so
// log_every == 1 never prints).
//
// Reference: Loshchilov & Hutter (2019) AdamW
//            Li & Liang (2021) Prefix-Tuning

use anyhow::Result;
use burn::{
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::dataloader::PromptDataLoader;
use crate::infra::metrics::{EpochMetrics, MetricsLogger};
use crate::ml::prompt_model::PromptForGeneration;

/// Train the template in place. Returns the model and the mean loss of every epoch.
pub fn run_training<B: AutodiffBackend>(
    cfg:     &TrainConfig,
    model:   PromptForGeneration<B>,
    loader:  &PromptDataLoader<B>,
    metrics: Option<&MetricsLogger>,
) -> Result<(PromptForGeneration<B>, Vec<f64>)> {
    anyhow::ensure!(!loader.is_empty(), "Training set is empty");
    let mut model = model;

    // ── AdamW optimiser ───────────────────────────────────────────────────────
    // m = β1*m + (1-β1)*g
    // v = β2*v + (1-β2)*g²
    // θ = θ - lr * (m / (√v + ε) + λθ)      λ = 0 here
    let mut optim = AdamWConfig::new()
        .with_epsilon(1e-6)
        .with_weight_decay(0.0)
        .init::<B, _>();

    tracing::info!(
        "Training prefix for {} epochs, {} batches per epoch (lr={})",
        cfg.epochs, loader.num_batches(), cfg.lr
    );

    let mut epoch_losses = Vec::with_capacity(cfg.epochs);

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 0..cfg.epochs {
        let mut tot_loss = 0.0f64;
        let mut steps    = 0usize;

        for (step, batch) in loader.iter().enumerate() {
            let loss = model.forward_loss(&batch);

            let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
            tot_loss += loss_val;
            steps    += 1;

            // Backward pass + AdamW update of the template only
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model.template);
            model.template = optim.step(cfg.lr, model.template, grads);

            if let Some(line) = progress_line(epoch, step, tot_loss, cfg.log_every) {
                println!("{line}");
            }
        }

        let avg_loss = tot_loss / steps as f64;
        tracing::info!("Epoch {:>3}/{} done | avg_loss={:.4}", epoch + 1, cfg.epochs, avg_loss);

        if let Some(logger) = metrics {
            logger.log(&EpochMetrics::new(epoch + 1, avg_loss, steps))?;
        }
        epoch_losses.push(avg_loss);
    }

    tracing::info!("Training complete!");
    Ok((model, epoch_losses))
}

/// Running-average loss line for `step`, when that step is due for one.
fn progress_line(epoch: usize, step: usize, tot_loss: f64, log_every: usize) -> Option<String> {
    (log_every > 0 && step % log_every == 1)
        .then(|| format!("Epoch {}, average loss: {}", epoch, tot_loss / (step + 1) as f64))
}
