// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records the training loss to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch:    the epoch number (1, 2, 3, ...)
//   - avg_loss: mean per-batch loss over the epoch
//   - steps:    number of optimiser steps taken in the epoch
//
// Output file: {output_dir}/metrics.csv
//
// Example CSV output:
//   epoch,avg_loss,steps
//   1,41.236001,4518
//   2,28.914110,4518
//   ...
//
// The loss is summed over target tokens per example before
// averaging over the batch, so its scale grows with the length
// of the target sentences.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch:    usize,
    pub avg_loss: f64,
    pub steps:    usize,
}

impl EpochMetrics {
    pub fn new(epoch: usize, avg_loss: f64, steps: usize) -> Self {
        Self { epoch, avg_loss, steps }
    }
}

/// Appends epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "epoch,avg_loss,steps")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(f, "{},{:.6},{}", m.epoch, m.avg_loss, m.steps)?;

        tracing::debug!("Logged epoch {} metrics: avg_loss={:.4}", m.epoch, m.avg_loss);
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_appended_after_header() {
        let dir    = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(&EpochMetrics::new(1, 3.5, 10)).unwrap();
        logger.log(&EpochMetrics::new(2, 2.25, 10)).unwrap();

        let text = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["epoch,avg_loss,steps", "1,3.500000,10", "2,2.250000,10"]);
    }

    #[test]
    fn test_existing_file_keeps_its_rows() {
        let dir = tempfile::tempdir().unwrap();
        MetricsLogger::new(dir.path()).unwrap().log(&EpochMetrics::new(1, 1.0, 1)).unwrap();

        let logger = MetricsLogger::new(dir.path()).unwrap();
        let text   = fs::read_to_string(logger.csv_path()).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
