// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Persists what a training run produces so `evaluate` can pick
// it up later. Only the prefix template is saved: the PLM is
// frozen and is reloaded from its own directory.
//
// Files written to the output directory:
//
//   output/
//     train_config.json       ← every setting of the run
//     prefix_template.mpk     ← trained template (CompactRecorder)
//     metrics.csv             ← per-epoch loss (see metrics.rs)
//     generations.jsonl       ← one {guid, generated, reference} per line
//
// Without a pretrained model directory the PLM is a randomly
// initialised small GPT-2; its weights (full precision), config
// and word-level tokenizer are saved too (scratch_plm.mpk,
// scratch_plm.json, tokenizer.json) so the run can be evaluated
// later.
//
// Burn's CompactRecorder:
//   - Serialises module parameters to MessagePack (half precision)
//   - Type-safe: loading fails if the architecture doesn't match
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::gpt2::{Gpt2Config, Gpt2Model};
use crate::ml::prefix::PrefixTuningTemplate;

const CONFIG_FILE:      &str = "train_config.json";
const TEMPLATE_FILE:    &str = "prefix_template";
const GENERATIONS_FILE: &str = "generations.jsonl";
const SCRATCH_PLM_FILE: &str = "scratch_plm";

/// One generated sentence next to its reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub guid:      String,
    pub generated: String,
    pub reference: String,
}

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Opens an existing output directory without creating anything.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        anyhow::ensure!(dir.is_dir(), "Output directory '{}' not found. Have you run 'train --output-dir' first?", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save the trained template. The recorder adds the file extension.
    pub fn save_template<B: Backend>(&self, template: &PrefixTuningTemplate<B>) -> Result<()> {
        let path = self.dir.join(TEMPLATE_FILE);
        CompactRecorder::new()
            .record(template.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save template to '{}'", path.display()))?;
        tracing::info!("Saved prefix template to '{}'", path.display());
        Ok(())
    }

    /// Restore saved weights into `template`, which must have the same shape.
    pub fn load_template<B: Backend>(
        &self,
        template: PrefixTuningTemplate<B>,
        device:   &B::Device,
    ) -> Result<PrefixTuningTemplate<B>> {
        let path   = self.dir.join(TEMPLATE_FILE);
        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!("Cannot load template '{}'. Have you trained it first?", path.display())
            })?;
        Ok(template.load_record(record))
    }

    pub fn save_scratch_plm<B: Backend>(&self, config: &Gpt2Config, model: &Gpt2Model<B>) -> Result<()> {
        let path = self.dir.join(SCRATCH_PLM_FILE);
        config
            .save(path.with_extension("json"))
            .with_context(|| format!("Cannot write '{}'", path.with_extension("json").display()))?;
        NamedMpkFileRecorder::<FullPrecisionSettings>::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save PLM to '{}'", path.display()))?;
        tracing::info!("Saved randomly initialised PLM to '{}'", path.display());
        Ok(())
    }

    /// `None` when the run used a pretrained model directory.
    pub fn load_scratch_plm<B: Backend>(&self, device: &B::Device) -> Result<Option<(Gpt2Config, Gpt2Model<B>)>> {
        let path = self.dir.join(SCRATCH_PLM_FILE);
        let config_path = path.with_extension("json");
        if !config_path.exists() {
            return Ok(None);
        }

        let config = Gpt2Config::load(&config_path)
            .map_err(|e| anyhow::anyhow!("Cannot parse '{}': {e:?}", config_path.display()))?;
        let record = NamedMpkFileRecorder::<FullPrecisionSettings>::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load PLM '{}'", path.display()))?;
        let model = config.init::<B>(device).load_record(record);
        Ok(Some((config, model)))
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Cannot parse config '{}'", path.display()))
    }

    pub fn save_generations(&self, records: &[GenerationRecord]) -> Result<PathBuf> {
        let path = self.dir.join(GENERATIONS_FILE);
        let file = fs::File::create(&path)
            .with_context(|| format!("Cannot create '{}'", path.display()))?;
        let mut out = BufWriter::new(file);
        for record in records {
            serde_json::to_writer(&mut out, record)?;
            writeln!(out)?;
        }
        out.flush()?;
        tracing::info!("Wrote {} generations to '{}'", records.len(), path.display());
        Ok(path)
    }
}
