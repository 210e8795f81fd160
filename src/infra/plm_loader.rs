// ============================================================
// Layer 6 — Pretrained Model Loader
// ============================================================
// Reads a HuggingFace-style GPT-2 directory:
//
//   model_dir/
//     config.json         ← vocab_size, n_positions, n_embd, n_layer, n_head, ...
//     tokenizer.json      ← byte-level BPE tokenizer
//     model.safetensors   ← F32 weights, names with or without "transformer."
//
// and copies every tensor into a freshly built `Gpt2Model`.
// Buffers such as `h.N.attn.bias` (the causal mask) and `lm_head.weight`
// (tied to wte) are ignored.

use anyhow::{Context, Result};
use burn::{module::Param, nn::Linear, prelude::*, tensor::TensorData};
use safetensors::{Dtype, SafeTensors};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use crate::ml::gpt2::{Gpt2Config, Gpt2LayerNorm, Gpt2Model};

const CONFIG_FILE:    &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE:   &str = "model.safetensors";

/// The subset of `config.json` needed to rebuild the architecture.
#[derive(Debug, Deserialize)]
struct RawGpt2Config {
    vocab_size:  usize,
    #[serde(default)]
    n_positions: Option<usize>,
    /// Older exports only carry the context size
    #[serde(default)]
    n_ctx:       Option<usize>,
    n_embd:      usize,
    n_layer:     usize,
    n_head:      usize,
    #[serde(default = "default_layer_norm_epsilon")]
    layer_norm_epsilon: f64,
    #[serde(default = "default_dropout")]
    resid_pdrop: f64,
}

fn default_layer_norm_epsilon() -> f64 { 1e-5 }
fn default_dropout() -> f64 { 0.1 }

pub struct PretrainedPlm<B: Backend> {
    pub config:    Gpt2Config,
    pub model:     Gpt2Model<B>,
    pub tokenizer: Tokenizer,
}

pub struct PlmLoader {
    dir: PathBuf,
}

impl PlmLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load<B: Backend>(&self, device: &B::Device) -> Result<PretrainedPlm<B>> {
        anyhow::ensure!(self.dir.is_dir(), "Model directory '{}' not found", self.dir.display());

        let config    = self.load_config()?;
        let tokenizer = self.load_tokenizer()?;
        let model     = self.load_model::<B>(&config, device)?;

        anyhow::ensure!(
            tokenizer.get_vocab_size(true) <= config.vocab_size,
            "Tokenizer has {} tokens but the model only {}",
            tokenizer.get_vocab_size(true), config.vocab_size
        );
        tracing::info!(
            "Loaded GPT-2 from '{}': {} layers, n_embd={}, n_head={}, vocab={}",
            self.dir.display(), config.n_layer, config.n_embd, config.n_head, config.vocab_size
        );
        Ok(PretrainedPlm { config, model, tokenizer })
    }

    pub fn load_config(&self) -> Result<Gpt2Config> {
        let path = self.dir.join(CONFIG_FILE);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        let raw: RawGpt2Config = serde_json::from_str(&text)
            .with_context(|| format!("Cannot parse '{}'", path.display()))?;

        let n_positions = raw.n_positions
            .or(raw.n_ctx)
            .with_context(|| format!("'{}' has neither n_positions nor n_ctx", path.display()))?;

        let config = Gpt2Config::new(raw.vocab_size, n_positions, raw.n_embd, raw.n_layer, raw.n_head)
            .with_layer_norm_epsilon(raw.layer_norm_epsilon)
            .with_dropout(raw.resid_pdrop);
        config.validate()?;
        Ok(config)
    }

    pub fn load_tokenizer(&self) -> Result<Tokenizer> {
        let path = self.dir.join(TOKENIZER_FILE);
        Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))
    }

    pub fn load_model<B: Backend>(&self, config: &Gpt2Config, device: &B::Device) -> Result<Gpt2Model<B>> {
        let path  = self.dir.join(WEIGHTS_FILE);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        let tensors = SafeTensors::deserialize(&bytes)
            .map_err(|e| anyhow::anyhow!("Cannot parse '{}': {}", path.display(), e))?;

        let store = WeightStore::new(&tensors, &path);
        let model = config.init::<B>(device);
        store.fill(model, config, device)
    }
}

// ─── WeightStore ─────────────────────────────────────────────────────────────
struct WeightStore<'a> {
    tensors: &'a SafeTensors<'a>,
    prefix:  &'static str,
    path:    &'a Path,
}

impl<'a> WeightStore<'a> {
    fn new(tensors: &'a SafeTensors<'a>, path: &'a Path) -> Self {
        let prefixed = tensors.names().iter().any(|n| n.starts_with("transformer."));
        Self { tensors, prefix: if prefixed { "transformer." } else { "" }, path }
    }

    fn get<B: Backend, const D: usize>(
        &self,
        name:   &str,
        shape:  [usize; D],
        device: &B::Device,
    ) -> Result<Tensor<B, D>> {
        let full = format!("{}{}", self.prefix, name);
        let view = self.tensors
            .tensor(&full)
            .map_err(|e| anyhow::anyhow!("'{}' in '{}': {}", full, self.path.display(), e))?;

        anyhow::ensure!(view.dtype() == Dtype::F32, "'{}' is {:?}, only F32 weights are supported", full, view.dtype());
        anyhow::ensure!(
            view.shape() == shape.as_slice(),
            "'{}' has shape {:?}, expected {:?}", full, view.shape(), shape
        );

        let values: Vec<f32> = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Tensor::from_data(TensorData::new(values, shape), device))
    }

    fn fill<B: Backend>(
        &self,
        mut model: Gpt2Model<B>,
        config:    &Gpt2Config,
        device:    &B::Device,
    ) -> Result<Gpt2Model<B>> {
        let d = config.n_embd;

        model.wte.weight = Param::from_tensor(self.get("wte.weight", [config.vocab_size, d], device)?);
        model.wpe.weight = Param::from_tensor(self.get("wpe.weight", [config.n_positions, d], device)?);

        for (i, block) in model.h.iter_mut().enumerate() {
            let p = format!("h.{i}");
            self.fill_norm(&mut block.ln_1, &format!("{p}.ln_1"), d, device)?;
            self.fill_norm(&mut block.ln_2, &format!("{p}.ln_2"), d, device)?;
            self.fill_linear(&mut block.attn.c_attn, &format!("{p}.attn.c_attn"), d, 3 * d, device)?;
            self.fill_linear(&mut block.attn.c_proj, &format!("{p}.attn.c_proj"), d, d, device)?;
            self.fill_linear(&mut block.mlp.c_fc, &format!("{p}.mlp.c_fc"), d, 4 * d, device)?;
            self.fill_linear(&mut block.mlp.c_proj, &format!("{p}.mlp.c_proj"), 4 * d, d, device)?;
        }
        self.fill_norm(&mut model.ln_f, "ln_f", d, device)?;

        Ok(model)
    }

    fn fill_norm<B: Backend>(
        &self,
        norm:   &mut Gpt2LayerNorm<B>,
        name:   &str,
        d:      usize,
        device: &B::Device,
    ) -> Result<()> {
        norm.weight = Param::from_tensor(self.get(&format!("{name}.weight"), [d], device)?);
        norm.bias   = Param::from_tensor(self.get(&format!("{name}.bias"), [d], device)?);
        Ok(())
    }

    /// Conv1D weights are already [in, out], matching burn's Linear.
    fn fill_linear<B: Backend>(
        &self,
        linear: &mut Linear<B>,
        name:   &str,
        d_in:   usize,
        d_out:  usize,
        device: &B::Device,
    ) -> Result<()> {
        linear.weight = Param::from_tensor(self.get(&format!("{name}.weight"), [d_in, d_out], device)?);
        linear.bias   = Some(Param::from_tensor(self.get(&format!("{name}.bias"), [d_out], device)?));
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::tokenizer_store::tests::toy_tokenizer;
    use safetensors::tensor::TensorView;
    use std::collections::HashMap;

    type TestBackend = burn::backend::NdArray;

    fn bytes_of<const D: usize>(t: Tensor<TestBackend, D>) -> (Vec<usize>, Vec<u8>) {
        let shape = t.dims().to_vec();
        let data  = t.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        (shape, data.iter().flat_map(|v| v.to_le_bytes()).collect())
    }

    /// Writes `model` the way HuggingFace exports GPT-2.
    fn export(model: &Gpt2Model<TestBackend>, prefix: &str) -> Vec<u8> {
        let mut owned: Vec<(String, Vec<usize>, Vec<u8>)> = Vec::new();
        let mut push = |name: String, (shape, bytes): (Vec<usize>, Vec<u8>)| {
            owned.push((format!("{prefix}{name}"), shape, bytes));
        };

        push("wte.weight".into(), bytes_of(model.wte.weight.val()));
        push("wpe.weight".into(), bytes_of(model.wpe.weight.val()));
        for (i, block) in model.h.iter().enumerate() {
            push(format!("h.{i}.ln_1.weight"), bytes_of(block.ln_1.weight.val()));
            push(format!("h.{i}.ln_1.bias"), bytes_of(block.ln_1.bias.val()));
            push(format!("h.{i}.ln_2.weight"), bytes_of(block.ln_2.weight.val()));
            push(format!("h.{i}.ln_2.bias"), bytes_of(block.ln_2.bias.val()));
            for (name, linear) in [
                ("attn.c_attn", &block.attn.c_attn),
                ("attn.c_proj", &block.attn.c_proj),
                ("mlp.c_fc", &block.mlp.c_fc),
                ("mlp.c_proj", &block.mlp.c_proj),
            ] {
                push(format!("h.{i}.{name}.weight"), bytes_of(linear.weight.val()));
                let bias = linear.bias.as_ref().unwrap().val();
                push(format!("h.{i}.{name}.bias"), bytes_of(bias));
            }
        }
        push("ln_f.weight".into(), bytes_of(model.ln_f.weight.val()));
        push("ln_f.bias".into(), bytes_of(model.ln_f.bias.val()));

        let views: Vec<(String, TensorView<'_>)> = owned
            .iter()
            .map(|(name, shape, bytes)| {
                (name.clone(), TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap())
            })
            .collect();
        safetensors::serialize(views, &None::<HashMap<String, String>>).unwrap()
    }

    fn write_model_dir(dir: &Path, model: &Gpt2Model<TestBackend>, prefix: &str) {
        let config = r#"{"vocab_size": 100, "n_positions": 32, "n_embd": 16,
                         "n_layer": 2, "n_head": 2, "layer_norm_epsilon": 1e-5,
                         "model_type": "gpt2"}"#;
        std::fs::write(dir.join(CONFIG_FILE), config).unwrap();
        std::fs::write(dir.join(WEIGHTS_FILE), export(model, prefix)).unwrap();
        toy_tokenizer().save(dir.join(TOKENIZER_FILE), false).unwrap();
    }

    fn logits(model: &Gpt2Model<TestBackend>) -> Vec<f32> {
        let ids = Tensor::<TestBackend, 1, Int>::from_ints([3, 1, 4, 1], &Default::default()).reshape([1, 4]);
        model.forward(ids, None, None).logits.into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_loaded_model_reproduces_exported_weights() {
        for prefix in ["", "transformer."] {
            let dir    = tempfile::tempdir().unwrap();
            let device = Default::default();
            let source = Gpt2Config::new(100, 32, 16, 2, 2).with_dropout(0.0).init::<TestBackend>(&device);
            write_model_dir(dir.path(), &source, prefix);

            let loaded = PlmLoader::new(dir.path()).load::<TestBackend>(&device).unwrap();
            assert_eq!(loaded.config.n_layer, 2);

            let expected = logits(&source);
            let actual   = logits(&loaded.model.no_grad());
            assert_eq!(expected.len(), actual.len());
            for (a, b) in expected.iter().zip(&actual) {
                assert!((a - b).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let result = PlmLoader::new("/definitely/not/here").load::<TestBackend>(&Default::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_shape_mismatch_is_reported() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        // Exported with n_embd = 8 but config.json says 16.
        let source = Gpt2Config::new(100, 32, 8, 2, 2).init::<TestBackend>(&device);
        write_model_dir(dir.path(), &source, "");

        let err = PlmLoader::new(dir.path()).load::<TestBackend>(&device).err().unwrap();
        assert!(format!("{err:#}").contains("shape"));
    }

    #[test]
    fn test_config_falls_back_to_n_ctx() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"vocab_size": 50257, "n_ctx": 1024, "n_embd": 768, "n_layer": 12, "n_head": 12}"#,
        )
        .unwrap();
        let cfg = PlmLoader::new(dir.path()).load_config().unwrap();
        assert_eq!(cfg.n_positions, 1024);
        assert_eq!(cfg.layer_norm_epsilon, 1e-5);
    }
}
