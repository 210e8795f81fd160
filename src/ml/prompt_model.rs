// ============================================================
// Layer 5 — Prompt Model (frozen GPT-2 + prefix)
// ============================================================
// Glues the trainable prefix template onto the frozen PLM.
//
// Training (teacher forcing):
//   prefix past ─┐
//   input_ids ───┼─▶ GPT-2 ─▶ logits[:, :-1] vs input_ids[:, 1:]
//   mask + ones ─┘                 │
//                                  ▼
//        token NLL where loss_ids[:, 1:] == 1, summed per row, batch mean
//
// Generation: each instance is decoded alone on its unpadded prompt,
// with the prefix as the initial KV cache.

use anyhow::{Context, Result};
use burn::{prelude::*, tensor::activation};

use crate::data::dataloader::PromptBatch;
use crate::ml::generation::{self, GenerationConfig, StepModel};
use crate::ml::gpt2::{Gpt2Model, LayerCache};
use crate::ml::prefix::PrefixTuningTemplate;

#[derive(Module, Debug)]
pub struct PromptForGeneration<B: Backend> {
    pub plm:      Gpt2Model<B>,
    pub template: PrefixTuningTemplate<B>,
}

impl<B: Backend> PromptForGeneration<B> {
    /// The PLM's parameters stop tracking gradients; only the template learns.
    pub fn new(plm: Gpt2Model<B>, template: PrefixTuningTemplate<B>) -> Self {
        Self { plm: plm.no_grad(), template }
    }

    fn device(&self) -> B::Device {
        self.plm.wte.weight.val().device()
    }

    /// Mean over the batch of the summed token NLL on target positions.
    pub fn forward_loss(&self, batch: &PromptBatch<B>) -> Tensor<B, 1> {
        let [b, s] = batch.input_ids.dims();
        let device = self.device();

        let past = self.template.past_key_values(b, &device);
        let mask = self.template.extend_attention_mask(batch.attention_mask.clone());
        let logits = self.plm.forward(batch.input_ids.clone(), Some(mask), Some(past)).logits;
        let vocab  = logits.dims()[2];

        // Position t predicts token t+1.
        let log_probs = activation::log_softmax(logits.slice([0..b, 0..s - 1, 0..vocab]), 2);
        let targets   = batch.input_ids.clone().slice([0..b, 1..s]).unsqueeze_dim::<3>(2);
        let token_ll  = log_probs.gather(2, targets).reshape([b, s - 1]);

        let loss_mask = batch.loss_ids.clone().slice([0..b, 1..s]).float();
        let per_example = (token_ll * loss_mask).neg().sum_dim(1); // [b, 1]
        per_example.mean()
    }

    /// Newly generated ids per instance, prompt removed, cut at EOS.
    pub fn generate(
        &self,
        batch: &PromptBatch<B>,
        cfg:   &GenerationConfig,
        eos:   u32,
    ) -> Result<Vec<Vec<u32>>> {
        let limit = self.plm.n_positions.saturating_sub(self.template.num_token);

        batch
            .prompts
            .iter()
            .map(|prompt| {
                let mut cfg = cfg.clone();
                if cfg.max_total_len(prompt.len()) > limit {
                    tracing::debug!("Clamping generation length to {} positions", limit);
                    cfg.max_new_tokens = Some(limit.saturating_sub(prompt.len()));
                }
                generation::generate(self, prompt, &cfg, eos)
            })
            .collect()
    }
}

impl<B: Backend> StepModel for PromptForGeneration<B> {
    type Cache = Vec<LayerCache<B>>;

    fn step(&self, inputs: &[Vec<u32>], cache: Option<Self::Cache>) -> Result<(Vec<Vec<f32>>, Self::Cache)> {
        let rows   = inputs.len();
        let n      = inputs.first().map_or(0, Vec::len);
        let device = self.device();
        anyhow::ensure!(rows > 0 && n > 0, "empty decoding step");
        anyhow::ensure!(inputs.iter().all(|r| r.len() == n), "rows of one decoding step must have equal length");

        let flat: Vec<i32> = inputs.iter().flatten().map(|&t| t as i32).collect();
        let ids = Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &device).reshape([rows, n]);

        let past = match cache {
            Some(past) => past,
            None       => self.template.past_key_values(rows, &device),
        };
        let out   = self.plm.forward(ids, None, Some(past));
        let vocab = out.logits.dims()[2];

        let last: Vec<f32> = out.logits
            .slice([0..rows, n - 1..n, 0..vocab])
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("reading logits: {e:?}"))?;
        let logits = last.chunks(vocab).map(<[f32]>::to_vec).collect();

        Ok((logits, out.presents))
    }

    fn reorder(&self, cache: Self::Cache, rows: &[usize]) -> Result<Self::Cache> {
        let idx: Vec<i32> = rows.iter().map(|&r| r as i32).collect();
        let first = cache.first().context("empty cache")?;
        let idx = Tensor::<B, 1, Int>::from_ints(idx.as_slice(), &first.key.device());
        Ok(cache.iter().map(|layer| layer.select(idx.clone())).collect())
    }
}
