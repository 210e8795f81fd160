// ============================================================
// Layer 5 — Prefix-Tuning Template (Burn)
// ============================================================
// The only trainable part of the system. It produces, for every
// transformer layer, `num_token` extra key/value vectors that
// the frozen GPT-2 attends to before the real input:
//
//   ids 0..num_token ─▶ wte [num_token, n_embd]
//                         │
//                         ▼
//        Linear(n_embd → mid_dim) → tanh → Linear(mid_dim → n_layer·2·n_embd)
//                         │
//                         ▼
//        reshape [b, num_token, 2·n_layer, n_head, head_dim]
//                         │
//                         ▼
//        layer i: key = slot 2i, value = slot 2i+1 → [b, n_head, num_token, head_dim]
//
// Reference: Li & Liang (2021) Prefix-Tuning: Optimizing Continuous
//            Prompts for Generation

use burn::{
    nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Linear, LinearConfig},
    prelude::*,
};

use crate::ml::gpt2::{Gpt2Config, LayerCache};

#[derive(Config, Debug)]
pub struct PrefixTuningConfig {
    pub n_layer: usize,
    pub n_head:  usize,
    pub n_embd:  usize,
    #[config(default = 5)]
    pub num_token: usize,
    #[config(default = 512)]
    pub mid_dim: usize,
    #[config(default = 0.0)]
    pub prefix_dropout: f64,
}

impl PrefixTuningConfig {
    /// Shapes taken from the PLM the prefix will be attached to.
    pub fn for_plm(plm: &Gpt2Config) -> Self {
        Self::new(plm.n_layer, plm.n_head, plm.n_embd)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> PrefixTuningTemplate<B> {
        PrefixTuningTemplate {
            wte:               EmbeddingConfig::new(self.num_token, self.n_embd).init(device),
            control_trans_in:  LinearConfig::new(self.n_embd, self.mid_dim).init(device),
            control_trans_out: LinearConfig::new(self.mid_dim, self.n_layer * 2 * self.n_embd).init(device),
            dropout:           DropoutConfig::new(self.prefix_dropout).init(),
            num_token: self.num_token,
            n_layer:   self.n_layer,
            n_head:    self.n_head,
            n_embd:    self.n_embd,
        }
    }
}

#[derive(Module, Debug)]
pub struct PrefixTuningTemplate<B: Backend> {
    pub wte:               Embedding<B>,
    pub control_trans_in:  Linear<B>,
    pub control_trans_out: Linear<B>,
    pub dropout:           Dropout,
    pub num_token:         usize,
    pub n_layer:           usize,
    pub n_head:            usize,
    pub n_embd:            usize,
}

impl<B: Backend> PrefixTuningTemplate<B> {
    /// Per-layer past key/values for a batch, each `[batch, n_head, num_token, head_dim]`.
    pub fn past_key_values(&self, batch_size: usize, device: &B::Device) -> Vec<LayerCache<B>> {
        let nt       = self.num_token;
        let head_dim = self.n_embd / self.n_head;
        let slots    = 2 * self.n_layer;

        let ids = Tensor::<B, 1, Int>::arange(0..nt as i64, device)
            .unsqueeze::<2>()
            .expand([batch_size, nt]);
        let hidden = burn::tensor::activation::tanh(
            self.control_trans_in.forward(self.wte.forward(ids)),
        );
        let past = self.dropout.forward(self.control_trans_out.forward(hidden)) // [b, nt, L·2·d]
            .reshape([batch_size, nt, slots, self.n_head, head_dim]);

        let slot = |j: usize| -> Tensor<B, 4> {
            past.clone()
                .slice([0..batch_size, 0..nt, j..j + 1, 0..self.n_head, 0..head_dim])
                .reshape([batch_size, nt, self.n_head, head_dim])
                .swap_dims(1, 2)
        };

        (0..self.n_layer)
            .map(|layer| LayerCache { key: slot(2 * layer), value: slot(2 * layer + 1) })
            .collect()
    }

    /// Prepends ones for the prefix positions: `[b, s]` → `[b, num_token + s]`.
    pub fn extend_attention_mask(&self, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2, Int> {
        let [b, _] = attention_mask.dims();
        let ones   = Tensor::<B, 2, Int>::ones([b, self.num_token], &attention_mask.device());
        Tensor::cat(vec![ones, attention_mask], 1)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray;

    #[test]
    fn test_past_shapes() {
        let device   = Default::default();
        let template = PrefixTuningConfig::new(3, 2, 8)
            .with_num_token(4)
            .with_mid_dim(16)
            .init::<TestBackend>(&device);

        let past = template.past_key_values(2, &device);
        assert_eq!(past.len(), 3);
        for layer in &past {
            assert_eq!(layer.key.dims(), [2, 2, 4, 4]);
            assert_eq!(layer.value.dims(), [2, 2, 4, 4]);
        }
    }

    #[test]
    fn test_every_batch_row_gets_the_same_prefix() {
        let device   = Default::default();
        let template = PrefixTuningConfig::new(1, 1, 4).with_num_token(2).with_mid_dim(8)
            .init::<TestBackend>(&device);
        let past = template.past_key_values(2, &device);
        let keys = past[0].key.clone().into_data().convert::<f32>().to_vec::<f32>().unwrap();
        let (row0, row1) = keys.split_at(keys.len() / 2);
        assert_eq!(row0, row1);
    }

    #[test]
    fn test_extend_attention_mask() {
        let device   = Default::default();
        let template = PrefixTuningConfig::new(1, 1, 4).with_num_token(3).with_mid_dim(4)
            .init::<TestBackend>(&device);
        let mask = Tensor::<TestBackend, 1, Int>::from_ints([1, 1, 0, 1, 0, 0], &device)
            .reshape([2, 3]);
        let extended = template.extend_attention_mask(mask);
        assert_eq!(extended.dims(), [2, 6]);
        let values = extended.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(values, vec![1, 1, 1, 1, 1, 0, 1, 1, 1, 1, 0, 0]);
    }

    #[test]
    fn test_defaults() {
        let cfg = PrefixTuningConfig::for_plm(&Gpt2Config::gpt2_medium());
        assert_eq!(cfg.num_token, 5);
        assert_eq!(cfg.mid_dim, 512);
        assert_eq!(cfg.prefix_dropout, 0.0);
        assert_eq!(cfg.n_layer, 24);
    }
}
