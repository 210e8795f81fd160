// ============================================================
// Layer 5 — GPT-2 Decoder (Burn)
// ============================================================
// A decoder-only transformer with the exact parameter layout of
// the public GPT-2 checkpoints, so pretrained weights can be
// dropped straight into the fields.
//
//   input_ids [b, s]
//       │  wte + wpe (positions start after the past length)
//       ▼
//   Block × n_layer:   x = x + attn(ln_1(x), past)
//                      x = x + mlp(ln_2(x))
//       │
//       ▼
//   ln_f → x · wteᵀ   (LM head tied to the token embedding)
//       │
//       ▼
//   logits [b, s, vocab]
//
// Linear weights are stored as [in, out], the same orientation
// as the Conv1D tensors in the checkpoints.
//
// Reference: Radford et al. (2019) Language Models are Unsupervised
//            Multitask Learners

use burn::{
    module::Param,
    nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Initializer, Linear, LinearConfig},
    prelude::*,
    tensor::{activation, TensorData},
};

/// Added to attention scores at masked positions
const MASK_VALUE: f32 = -1.0e9;

// ─── Config ──────────────────────────────────────────────────────────────────
// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct Gpt2Config {
    pub vocab_size:  usize,
    pub n_positions: usize,
    pub n_embd:      usize,
    pub n_layer:     usize,
    pub n_head:      usize,
    #[config(default = 1e-5)]
    pub layer_norm_epsilon: f64,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl Gpt2Config {
    /// The 124M-parameter "gpt2" checkpoint
    pub fn gpt2_small() -> Self {
        Self::new(50257, 1024, 768, 12, 12)
    }

    /// The 355M-parameter "gpt2-medium" checkpoint
    pub fn gpt2_medium() -> Self {
        Self::new(50257, 1024, 1024, 24, 16)
    }

    /// A few hundred thousand parameters; smoke runs without pretrained weights.
    pub fn tiny(vocab_size: usize) -> Self {
        Self::new(vocab_size, 1024, 64, 2, 4)
    }

    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.n_head > 0 && self.n_embd % self.n_head == 0,
            "n_embd ({}) must be divisible by n_head ({})", self.n_embd, self.n_head);
        anyhow::ensure!(self.vocab_size > 0, "vocab_size must be positive");
        anyhow::ensure!(self.n_positions > 0, "n_positions must be positive");
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Gpt2Model<B> {
        let init = Initializer::Normal { mean: 0.0, std: 0.02 };

        let wte = EmbeddingConfig::new(self.vocab_size, self.n_embd)
            .with_initializer(init.clone())
            .init(device);
        let wpe = EmbeddingConfig::new(self.n_positions, self.n_embd)
            .with_initializer(init.clone())
            .init(device);
        let h: Vec<Gpt2Block<B>> = (0..self.n_layer)
            .map(|_| self.build_block(&init, device))
            .collect();

        Gpt2Model {
            wte, wpe, h,
            ln_f:    Gpt2LayerNorm::new(self.n_embd, self.layer_norm_epsilon, device),
            dropout: DropoutConfig::new(self.dropout).init(),
            n_positions: self.n_positions,
        }
    }

    fn build_block<B: Backend>(&self, init: &Initializer, device: &B::Device) -> Gpt2Block<B> {
        let n_embd = self.n_embd;
        let linear = |d_in: usize, d_out: usize| -> Linear<B> {
            LinearConfig::new(d_in, d_out).with_initializer(init.clone()).init(device)
        };

        let attn = Gpt2Attention {
            c_attn:        linear(n_embd, 3 * n_embd),
            c_proj:        linear(n_embd, n_embd),
            attn_dropout:  DropoutConfig::new(self.dropout).init(),
            resid_dropout: DropoutConfig::new(self.dropout).init(),
            n_head:        self.n_head,
            head_dim:      self.head_dim(),
        };
        let mlp = Gpt2Mlp {
            c_fc:    linear(n_embd, 4 * n_embd),
            c_proj:  linear(4 * n_embd, n_embd),
            dropout: DropoutConfig::new(self.dropout).init(),
        };

        Gpt2Block {
            ln_1: Gpt2LayerNorm::new(n_embd, self.layer_norm_epsilon, device),
            attn,
            ln_2: Gpt2LayerNorm::new(n_embd, self.layer_norm_epsilon, device),
            mlp,
        }
    }
}

// ─── LayerCache ──────────────────────────────────────────────────────────────
/// Keys and values of one layer, `[batch, n_head, past_len, head_dim]`.
#[derive(Debug, Clone)]
pub struct LayerCache<B: Backend> {
    pub key:   Tensor<B, 4>,
    pub value: Tensor<B, 4>,
}

impl<B: Backend> LayerCache<B> {
    pub fn seq_len(&self) -> usize {
        self.key.dims()[2]
    }

    /// Pick rows of the batch, e.g. to follow the surviving beams.
    pub fn select(&self, rows: Tensor<B, 1, Int>) -> Self {
        Self {
            key:   self.key.clone().select(0, rows.clone()),
            value: self.value.clone().select(0, rows),
        }
    }
}

// ─── LayerNorm ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Gpt2LayerNorm<B: Backend> {
    pub weight:  Param<Tensor<B, 1>>,
    pub bias:    Param<Tensor<B, 1>>,
    pub epsilon: f64,
}

impl<B: Backend> Gpt2LayerNorm<B> {
    pub fn new(d_model: usize, epsilon: f64, device: &B::Device) -> Self {
        Self {
            weight: Param::from_tensor(Tensor::ones([d_model], device)),
            bias:   Param::from_tensor(Tensor::zeros([d_model], device)),
            epsilon,
        }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let (var, mean) = x.clone().var_mean_bias(D - 1);
        let normed = (x - mean).div(var.add_scalar(self.epsilon).sqrt());
        normed * self.weight.val().unsqueeze() + self.bias.val().unsqueeze()
    }
}

// ─── Attention ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Gpt2Attention<B: Backend> {
    pub c_attn:        Linear<B>,
    pub c_proj:        Linear<B>,
    pub attn_dropout:  Dropout,
    pub resid_dropout: Dropout,
    pub n_head:        usize,
    pub head_dim:      usize,
}

impl<B: Backend> Gpt2Attention<B> {
    /// x: [b, s, d], mask: additive [b, 1, s, past+s]
    /// Returns the output and this layer's full keys/values (past + new).
    pub fn forward(
        &self,
        x:    Tensor<B, 3>,
        mask: Tensor<B, 4>,
        past: Option<LayerCache<B>>,
    ) -> (Tensor<B, 3>, LayerCache<B>) {
        let [b, s, d] = x.dims();

        let qkv = self.c_attn.forward(x); // [b, s, 3d]
        let q = self.split_heads(qkv.clone().slice([0..b, 0..s, 0..d]));
        let k = self.split_heads(qkv.clone().slice([0..b, 0..s, d..2 * d]));
        let v = self.split_heads(qkv.slice([0..b, 0..s, 2 * d..3 * d]));

        let (k, v) = match past {
            Some(past) => (
                Tensor::cat(vec![past.key, k], 2),
                Tensor::cat(vec![past.value, v], 2),
            ),
            None => (k, v),
        };
        let t = k.dims()[2];

        // scores = q·kᵀ / √head_dim   → [b, h, s, t]
        let scale  = (self.head_dim as f64).sqrt();
        let scores = q.matmul(k.clone().swap_dims(2, 3)).div_scalar(scale);
        let scores = scores + mask.expand([b, self.n_head, s, t]);
        let probs  = self.attn_dropout.forward(activation::softmax(scores, 3));

        let context = probs.matmul(v.clone()) // [b, h, s, hd]
            .swap_dims(1, 2)
            .reshape([b, s, d]);
        let out = self.resid_dropout.forward(self.c_proj.forward(context));

        (out, LayerCache { key: k, value: v })
    }

    /// [b, s, d] → [b, h, s, hd]
    fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [b, s, _] = x.dims();
        x.reshape([b, s, self.n_head, self.head_dim]).swap_dims(1, 2)
    }
}

// ─── MLP ─────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Gpt2Mlp<B: Backend> {
    pub c_fc:    Linear<B>,
    pub c_proj:  Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> Gpt2Mlp<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.dropout.forward(self.c_proj.forward(gelu_new(self.c_fc.forward(x))))
    }
}

/// GELU(x) ≈ 0.5·x·(1 + tanh(√(2/π)·(x + 0.044715·x³)))
pub fn gelu_new<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let sqrt_2_over_pi = (2.0_f64 / std::f64::consts::PI).sqrt();
    // x³ as a product: pow with a negative base is undefined on some GPU backends
    let cube  = x.clone() * x.clone() * x.clone();
    let inner = (x.clone() + cube.mul_scalar(0.044715)).mul_scalar(sqrt_2_over_pi);
    x.mul_scalar(0.5) * (inner.tanh().add_scalar(1.0))
}

// ─── Block ───────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Gpt2Block<B: Backend> {
    pub ln_1: Gpt2LayerNorm<B>,
    pub attn: Gpt2Attention<B>,
    pub ln_2: Gpt2LayerNorm<B>,
    pub mlp:  Gpt2Mlp<B>,
}

impl<B: Backend> Gpt2Block<B> {
    pub fn forward(
        &self,
        x:    Tensor<B, 3>,
        mask: Tensor<B, 4>,
        past: Option<LayerCache<B>>,
    ) -> (Tensor<B, 3>, LayerCache<B>) {
        let (attn_out, present) = self.attn.forward(self.ln_1.forward(x.clone()), mask, past);
        let x = x + attn_out;
        let x = x.clone() + self.mlp.forward(self.ln_2.forward(x));
        (x, present)
    }
}

// ─── Model ───────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Gpt2Model<B: Backend> {
    pub wte:         Embedding<B>,
    pub wpe:         Embedding<B>,
    pub h:           Vec<Gpt2Block<B>>,
    pub ln_f:        Gpt2LayerNorm<B>,
    pub dropout:     Dropout,
    pub n_positions: usize,
}

pub struct Gpt2Output<B: Backend> {
    /// [batch, seq_len, vocab]
    pub logits:   Tensor<B, 3>,
    /// One entry per layer, past + current positions
    pub presents: Vec<LayerCache<B>>,
}

impl<B: Backend> Gpt2Model<B> {
    pub fn n_layer(&self) -> usize {
        self.h.len()
    }

    pub fn vocab_size(&self) -> usize {
        self.wte.weight.val().dims()[0]
    }

    /// input_ids: [b, s]
    /// attention_mask: [b, past + s], 1 = attend, 0 = padding. `None` attends everywhere.
    /// past: one cache per layer, all with the same past length.
    pub fn forward(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Option<Tensor<B, 2, Int>>,
        past:           Option<Vec<LayerCache<B>>>,
    ) -> Gpt2Output<B> {
        let [b, s]   = input_ids.dims();
        let device   = input_ids.device();
        let past_len = past.as_ref().and_then(|p| p.first()).map_or(0, LayerCache::seq_len);
        let total    = past_len + s;

        // Positions continue after the cached prefix.
        let positions = Tensor::<B, 1, Int>::arange(past_len as i64..total as i64, &device)
            .unsqueeze::<2>()
            .expand([b, s]);
        let x = self.wte.forward(input_ids) + self.wpe.forward(positions);
        let mut x = self.dropout.forward(x);

        let mask = attention_bias::<B>(b, s, past_len, attention_mask, &device);

        let mut pasts: Vec<Option<LayerCache<B>>> = match past {
            Some(p) => p.into_iter().map(Some).collect(),
            None    => vec![None; self.h.len()],
        };
        pasts.resize(self.h.len(), None);

        let mut presents = Vec::with_capacity(self.h.len());
        for (block, layer_past) in self.h.iter().zip(pasts) {
            let (out, present) = block.forward(x, mask.clone(), layer_past);
            x = out;
            presents.push(present);
        }
        let x = self.ln_f.forward(x);

        // Tied LM head: logits = x · wteᵀ
        let [v, d] = self.wte.weight.val().dims();
        let head   = self.wte.weight.val().transpose().reshape([1, d, v]);
        let logits = x.matmul(head.expand([b, d, v]));

        Gpt2Output { logits, presents }
    }
}

/// Additive attention bias `[b, 1, s, past + s]`: causal over the new
/// positions, every past position visible, padding from `attention_mask`
/// hidden.
fn attention_bias<B: Backend>(
    batch:          usize,
    seq_len:        usize,
    past_len:       usize,
    attention_mask: Option<Tensor<B, 2, Int>>,
    device:         &B::Device,
) -> Tensor<B, 4> {
    let total = past_len + seq_len;
    let mut causal = vec![0.0f32; seq_len * total];
    for i in 0..seq_len {
        for j in (past_len + i + 1)..total {
            causal[i * total + j] = MASK_VALUE;
        }
    }
    let causal = Tensor::<B, 2>::from_data(TensorData::new(causal, [seq_len, total]), device)
        .reshape([1, 1, seq_len, total])
        .expand([batch, 1, seq_len, total]);

    match attention_mask {
        Some(mask) => {
            // (1 - m) * MASK_VALUE
            let padding = mask.float().neg().add_scalar(1.0).mul_scalar(MASK_VALUE)
                .reshape([batch, 1, 1, total])
                .expand([batch, 1, seq_len, total]);
            causal + padding
        }
        None => causal,
    }
}
