// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All tensor code lives here.
//
// What's in this layer:
//
//   gpt2.rs         — GPT-2 decoder (token + position embeddings,
//                     masked self-attention with a KV cache,
//                     GELU MLP, pre-norm blocks, tied LM head)
//
//   prefix.rs       — Prefix-tuning template: a small MLP that
//                     turns num_token learned vectors into past
//                     key/values for every layer
//
//   prompt_model.rs — Frozen GPT-2 + prefix: training loss and
//                     per-instance generation
//
//   generation.rs   — Decoding: greedy, sampling, beam search,
//                     logits processors
//
//   trainer.rs      — The training loop (AdamW on the prefix)
//
//   evaluator.rs    — Generate + decode over a validation loader
//
// Reference: Radford et al. (2019) GPT-2
//            Li & Liang (2021) Prefix-Tuning
//            Burn Book §3 (Building Blocks), §5 (Training)

/// GPT-2 architecture
pub mod gpt2;

/// Learnable prefix (past key/values)
pub mod prefix;

/// PLM + template wrapper
pub mod prompt_model;

/// Token-by-token decoding strategies
pub mod generation;

/// Training loop
pub mod trainer;

/// Evaluation loop
pub mod evaluator;
