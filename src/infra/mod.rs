// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the filesystem outside the dataset:
//
//   plm_loader.rs      — Pretrained GPT-2 from a HuggingFace-style
//                        directory (config.json, tokenizer.json,
//                        model.safetensors)
//
//   tokenizer_store.rs — Special-token lookup, plus a word-level
//                        tokenizer built from the corpus when no
//                        pretrained model is given
//
//   checkpoint.rs      — Output directory: trained template,
//                        TrainConfig JSON, generations
//
//   metrics.rs         — Per-epoch loss CSV
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Records and Checkpointing)

/// Pretrained model directory reader
pub mod plm_loader;

/// Tokenizer loading, building and saving
pub mod tokenizer_store;

/// Output directory persistence
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
