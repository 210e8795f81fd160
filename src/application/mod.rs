// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// one goal (train a prefix, or score a saved one).
//
// Rules for this layer:
//   - No tensor math or model code here
//   - No argument parsing (that's Layer 1)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Steps shared by both workflows (backend, PLM, loaders, scoring)
pub mod pipeline;

// Train the prefix, then score the validation split
pub mod train_use_case;

// Score a saved prefix on a chosen split
pub mod evaluate_use_case;
