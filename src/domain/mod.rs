// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types shared by every other layer:
//
//   example.rs — one raw data-to-text record (input + target)
//   wrapped.rs — an example after the prompt template has
//                turned it into annotated text spans
//   traits.rs  — the dataset processor abstraction
//
// Nothing in here touches Burn, tokenizers or the filesystem.

// A raw dataset record
pub mod example;

// A templated example made of role-annotated spans
pub mod wrapped;

// Core abstractions (traits) that other layers implement
pub mod traits;
