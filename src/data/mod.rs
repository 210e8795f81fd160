// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer handles everything from raw WebNLG JSON files
// all the way to tensor batches.
//
// The pipeline flows in this order:
//
//   {train,dev,test}.json
//       │
//       ▼
//   WebNlgProcessor   → reads splits, builds InputExamples
//       │
//       ▼
//   PromptTemplate    → wraps an example into text/input/mask spans
//       │
//       ▼
//   PromptTokenizer   → ids + loss mask, truncated and padded
//       │
//       ▼
//   PromptDataLoader  → stacks examples into tensor batches
//
// Each module is responsible for exactly one step.

/// Reads the WebNLG splits from a directory
pub mod loader;

/// Parses the textual template and wraps examples
pub mod template;

/// Turns wrapped examples into fixed-length id sequences
pub mod tokenize;

/// Batches tokenised examples, restartable once per epoch
pub mod dataloader;
