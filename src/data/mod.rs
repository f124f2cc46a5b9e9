// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from line-aligned text files to tensor batches,
// and from decoded ids back to text.
//
//   corpus files (one sentence per line)
//       │
//       ▼
//   Preprocessor      → cleans each line (whitespace, control chars)
//       │
//       ▼
//   Vocabulary        → words ↔ token ids (HuggingFace tokenizers)
//       │
//       ▼
//   RawSplit          → ParallelCorpus of id sequences
//       │
//       ▼
//   Seq2SeqBatcher    → padded tensors + masks for the model
//
// On the way out, TextFilter/FilterChain post-process decoded
// sentences (e.g. undo BPE segmentation).
//
// Reference: Burn Book §4 (Datasets and Batchers)
//            Rust Book §13 (Iterators and Closures)

/// Padded tensor batches for the burn model
pub mod batcher;

/// Reads line-aligned split files into corpora
pub mod corpus;

/// Output text filters (de-BPE, de-SentencePiece)
pub mod filters;

/// Cleans and normalises one sentence
pub mod preprocessor;

/// Word-level vocabularies with fixed special ids
pub mod vocabulary;
