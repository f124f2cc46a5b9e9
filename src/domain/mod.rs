// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust types and traits that define the core concepts of
// the runner: token sequences, hypotheses and beams, training
// history, the model-kind registry, the random stream and the
// model capability contract.
//
// Rules for this layer:
//   - NO burn framework types
//   - NO file I/O
//   - Only plain structs, enums and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

/// Fatal/non-fatal error taxonomy
pub mod error;

/// Evaluation records and resumable loop progress
pub mod history;

/// Beams and hypotheses for beam search
pub mod hypothesis;

/// Closed set of buildable model architectures
pub mod model_kind;

/// Explicit, checkpointable random stream
pub mod random;

/// Token ids, corpora and batches
pub mod sequence;

/// The model capability contract
pub mod traits;
