// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one goal per
// command: train, resume, translate.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No UI or printing here (that's Layer 1)
//   - No direct file format handling (that's Layer 4 and 6)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

/// Typed, validated views over the configuration
pub mod settings;

/// Fresh training runs
pub mod train_use_case;

/// Continuing a run from a checkpoint
pub mod resume_use_case;

/// Decoding with a trained checkpoint
pub mod translate_use_case;
