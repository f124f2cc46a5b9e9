// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns that don't belong in any specific
// business layer:
//
//   config.rs      — Two-level configuration store
//                    Defaults, TOML file, then typed CLI
//                    overrides (`section.key:value`).
//
//   device.rs      — Device requests and strict reservation
//                    Parses "cpu", "gpu:0,1", "auto:N" and
//                    resolves them against the machine.
//
//   experiment.rs  — Experiment id and folder naming
//                    sha256 of the resolved configuration.
//
//   checkpoint.rs  — Checkpoint bundles on disk
//                    bincode with a versioned header,
//                    written atomically.
//
//   metrics.rs     — Evaluation CSV log
//                    One row per evaluation record.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)

/// Experiment configuration store
pub mod config;

/// Device selection and reservation
pub mod device;

/// Experiment ids and file naming
pub mod experiment;

/// Checkpoint bundle saving and loading
pub mod checkpoint;

/// Evaluation metrics CSV logger
pub mod metrics;
