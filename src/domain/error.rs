// ============================================================
// Layer 3 — Runner Error Taxonomy
// ============================================================
// Every fatal condition the runner can raise has a variant here.
// Functions still return anyhow::Result so context can be
// attached on the way up; callers that need to classify a
// failure use `err.downcast_ref::<RunnerError>()`.
//
//   Configuration       → bad/missing key, bad override      (startup)
//   DeviceUnavailable   → strict reservation cannot be met   (before weights)
//   CorruptCheckpoint   → bundle fails structure validation  (load time)
//   IncompatibleModel   → model-kind tag mismatch            (load time)
//   TrainingDivergence  → a training step failed             (fatal, no retry)
//   EvaluationFailure   → evaluation pass failed             (non-fatal)
//   NotImplemented      → multi-device, ensembling           (before any work)

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("corrupt checkpoint '{}': {reason}", path.display())]
    CorruptCheckpoint { path: PathBuf, reason: String },

    #[error(
        "incompatible model in '{}': expected '{expected}', found '{found}'",
        path.display()
    )]
    IncompatibleModel {
        path:     PathBuf,
        expected: String,
        found:    String,
    },

    #[error("training diverged at step {step}: {reason}")]
    TrainingDivergence { step: u64, reason: String },

    #[error("evaluation failed at step {step}: {reason}")]
    EvaluationFailure { step: u64, reason: String },

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl RunnerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptCheckpoint { path: path.into(), reason: reason.into() }
    }

    /// Fatal conditions abort the run; only evaluation failures are absorbed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::EvaluationFailure { .. })
    }
}

/// Pull the runner error out of an anyhow chain, if there is one.
pub fn classify(err: &anyhow::Error) -> Option<&RunnerError> {
    err.chain().find_map(|e| e.downcast_ref::<RunnerError>())
}
