// ============================================================
// Layer 3 — Model Kinds
// ============================================================
// The closed set of model architectures the runner can build.
// The configured `model.type` string is resolved to a variant
// once, when settings are validated; nothing downstream looks
// a constructor up by name. Adding an architecture means adding
// a variant here and a constructor arm in `ml::nmt`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::RunnerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    /// Decoder conditioned on the mean of the source embeddings.
    MeanPool,
    /// Decoder with dot-product attention over the source embeddings.
    Attention,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::MeanPool, ModelKind::Attention];

    /// Tag written to configuration files and checkpoint headers.
    pub fn tag(&self) -> &'static str {
        match self {
            ModelKind::MeanPool  => "meanpool",
            ModelKind::Attention => "attention",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ModelKind {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        ModelKind::ALL
            .into_iter()
            .find(|k| k.tag() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = ModelKind::ALL.iter().map(|k| k.tag()).collect();
                RunnerError::config(format!(
                    "unknown model type '{s}' (known: {})",
                    known.join(", ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.tag().parse::<ModelKind>().unwrap(), kind);
        }
        assert_eq!(" Attention ".parse::<ModelKind>().unwrap(), ModelKind::Attention);
    }

    #[test]
    fn test_unknown_tag_is_configuration_error() {
        let err = "transformer".parse::<ModelKind>().unwrap_err();
        assert!(matches!(err, RunnerError::Configuration(_)));
    }
}
