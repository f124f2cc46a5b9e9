// ============================================================
// Layer 6 — Checkpoint Store
// ============================================================
// Saves and restores checkpoint bundles:
//
//   model     opaque weights (+ optimizer state), tagged with kind
//   history   every evaluation record so far
//   progress  step/epoch counters, early-stopping state, rng
//   config    the full configuration snapshot
//
// File layout (bincode, fixed-width integers):
//   Header { magic "NMTCKPT\0", format version, model-kind tag }
//   CheckpointBundle
//
// Writes go to a temporary file in the destination directory,
// are fsync'ed, then renamed over the destination. A crash in the
// middle of a save leaves either the old file or no file, never
// a half-written one.
//
// Loads validate the header and the bundle's internal
// consistency before anything is handed back; a bundle is
// adopted whole or not at all.
//
// Reference: Rust Book §9 (Error Handling)

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::domain::error::RunnerError;
use crate::domain::history::{History, TrainProgress};
use crate::domain::model_kind::ModelKind;
use crate::domain::traits::ModelState;
use crate::infra::config::Configuration;

const MAGIC: [u8; 8] = *b"NMTCKPT\0";
const FORMAT_VERSION: u32 = 1;

/// Everything needed to resume training or to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointBundle {
    pub model:    ModelState,
    pub history:  History,
    pub progress: TrainProgress,
    pub config:   Configuration,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic:   [u8; 8],
    version: u32,
    model:   String,
}

fn codec() -> impl Options + Copy {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// Manages the checkpoint files of one experiment folder.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Nothing is created on disk until the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Atomically write `bundle` as `{dir}/{file_name}`.
    pub fn save(&self, file_name: &str, bundle: &CheckpointBundle) -> Result<PathBuf> {
        let path = self.path_for(file_name);
        save_bundle(&path, bundle)?;
        Ok(path)
    }

    /// Delete an older checkpoint (periodic rotation).
    pub fn remove(&self, path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("Cannot remove old checkpoint '{}'", path.display()))?;
            tracing::debug!("Removed checkpoint '{}'", path.display());
        }
        Ok(())
    }
}

/// Write-temp-then-rename save of a bundle to `path`.
pub fn save_bundle(path: &Path, bundle: &CheckpointBundle) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;

    let header = Header {
        magic:   MAGIC,
        version: FORMAT_VERSION,
        model:   bundle.model.kind.tag().to_string(),
    };

    let tmp = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("Cannot create temporary file in '{}'", dir.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        codec()
            .serialize_into(&mut writer, &header)
            .context("Failed to encode checkpoint header")?;
        codec()
            .serialize_into(&mut writer, bundle)
            .context("Failed to encode checkpoint bundle")?;
        writer.flush().context("Failed to flush checkpoint")?;
    }
    tmp.as_file()
        .sync_all()
        .context("Failed to sync checkpoint to disk")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move checkpoint into place at '{}'", path.display()))?;

    tracing::debug!("Saved checkpoint '{}' (step {})", path.display(), bundle.progress.step);
    Ok(())
}

/// Load and validate a bundle. When `expected` is given, the bundle
/// must hold that model kind.
pub fn load_bundle(path: &Path, expected: Option<ModelKind>) -> Result<CheckpointBundle> {
    let file = File::open(path).with_context(|| {
        format!("Cannot open checkpoint '{}'. Has training produced it yet?", path.display())
    })?;
    let len = file.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
    let mut reader = BufReader::new(file);
    let limited = codec().with_limit(len);

    let header: Header = limited
        .deserialize_from(&mut reader)
        .map_err(|e| RunnerError::corrupt(path, format!("unreadable header: {e}")))?;
    if header.magic != MAGIC {
        return Err(RunnerError::corrupt(path, "not a checkpoint file (bad magic)").into());
    }
    if header.version != FORMAT_VERSION {
        return Err(RunnerError::corrupt(
            path,
            format!("format version {} is not supported (expected {FORMAT_VERSION})", header.version),
        )
        .into());
    }

    let kind: ModelKind = header.model.parse().map_err(|_| RunnerError::IncompatibleModel {
        path:     path.to_path_buf(),
        expected: expected.map_or_else(|| "a known model".to_string(), |k| k.to_string()),
        found:    header.model.clone(),
    })?;
    if let Some(expected) = expected {
        if expected != kind {
            return Err(RunnerError::IncompatibleModel {
                path:     path.to_path_buf(),
                expected: expected.to_string(),
                found:    kind.to_string(),
            }
            .into());
        }
    }

    let bundle: CheckpointBundle = limited
        .deserialize_from(&mut reader)
        .map_err(|e| RunnerError::corrupt(path, format!("unreadable bundle: {e}")))?;

    if bundle.model.kind != kind {
        return Err(RunnerError::corrupt(
            path,
            format!("header says '{kind}' but weights are '{}'", bundle.model.kind),
        )
        .into());
    }
    match bundle.config.get_str("model", "type").map(str::parse::<ModelKind>) {
        Ok(Ok(configured)) if configured == kind => {}
        Ok(Ok(configured)) => {
            return Err(RunnerError::corrupt(
                path,
                format!("embedded configuration says '{configured}' but weights are '{kind}'"),
            )
            .into())
        }
        _ => {
            return Err(RunnerError::corrupt(path, "embedded configuration has no valid model.type").into())
        }
    }

    tracing::info!(
        "Loaded checkpoint '{}' ({kind}, step {}, {} evaluation(s))",
        path.display(),
        bundle.progress.step,
        bundle.history.len()
    );
    Ok(bundle)
}
