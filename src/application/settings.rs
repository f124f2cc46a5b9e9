// ============================================================
// Layer 2 — Typed Settings
// ============================================================
// Typed, validated views over the configuration store. Every key
// the training loop, the translator or the model reads is
// resolved here, once, before any device is reserved or any
// file is written. A missing or ill-typed key is therefore a
// Configuration error at startup, never a failure halfway
// through training.
//
//   [train]      → TrainSettings
//   [model]      → ModelSettings
//   [data]       → DataSettings   (+ [vocabulary])
//
// The device request is validated to name exactly one device.

use std::path::PathBuf;

use crate::data::filters::FilterChain;
use crate::domain::error::RunnerError;
use crate::domain::history::EvalMetric;
use crate::domain::model_kind::ModelKind;
use crate::infra::config::Configuration;
use crate::infra::device::DeviceSelection;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainSettings {
    pub seed:            u64,
    pub device:          DeviceSelection,
    pub batch_size:      usize,
    pub eval_batch_size: usize,
    pub max_epochs:      u64,
    pub max_iterations:  u64,
    pub max_minutes:     u64,
    pub eval_freq:       u64,
    pub eval_metrics:    Vec<EvalMetric>,
    pub eval_beam:       usize,
    pub eval_max_len:    usize,
    pub patience:        usize,
    pub checkpoint_freq: u64,
    pub n_checkpoints:   usize,
    pub disp_freq:       u64,
    pub lr:              f64,
    pub gclip:           f64,
    pub save_path:       PathBuf,
}

impl TrainSettings {
    /// The metric that drives early stopping and the best checkpoint.
    pub fn early_stop_metric(&self) -> EvalMetric {
        self.eval_metrics[0]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSettings {
    pub kind:       ModelKind,
    pub emb_dim:    usize,
    pub hid_dim:    usize,
    pub dropout:    f64,
    pub init_scale: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPaths {
    pub name: String,
    pub src:  PathBuf,
    pub trg:  Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSettings {
    pub train:        SplitPaths,
    pub val:          SplitPaths,
    pub max_len:      usize,
    pub filters:      FilterChain,
    pub src_vocab:    Option<PathBuf>,
    pub trg_vocab:    Option<PathBuf>,
    pub src_max_size: usize,
    pub trg_max_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub train: TrainSettings,
    pub model: ModelSettings,
    pub data:  DataSettings,
}

fn u64_key(c: &Configuration, section: &str, key: &str) -> Result<u64, RunnerError> {
    c.get_usize(section, key).map(|v| v as u64)
}

fn positive(c: &Configuration, section: &str, key: &str) -> Result<usize, RunnerError> {
    match c.get_usize(section, key)? {
        0 => Err(RunnerError::config(format!("'{section}.{key}' must be at least 1"))),
        v => Ok(v),
    }
}

fn optional_path(c: &Configuration, section: &str, key: &str) -> Result<Option<PathBuf>, RunnerError> {
    match c.get(section, key) {
        None => Ok(None),
        Some(_) => {
            let s = c.get_str(section, key)?;
            Ok((!s.is_empty()).then(|| PathBuf::from(s)))
        }
    }
}

/// Paths of split `name`: `data.{name}_src` (required) and `data.{name}_trg`.
pub fn split_paths(c: &Configuration, name: &str) -> Result<SplitPaths, RunnerError> {
    let src = optional_path(c, "data", &format!("{name}_src"))?
        .ok_or_else(|| RunnerError::config(format!("split '{name}' has no 'data.{name}_src' entry")))?;
    let trg = optional_path(c, "data", &format!("{name}_trg"))?;
    Ok(SplitPaths { name: name.to_string(), src, trg })
}

impl TrainSettings {
    pub fn from_config(c: &Configuration) -> Result<Self, RunnerError> {
        let seed = c.get_i64("train", "seed")?;
        let seed = u64::try_from(seed)
            .map_err(|_| RunnerError::config(format!("'train.seed' must be non-negative, got {seed}")))?;

        let device: DeviceSelection = c.get_str("train", "device")?.parse()?;
        let device = device.ensure_single()?;

        let eval_metrics = c
            .get_str("train", "eval_metrics")?
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<EvalMetric>, _>>()?;
        if eval_metrics.is_empty() {
            return Err(RunnerError::config("'train.eval_metrics' names no metric"));
        }

        let lr = c.get_f64("train", "lr")?;
        if !(lr > 0.0 && lr.is_finite()) {
            return Err(RunnerError::config(format!("'train.lr' must be positive, got {lr}")));
        }
        let gclip = c.get_f64("train", "gclip")?;
        if gclip < 0.0 || !gclip.is_finite() {
            return Err(RunnerError::config(format!("'train.gclip' must be >= 0, got {gclip}")));
        }

        Ok(Self {
            seed,
            device,
            batch_size:      positive(c, "train", "batch_size")?,
            eval_batch_size: positive(c, "train", "eval_batch_size")?,
            max_epochs:      u64_key(c, "train", "max_epochs")?,
            max_iterations:  u64_key(c, "train", "max_iterations")?,
            max_minutes:     u64_key(c, "train", "max_minutes")?,
            eval_freq:       u64_key(c, "train", "eval_freq")?,
            eval_metrics,
            eval_beam:       positive(c, "train", "eval_beam")?,
            eval_max_len:    positive(c, "train", "eval_max_len")?,
            patience:        c.get_usize("train", "patience")?,
            checkpoint_freq: u64_key(c, "train", "checkpoint_freq")?,
            n_checkpoints:   positive(c, "train", "n_checkpoints")?,
            disp_freq:       u64_key(c, "train", "disp_freq")?,
            lr,
            gclip,
            save_path:       PathBuf::from(c.get_str("train", "save_path")?),
        })
    }
}

impl ModelSettings {
    pub fn from_config(c: &Configuration) -> Result<Self, RunnerError> {
        let kind: ModelKind = c.get_str("model", "type")?.parse()?;
        let dropout = c.get_f64("model", "dropout")?;
        if !(0.0..1.0).contains(&dropout) {
            return Err(RunnerError::config(format!("'model.dropout' must be in [0, 1), got {dropout}")));
        }
        let init_scale = c.get_f64("model", "init_scale")?;
        if !(init_scale > 0.0 && init_scale.is_finite()) {
            return Err(RunnerError::config(format!("'model.init_scale' must be positive, got {init_scale}")));
        }
        Ok(Self {
            kind,
            emb_dim: positive(c, "model", "emb_dim")?,
            hid_dim: positive(c, "model", "hid_dim")?,
            dropout,
            init_scale,
        })
    }
}

impl DataSettings {
    pub fn from_config(c: &Configuration) -> Result<Self, RunnerError> {
        let train = split_paths(c, "train")?;
        let val = split_paths(c, "val")?;
        for split in [&train, &val] {
            if split.trg.is_none() {
                return Err(RunnerError::config(format!(
                    "split '{}' needs a 'data.{}_trg' entry",
                    split.name, split.name
                )));
            }
        }
        Ok(Self {
            train,
            val,
            max_len:      c.get_usize("data", "max_len")?,
            filters:      FilterChain::parse(c.get_str("data", "filters")?)?,
            src_vocab:    optional_path(c, "vocabulary", "src")?,
            trg_vocab:    optional_path(c, "vocabulary", "trg")?,
            src_max_size: c.get_usize("vocabulary", "src_max_size")?,
            trg_max_size: c.get_usize("vocabulary", "trg_max_size")?,
        })
    }
}

impl Settings {
    /// Resolve and validate every section.
    pub fn from_config(c: &Configuration) -> Result<Self, RunnerError> {
        Ok(Self {
            train: TrainSettings::from_config(c)?,
            model: ModelSettings::from_config(c)?,
            data:  DataSettings::from_config(c)?,
        })
    }
}
