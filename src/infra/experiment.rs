// ============================================================
// Layer 6 — Experiment Folder
// ============================================================
// Every training run lives in `{save_path}/{experiment id}/`.
// The id is derived from the resolved configuration so two runs
// with identical settings land in the same folder:
//
//   {model type}-r{first 8 hex digits of sha256(config)}[-{suffix}]
//
// e.g. "attention-r3fa9c210" or "attention-r3fa9c210-lowlr".
//
// Nothing is created on disk here. The folder appears with the
// first checkpoint or metrics row, i.e. only after the device
// has been reserved.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::domain::error::RunnerError;
use crate::infra::config::Configuration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experiment {
    id:  String,
    dir: PathBuf,
}

impl Experiment {
    /// Derive the experiment id and folder for `config`.
    pub fn from_config(config: &Configuration, suffix: Option<&str>) -> Result<Self, RunnerError> {
        let kind = config.get_str("model", "type")?;
        let save_path = config.get_str("train", "save_path")?;

        let digest = Sha256::digest(config.to_toml_string().as_bytes());
        let mut id = format!("{kind}-r{}", &hex::encode(digest)[..8]);
        if let Some(suffix) = suffix.map(str::trim).filter(|s| !s.is_empty()) {
            if suffix.contains(['/', '\\']) {
                return Err(RunnerError::config(format!(
                    "experiment suffix '{suffix}' must not contain path separators"
                )));
            }
            id.push('-');
            id.push_str(suffix);
        }

        let dir = Path::new(save_path).join(&id);
        Ok(Self { id, dir })
    }

    /// Re-open the folder of an existing experiment (resume).
    pub fn existing(id: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self { id: id.into(), dir: dir.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn best_name(&self, metric: &str) -> String {
        format!("{}.best.{metric}.ckpt", self.id)
    }

    pub fn periodic_name(&self, step: u64) -> String {
        format!("{}.update{step}.ckpt", self.id)
    }

    pub fn last_name(&self) -> String {
        format!("{}.last.ckpt", self.id)
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.dir.join(format!("{}.metrics.csv", self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Configuration {
        let mut c = Configuration::defaults();
        c.set("train", "save_path", "/tmp/runs".into());
        c
    }

    #[test]
    fn test_id_is_stable_for_identical_configs() {
        let a = Experiment::from_config(&config(), None).unwrap();
        let b = Experiment::from_config(&config(), None).unwrap();
        assert_eq!(a, b);
        assert!(a.id().starts_with("attention-r"));
        assert_eq!(a.id().len(), "attention-r".len() + 8);
        assert_eq!(a.dir(), Path::new("/tmp/runs").join(a.id()));
    }

    #[test]
    fn test_id_changes_with_configuration() {
        let a = Experiment::from_config(&config(), None).unwrap();
        let mut other = config();
        other.set("train", "lr", 0.01f64.into());
        let b = Experiment::from_config(&other, None).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_suffix_and_file_names() {
        let exp = Experiment::from_config(&config(), Some("lowlr")).unwrap();
        assert!(exp.id().ends_with("-lowlr"));
        assert_eq!(exp.best_name("bleu"), format!("{}.best.bleu.ckpt", exp.id()));
        assert_eq!(exp.periodic_name(300), format!("{}.update300.ckpt", exp.id()));
        assert!(exp.metrics_path().ends_with(format!("{}.metrics.csv", exp.id())));
        assert!(Experiment::from_config(&config(), Some("a/b")).is_err());
    }

    #[test]
    fn test_nothing_is_created_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = config();
        c.set("train", "save_path", dir.path().to_str().unwrap().into());
        let exp = Experiment::from_config(&c, None).unwrap();
        assert!(!exp.dir().exists());
    }
}
