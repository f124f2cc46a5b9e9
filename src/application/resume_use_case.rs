// ============================================================
// Layer 2 — ResumeUseCase
// ============================================================
// Continues an interrupted run from one of its checkpoints:
//
//   Step 1: Load and validate the bundle        (Layer 6 - infra)
//   Step 2: Optional device override, settings  (Layer 2)
//   Step 3: Reserve exactly one device          (Layer 6 - infra)
//   Step 4: Vocabularies named by the bundle    (Layer 4 - data)
//   Step 5: Re-read the train/val splits        (Layer 4 - data)
//   Step 6: Rebuild model, adopt weights+optim  (Layer 5 - ml)
//   Step 7: Resume the loop where it stopped    (Layer 5 - ml)
//
// The experiment folder is the checkpoint's directory; new
// checkpoints and metrics rows land next to the old ones.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::application::settings::Settings;
use crate::application::train_use_case::read_split;
use crate::data::vocabulary::Vocabulary;
use crate::infra::checkpoint::load_bundle;
use crate::infra::device::{reserve_single, DeviceInventory};
use crate::infra::experiment::Experiment;
use crate::ml::backend::compute_device;
use crate::ml::nmt::NmtModel;
use crate::ml::trainer::{TrainData, TrainLoop, TrainOutcome};

pub struct ResumeUseCase {
    checkpoint: PathBuf,
    device:     Option<String>,
    inventory:  DeviceInventory,
}

impl ResumeUseCase {
    pub fn new(checkpoint: impl Into<PathBuf>, device: Option<String>) -> Self {
        Self { checkpoint: checkpoint.into(), device, inventory: DeviceInventory::detect() }
    }

    pub fn with_inventory(mut self, inventory: DeviceInventory) -> Self {
        self.inventory = inventory;
        self
    }

    pub fn execute(&self) -> Result<TrainOutcome> {
        // ── Step 1: Bundle ───────────────────────────────────────────────────
        let mut bundle = load_bundle(&self.checkpoint, None)?;

        // ── Step 2: Settings ─────────────────────────────────────────────────
        if let Some(spec) = &self.device {
            bundle.config.set("train", "device", spec.as_str().into());
        }
        let settings = Settings::from_config(&bundle.config)?;

        // ── Step 3: Device ───────────────────────────────────────────────────
        let device_id = reserve_single(&settings.train.device, &self.inventory)?;
        let device = compute_device(device_id)?;

        // ── Step 4: Vocabularies ─────────────────────────────────────────────
        let src_vocab = Vocabulary::configured(settings.data.src_vocab.as_deref(), "src")?;
        let trg_vocab = Vocabulary::configured(settings.data.trg_vocab.as_deref(), "trg")?;

        // ── Step 5: Data ─────────────────────────────────────────────────────
        let data = TrainData {
            train: read_split(&settings.data.train)?.encode(&src_vocab, &trg_vocab, settings.data.max_len)?,
            val:   read_split(&settings.data.val)?.encode(&src_vocab, &trg_vocab, 0)?,
        };

        // ── Step 6: Model ────────────────────────────────────────────────────
        let model = NmtModel::restore(&settings, src_vocab.len(), trg_vocab.len(), &bundle.model, &device)
            .with_context(|| format!("Cannot restore the model of '{}'", self.checkpoint.display()))?;

        // ── Step 7: Loop ─────────────────────────────────────────────────────
        let experiment = Experiment::existing(bundle.progress.experiment.clone(), experiment_dir(&self.checkpoint));
        let mut run = TrainLoop::resume(model, bundle, settings.train, experiment, data)?;
        run.run()
    }
}

/// The folder holding `checkpoint`; `.` for a bare file name.
fn experiment_dir(checkpoint: &Path) -> &Path {
    checkpoint
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::application::train_use_case::{tests::write_fixture, TrainUseCase};
    use crate::domain::error::{classify, RunnerError};

    #[test]
    fn test_resume_from_periodic_checkpoint_matches_uninterrupted_run() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = write_fixture(tmp.path(), "checkpoint_freq = 3");
        let full = TrainUseCase::new(&cfg, None, vec!["model.dropout:0.1".into()])
            .with_inventory(DeviceInventory::cpu_only())
            .execute()
            .unwrap();
        let reference = load_bundle(&full.last_checkpoint, None).unwrap();

        let exp_dir = full.last_checkpoint.parent().unwrap();
        let periodic = fs::read_dir(exp_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| p.to_string_lossy().ends_with(".update3.ckpt"))
            .expect("periodic checkpoint at step 3");

        let resumed = ResumeUseCase::new(&periodic, None)
            .with_inventory(DeviceInventory::cpu_only())
            .execute()
            .unwrap();
        assert_eq!(resumed.step, full.step);
        assert_eq!(resumed.reason, full.reason);

        let again = load_bundle(&resumed.last_checkpoint, None).unwrap();
        assert_eq!(again.history.len(), reference.history.len());
        let a = reference.history.last().unwrap().metric("loss").unwrap();
        let b = again.history.last().unwrap().metric("loss").unwrap();
        assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        assert_eq!(again.progress.rng, reference.progress.rng);
    }

    #[test]
    fn test_experiment_dir_of_bare_file_name_is_current_dir() {
        assert_eq!(experiment_dir(Path::new("x.ckpt")), Path::new("."));
        assert_eq!(experiment_dir(Path::new("exps/run/x.ckpt")), Path::new("exps/run"));
        assert_eq!(experiment_dir(Path::new("/abs/x.ckpt")), Path::new("/abs"));
    }

    #[test]
    fn test_missing_device_on_resume_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = write_fixture(tmp.path(), "");
        let out = TrainUseCase::new(&cfg, None, vec!["train.max_epochs:1".into()])
            .with_inventory(DeviceInventory::cpu_only())
            .execute()
            .unwrap();

        let err = ResumeUseCase::new(&out.last_checkpoint, Some("gpu:1".into()))
            .with_inventory(DeviceInventory::cpu_only())
            .execute()
            .unwrap_err();
        assert!(matches!(classify(&err), Some(RunnerError::DeviceUnavailable(_))));
    }
}
