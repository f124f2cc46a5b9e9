// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a fresh training run in order:
//
//   Step 1: Configuration file + overrides      (Layer 6 - infra)
//   Step 2: Typed settings, fail fast           (Layer 2)
//   Step 3: Experiment id and folder            (Layer 6 - infra)
//   Step 4: Reserve exactly one device          (Layer 6 - infra)
//   Step 5: Read the train/val splits           (Layer 4 - data)
//   Step 6: Build or load the vocabularies      (Layer 4 - data)
//   Step 7: Seed the random stream, build model (Layer 5 - ml)
//   Step 8: Run the training loop               (Layer 5 - ml)
//
// Nothing is written to disk before Step 4 succeeds, so a bad
// configuration or an unavailable device leaves no trace.
//
// Reference: Burn Book §5 (Training)

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::application::settings::{SplitPaths, Settings};
use crate::data::corpus::RawSplit;
use crate::data::vocabulary::Vocabulary;
use crate::domain::random::RandomStream;
use crate::infra::config::Configuration;
use crate::infra::device::{reserve_single, DeviceInventory};
use crate::infra::experiment::Experiment;
use crate::ml::backend::compute_device;
use crate::ml::nmt::NmtModel;
use crate::ml::trainer::{TrainData, TrainLoop, TrainOutcome};

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config_path: PathBuf,
    suffix:      Option<String>,
    overrides:   Vec<String>,
    inventory:   DeviceInventory,
}

impl TrainUseCase {
    pub fn new(config_path: impl Into<PathBuf>, suffix: Option<String>, overrides: Vec<String>) -> Self {
        Self {
            config_path: config_path.into(),
            suffix,
            overrides,
            inventory: DeviceInventory::detect(),
        }
    }

    /// Use a fixed device inventory instead of probing the machine.
    pub fn with_inventory(mut self, inventory: DeviceInventory) -> Self {
        self.inventory = inventory;
        self
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<TrainOutcome> {
        // ── Step 1: Configuration ────────────────────────────────────────────
        let mut config = Configuration::from_file(&self.config_path)?;
        config.apply_overrides(&self.overrides)?;

        // ── Step 2: Settings ─────────────────────────────────────────────────
        let settings = Settings::from_config(&config)?;

        // ── Step 3: Experiment ───────────────────────────────────────────────
        let experiment = Experiment::from_config(&config, self.suffix.as_deref())?;
        tracing::info!("Experiment '{}' in '{}'", experiment.id(), experiment.dir().display());

        // ── Step 4: Device ───────────────────────────────────────────────────
        let device_id = reserve_single(&settings.train.device, &self.inventory)?;
        let device = compute_device(device_id)?;

        // ── Step 5: Data ─────────────────────────────────────────────────────
        let train_raw = read_split(&settings.data.train)?;
        let val_raw   = read_split(&settings.data.val)?;

        // ── Step 6: Vocabularies ─────────────────────────────────────────────
        let src_path = settings
            .data
            .src_vocab
            .clone()
            .unwrap_or_else(|| experiment.dir().join("vocab.src.json"));
        let trg_path = settings
            .data
            .trg_vocab
            .clone()
            .unwrap_or_else(|| experiment.dir().join("vocab.trg.json"));
        let src_vocab = Vocabulary::load_or_build(&src_path, &train_raw.sources, settings.data.src_max_size)?;
        let trg_targets = train_raw.targets.clone().unwrap_or_default();
        let trg_vocab = Vocabulary::load_or_build(&trg_path, &trg_targets, settings.data.trg_max_size)?;

        // checkpoints must point at the vocabularies they were trained with
        config.set("vocabulary", "src", path_value(&src_path).as_str().into());
        config.set("vocabulary", "trg", path_value(&trg_path).as_str().into());

        let data = TrainData {
            train: train_raw.encode(&src_vocab, &trg_vocab, settings.data.max_len)?,
            val:   val_raw.encode(&src_vocab, &trg_vocab, 0)?,
        };
        tracing::info!("{} training pairs, {} validation pairs", data.train.len(), data.val.len());

        // ── Step 7: Model ────────────────────────────────────────────────────
        let mut rng = RandomStream::seeded_or_random(settings.train.seed);
        tracing::info!("Random seed: {}", rng.seed());
        let model = NmtModel::build(
            &settings.model,
            src_vocab.len(),
            trg_vocab.len(),
            settings.train.lr,
            settings.train.gclip,
            &device,
            &mut rng,
        );

        // ── Step 8: Training loop ────────────────────────────────────────────
        let mut run = TrainLoop::fresh(model, rng, settings.train, config, experiment, data)?;
        run.run()
    }
}

pub(crate) fn read_split(paths: &SplitPaths) -> Result<RawSplit> {
    RawSplit::read(&paths.name, &paths.src, paths.trg.as_deref())
}

fn path_value(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
