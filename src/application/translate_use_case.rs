// ============================================================
// Layer 2 — TranslateUseCase
// ============================================================
// Decodes one or more splits (or an explicit source file) with
// each given checkpoint in turn and writes one hypothesis file per
// checkpoint and split.
//
//   Step 1: Validate options (ensembles are refused here)
//   Step 2: For each checkpoint, in order:
//             load it                           (Layer 5 - ml)
//             translate and dump each input     (Layer 5 - ml)

use std::path::PathBuf;

use anyhow::Result;

use crate::domain::error::RunnerError;
use crate::ml::translator::{TranslateOptions, Translator};

pub struct TranslateUseCase {
    options:     TranslateOptions,
    checkpoints: Vec<PathBuf>,
    splits:      Vec<String>,
    source:      Option<PathBuf>,
}

impl TranslateUseCase {
    pub fn new(
        options:     TranslateOptions,
        checkpoints: Vec<PathBuf>,
        splits:      Vec<String>,
        source:      Option<PathBuf>,
    ) -> Self {
        Self { options, checkpoints, splits, source }
    }

    /// Returns the files written, in the order they were produced.
    pub fn execute(&self) -> Result<Vec<PathBuf>> {
        // ── Step 1: Options ──────────────────────────────────────────────────
        let mut translator = Translator::new(self.options.clone())?;
        if self.checkpoints.is_empty() {
            return Err(RunnerError::config("no checkpoint given to translate with").into());
        }

        // ── Step 2: Checkpoints, one after the other ─────────────────────────
        let mut written = Vec::new();
        for checkpoint in &self.checkpoints {
            translator.load(checkpoint)?;
            match &self.source {
                Some(source) => {
                    let label = source
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "source".to_string());
                    translator.translate_file(source, &label, true)?;
                    written.push(translator.output_path(checkpoint, &label));
                }
                None => {
                    for split in &self.splits {
                        translator.translate(split, true)?;
                        written.push(translator.output_path(checkpoint, split));
                    }
                }
            }
        }
        Ok(written)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::application::train_use_case::{tests::write_fixture, TrainUseCase};
    use crate::domain::error::classify;
    use crate::infra::device::DeviceInventory;
    use crate::ml::beam_search::BeamOptions;

    fn options(out: PathBuf) -> TranslateOptions {
        TranslateOptions {
            beam:            BeamOptions { beam: 2, max_len: 6, ..Default::default() },
            batch_size:      4,
            device:          None,
            ensemble:        false,
            disable_filters: false,
            output_dir:      out,
        }
    }

    #[test]
    fn test_ensemble_of_missing_checkpoints_is_not_implemented() {
        let mut opts = options(PathBuf::from("unused"));
        opts.ensemble = true;
        let uc = TranslateUseCase::new(
            opts,
            vec![PathBuf::from("/nope/a.ckpt"), PathBuf::from("/nope/b.ckpt")],
            vec!["test".into()],
            None,
        );
        let err = uc.execute().unwrap_err();
        assert!(matches!(classify(&err), Some(RunnerError::NotImplemented(_))));
        assert!(!PathBuf::from("unused").exists());
    }

    #[test]
    fn test_translates_split_and_source_file_line_by_line() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = write_fixture(tmp.path(), "");
        let out = TrainUseCase::new(&cfg, None, vec!["train.max_epochs:1".into()])
            .with_inventory(DeviceInventory::cpu_only())
            .execute()
            .unwrap();

        let out_dir = tmp.path().join("hyps");
        let files = TranslateUseCase::new(
            options(out_dir.clone()),
            vec![out.last_checkpoint.clone()],
            vec!["test".into(), "val".into()],
            None,
        )
        .execute()
        .unwrap();
        assert_eq!(files.len(), 2);
        let stem = out.last_checkpoint.file_stem().unwrap().to_string_lossy().into_owned();
        assert_eq!(files[0], out_dir.join(format!("{stem}.test.beam2")));
        for f in &files {
            assert_eq!(fs::read_to_string(f).unwrap().lines().count(), 6);
        }

        let extra = tmp.path().join("extra.txt");
        fs::write(&extra, "a b\n\nzebra c\n").unwrap();
        let mut opts = options(out_dir.clone());
        opts.beam.n_best = 2;
        let files = TranslateUseCase::new(opts, vec![out.last_checkpoint], vec![], Some(extra))
            .execute()
            .unwrap();
        let text = fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("0 ||| "));
        assert!(lines[5].starts_with("2 ||| "));
        assert_eq!(lines[2].split(" ||| ").count(), 3);
    }

    #[test]
    fn test_several_checkpoints_are_decoded_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = write_fixture(tmp.path(), "");
        let out = TrainUseCase::new(&cfg, None, vec!["train.max_epochs:1".into()])
            .with_inventory(DeviceInventory::cpu_only())
            .execute()
            .unwrap();
        let best = out.last_checkpoint.with_file_name(format!(
            "{}.best.loss.ckpt",
            out.last_checkpoint.file_name().unwrap().to_string_lossy().trim_end_matches(".last.ckpt")
        ));
        assert!(best.exists());

        let out_dir = tmp.path().join("hyps");
        let files = TranslateUseCase::new(
            options(out_dir.clone()),
            vec![out.last_checkpoint.clone(), best.clone()],
            vec!["test".into()],
            None,
        )
        .execute()
        .unwrap();

        let stem = |p: &PathBuf| p.file_stem().unwrap().to_string_lossy().into_owned();
        assert_eq!(
            files,
            vec![
                out_dir.join(format!("{}.test.beam2", stem(&out.last_checkpoint))),
                out_dir.join(format!("{}.test.beam2", stem(&best))),
            ]
        );
        for f in &files {
            assert_eq!(fs::read_to_string(f).unwrap().lines().count(), 6);
        }
    }

    #[test]
    fn test_no_checkpoint_is_a_configuration_error() {
        let uc = TranslateUseCase::new(options(PathBuf::from("unused")), vec![], vec!["test".into()], None);
        let err = uc.execute().unwrap_err();
        assert!(matches!(classify(&err), Some(RunnerError::Configuration(_))));
    }
}
