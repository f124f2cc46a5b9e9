// ============================================================
// Layer 5 — Translator
// ============================================================
// Decodes text with the model stored in a checkpoint. Several
// checkpoints are decoded one after the other by re-binding the
// same translator; they are never combined.
//
//   Translator::new    validate options (no ensembles)
//   load(checkpoint)   bundle → config (+device) → settings →
//                      reserve device → rebuild model → vocabularies
//   translate          split or file → clean → ids → beam search →
//                      words → output filters → lines
//
// With `dump`, the lines are written atomically to
//   <output dir>/<checkpoint stem>.<split>.beam<k>
// one line per input line, in input order. With n_best > 1 each
// input produces n_best lines of the form
//   <input index> ||| <text> ||| <score>
//
// Reference: Koehn (2004) Pharaoh output format (n-best lists)

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::application::settings::{split_paths, Settings};
use crate::data::corpus::read_lines;
use crate::data::filters::FilterChain;
use crate::data::vocabulary::Vocabulary;
use crate::domain::error::RunnerError;
use crate::infra::checkpoint::load_bundle;
use crate::infra::config::Configuration;
use crate::infra::device::{reserve_single, DeviceInventory};
use crate::ml::backend::compute_device;
use crate::ml::beam_search::{translate_all, BeamOptions, Translation};
use crate::ml::nmt::NmtModel;

#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub beam:            BeamOptions,
    pub batch_size:      usize,
    /// Overrides the checkpoint's `train.device`.
    pub device:          Option<String>,
    pub ensemble:        bool,
    pub disable_filters: bool,
    pub output_dir:      PathBuf,
}

struct Loaded {
    checkpoint: PathBuf,
    model:      NmtModel,
    config:     Configuration,
    filters:    FilterChain,
    src_vocab:  Vocabulary,
    trg_vocab:  Vocabulary,
}

pub struct Translator {
    options: TranslateOptions,
    loaded:  Option<Loaded>,
}

impl Translator {
    /// Fails with NotImplemented for ensembles before anything is read.
    pub fn new(options: TranslateOptions) -> Result<Self, RunnerError> {
        if options.ensemble {
            return Err(RunnerError::NotImplemented("ensemble decoding".into()));
        }
        if options.beam.beam == 0 || options.beam.max_len == 0 || options.batch_size == 0 {
            return Err(RunnerError::config("beam size, max length and batch size must be at least 1"));
        }
        Ok(Self { options, loaded: None })
    }

    /// The checkpoint currently bound, if any.
    pub fn checkpoint(&self) -> Option<&Path> {
        self.loaded.as_ref().map(|l| l.checkpoint.as_path())
    }

    /// Bind `checkpoint`, replacing any previous one: rebuild its
    /// model on the reserved device.
    pub fn load(&mut self, checkpoint: &Path) -> Result<()> {
        self.loaded = None;
        let mut bundle = load_bundle(checkpoint, None)?;
        if let Some(spec) = &self.options.device {
            bundle.config.set("train", "device", spec.as_str().into());
        }
        let settings = Settings::from_config(&bundle.config)?;

        let device_id = reserve_single(&settings.train.device, &DeviceInventory::detect())?;
        let device = compute_device(device_id)?;

        let src_vocab = Vocabulary::configured(settings.data.src_vocab.as_deref(), "src")?;
        let trg_vocab = Vocabulary::configured(settings.data.trg_vocab.as_deref(), "trg")?;
        let model = NmtModel::restore(&settings, src_vocab.len(), trg_vocab.len(), &bundle.model, &device)
            .with_context(|| format!("Cannot restore the model of '{}'", checkpoint.display()))?;

        tracing::info!(
            "Translator ready: '{}' (step {}) on {device_id}",
            checkpoint.display(),
            bundle.progress.step
        );
        self.loaded = Some(Loaded {
            checkpoint: checkpoint.to_path_buf(),
            model,
            filters: settings.data.filters.clone(),
            config: bundle.config,
            src_vocab,
            trg_vocab,
        });
        Ok(())
    }

    fn loaded(&self) -> Result<&Loaded> {
        self.loaded
            .as_ref()
            .ok_or_else(|| anyhow!("no checkpoint loaded; call load() first"))
    }

    /// Decode the source side of a configured split (`data.<split>_src`).
    pub fn translate(&self, split: &str, dump: bool) -> Result<Vec<String>> {
        let paths = split_paths(&self.loaded()?.config, split)?;
        self.translate_file(&paths.src, split, dump)
    }

    /// Decode every line of `source`; `label` names the output file.
    pub fn translate_file(&self, source: &Path, label: &str, dump: bool) -> Result<Vec<String>> {
        let loaded = self.loaded()?;
        let lines = read_lines(source)?;
        let sources = lines
            .iter()
            .map(|l| loaded.src_vocab.encode(l))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("Translating {} sentences of '{label}' (beam {})", sources.len(), self.options.beam.beam);
        let translations = translate_all(&loaded.model, &sources, self.options.batch_size, &self.options.beam)?;
        let out = self.render(loaded, &translations);

        if dump {
            let path = self.output_path(&loaded.checkpoint, label);
            write_atomic(&path, &out)?;
            tracing::info!("Wrote {} lines to '{}'", out.len(), path.display());
        }
        Ok(out)
    }

    fn postprocess(&self, loaded: &Loaded, text: String) -> String {
        if self.options.disable_filters || loaded.filters.is_empty() {
            text
        } else {
            loaded.filters.apply(&text)
        }
    }

    fn render(&self, loaded: &Loaded, translations: &[Translation]) -> Vec<String> {
        if self.options.beam.n_best <= 1 {
            return translations
                .iter()
                .map(|t| self.postprocess(loaded, loaded.trg_vocab.decode(t.best())))
                .collect();
        }
        translations
            .iter()
            .enumerate()
            .flat_map(|(i, t)| {
                t.hypotheses.iter().map(move |h| {
                    let text = self.postprocess(loaded, loaded.trg_vocab.decode(&h.tokens));
                    format!("{i} ||| {text} ||| {:.4}", h.score)
                })
            })
            .collect()
    }

    /// `<output dir>/<checkpoint stem>.<label>.beam<k>`
    pub fn output_path(&self, checkpoint: &Path, label: &str) -> PathBuf {
        let stem = checkpoint
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        self.options
            .output_dir
            .join(format!("{stem}.{label}.beam{}", self.options.beam.beam))
    }
}

fn write_atomic(path: &Path, lines: &[String]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).with_context(|| format!("Cannot create output directory '{}'", dir.display()))?;

    let tmp = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("Cannot create temporary file in '{}'", dir.display()))?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        for line in lines {
            writeln!(w, "{line}")?;
        }
        w.flush().context("Failed to flush translations")?;
    }
    tmp.as_file().sync_all().context("Failed to sync translations to disk")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move translations into place at '{}'", path.display()))?;
    Ok(())
}
