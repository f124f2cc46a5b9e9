// ============================================================
// Layer 5 — Training / Resume Loop
// ============================================================
// Drives any Seq2SeqModel through epochs of shuffled batches,
// evaluates, keeps the best checkpoint, and stops on patience or
// on one of the configured budgets.
//
//   INIT ──► RUNNING ──► CHECKPOINTED ──► RUNNING ...
//                  └──► STOPPED (last checkpoint written)
//
// Randomness:
//   - batch order of epoch e comes from substream(seed, e), so a
//     mid-epoch resume rebuilds the same permutation and skips
//     the `batch_in_epoch` batches already consumed
//   - everything else (dropout) draws from the loop's main
//     stream, whose position is stored in every checkpoint
//
// Early stopping:
//   the first configured eval metric decides improvement.
//   A failed evaluation is recorded and counts as non-improving.
//   `patience` consecutive non-improving evaluations stop the
//   run (patience 0 never stops).
//
// A training step that errors or reports a non-finite loss
// aborts the run with TrainingDivergence; nothing is saved.
//
// Reference: Kingma & Ba (2015) Adam
//            Prechelt (1998) Early Stopping — But When?

use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Result};

use crate::application::settings::TrainSettings;
use crate::domain::error::RunnerError;
use crate::domain::history::{BestScore, EvalMetric, EvalRecord, History, Metrics, TrainProgress};
use crate::domain::random::RandomStream;
use crate::domain::sequence::{ParallelCorpus, TokenId};
use crate::domain::traits::Seq2SeqModel;
use crate::infra::checkpoint::{CheckpointBundle, CheckpointStore};
use crate::infra::config::Configuration;
use crate::infra::experiment::Experiment;
use crate::infra::metrics::MetricsLogger;
use crate::ml::beam_search::{translate_all, BeamOptions};
use crate::ml::bleu::corpus_bleu;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Patience,
    MaxIterations,
    MaxEpochs,
    TimeBudget,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Patience      => "patience exhausted",
            StopReason::MaxIterations => "iteration limit reached",
            StopReason::MaxEpochs     => "epoch limit reached",
            StopReason::TimeBudget    => "time budget exceeded",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutcome {
    pub reason:          StopReason,
    pub step:            u64,
    pub epoch:           u64,
    pub best:            Option<BestScore>,
    pub evaluations:     usize,
    pub last_checkpoint: PathBuf,
}

/// Training and validation splits, already encoded.
pub struct TrainData {
    pub train: ParallelCorpus,
    pub val:   ParallelCorpus,
}

pub struct TrainLoop<M: Seq2SeqModel> {
    model:        M,
    settings:     TrainSettings,
    data:         TrainData,
    config:       Configuration,
    experiment:   Experiment,
    store:        CheckpointStore,
    metrics:      MetricsLogger,
    history:      History,
    progress:     TrainProgress,
    rng:          RandomStream,
    periodic:     VecDeque<(u64, PathBuf)>,
    base_elapsed: f64,
    clock:        Instant,
}

impl<M: Seq2SeqModel> TrainLoop<M> {
    /// A new run. `rng` is the stream the model was initialised from.
    pub fn fresh(
        model:      M,
        rng:        RandomStream,
        settings:   TrainSettings,
        config:     Configuration,
        experiment: Experiment,
        data:       TrainData,
    ) -> Result<Self> {
        let progress = TrainProgress::start(experiment.id(), rng.state());
        Self::assemble(model, rng, settings, config, experiment, data, History::new(), progress)
    }

    /// Continue from a checkpoint. The model must already hold the
    /// bundle's state; history, progress and the random stream are
    /// taken from the bundle.
    pub fn resume(
        model:      M,
        bundle:     CheckpointBundle,
        settings:   TrainSettings,
        experiment: Experiment,
        data:       TrainData,
    ) -> Result<Self> {
        let CheckpointBundle { history, progress, config, .. } = bundle;
        let rng = RandomStream::restore(&progress.rng);
        tracing::info!(
            "Resuming '{}' at epoch {}, step {} ({} batches into the epoch)",
            progress.experiment,
            progress.epoch,
            progress.step,
            progress.batch_in_epoch
        );
        Self::assemble(model, rng, settings, config, experiment, data, history, progress)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        model:      M,
        rng:        RandomStream,
        settings:   TrainSettings,
        config:     Configuration,
        experiment: Experiment,
        data:       TrainData,
        history:    History,
        progress:   TrainProgress,
    ) -> Result<Self> {
        if data.train.is_empty() {
            return Err(RunnerError::config("the training split has no usable sentence pairs").into());
        }
        if !data.val.has_targets() {
            return Err(RunnerError::config("the validation split needs target sentences").into());
        }

        let mut columns: Vec<String> = vec!["loss".into(), "ppl".into()];
        for m in &settings.eval_metrics {
            if !columns.iter().any(|c| c == m.name()) {
                columns.push(m.name().to_string());
            }
        }

        let store    = CheckpointStore::new(experiment.dir());
        let metrics  = MetricsLogger::new(experiment.metrics_path(), &columns);
        let periodic = existing_periodic(&experiment);
        let base_elapsed = progress.elapsed_secs;

        Ok(Self {
            model,
            settings,
            data,
            config,
            experiment,
            store,
            metrics,
            history,
            progress,
            rng,
            periodic,
            base_elapsed,
            clock: Instant::now(),
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn progress(&self) -> &TrainProgress {
        &self.progress
    }

    fn elapsed_secs(&self) -> f64 {
        self.base_elapsed + self.clock.elapsed().as_secs_f64()
    }

    // ─── Main loop ────────────────────────────────────────────────────────────
    pub fn run(&mut self) -> Result<TrainOutcome> {
        tracing::info!(
            "Experiment '{}' (seed {}): {} training / {} validation pairs, early stopping on {}",
            self.experiment.id(),
            self.rng.seed(),
            self.data.train.len(),
            self.data.val.len(),
            self.settings.early_stop_metric()
        );
        if self.progress.epoch == 0 {
            self.progress.epoch = 1;
            self.progress.batch_in_epoch = 0;
        }

        let mut disp_loss   = 0.0f64;
        let mut disp_steps  = 0u64;
        let mut disp_tokens = 0usize;
        let mut disp_clock  = Instant::now();

        let reason = loop {
            let max_epochs = self.settings.max_epochs;
            if max_epochs > 0 && self.progress.epoch > max_epochs {
                break StopReason::MaxEpochs;
            }

            let order = self.epoch_order(self.progress.epoch);
            let mut stop = None;

            // ── Batches of the current epoch ─────────────────────────────────
            while self.progress.batch_in_epoch < order.len() {
                let batch = self.data.train.batch(&order[self.progress.batch_in_epoch]);
                let next_step = self.progress.step + 1;

                let out = self.model.train_step(&batch, &mut self.rng).map_err(|e| {
                    RunnerError::TrainingDivergence { step: next_step, reason: format!("{e:#}") }
                })?;
                if !out.loss.is_finite() {
                    return Err(RunnerError::TrainingDivergence {
                        step:   next_step,
                        reason: format!("non-finite loss {}", out.loss),
                    }
                    .into());
                }
                self.progress.step = next_step;
                self.progress.batch_in_epoch += 1;

                disp_loss   += out.loss;
                disp_steps  += 1;
                disp_tokens += out.tokens;
                let disp_freq = self.settings.disp_freq;
                if disp_freq > 0 && self.progress.step % disp_freq == 0 {
                    let secs = disp_clock.elapsed().as_secs_f64().max(1e-9);
                    tracing::info!(
                        "epoch {:>3} | step {:>7} | loss {:.4} | {:.0} tok/s",
                        self.progress.epoch,
                        self.progress.step,
                        disp_loss / disp_steps as f64,
                        disp_tokens as f64 / secs
                    );
                    disp_loss   = 0.0;
                    disp_steps  = 0;
                    disp_tokens = 0;
                    disp_clock  = Instant::now();
                }

                let eval_freq = self.settings.eval_freq;
                if eval_freq > 0 && self.progress.step % eval_freq == 0 && self.evaluate()? {
                    stop = Some(StopReason::Patience);
                }

                let ckpt_freq = self.settings.checkpoint_freq;
                if ckpt_freq > 0 && self.progress.step % ckpt_freq == 0 {
                    self.save_periodic()?;
                }

                stop = stop.or_else(|| self.budget_exhausted());
                if stop.is_some() {
                    break;
                }
            }

            // ── End of epoch ─────────────────────────────────────────────────
            if stop.is_none() {
                tracing::info!("Finished epoch {} at step {}", self.progress.epoch, self.progress.step);
                // a best checkpoint taken by this very evaluation resumes here
                let evaluated = self.progress.last_eval_step == Some(self.progress.step);
                if self.settings.eval_freq == 0 && !evaluated && self.evaluate()? {
                    stop = Some(StopReason::Patience);
                }
                self.progress.epoch += 1;
                self.progress.batch_in_epoch = 0;
                stop = stop.or_else(|| self.budget_exhausted());
            }

            if let Some(reason) = stop {
                break reason;
            }
        };

        let bundle = self.bundle()?;
        let last = self.store.save(&self.experiment.last_name(), &bundle)?;
        tracing::info!(
            "Training stopped ({reason}) at step {}; last checkpoint '{}'",
            self.progress.step,
            last.display()
        );
        if let Some(best) = self.progress.best {
            tracing::info!(
                "Best {} = {:.4} at step {}",
                self.settings.early_stop_metric(),
                best.value,
                best.step
            );
        }

        Ok(TrainOutcome {
            reason,
            step:            self.progress.step,
            epoch:           self.progress.epoch,
            best:            self.progress.best,
            evaluations:     self.history.len(),
            last_checkpoint: last,
        })
    }

    /// Batches of `epoch` as index lists, in the epoch's shuffled order.
    fn epoch_order(&self, epoch: u64) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.data.train.len()).collect();
        RandomStream::substream(self.rng.seed(), epoch).shuffle(&mut indices);
        indices
            .chunks(self.settings.batch_size.max(1))
            .map(|c| c.to_vec())
            .collect()
    }

    fn budget_exhausted(&self) -> Option<StopReason> {
        let s = &self.settings;
        if s.max_iterations > 0 && self.progress.step >= s.max_iterations {
            return Some(StopReason::MaxIterations);
        }
        if s.max_minutes > 0 && self.elapsed_secs() >= (s.max_minutes * 60) as f64 {
            return Some(StopReason::TimeBudget);
        }
        None
    }

    // ─── Evaluation ───────────────────────────────────────────────────────────
    fn compute_metrics(&self) -> Result<Metrics> {
        let mut metrics = self.model.evaluate(&self.data.val, self.settings.eval_batch_size)?;

        if self.settings.eval_metrics.contains(&EvalMetric::Bleu) {
            let references = self
                .data
                .val
                .targets()
                .ok_or_else(|| anyhow!("validation split has no references"))?;
            let opts = BeamOptions {
                beam:    self.settings.eval_beam,
                max_len: self.settings.eval_max_len,
                ..BeamOptions::default()
            };
            let hyps: Vec<Vec<TokenId>> = translate_all(
                &self.model,
                &self.data.val.sources(),
                self.settings.eval_batch_size,
                &opts,
            )?
            .iter()
            .map(|t| t.best().to_vec())
            .collect();
            metrics.insert(EvalMetric::Bleu.name().into(), corpus_bleu(&hyps, &references));
        }
        Ok(metrics)
    }

    /// Run one evaluation and book-keep it. Returns whether patience ran out.
    fn evaluate(&mut self) -> Result<bool> {
        let metric = self.settings.early_stop_metric();
        let step   = self.progress.step;
        let epoch  = self.progress.epoch;

        let scored = self.compute_metrics().and_then(|m| match m.get(metric.name()).copied() {
            Some(v) if v.is_finite() => Ok((m, v)),
            Some(v) => Err(anyhow!("{metric} is {v}")),
            None => Err(anyhow!("the model did not report {metric}")),
        });

        let record = match scored {
            Ok((metrics, value)) => {
                let improved = self.progress.best.map_or(true, |b| metric.improves(value, b.value));
                if improved {
                    self.progress.best = Some(BestScore { value, step });
                }
                EvalRecord::succeeded(step, epoch, metrics, improved)
            }
            Err(e) => {
                let err = RunnerError::EvaluationFailure { step, reason: format!("{e:#}") };
                tracing::warn!("{err}");
                EvalRecord::failed(step, epoch, format!("{e:#}"))
            }
        };

        if record.improved {
            self.progress.bad_evals = 0;
        } else {
            self.progress.bad_evals += 1;
        }

        let summary: Vec<String> = record.metrics.iter().map(|(k, v)| format!("{k}={v:.4}")).collect();
        tracing::info!(
            "Evaluation at step {step}: {}{}",
            summary.join(" "),
            if record.improved { " (new best)" } else { "" }
        );

        let improved = record.improved;
        self.progress.last_eval_step = Some(step);
        self.metrics.log(&record)?;
        self.history.push(record);

        if improved {
            let bundle = self.bundle()?;
            let path = self.store.save(&self.experiment.best_name(metric.name()), &bundle)?;
            tracing::info!("Saved best checkpoint '{}'", path.display());
        }

        let patience = self.settings.patience;
        Ok(patience > 0 && self.progress.bad_evals >= patience)
    }

    // ─── Checkpoints ──────────────────────────────────────────────────────────
    fn bundle(&mut self) -> Result<CheckpointBundle> {
        self.progress.rng          = self.rng.state();
        self.progress.elapsed_secs = self.elapsed_secs();
        Ok(CheckpointBundle {
            model:    self.model.state()?,
            history:  self.history.clone(),
            progress: self.progress.clone(),
            config:   self.config.clone(),
        })
    }

    fn save_periodic(&mut self) -> Result<()> {
        let step = self.progress.step;
        let bundle = self.bundle()?;
        let path = self.store.save(&self.experiment.periodic_name(step), &bundle)?;
        tracing::info!("Saved checkpoint '{}'", path.display());

        self.periodic.retain(|(s, _)| *s != step);
        self.periodic.push_back((step, path));
        while self.periodic.len() > self.settings.n_checkpoints {
            if let Some((_, old)) = self.periodic.pop_front() {
                self.store.remove(&old)?;
            }
        }
        Ok(())
    }
}

/// Periodic checkpoints already in the experiment folder, oldest first.
fn existing_periodic(experiment: &Experiment) -> VecDeque<(u64, PathBuf)> {
    let prefix = format!("{}.update", experiment.id());
    let mut found: Vec<(u64, PathBuf)> = fs::read_dir(experiment.dir())
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let step = name.strip_prefix(&prefix)?.strip_suffix(".ckpt")?.parse().ok()?;
            Some((step, entry.path()))
        })
        .collect();
    found.sort();
    found.into()
}
