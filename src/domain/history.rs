// ============================================================
// Layer 3 — Training History and Progress
// ============================================================
// History is the append-only log of evaluation records. It is
// consumed by the early-stopping logic and stored verbatim in
// every checkpoint bundle, so a resumed run sees exactly the
// evaluations that happened before the interruption.
//
// TrainProgress is the rest of the loop's resumable state: where
// in the data we are, what the best score was, how many
// evaluations in a row failed to improve, and the position of
// the loop's random stream.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::RunnerError;
use crate::domain::random::StreamState;

pub type Metrics = BTreeMap<String, f64>;

/// Metrics an evaluation can compute. The first configured one
/// drives early stopping and names the best checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMetric {
    Loss,
    Perplexity,
    Bleu,
}

impl EvalMetric {
    pub fn name(&self) -> &'static str {
        match self {
            EvalMetric::Loss       => "loss",
            EvalMetric::Perplexity => "ppl",
            EvalMetric::Bleu       => "bleu",
        }
    }

    pub fn lower_is_better(&self) -> bool {
        !matches!(self, EvalMetric::Bleu)
    }

    /// Whether `candidate` beats `best` (strictly).
    pub fn improves(&self, candidate: f64, best: f64) -> bool {
        if self.lower_is_better() {
            candidate < best
        } else {
            candidate > best
        }
    }
}

impl fmt::Display for EvalMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EvalMetric {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "loss"               => Ok(EvalMetric::Loss),
            "ppl" | "perplexity" => Ok(EvalMetric::Perplexity),
            "bleu"               => Ok(EvalMetric::Bleu),
            other => Err(RunnerError::config(format!("unknown evaluation metric '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    pub step:      u64,
    pub epoch:     u64,
    pub timestamp: DateTime<Utc>,
    pub metrics:   Metrics,
    /// Set when the evaluation pass failed; such a record never improves.
    pub failure:   Option<String>,
    pub improved:  bool,
}

impl EvalRecord {
    pub fn succeeded(step: u64, epoch: u64, metrics: Metrics, improved: bool) -> Self {
        Self { step, epoch, timestamp: Utc::now(), metrics, failure: None, improved }
    }

    pub fn failed(step: u64, epoch: u64, reason: impl Into<String>) -> Self {
        Self {
            step,
            epoch,
            timestamp: Utc::now(),
            metrics:   Metrics::new(),
            failure:   Some(reason.into()),
            improved:  false,
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    records: Vec<EvalRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EvalRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[EvalRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EvalRecord> {
        self.records.last()
    }

    /// Length of the current run of non-improving evaluations.
    pub fn trailing_non_improving(&self) -> usize {
        self.records.iter().rev().take_while(|r| !r.improved).count()
    }
}

/// Best value of the early-stopping metric and where it was reached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestScore {
    pub value: f64,
    pub step:  u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainProgress {
    /// Experiment id; names the experiment folder and its files.
    pub experiment:     String,
    /// 1-based epoch currently being trained (0 before the first one).
    pub epoch:          u64,
    /// Number of optimisation steps taken so far.
    pub step:           u64,
    /// Batches of the current epoch already consumed.
    pub batch_in_epoch: usize,
    pub best:           Option<BestScore>,
    pub bad_evals:      usize,
    /// Step of the most recent evaluation, recorded before any
    /// checkpoint taken by that evaluation.
    pub last_eval_step: Option<u64>,
    pub rng:            StreamState,
    pub elapsed_secs:   f64,
}

impl TrainProgress {
    pub fn start(experiment: impl Into<String>, rng: StreamState) -> Self {
        Self {
            experiment: experiment.into(),
            epoch: 0,
            step: 0,
            batch_in_epoch: 0,
            best: None,
            bad_evals: 0,
            last_eval_step: None,
            rng,
            elapsed_secs: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(step: u64, improved: bool) -> EvalRecord {
        let mut m = Metrics::new();
        m.insert("loss".into(), 1.0);
        EvalRecord::succeeded(step, 1, m, improved)
    }

    #[test]
    fn test_trailing_non_improving() {
        let mut h = History::new();
        assert_eq!(h.trailing_non_improving(), 0);
        h.push(record(10, true));
        h.push(record(20, false));
        h.push(EvalRecord::failed(30, 1, "boom"));
        assert_eq!(h.trailing_non_improving(), 2);
        h.push(record(40, true));
        assert_eq!(h.trailing_non_improving(), 0);
    }

    #[test]
    fn test_metric_direction() {
        assert!(EvalMetric::Loss.improves(1.0, 2.0));
        assert!(!EvalMetric::Perplexity.improves(2.0, 2.0));
        assert!(EvalMetric::Bleu.improves(30.0, 20.0));
        assert_eq!("BLEU".parse::<EvalMetric>().unwrap(), EvalMetric::Bleu);
        assert!("meteor".parse::<EvalMetric>().is_err());
    }

    #[test]
    fn test_failed_record_has_no_metrics() {
        let r = EvalRecord::failed(5, 2, "nan loss");
        assert!(r.metric("loss").is_none());
        assert!(!r.improved);
        assert_eq!(r.failure.as_deref(), Some("nan loss"));
    }
}
