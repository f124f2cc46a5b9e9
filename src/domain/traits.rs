// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The training loop and the beam-search engine are written
// against the Seq2SeqModel trait, never against a concrete
// network. The burn implementation lives in `ml::nmt`; tests use
// scripted models that implement the same contract.
//
// The contract is intentionally small:
//
//   train_step   one optimisation step on a batch
//   evaluate     loss-style metrics over a whole split
//   encode       source batch → reusable representation
//   decode_step  representation + hypotheses → next-token log-probs
//   state        serialisable weights (+ optimizer state)
//   load_state   adopt previously serialised state
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::history::Metrics;
use crate::domain::model_kind::ModelKind;
use crate::domain::random::RandomStream;
use crate::domain::sequence::{Batch, ParallelCorpus, TokenId};

/// What a single optimisation step reports back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    /// Mean per-token loss of the batch.
    pub loss:   f64,
    /// Number of target tokens the loss was averaged over.
    pub tokens: usize,
}

/// One row of a decoding step: which encoded source it belongs to
/// and the tokens generated so far for that hypothesis.
#[derive(Debug, Clone, Copy)]
pub struct StepQuery<'a> {
    pub source:  usize,
    pub history: &'a [TokenId],
}

/// Row-major `[rows, vocab]` matrix of log-probabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct LogProbs {
    vocab: usize,
    data:  Vec<f32>,
}

impl LogProbs {
    pub fn new(vocab: usize, data: Vec<f32>) -> Result<Self> {
        anyhow::ensure!(vocab > 0, "log-prob matrix needs a non-empty vocabulary");
        anyhow::ensure!(
            data.len() % vocab == 0,
            "log-prob buffer of {} values is not a multiple of vocab size {}",
            data.len(),
            vocab
        );
        Ok(Self { vocab, data })
    }

    pub fn vocab(&self) -> usize {
        self.vocab
    }

    pub fn rows(&self) -> usize {
        self.data.len() / self.vocab
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.vocab..(i + 1) * self.vocab]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.vocab..(i + 1) * self.vocab]
    }
}

/// Serialised model state as stored in a checkpoint bundle.
/// `params` and `optimizer` are opaque, device-agnostic byte records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub kind:      ModelKind,
    pub params:    Vec<u8>,
    pub optimizer: Option<Vec<u8>>,
}

pub trait Seq2SeqModel {
    /// Encoder output for one batch, reused across all decoding steps.
    type Encoded;

    fn kind(&self) -> ModelKind;

    /// Size of the target vocabulary, i.e. the width of each log-prob row.
    fn target_vocab(&self) -> usize;

    fn train_step(&mut self, batch: &Batch, rng: &mut RandomStream) -> Result<StepOutput>;

    /// Loss-style metrics over `split` (at least `loss`).
    fn evaluate(&self, split: &ParallelCorpus, batch_size: usize) -> Result<Metrics>;

    fn encode(&self, sources: &[Vec<TokenId>]) -> Result<Self::Encoded>;

    /// One row of next-token log-probabilities per query, in query order.
    fn decode_step(&self, encoded: &Self::Encoded, queries: &[StepQuery<'_>]) -> Result<LogProbs>;

    fn state(&self) -> Result<ModelState>;

    fn load_state(&mut self, state: &ModelState) -> Result<()>;
}
