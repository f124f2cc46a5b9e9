// ============================================================
// Scripted model for engine and loop tests
// ============================================================
// Implements the Seq2SeqModel contract without any tensors:
//
//   decode_step  rows come from a scorer closure (source, history)
//   evaluate     returns a scripted sequence of losses
//   train_step   records the batch, draws from the rng, and can be
//                told to diverge at a given step
//   state        bincode of the few numbers that change in training

use std::cell::{Cell, RefCell};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::domain::history::Metrics;
use crate::domain::model_kind::ModelKind;
use crate::domain::random::RandomStream;
use crate::domain::sequence::{Batch, ParallelCorpus, TokenId};
use crate::domain::traits::{LogProbs, ModelState, Seq2SeqModel, StepOutput, StepQuery};

type Scorer = Box<dyn Fn(&[TokenId], &[TokenId]) -> Vec<f32>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ScriptedState {
    steps:  u64,
    weight: f64,
    evals:  usize,
}

pub struct ScriptedModel {
    vocab:       usize,
    scorer:      Option<Scorer>,
    eval_losses: Vec<f64>,
    fail_evals:  Vec<usize>,
    diverge_at:  Option<u64>,
    state:       ScriptedState,
    evals:       Cell<usize>,
    /// Source sides of every trained batch, in order.
    pub seen:    Vec<Vec<Vec<TokenId>>>,
    step_log:    RefCell<Vec<Vec<usize>>>,
}

impl ScriptedModel {
    pub fn new(vocab: usize) -> Self {
        Self {
            vocab,
            scorer:      None,
            eval_losses: vec![1.0],
            fail_evals:  Vec::new(),
            diverge_at:  None,
            state:       ScriptedState::default(),
            evals:       Cell::new(0),
            seen:        Vec::new(),
            step_log:    RefCell::new(Vec::new()),
        }
    }

    pub fn with_scorer(mut self, f: impl Fn(&[TokenId], &[TokenId]) -> Vec<f32> + 'static) -> Self {
        self.scorer = Some(Box::new(f));
        self
    }

    /// Losses returned by successive evaluations; the last one repeats.
    pub fn with_eval_losses(mut self, losses: &[f64]) -> Self {
        self.eval_losses = losses.to_vec();
        self
    }

    /// Make the given (0-based) evaluation calls fail.
    pub fn failing_evals(mut self, calls: &[usize]) -> Self {
        self.fail_evals = calls.to_vec();
        self
    }

    /// Make the training step that would become step `step` report a NaN loss.
    pub fn diverging_at(mut self, step: u64) -> Self {
        self.diverge_at = Some(step);
        self
    }

    pub fn eval_calls(&self) -> usize {
        self.evals.get()
    }

    pub fn steps(&self) -> u64 {
        self.state.steps
    }

    pub fn weight(&self) -> f64 {
        self.state.weight
    }

    /// Total number of queries per decode_step call.
    pub fn queries_per_step(&self) -> Vec<usize> {
        self.step_log.borrow().iter().map(|per_source| per_source.iter().sum()).collect()
    }

    /// Largest number of queries any single source issued in one step.
    pub fn max_queries_per_source(&self) -> usize {
        self.step_log
            .borrow()
            .iter()
            .flat_map(|per_source| per_source.iter().copied())
            .max()
            .unwrap_or(0)
    }
}

impl Seq2SeqModel for ScriptedModel {
    type Encoded = Vec<Vec<TokenId>>;

    fn kind(&self) -> ModelKind {
        ModelKind::Attention
    }

    fn target_vocab(&self) -> usize {
        self.vocab
    }

    fn train_step(&mut self, batch: &Batch, rng: &mut RandomStream) -> Result<StepOutput> {
        let next = self.state.steps + 1;
        if self.diverge_at == Some(next) {
            return Ok(StepOutput { loss: f64::NAN, tokens: batch.target_tokens() });
        }
        self.seen.push(batch.pairs.iter().map(|p| p.src.clone()).collect());
        self.state.weight += rng.uniform(0.0, 1.0) as f64;
        self.state.steps = next;
        Ok(StepOutput { loss: 1.0 / next as f64, tokens: batch.target_tokens() })
    }

    fn evaluate(&self, split: &ParallelCorpus, _batch_size: usize) -> Result<Metrics> {
        let call = self.evals.get();
        self.evals.set(call + 1);
        if self.fail_evals.contains(&call) {
            return Err(anyhow!("scripted evaluation failure on '{}'", split.name));
        }
        let loss = self
            .eval_losses
            .get(call)
            .or_else(|| self.eval_losses.last())
            .copied()
            .unwrap_or(1.0);
        let mut m = Metrics::new();
        m.insert("loss".into(), loss);
        m.insert("ppl".into(), loss.exp());
        Ok(m)
    }

    fn encode(&self, sources: &[Vec<TokenId>]) -> Result<Self::Encoded> {
        Ok(sources.to_vec())
    }

    fn decode_step(&self, encoded: &Self::Encoded, queries: &[StepQuery<'_>]) -> Result<LogProbs> {
        let scorer = self.scorer.as_ref().ok_or_else(|| anyhow!("no scorer configured"))?;
        let mut per_source = vec![0usize; encoded.len()];
        let mut data = Vec::with_capacity(queries.len() * self.vocab);
        for q in queries {
            per_source[q.source] += 1;
            data.extend(scorer(&encoded[q.source], q.history));
        }
        self.step_log.borrow_mut().push(per_source);
        LogProbs::new(self.vocab, data)
    }

    fn state(&self) -> Result<ModelState> {
        let mut s = self.state.clone();
        s.evals = self.evals.get();
        Ok(ModelState { kind: self.kind(), params: bincode::serialize(&s)?, optimizer: None })
    }

    fn load_state(&mut self, state: &ModelState) -> Result<()> {
        let s: ScriptedState = bincode::deserialize(&state.params)?;
        self.evals.set(s.evals);
        self.state = s;
        Ok(())
    }
}
