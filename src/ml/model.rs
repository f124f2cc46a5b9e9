// ============================================================
// Layer 5 — Seq2Seq Network
// ============================================================
// A small encoder/decoder network with two ways of reading the
// source (ContextMode):
//
//   Attention   context_t = Σ_s softmax(q_t · h_s) h_s
//   MeanPool    context_t = mean_s h_s       (same for every t)
//
// Encoder (position-wise):
//   h_s = tanh(W_enc · E_src[x_s] + b)
//
// Decoder at step t, given the tokens y_<t generated so far:
//   last_t   = E_trg[y_{t-1}]                 (<bos> at t = 0)
//   prefix_t = mean(E_trg[<bos>], E_trg[y_0], …, E_trg[y_{t-1}])
//   q_t      = tanh(W_last · last_t + W_prefix · prefix_t + b)
//   o_t      = tanh(W_query · q_t + W_ctx · context_t + b)
//   logits_t = W_out · o_t + b
//
// The decoder has no recurrence, so teacher-forced training runs
// every position at once: the running prefix mean is a matmul
// with a lower-triangular averaging matrix. Decoding computes the
// same quantities for a single position from each hypothesis'
// token history.
//
// Parameters are drawn from the caller's RandomStream and dropout
// masks come from it too, never from a backend-global RNG.
//
// Reference: Bahdanau et al. (2015) Neural Machine Translation by
//            Jointly Learning to Align and Translate
//            Luong et al. (2015) Effective Approaches to
//            Attention-based NMT (dot-product scoring)

use burn::{
    module::Param,
    nn::{Embedding, EmbeddingConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::softmax,
};

use crate::data::batcher::SourceBatch;
use crate::domain::random::RandomStream;
use crate::domain::sequence::{TokenId, BOS_ID, PAD_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    Attention,
    MeanPool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetDims {
    pub src_vocab:  usize,
    pub trg_vocab:  usize,
    pub emb_dim:    usize,
    pub hid_dim:    usize,
    pub init_scale: f32,
}

#[derive(Module, Debug)]
pub struct Seq2SeqNet<B: Backend> {
    pub src_embedding: Embedding<B>,
    pub trg_embedding: Embedding<B>,
    pub encoder:       Linear<B>,
    pub last_proj:     Linear<B>,
    pub prefix_proj:   Linear<B>,
    pub query_proj:    Linear<B>,
    pub context_proj:  Linear<B>,
    pub output:        Linear<B>,
}

/// Encoder output kept for the whole decoding of a batch.
#[derive(Debug, Clone)]
pub struct Memory<B: Backend> {
    /// [batch, src_len, hid]
    pub states: Tensor<B, 3>,
    /// [batch, src_len], 0 for real positions, MASKED for padding
    pub mask:   Tensor<B, 2>,
}

impl<B: Backend> Memory<B> {
    /// Rows of the memory for the given batch indices, in that order.
    pub fn select(&self, rows: &[usize], device: &B::Device) -> Self {
        let idx: Vec<i64> = rows.iter().map(|&r| r as i64).collect();
        let idx = Tensor::<B, 1, Int>::from_data(TensorData::new(idx, [rows.len()]), device);
        Self {
            states: self.states.clone().select(0, idx.clone()),
            mask:   self.mask.clone().select(0, idx),
        }
    }
}

// ─── Initialisation ──────────────────────────────────────────────────────────
fn uniform_matrix<B: Backend>(
    rows:   usize,
    cols:   usize,
    scale:  f32,
    rng:    &mut RandomStream,
    device: &B::Device,
) -> Tensor<B, 2> {
    let values: Vec<f32> = (0..rows * cols).map(|_| rng.uniform(-scale, scale)).collect();
    Tensor::from_data(TensorData::new(values, [rows, cols]), device)
}

fn linear<B: Backend>(
    d_in:   usize,
    d_out:  usize,
    bias:   bool,
    scale:  f32,
    rng:    &mut RandomStream,
    device: &B::Device,
) -> Linear<B> {
    let mut layer = LinearConfig::new(d_in, d_out).with_bias(bias).init(device);
    layer.weight = Param::from_tensor(uniform_matrix(d_in, d_out, scale, rng, device));
    if bias {
        layer.bias = Some(Param::from_tensor(Tensor::zeros([d_out], device)));
    }
    layer
}

fn embedding<B: Backend>(
    vocab:  usize,
    dim:    usize,
    scale:  f32,
    rng:    &mut RandomStream,
    device: &B::Device,
) -> Embedding<B> {
    let mut emb = EmbeddingConfig::new(vocab, dim).init(device);
    emb.weight = Param::from_tensor(uniform_matrix(vocab, dim, scale, rng, device));
    emb
}

impl NetDims {
    /// Build a network whose parameters are uniform in ±init_scale,
    /// drawn from `rng` in a fixed order. Biases start at zero.
    pub fn init<B: Backend>(&self, rng: &mut RandomStream, device: &B::Device) -> Seq2SeqNet<B> {
        let (e, h, s) = (self.emb_dim, self.hid_dim, self.init_scale);
        Seq2SeqNet {
            src_embedding: embedding(self.src_vocab, e, s, rng, device),
            trg_embedding: embedding(self.trg_vocab, e, s, rng, device),
            encoder:       linear(e, h, true, s, rng, device),
            last_proj:     linear(e, h, true, s, rng, device),
            prefix_proj:   linear(e, h, false, s, rng, device),
            query_proj:    linear(h, h, true, s, rng, device),
            context_proj:  linear(h, h, false, s, rng, device),
            output:        linear(h, self.trg_vocab, true, s, rng, device),
        }
    }
}

/// Inverted-dropout mask `[d0, d1, d2]` drawn from `rng`.
pub fn dropout_mask<B: Backend>(
    dims:   [usize; 3],
    p:      f64,
    rng:    &mut RandomStream,
    device: &B::Device,
) -> Tensor<B, 3> {
    let keep = (1.0 - p) as f32;
    let values: Vec<f32> = (0..dims.iter().product::<usize>())
        .map(|_| if rng.bernoulli(p) { 0.0 } else { 1.0 / keep })
        .collect();
    Tensor::from_data(TensorData::new(values, dims), device)
}

/// `[t, t]` matrix with row i = 1/(i+1) on columns 0..=i.
fn prefix_average<B: Backend>(len: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut values = vec![0.0f32; len * len];
    for i in 0..len {
        for j in 0..=i {
            values[i * len + j] = 1.0 / (i + 1) as f32;
        }
    }
    Tensor::from_data(TensorData::new(values, [len, len]), device)
}

impl<B: Backend> Seq2SeqNet<B> {
    /// Encode a padded source batch. `dropout` is (p, rng) in training.
    pub fn encode(&self, source: SourceBatch<B>, dropout: Option<(f64, &mut RandomStream)>) -> Memory<B> {
        let mut emb = self.src_embedding.forward(source.tokens);
        if let Some((p, rng)) = dropout {
            let mask = dropout_mask(emb.dims(), p, rng, &emb.device());
            emb = emb * mask;
        }
        Memory { states: self.encoder.forward(emb).tanh(), mask: source.mask }
    }

    /// Logits `[n, t, trg_vocab]` from decoder inputs `[n, t, emb]`.
    fn head(
        &self,
        last:   Tensor<B, 3>,
        prefix: Tensor<B, 3>,
        memory: &Memory<B>,
        mode:   ContextMode,
    ) -> Tensor<B, 3> {
        let [n, t, _] = last.dims();
        let [_, s, h] = memory.states.dims();

        let query = (self.last_proj.forward(last) + self.prefix_proj.forward(prefix)).tanh();

        let context = match mode {
            ContextMode::Attention => {
                let scores = query.clone().matmul(memory.states.clone().swap_dims(1, 2));
                let mask = memory.mask.clone().unsqueeze_dim::<3>(1).expand([n, t, s]);
                let weights = softmax(scores + mask, 2);
                weights.matmul(memory.states.clone())
            }
            ContextMode::MeanPool => {
                let keep = memory.mask.clone().equal_elem(0.0).float();
                let count = keep.clone().sum_dim(1).unsqueeze_dim::<3>(2);
                let summed = (memory.states.clone() * keep.unsqueeze_dim::<3>(2).expand([n, s, h]))
                    .sum_dim(1);
                (summed / count.expand([n, 1, h])).expand([n, t, h])
            }
        };

        let out = (self.query_proj.forward(query) + self.context_proj.forward(context)).tanh();
        self.output.forward(out)
    }

    /// Teacher-forced logits for every decoder position.
    pub fn forward(
        &self,
        memory:  &Memory<B>,
        dec_in:  Tensor<B, 2, Int>,
        mode:    ContextMode,
        dropout: Option<(f64, &mut RandomStream)>,
    ) -> Tensor<B, 3> {
        let [n, t] = dec_in.dims();
        let mut emb = self.trg_embedding.forward(dec_in);
        if let Some((p, rng)) = dropout {
            let mask = dropout_mask(emb.dims(), p, rng, &emb.device());
            emb = emb * mask;
        }
        let avg = prefix_average::<B>(t, &emb.device()).unsqueeze_dim::<3>(0).expand([n, t, t]);
        let prefix = avg.matmul(emb.clone());
        self.head(emb, prefix, memory, mode)
    }

    /// Logits `[q, trg_vocab]` for the next token of each history.
    /// `memory` must already hold one row per history.
    pub fn step(&self, memory: &Memory<B>, histories: &[&[TokenId]], mode: ContextMode) -> Tensor<B, 2> {
        let device = memory.states.device();
        let q = histories.len();
        let len = histories.iter().map(|h| h.len() + 1).max().unwrap_or(1);

        let mut ids     = Vec::with_capacity(q * len);
        let mut weights = Vec::with_capacity(q * len);
        let mut last    = Vec::with_capacity(q);
        for h in histories {
            let n = h.len() + 1;
            ids.push(BOS_ID as i64);
            ids.extend(h.iter().map(|&x| x as i64));
            ids.extend(std::iter::repeat(PAD_ID as i64).take(len - n));
            weights.extend(std::iter::repeat(1.0 / n as f32).take(n));
            weights.extend(std::iter::repeat(0.0f32).take(len - n));
            last.push(h.last().copied().unwrap_or(BOS_ID) as i64);
        }

        let ids = Tensor::<B, 2, Int>::from_data(TensorData::new(ids, [q, len]), &device);
        let weights = Tensor::<B, 2>::from_data(TensorData::new(weights, [q, len]), &device);
        let last = Tensor::<B, 2, Int>::from_data(TensorData::new(last, [q, 1]), &device);

        let hist_emb = self.trg_embedding.forward(ids);
        let prefix = weights.unsqueeze_dim::<3>(1).matmul(hist_emb);
        let last_emb = self.trg_embedding.forward(last);

        let logits = self.head(last_emb, prefix, memory, mode);
        let [_, _, v] = logits.dims();
        logits.reshape([q, v])
    }
}
