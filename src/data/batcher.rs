// ============================================================
// Layer 4 — Seq2Seq Batcher
// ============================================================
// Turns unpadded token sequences into padded tensors.
//
//   source   x1 x2 x3 <eos> <pad>       [batch, src_len]
//   src mask  0  0  0   0   -1e9         additive, for attention
//   dec in   <bos> y1 y2 <pad>           [batch, trg_len]
//   dec out   y1  y2 <eos> <pad>          (teacher forcing)
//
// Every source gets a trailing <eos>, so even an empty line has
// one real position to attend to.
//
// The batcher holds the target device so tensors are created on
// the reserved GPU/CPU.
//
// Reference: Burn Book §4 (Batcher)

use anyhow::Result;
use burn::prelude::*;

use crate::domain::sequence::{Batch, TokenId, BOS_ID, EOS_ID, PAD_ID};

/// Additive mask value for padded source positions.
pub const MASKED: f32 = -1.0e9;

/// Encoder inputs: padded ids and the additive padding mask.
#[derive(Debug, Clone)]
pub struct SourceBatch<B: Backend> {
    pub tokens: Tensor<B, 2, Int>,
    pub mask:   Tensor<B, 2>,
}

/// A full training batch.
#[derive(Debug, Clone)]
pub struct Seq2SeqBatch<B: Backend> {
    pub source:  SourceBatch<B>,
    pub dec_in:  Tensor<B, 2, Int>,
    pub dec_out: Tensor<B, 2, Int>,
}

#[derive(Clone, Debug)]
pub struct Seq2SeqBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> Seq2SeqBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    fn int_matrix(&self, flat: Vec<i64>, rows: usize, cols: usize) -> Tensor<B, 2, Int> {
        Tensor::from_data(TensorData::new(flat, [rows, cols]), &self.device)
    }

    pub fn sources(&self, sources: &[Vec<TokenId>]) -> SourceBatch<B> {
        let rows = sources.len();
        let cols = sources.iter().map(|s| s.len() + 1).max().unwrap_or(1);

        let mut ids  = Vec::with_capacity(rows * cols);
        let mut mask = Vec::with_capacity(rows * cols);
        for s in sources {
            ids.extend(s.iter().map(|&t| t as i64));
            ids.push(EOS_ID as i64);
            ids.extend(std::iter::repeat(PAD_ID as i64).take(cols - s.len() - 1));
            mask.extend(std::iter::repeat(0.0f32).take(s.len() + 1));
            mask.extend(std::iter::repeat(MASKED).take(cols - s.len() - 1));
        }

        SourceBatch {
            tokens: self.int_matrix(ids, rows, cols),
            mask:   Tensor::from_data(TensorData::new(mask, [rows, cols]), &self.device),
        }
    }

    /// Teacher-forcing tensors for a batch whose pairs all have targets.
    pub fn batch(&self, batch: &Batch) -> Result<Seq2SeqBatch<B>> {
        let targets: Vec<&Vec<TokenId>> = batch
            .pairs
            .iter()
            .map(|p| p.trg.as_ref())
            .collect::<Option<_>>()
            .ok_or_else(|| anyhow::anyhow!("batch contains a pair without a target side"))?;
        anyhow::ensure!(!targets.is_empty(), "cannot build tensors for an empty batch");

        let sources: Vec<Vec<TokenId>> = batch.pairs.iter().map(|p| p.src.clone()).collect();
        let rows = targets.len();
        let cols = targets.iter().map(|t| t.len() + 1).max().unwrap_or(1);

        let mut dec_in  = Vec::with_capacity(rows * cols);
        let mut dec_out = Vec::with_capacity(rows * cols);
        for t in &targets {
            let pad = cols - t.len() - 1;
            dec_in.push(BOS_ID as i64);
            dec_in.extend(t.iter().map(|&x| x as i64));
            dec_in.extend(std::iter::repeat(PAD_ID as i64).take(pad));
            dec_out.extend(t.iter().map(|&x| x as i64));
            dec_out.push(EOS_ID as i64);
            dec_out.extend(std::iter::repeat(PAD_ID as i64).take(pad));
        }

        Ok(Seq2SeqBatch {
            source:  self.sources(&sources),
            dec_in:  self.int_matrix(dec_in, rows, cols),
            dec_out: self.int_matrix(dec_out, rows, cols),
        })
    }
}
