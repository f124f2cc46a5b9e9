// ============================================================
// Layer 3 — Token Sequences, Corpora and Batches
// ============================================================
// The decoding engine and the training loop only ever see
// token identifiers. Text only exists at the edges (vocabulary
// encode/decode and the output filters).
//
// Special token ids are fixed for every vocabulary:
//   <pad> = 0   padding, never generated
//   <bos> = 1   decoder start symbol, never generated
//   <eos> = 2   end of sequence
//   <unk> = 3   out-of-vocabulary word

use serde::{Deserialize, Serialize};

pub type TokenId = u32;

pub const PAD_ID: TokenId = 0;
pub const BOS_ID: TokenId = 1;
pub const EOS_ID: TokenId = 2;
pub const UNK_ID: TokenId = 3;

/// One aligned sentence pair. Test splits may have no target side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencePair {
    pub src: Vec<TokenId>,
    pub trg: Option<Vec<TokenId>>,
}

/// A named data split, already mapped to token ids.
#[derive(Debug, Clone, Default)]
pub struct ParallelCorpus {
    pub name:  String,
    pub pairs: Vec<SequencePair>,
}

impl ParallelCorpus {
    pub fn new(name: impl Into<String>, pairs: Vec<SequencePair>) -> Self {
        Self { name: name.into(), pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn has_targets(&self) -> bool {
        !self.pairs.is_empty() && self.pairs.iter().all(|p| p.trg.is_some())
    }

    pub fn sources(&self) -> Vec<Vec<TokenId>> {
        self.pairs.iter().map(|p| p.src.clone()).collect()
    }

    pub fn targets(&self) -> Option<Vec<Vec<TokenId>>> {
        self.pairs.iter().map(|p| p.trg.clone()).collect()
    }

    /// Gather the pairs at `indices` into a training batch.
    pub fn batch(&self, indices: &[usize]) -> Batch {
        let pairs = indices
            .iter()
            .filter_map(|&i| self.pairs.get(i).cloned())
            .collect();
        Batch { pairs }
    }

    /// Contiguous chunks of at most `batch_size` pairs, in corpus order.
    pub fn chunks(&self, batch_size: usize) -> impl Iterator<Item = Batch> + '_ {
        self.pairs
            .chunks(batch_size.max(1))
            .map(|c| Batch { pairs: c.to_vec() })
    }
}

/// A group of unpadded pairs; padding is the model's business.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub pairs: Vec<SequencePair>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of target tokens the loss is computed over (incl. <eos>).
    pub fn target_tokens(&self) -> usize {
        self.pairs
            .iter()
            .filter_map(|p| p.trg.as_ref())
            .map(|t| t.len() + 1)
            .sum()
    }
}
