// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All burn framework code lives here, together with the two
// engines written against the Seq2SeqModel contract.
//
//   backend.rs      — NdArray / Wgpu backend selection
//   model.rs        — encoder + attention / mean-pool decoder network
//   nmt.rs          — Seq2SeqModel implementation (Adam, records)
//   beam_search.rs  — batched, constrained beam search
//   bleu.rs         — corpus BLEU for validation
//   trainer.rs      — training / resume loop, early stopping
//   translator.rs   — checkpoint → hypothesis files
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Bahdanau et al. (2015) Neural Machine Translation
//            by Jointly Learning to Align and Translate

/// Compute backend and device mapping
pub mod backend;

/// The seq2seq network
pub mod model;

/// Seq2SeqModel on top of the burn network
pub mod nmt;

/// Batched beam search
pub mod beam_search;

/// Corpus BLEU
pub mod bleu;

/// Training and resume loop
pub mod trainer;

/// Checkpoint-based translator
pub mod translator;

#[cfg(test)]
pub mod testing;
