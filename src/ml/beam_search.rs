// ============================================================
// Layer 5 — Batched Beam Search
// ============================================================
// Decodes a batch of source sequences in lock-step:
//
//   1. encode the whole batch once
//   2. give every source a Beam holding one empty hypothesis
//   3. each step:
//        - collect one query per active hypothesis of every
//          unfinished beam (finished beams issue none, but their
//          encoder rows stay in the batch)
//        - one decode_step call for all queries
//        - apply the constraints to each row
//        - let each beam keep its best `k - finished` extensions
//   4. stop once every beam is done or `max_len` steps were taken
//
// Constraints (masked entries are -inf and can never be chosen):
//   <pad>, <bos>   always
//   <unk>          with avoid_unk
//   previous token with avoid_double (no immediate repetition)
//
// Beams never exceed `k` live hypotheses, and with identical
// inputs the output is identical: selection is a stable sort
// with ties broken by parent order, then token id.
//
// Reference: Koehn (2004) Pharaoh: a Beam Search Decoder
//            Wu et al. (2016) GNMT (length normalisation)

use anyhow::Result;

use crate::domain::hypothesis::Beam;
use crate::domain::sequence::{TokenId, BOS_ID, PAD_ID, UNK_ID};
use crate::domain::traits::{Seq2SeqModel, StepQuery};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamOptions {
    /// Beam width k.
    pub beam:         usize,
    /// Maximum number of decoding steps per sequence.
    pub max_len:      usize,
    pub avoid_unk:    bool,
    pub avoid_double: bool,
    /// GNMT length-penalty exponent; 0 ranks by raw cumulative score.
    pub lp_alpha:     f32,
    /// Hypotheses returned per source, best first.
    pub n_best:       usize,
}

impl Default for BeamOptions {
    fn default() -> Self {
        Self {
            beam:         12,
            max_len:      100,
            avoid_unk:    false,
            avoid_double: false,
            lp_alpha:     0.0,
            n_best:       1,
        }
    }
}

/// One decoded hypothesis: tokens without <eos>, and its final score.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub tokens: Vec<TokenId>,
    pub score:  f32,
}

/// Up to `n_best` hypotheses for one source, best first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Translation {
    pub hypotheses: Vec<Scored>,
}

impl Translation {
    pub fn best(&self) -> &[TokenId] {
        self.hypotheses.first().map(|h| h.tokens.as_slice()).unwrap_or(&[])
    }
}

/// Mask disallowed continuations of a hypothesis ending in `prev`.
pub fn apply_constraints(row: &mut [f32], prev: Option<TokenId>, opts: &BeamOptions) {
    let mut mask = |tok: TokenId| {
        if let Some(v) = row.get_mut(tok as usize) {
            *v = f32::NEG_INFINITY;
        }
    };
    mask(PAD_ID);
    mask(BOS_ID);
    if opts.avoid_unk {
        mask(UNK_ID);
    }
    if opts.avoid_double {
        if let Some(prev) = prev {
            mask(prev);
        }
    }
}

/// Beam-search one batch of sources.
pub fn search_batch<M: Seq2SeqModel>(
    model:   &M,
    sources: &[Vec<TokenId>],
    opts:    &BeamOptions,
) -> Result<Vec<Translation>> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }
    let vocab = model.target_vocab();
    let encoded = model.encode(sources)?;
    let mut beams: Vec<Beam> = sources.iter().map(|_| Beam::new(opts.beam)).collect();

    for _ in 0..opts.max_len {
        // ── Query every active hypothesis of every open beam ─────────────────
        let (log_probs, owners) = {
            let mut queries = Vec::new();
            let mut owners  = Vec::new();
            for (i, beam) in beams.iter().enumerate() {
                if beam.is_done() {
                    continue;
                }
                owners.push((i, beam.active().len()));
                queries.extend(beam.active().iter().map(|h| StepQuery { source: i, history: h.tokens() }));
            }
            if queries.is_empty() {
                break;
            }

            let mut lp = model.decode_step(&encoded, &queries)?;
            anyhow::ensure!(
                lp.rows() == queries.len() && lp.vocab() == vocab,
                "decode step returned {}x{} log-probs for {} queries over {vocab} tokens",
                lp.rows(),
                lp.vocab(),
                queries.len()
            );
            for (r, q) in queries.iter().enumerate() {
                apply_constraints(lp.row_mut(r), q.history.last().copied(), opts);
            }
            (lp, owners)
        };

        // ── Advance each beam with its own rows ──────────────────────────────
        let mut r = 0;
        for (i, n) in owners {
            let rows: Vec<&[f32]> = (r..r + n).map(|j| log_probs.row(j)).collect();
            beams[i].advance(&rows);
            r += n;
        }
    }

    for beam in &mut beams {
        beam.close();
    }

    Ok(beams
        .iter()
        .map(|beam| Translation {
            hypotheses: beam
                .ranked(opts.lp_alpha)
                .into_iter()
                .take(opts.n_best.max(1))
                .map(|h| Scored { tokens: h.output().to_vec(), score: h.final_score(opts.lp_alpha) })
                .collect(),
        })
        .collect())
}

/// Decode `sources` in consecutive batches of `batch_size`,
/// returning one translation per source in input order.
pub fn translate_all<M: Seq2SeqModel>(
    model:      &M,
    sources:    &[Vec<TokenId>],
    batch_size: usize,
    opts:       &BeamOptions,
) -> Result<Vec<Translation>> {
    let mut out = Vec::with_capacity(sources.len());
    for (b, chunk) in sources.chunks(batch_size.max(1)).enumerate() {
        out.extend(search_batch(model, chunk, opts)?);
        tracing::debug!("decoded batch {} ({} sentences so far)", b + 1, out.len());
    }
    Ok(out)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sequence::EOS_ID;
    use crate::ml::testing::ScriptedModel;

    const NEG: f32 = f32::NEG_INFINITY;

    #[test]
    fn test_constraints_mask_specials() {
        let opts = BeamOptions { avoid_unk: true, avoid_double: true, ..Default::default() };
        let mut row = vec![0.0f32; 6];
        apply_constraints(&mut row, Some(5), &opts);
        assert_eq!(row, vec![NEG, NEG, 0.0, NEG, 0.0, NEG]);

        let mut row = vec![0.0f32; 6];
        apply_constraints(&mut row, None, &BeamOptions::default());
        assert_eq!(row, vec![NEG, NEG, 0.0, 0.0, 0.0, 0.0]);
    }

    /// Two three-token sources, beam 1, max_len 5: the first emits
    /// "4 5 <eos>", the second never emits <eos> and is cut at five tokens.
    #[test]
    fn test_greedy_batch_with_length_limit() {
        let model = ScriptedModel::new(8).with_scorer(|src, hist| {
            let mut row = vec![-5.0f32; 8];
            let next = if src == [4, 5, 6] {
                [4, 5, EOS_ID].get(hist.len()).copied().unwrap_or(EOS_ID)
            } else {
                6 + (hist.len() as u32 % 2)
            };
            row[next as usize] = -0.1;
            row
        });
        let opts = BeamOptions { beam: 1, max_len: 5, ..Default::default() };
        let out = search_batch(&model, &[vec![4, 5, 6], vec![7, 6, 5]], &opts).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].best(), &[4, 5]);
        assert_eq!(out[1].best(), &[6, 7, 6, 7, 6]);
        // the finished first source issued no queries after step 3
        assert_eq!(model.queries_per_step(), vec![2, 2, 2, 1, 1]);
    }

    #[test]
    fn test_avoid_unk_never_emits_unk() {
        let model = ScriptedModel::new(6).with_scorer(|_, hist| {
            let mut row = vec![-3.0f32; 6];
            row[UNK_ID as usize] = -0.01;
            if hist.len() >= 3 {
                row[EOS_ID as usize] = -0.02;
            }
            row
        });
        let opts = BeamOptions { beam: 3, max_len: 6, avoid_unk: true, n_best: 3, ..Default::default() };
        for t in search_batch(&model, &[vec![4], vec![5, 5]], &opts).unwrap() {
            for h in &t.hypotheses {
                assert!(!h.tokens.contains(&UNK_ID));
            }
        }
        // without the flag the unk-heavy hypothesis wins
        let plain = BeamOptions { avoid_unk: false, ..opts };
        let out = search_batch(&model, &[vec![4]], &plain).unwrap();
        assert!(out[0].best().contains(&UNK_ID));
    }

    #[test]
    fn test_avoid_double_never_repeats_adjacent_tokens() {
        let model = ScriptedModel::new(7).with_scorer(|_, hist| {
            let mut row = vec![-2.0f32; 7];
            // strongly prefers repeating whatever came last
            match hist.last() {
                Some(&t) => row[t as usize] = -0.01,
                None => row[4] = -0.01,
            }
            if hist.len() >= 4 {
                row[EOS_ID as usize] = -0.005;
            }
            row
        });
        let opts = BeamOptions { beam: 4, max_len: 8, avoid_double: true, n_best: 4, ..Default::default() };
        let out = search_batch(&model, &[vec![4], vec![5]], &opts).unwrap();
        for t in out {
            for h in &t.hypotheses {
                assert!(h.tokens.windows(2).all(|w| w[0] != w[1]), "{:?}", h.tokens);
            }
        }
    }

    #[test]
    fn test_beam_bound_and_determinism() {
        let scorer = |src: &[TokenId], hist: &[TokenId]| {
            (0..9u32)
                .map(|t| -(((t * 7 + src[0] * 3 + hist.len() as u32 * 5) % 11) as f32) / 3.0)
                .collect::<Vec<f32>>()
        };
        let opts = BeamOptions { beam: 3, max_len: 7, n_best: 10, ..Default::default() };
        let sources = vec![vec![4], vec![5], vec![6], vec![7]];

        let model = ScriptedModel::new(9).with_scorer(scorer);
        let a = search_batch(&model, &sources, &opts).unwrap();
        assert!(model.max_queries_per_source() <= 3);
        for t in &a {
            assert!(!t.hypotheses.is_empty() && t.hypotheses.len() <= 6);
        }

        let b = search_batch(&ScriptedModel::new(9).with_scorer(scorer), &sources, &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_batches_preserve_input_order() {
        let model = ScriptedModel::new(12).with_scorer(|src, hist| {
            let mut row = vec![-4.0f32; 12];
            let next = if hist.is_empty() { src[0] } else { EOS_ID };
            row[next as usize] = -0.1;
            row
        });
        let sources: Vec<Vec<TokenId>> = (4..11).map(|t| vec![t]).collect();
        let opts = BeamOptions { beam: 2, max_len: 4, ..Default::default() };
        let out = translate_all(&model, &sources, 3, &opts).unwrap();
        let firsts: Vec<TokenId> = out.iter().map(|t| t.best()[0]).collect();
        assert_eq!(firsts, (4..11).collect::<Vec<_>>());
    }
}
