// ============================================================
// Layer 3 — Hypotheses and Beams
// ============================================================
// A Beam tracks the search state of ONE input sequence:
//
//   active    up to `width` partial hypotheses still being expanded
//   finished  hypotheses that emitted <eos>; kept, never expanded
//
// At every step the beam receives one row of next-token
// log-probabilities per active hypothesis (already filtered by
// the decoding constraints) and keeps the best `width - finished`
// extensions by cumulative score. Ties are broken by generation
// order: parent order first, then token id. The selection is
// therefore fully deterministic for identical inputs.
//
// Reference: Wu et al. (2016) GNMT, §7 (length normalisation)

use std::cmp::Ordering;

use crate::domain::sequence::{TokenId, EOS_ID};

#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    tokens:   Vec<TokenId>,
    score:    f32,
    finished: bool,
}

impl Hypothesis {
    pub fn empty() -> Self {
        Self { tokens: Vec::new(), score: 0.0, finished: false }
    }

    fn extend(&self, token: TokenId, log_prob: f32) -> Self {
        let mut tokens = Vec::with_capacity(self.tokens.len() + 1);
        tokens.extend_from_slice(&self.tokens);
        tokens.push(token);
        Self {
            tokens,
            score:    self.score + log_prob,
            finished: token == EOS_ID,
        }
    }

    /// Generated tokens, including a trailing <eos> once finished.
    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    /// Tokens without the trailing <eos>.
    pub fn output(&self) -> &[TokenId] {
        match self.tokens.last() {
            Some(&EOS_ID) => &self.tokens[..self.tokens.len() - 1],
            _ => &self.tokens,
        }
    }

    pub fn last_token(&self) -> Option<TokenId> {
        self.tokens.last().copied()
    }

    /// Cumulative log-probability.
    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Cumulative score divided by the GNMT length penalty
    /// `((5 + |y|) / 6)^alpha`. `alpha = 0` leaves the score untouched.
    pub fn final_score(&self, alpha: f32) -> f32 {
        if alpha <= 0.0 {
            return self.score;
        }
        let penalty = ((5.0 + self.tokens.len() as f32) / 6.0).powf(alpha);
        self.score / penalty
    }
}

/// Rank candidate scores: higher first, NaN treated as lowest.
fn by_score_desc(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
}

/// Indices of the `k` best finite entries of `row`, best first;
/// equal scores keep ascending index order.
pub fn top_k(row: &[f32], k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..row.len()).filter(|&i| row[i].is_finite()).collect();
    // sort_by is stable → equal scores stay in index order
    idx.sort_by(|&a, &b| by_score_desc(row[a], row[b]));
    idx.truncate(k);
    idx
}

#[derive(Debug, Clone)]
pub struct Beam {
    width:    usize,
    active:   Vec<Hypothesis>,
    finished: Vec<Hypothesis>,
    closed:   bool,
}

impl Beam {
    /// A fresh beam holds a single empty hypothesis at score 0.
    pub fn new(width: usize) -> Self {
        Self {
            width:    width.max(1),
            active:   vec![Hypothesis::empty()],
            finished: Vec::new(),
            closed:   false,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn active(&self) -> &[Hypothesis] {
        &self.active
    }

    pub fn finished(&self) -> &[Hypothesis] {
        &self.finished
    }

    pub fn is_done(&self) -> bool {
        self.closed || self.active.is_empty() || self.finished.len() >= self.width
    }

    /// Stop expanding, e.g. because the length limit was reached.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Expand every active hypothesis with its row of log-probabilities.
    /// `rows[i]` belongs to `self.active()[i]`; non-finite entries are
    /// never selected.
    pub fn advance(&mut self, rows: &[&[f32]]) {
        debug_assert_eq!(rows.len(), self.active.len());
        if self.is_done() {
            return;
        }
        let slots = self.width - self.finished.len();

        // (cumulative score, parent, token), pushed in generation order
        let mut candidates: Vec<(f32, usize, TokenId)> = Vec::with_capacity(slots * rows.len());
        for (parent, row) in rows.iter().enumerate() {
            let base = self.active[parent].score;
            for tok in top_k(row, slots) {
                candidates.push((base + row[tok], parent, tok as TokenId));
            }
        }
        candidates.sort_by(|a, b| by_score_desc(a.0, b.0));
        candidates.truncate(slots);

        let mut next = Vec::with_capacity(slots);
        for (_, parent, tok) in candidates {
            let log_prob = rows[parent][tok as usize];
            let hyp = self.active[parent].extend(tok, log_prob);
            if hyp.finished {
                self.finished.push(hyp);
            } else {
                next.push(hyp);
            }
        }
        self.active = next;
        debug_assert!(self.active.len() <= self.width);
    }

    /// All surviving hypotheses, best first: finished ones ranked by
    /// final score, then (if any are left) unfinished ones.
    pub fn ranked(&self, alpha: f32) -> Vec<&Hypothesis> {
        let mut finished: Vec<&Hypothesis> = self.finished.iter().collect();
        finished.sort_by(|a, b| by_score_desc(a.final_score(alpha), b.final_score(alpha)));
        let mut active: Vec<&Hypothesis> = self.active.iter().collect();
        active.sort_by(|a, b| by_score_desc(a.final_score(alpha), b.final_score(alpha)));
        finished.extend(active);
        finished
    }

    /// Best finished hypothesis, or the best unfinished one when nothing
    /// finished before the length limit.
    pub fn best(&self, alpha: f32) -> Option<&Hypothesis> {
        self.ranked(alpha).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEG: f32 = f32::NEG_INFINITY;

    #[test]
    fn test_top_k_breaks_ties_by_index() {
        let row = [-1.0, -0.5, -0.5, NEG, -2.0];
        assert_eq!(top_k(&row, 3), vec![1, 2, 0]);
        assert_eq!(top_k(&row, 10), vec![1, 2, 0, 4]);
    }

    #[test]
    fn test_first_step_expands_single_root() {
        let mut beam = Beam::new(2);
        let row = [NEG, NEG, -3.0, NEG, -0.1, -0.2];
        beam.advance(&[&row]);
        let toks: Vec<&[u32]> = beam.active().iter().map(|h| h.tokens()).collect();
        assert_eq!(toks, vec![&[4u32][..], &[5u32][..]]);
        assert!(beam.finished().is_empty());
    }

    #[test]
    fn test_eos_moves_to_finished_and_shrinks_slots() {
        let mut beam = Beam::new(2);
        // eos is the best continuation
        let row = [NEG, NEG, -0.1, NEG, -0.5, -4.0];
        beam.advance(&[&row]);
        assert_eq!(beam.finished().len(), 1);
        assert_eq!(beam.active().len(), 1);
        assert_eq!(beam.active()[0].tokens(), &[4]);

        // Only one slot left now
        let row = [NEG, NEG, -0.3, NEG, -0.1, -0.2];
        beam.advance(&[&row]);
        assert_eq!(beam.active().len(), 1);
        assert_eq!(beam.active()[0].tokens(), &[4, 4]);
    }

    #[test]
    fn test_done_when_width_hypotheses_finished() {
        let mut beam = Beam::new(1);
        beam.advance(&[&[NEG, NEG, -0.1, NEG, -1.0]]);
        assert!(beam.is_done());
        let best = beam.best(0.0).unwrap();
        assert!(best.is_finished());
        assert!(best.output().is_empty());
    }

    #[test]
    fn test_best_falls_back_to_active_when_nothing_finished() {
        let mut beam = Beam::new(2);
        beam.advance(&[&[NEG, NEG, NEG, NEG, -0.3, -0.2]]);
        beam.close();
        assert!(beam.is_done());
        let best = beam.best(0.0).unwrap();
        assert!(!best.is_finished());
        assert_eq!(best.tokens(), &[5]);
    }

    #[test]
    fn test_equal_scores_keep_generation_order() {
        let mut beam = Beam::new(2);
        beam.advance(&[&[NEG, NEG, NEG, NEG, -1.0, -1.0]]);
        let toks: Vec<u32> = beam.active().iter().map(|h| h.tokens()[0]).collect();
        assert_eq!(toks, vec![4, 5]);
        // both parents yield the same cumulative score: parent 0 wins
        let row = [NEG, NEG, NEG, NEG, NEG, NEG, -0.5];
        beam.advance(&[&row, &row]);
        assert_eq!(beam.active()[0].tokens(), &[4, 6]);
        assert_eq!(beam.active()[1].tokens(), &[5, 6]);
    }

    #[test]
    fn test_length_penalty_prefers_longer_when_alpha_positive() {
        let short = Hypothesis::empty().extend(EOS_ID, -2.0);
        let long = Hypothesis::empty()
            .extend(4, -0.8)
            .extend(5, -0.8)
            .extend(6, -0.8)
            .extend(EOS_ID, -0.2);
        assert!(short.is_finished() && long.is_finished());
        // raw: -2.0 vs -2.6; normalised (alpha=1): -2.0 vs -2.6 / 1.5
        assert!(short.final_score(0.0) > long.final_score(0.0));
        assert!(long.final_score(1.0) > short.final_score(1.0));
        assert_eq!(long.output(), &[4, 5, 6]);
    }
}
