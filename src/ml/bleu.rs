// ============================================================
// Layer 5 — Corpus BLEU
// ============================================================
// Corpus-level BLEU-4 over token ids, on a 0–100 scale:
//
//   p_n  = Σ clipped n-gram matches / Σ hypothesis n-grams
//   BP   = 1                  if c > r
//          exp(1 - r / c)     otherwise
//   BLEU = 100 · BP · exp(¼ Σ log p_n)
//
// where c and r are the total hypothesis and reference lengths.
// A zero precision at any order gives 0, as multi-bleu does.
// Used as the optional `bleu` validation metric.
//
// Reference: Papineni et al. (2002) BLEU

use std::collections::HashMap;

use crate::domain::sequence::TokenId;

const MAX_ORDER: usize = 4;

fn ngram_counts(tokens: &[TokenId], n: usize) -> HashMap<&[TokenId], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for gram in tokens.windows(n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}

/// Corpus BLEU of `hypotheses` against one reference each.
pub fn corpus_bleu(hypotheses: &[Vec<TokenId>], references: &[Vec<TokenId>]) -> f64 {
    let mut matches = [0usize; MAX_ORDER];
    let mut totals  = [0usize; MAX_ORDER];
    let mut hyp_len = 0usize;
    let mut ref_len = 0usize;

    for (hyp, reference) in hypotheses.iter().zip(references) {
        hyp_len += hyp.len();
        ref_len += reference.len();
        for n in 1..=MAX_ORDER {
            let ref_counts = ngram_counts(reference, n);
            for (gram, count) in ngram_counts(hyp, n) {
                matches[n - 1] += count.min(ref_counts.get(gram).copied().unwrap_or(0));
            }
            totals[n - 1] += hyp.len().saturating_sub(n - 1);
        }
    }

    if hyp_len == 0 || matches.iter().any(|&m| m == 0) {
        return 0.0;
    }

    let log_precision: f64 = matches
        .iter()
        .zip(&totals)
        .map(|(&m, &t)| (m as f64 / t as f64).ln())
        .sum::<f64>()
        / MAX_ORDER as f64;

    let brevity = if hyp_len > ref_len {
        1.0
    } else {
        (1.0 - ref_len as f64 / hyp_len as f64).exp()
    };

    100.0 * brevity * log_precision.exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_corpus_scores_100() {
        let refs = vec![vec![4, 5, 6, 7, 8], vec![9, 10, 11, 12]];
        let score = corpus_bleu(&refs, &refs);
        assert!((score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_corpus_scores_0() {
        let hyps = vec![vec![4, 5, 6, 7]];
        let refs = vec![vec![8, 9, 10, 11]];
        assert_eq!(corpus_bleu(&hyps, &refs), 0.0);
        assert_eq!(corpus_bleu(&[vec![]], &refs), 0.0);
    }

    #[test]
    fn test_brevity_penalty() {
        // all n-grams of the hypothesis match; it is just too short
        let hyps = vec![vec![4, 5, 6, 7]];
        let refs = vec![vec![4, 5, 6, 7, 8, 9, 10, 11]];
        let expected = 100.0 * (1.0f64 - 2.0).exp();
        assert!((corpus_bleu(&hyps, &refs) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_clipped_counts() {
        // "4 4 4 4 4" against "4 4 4 4 5": unigram precision 4/5
        let hyps = vec![vec![4, 4, 4, 4, 4]];
        let refs = vec![vec![4, 4, 4, 4, 5]];
        let score = corpus_bleu(&hyps, &refs);
        let p: [f64; 4] = [4.0 / 5.0, 3.0 / 4.0, 2.0 / 3.0, 1.0 / 2.0];
        let geo = (p.iter().map(|x| x.ln()).sum::<f64>() / 4.0).exp();
        assert!((score - 100.0 * geo).abs() < 1e-9);
    }
}
