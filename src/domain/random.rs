// ============================================================
// Layer 3 — Explicit Random Stream
// ============================================================
// All stochastic decisions of a training run (parameter init,
// dropout masks, batch order) draw from a RandomStream that the
// training loop owns and threads through every call. There is no
// ambient global RNG, so a resumed run can be re-seeded exactly.
//
// ChaCha8 exposes its position in the keystream ("word
// position"), which is what a checkpoint stores. Independent
// sub-streams (one per epoch for batch order) use ChaCha's
// stream selector on the same seed.
//
// Reference: rand_chacha documentation

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Serializable position of a RandomStream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub seed:    u64,
    pub stream:  u64,
    pub word_hi: u64,
    pub word_lo: u64,
}

#[derive(Debug, Clone)]
pub struct RandomStream {
    seed: u64,
    rng:  ChaCha8Rng,
}

impl RandomStream {
    /// Stream over `seed`, positioned at its start.
    pub fn from_seed(seed: u64) -> Self {
        Self { seed, rng: ChaCha8Rng::seed_from_u64(seed) }
    }

    /// A configured seed of 0 means "pick one"; the chosen seed is
    /// observable through `seed()` so it can be logged and stored.
    pub fn seeded_or_random(seed: u64) -> Self {
        if seed == 0 {
            Self::from_seed(rand::random::<u64>().max(1))
        } else {
            Self::from_seed(seed)
        }
    }

    /// Independent sub-stream `index` of `seed`, e.g. one per epoch.
    pub fn substream(seed: u64, index: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(index.wrapping_add(1));
        Self { seed, rng }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn state(&self) -> StreamState {
        let word = self.rng.get_word_pos();
        StreamState {
            seed:    self.seed,
            stream:  self.rng.get_stream(),
            word_hi: (word >> 64) as u64,
            word_lo: word as u64,
        }
    }

    pub fn restore(state: &StreamState) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(state.seed);
        rng.set_stream(state.stream);
        rng.set_word_pos(((state.word_hi as u128) << 64) | state.word_lo as u128);
        Self { seed: state.seed, rng }
    }

    pub fn uniform(&mut self, low: f32, high: f32) -> f32 {
        if high <= low {
            return low;
        }
        self.rng.gen_range(low..high)
    }

    /// Bernoulli draw with probability `p` of `true`.
    pub fn bernoulli(&mut self, p: f64) -> bool {
        self.rng.gen_bool(p.clamp(0.0, 1.0))
    }

    /// Fisher-Yates shuffle driven by this stream.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        use rand::seq::SliceRandom;
        items.shuffle(&mut self.rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_continues_the_same_sequence() {
        let mut a = RandomStream::from_seed(42);
        for _ in 0..17 {
            a.uniform(0.0, 1.0);
        }
        let saved = a.state();
        let expected: Vec<f32> = (0..8).map(|_| a.uniform(0.0, 1.0)).collect();

        let mut b = RandomStream::restore(&saved);
        let replayed: Vec<f32> = (0..8).map(|_| b.uniform(0.0, 1.0)).collect();
        assert_eq!(expected, replayed);
    }

    #[test]
    fn test_substreams_are_reproducible_and_distinct() {
        let mut items_a: Vec<usize> = (0..32).collect();
        let mut items_b = items_a.clone();
        let mut items_c = items_a.clone();
        RandomStream::substream(7, 1).shuffle(&mut items_a);
        RandomStream::substream(7, 1).shuffle(&mut items_b);
        RandomStream::substream(7, 2).shuffle(&mut items_c);
        assert_eq!(items_a, items_b);
        assert_ne!(items_a, items_c);
    }

    #[test]
    fn test_zero_seed_picks_nonzero() {
        assert_ne!(RandomStream::seeded_or_random(0).seed(), 0);
        assert_eq!(RandomStream::seeded_or_random(9).seed(), 9);
    }
}
