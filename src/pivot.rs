//! Randomized pivot selection by iterative candidate sampling.

use crate::select::Smallest;

use rand::Rng;

/// Picks a good element out of a large pool without scoring every element.
///
/// A constant-size pool of candidates is drawn up front; each round scores
/// the survivors against a fresh sample of the pool's source and keeps the
/// better half, until a single candidate remains. Scoring cost is bounded
/// by the pool size rather than the input size, which is what makes
/// spending it on every tree split affordable.
#[derive(Clone, Copy, Debug)]
pub struct Sampler {
    /// Size of the initial candidate pool.
    pub candidates: usize,
    /// Size of the sample each candidate is scored against per round.
    pub samples: usize,
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            candidates: 128,
            samples: 100,
        }
    }
}

impl Sampler {
    /// Pick the index of the best candidate in `items`, where lower scores
    /// are better.
    ///
    /// The score function sees a candidate and the current sample of
    /// `items`. Inputs with fewer than two items short-circuit to the first
    /// index.
    pub fn pick<V, D, R, F>(&self, items: &[V], rng: &mut R, mut score: F) -> usize
    where
        D: PartialOrd + Copy,
        R: Rng + ?Sized,
        F: FnMut(&V, &[&V]) -> D,
    {
        if items.len() < 2 {
            return 0;
        }

        let mut candidates = sample_indices(items.len(), self.candidates, rng);

        while candidates.len() > 1 {
            let sample: Vec<&V> = sample_indices(items.len(), self.samples, rng)
                .into_iter()
                .map(|i| &items[i])
                .collect();

            let mut best = Smallest::new(candidates.len() / 2);
            for index in candidates {
                best.add(index, score(&items[index], &sample));
            }
            candidates = best.into_sorted_vec();
        }

        candidates[0]
    }
}

/// Sample `size` indices below `len` with replacement, or every index when
/// there are no more than `size` of them.
fn sample_indices<R: Rng + ?Sized>(len: usize, size: usize, rng: &mut R) -> Vec<usize> {
    if len <= size {
        (0..len).collect()
    } else {
        (0..size).map(|_| rng.random_range(0..len)).collect()
    }
}
