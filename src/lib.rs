//! Exact nearest neighbor and range search in arbitrary metric spaces.
//!
//! No coordinates, no dimensionality assumptions: the index only ever sees
//! points through an injected [distance function](Metric), so it works for
//! numbers, vectors, strings, or anything else with a sensible notion of
//! distance between two values.
//!
//! ```
//! use vantage::{AbsDiff, VantageTree};
//!
//! let index = VantageTree::new(AbsDiff, vec![1.0, 2.0, 3.0]);
//!
//! assert_eq!(index.len(), 3);
//! assert_eq!(index.nearest(&2.2), Some(&2.0));
//!
//! // Range queries return a new index, sharing subtrees with this one.
//! let close = index.all_within(&2.0, 1.5);
//! assert_eq!(close.len(), 3);
//! ```

pub mod distance;
pub mod linear;
pub mod metrics;
pub mod pivot;
pub mod select;
pub mod vp;

mod util;

pub use distance::{Metric, Value};
pub use metrics::{AbsDiff, Euclidean};
pub use vp::VantageTree;

#[cfg(test)]
pub(crate) mod tests {
    //! Helpers shared by the per-module test suites.

    use crate::distance::Metric;
    use crate::util::Ordered;

    use rand::rngs::StdRng;
    use rand::Rng;

    /// Random scalars in the unit interval.
    pub fn random_scalars(n: usize, rng: &mut StdRng) -> Vec<f64> {
        (0..n).map(|_| rng.random()).collect()
    }

    /// Random 3-vectors in the unit cube.
    pub fn random_points(n: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
        (0..n)
            .map(|_| (0..3).map(|_| rng.random()).collect())
            .collect()
    }

    /// The distances from `query` to each point, sorted ascending.
    ///
    /// Query results are compared as distance multisets, never as point
    /// sequences, so that ties between equidistant points can resolve in
    /// any order.
    pub fn sorted_distances<V, M: Metric<V>>(
        metric: &M,
        query: &V,
        points: Vec<&V>,
    ) -> Vec<M::Distance> {
        let mut distances: Vec<M::Distance> = points
            .into_iter()
            .map(|w| metric.distance(query, w))
            .collect();
        distances.sort_unstable_by_key(|&d| Ordered::new(d));
        distances
    }
}
