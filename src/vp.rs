//! Vantage-point trees: exact metric search without coordinates.
//!
//! A [VantageTree] indexes a finite collection of points using nothing but
//! an injected [Metric]. Each internal node distinguishes one point (the
//! vantage point, or center), splits the rest by the median of their
//! distances to it, and remembers that median (the threshold) along with
//! the largest distance in the subtree (the radius). Queries combine those
//! two values with the metric's composition rules to accept or reject
//! whole subtrees without visiting their contents.

use crate::distance::Metric;
use crate::pivot::Sampler;
use crate::select::Smallest;
use crate::util::Ordered;

use num_traits::{one, zero};
use rand::Rng;

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

/// Point lists at most this long are stored flat instead of being split.
const MAX_LEAF: usize = 200;

/// A subtree.
///
/// Children are reference-counted so that range-query results can share
/// unmodified subtrees with their source instead of copying them. Nodes
/// are immutable once built; both trees stay valid for as long as either
/// is alive.
#[derive(Debug)]
enum Node<V, D> {
    /// No points at all.
    Empty,
    /// A flat list of points. Never longer than [MAX_LEAF], except when a
    /// degenerate point set refused to split.
    Leaf(Vec<V>),
    /// A vantage point and the two rings around it.
    Split {
        center: V,
        /// How many copies of `center` this node stores. At least 1 in a
        /// built tree; 0 can occur in a range-query result whose center
        /// fell outside the range while both children kept points.
        count: usize,
        /// Median build-time distance from `center` to the non-center
        /// points. Everything in `inside` is strictly closer than this;
        /// everything in `outside` is at least this far.
        threshold: D,
        /// Maximum distance from `center` to any point in this subtree.
        radius: D,
        /// Total number of points stored in this subtree.
        len: usize,
        inside: Arc<Node<V, D>>,
        outside: Arc<Node<V, D>>,
    },
}

impl<V, D> Node<V, D> {
    fn len(&self) -> usize {
        match self {
            Node::Empty => 0,
            Node::Leaf(items) => items.len(),
            Node::Split { len, .. } => *len,
        }
    }
}

/// Score a pivot candidate: negative variance of its distances to the
/// sample around their median, so that larger spread sorts first in a
/// [Smallest]. A candidate that sees its neighbors at widely varying
/// distances splits them more evenly than one that sees them bunched up.
fn spread_score<V, M: Metric<V>>(metric: &M, candidate: &V, sample: &[&V]) -> M::Distance {
    let mut distances: Vec<M::Distance> = sample
        .iter()
        .map(|v| metric.distance(candidate, v))
        .collect();
    distances.sort_unstable_by_key(|&d| Ordered::new(d));
    let median = distances[distances.len() / 2];

    let mut spread = zero::<M::Distance>();
    for d in distances {
        let deviation = d - median;
        spread += deviation * deviation;
    }

    -spread
}

/// Recursively build a subtree from a flat point list.
fn build<V, M, R>(metric: &M, mut items: Vec<V>, rng: &mut R) -> Node<V, M::Distance>
where
    V: PartialEq,
    M: Metric<V>,
    R: Rng + ?Sized,
{
    if items.is_empty() {
        return Node::Empty;
    }
    if items.len() <= MAX_LEAF {
        return Node::Leaf(items);
    }

    let pivot = Sampler::default().pick(&items, rng, |candidate, sample| {
        spread_score(metric, candidate, sample)
    });
    let center = items.swap_remove(pivot);

    let distances: Vec<M::Distance> = items.iter().map(|v| metric.distance(&center, v)).collect();
    let mut sorted = distances.clone();
    sorted.sort_unstable_by_key(|&d| Ordered::new(d));
    let threshold = sorted[sorted.len() / 2];
    let radius = sorted[sorted.len() - 1];

    if radius <= zero() || threshold >= radius {
        // All points coincide, or the median equals the maximum and the
        // split would put everything on one side. Recursing cannot shrink
        // the problem, so store the points flat.
        items.push(center);
        return Node::Leaf(items);
    }

    let mut count = 1;
    let mut inside = Vec::new();
    let mut outside = Vec::new();
    for (v, d) in items.into_iter().zip(distances) {
        if v == center {
            count += 1;
        } else if d < threshold {
            inside.push(v);
        } else {
            outside.push(v);
        }
    }

    let inside = build(metric, inside, rng);
    let outside = build(metric, outside, rng);
    let len = inside.len() + count + outside.len();

    Node::Split {
        center,
        count,
        threshold,
        radius,
        len,
        inside: Arc::new(inside),
        outside: Arc::new(outside),
    }
}

/// Filter a subtree down to the points strictly within `epsilon` of
/// `query`, sharing every subtree the filter does not touch.
fn within<V, M>(
    node: &Arc<Node<V, M::Distance>>,
    metric: &M,
    query: &V,
    epsilon: M::Distance,
) -> Arc<Node<V, M::Distance>>
where
    V: Clone,
    M: Metric<V>,
{
    match node.as_ref() {
        Node::Empty => Arc::clone(node),
        Node::Leaf(items) => {
            let kept: Vec<V> = items
                .iter()
                .filter(|w| metric.distance(query, w) < epsilon)
                .cloned()
                .collect();
            if kept.is_empty() {
                Arc::new(Node::Empty)
            } else if kept.len() == items.len() {
                Arc::clone(node)
            } else {
                Arc::new(Node::Leaf(kept))
            }
        }
        Node::Split {
            center,
            count,
            threshold,
            radius,
            inside,
            outside,
            ..
        } => {
            let r = metric.distance(query, center);

            if metric.bound(r, *radius) < epsilon {
                // Every point in the subtree is in range: share it whole.
                return Arc::clone(node);
            }
            if metric.bound(epsilon, *radius) < r {
                // No point in the subtree can be in range.
                return Arc::new(Node::Empty);
            }
            if metric.bound(epsilon, *threshold) < r {
                // The inside ring is unreachable, and so is the center.
                return within(outside, metric, query, epsilon);
            }

            let count = if r < epsilon { *count } else { 0 };

            if metric.bound(epsilon, r) < *threshold {
                // The outside ring is unreachable; the center may or may
                // not be in range and was tested above.
                let kept = within(inside, metric, query, epsilon);
                return rejoin(center, count, *threshold, *radius, kept, Arc::new(Node::Empty));
            }

            let kept_inside = within(inside, metric, query, epsilon);
            let kept_outside = within(outside, metric, query, epsilon);
            rejoin(center, count, *threshold, *radius, kept_inside, kept_outside)
        }
    }
}

/// Recombine a filtered split without leaving superfluous structure:
/// all-empty collapses to [Node::Empty] and a single surviving side is
/// returned directly. The original threshold and radius stay valid for any
/// subset of the original points.
fn rejoin<V: Clone, D: Copy>(
    center: &V,
    count: usize,
    threshold: D,
    radius: D,
    inside: Arc<Node<V, D>>,
    outside: Arc<Node<V, D>>,
) -> Arc<Node<V, D>> {
    if count == 0 {
        if inside.len() == 0 {
            return outside;
        }
        if outside.len() == 0 {
            return inside;
        }
    }

    let len = inside.len() + count + outside.len();
    Arc::new(Node::Split {
        center: center.clone(),
        count,
        threshold,
        radius,
        len,
        inside,
        outside,
    })
}

/// A pending subtree in the best-first search, keyed by a lower bound on
/// the distance from the query to anything the subtree stores.
struct Candidate<'a, V, D> {
    lower: D,
    /// Distance from the query to the subtree's center; only meaningful
    /// for splits, where it is computed once at push time and reused when
    /// the subtree is opened.
    dist: D,
    node: &'a Node<V, D>,
}

impl<V, D: PartialOrd + Copy> PartialEq for Candidate<'_, V, D> {
    fn eq(&self, other: &Self) -> bool {
        Ordered::new(self.lower) == Ordered::new(other.lower)
    }
}

impl<V, D: PartialOrd + Copy> Eq for Candidate<'_, V, D> {}

impl<V, D: PartialOrd + Copy> PartialOrd for Candidate<'_, V, D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V, D: PartialOrd + Copy> Ord for Candidate<'_, V, D> {
    fn cmp(&self, other: &Self) -> Ordering {
        Ordered::new(self.lower).cmp(&Ordered::new(other.lower))
    }
}

/// Wrap a subtree as a search candidate, computing its lower bound.
fn candidate<'a, V, M: Metric<V>>(
    node: &'a Node<V, M::Distance>,
    metric: &M,
    query: &V,
) -> Candidate<'a, V, M::Distance> {
    match node {
        Node::Split { center, radius, .. } => {
            let dist = metric.distance(query, center);
            Candidate {
                lower: metric.unbound(dist, *radius),
                dist,
                node,
            }
        }
        // Leaves carry no bound of their own; they must be opened to be
        // scored.
        _ => Candidate {
            lower: zero(),
            dist: zero(),
            node,
        },
    }
}

/// Best-first branch-and-bound search for the `n` points closest to
/// `query`.
fn nearest_n<'a, V, M>(
    root: &'a Node<V, M::Distance>,
    metric: &M,
    query: &V,
    n: usize,
) -> Vec<&'a V>
where
    M: Metric<V>,
{
    if n == 0 || root.len() == 0 {
        return Vec::new();
    }

    let mut found: Smallest<&V, M::Distance> = Smallest::new(n);
    let mut pending = BinaryHeap::new();
    pending.push(Reverse(candidate(root, metric, query)));

    while let Some(Reverse(next)) = pending.pop() {
        if let Some(bound) = found.bound() {
            if next.lower > bound {
                // No pending subtree can beat what we already hold.
                break;
            }
        }

        match next.node {
            Node::Empty => {}
            Node::Leaf(items) => {
                for w in items {
                    found.add(w, metric.distance(query, w));
                }
            }
            Node::Split {
                center,
                count,
                inside,
                outside,
                ..
            } => {
                for _ in 0..*count {
                    found.add(center, next.dist);
                }
                for child in [inside, outside] {
                    if child.len() > 0 {
                        pending.push(Reverse(candidate(child, metric, query)));
                    }
                }
            }
        }
    }

    found.into_sorted_vec()
}

/// An exact metric-space index over a fixed set of points.
///
/// Built once from a point list and immutable thereafter. Queries never
/// mutate shared state, so any number of them may run concurrently against
/// the same tree.
pub struct VantageTree<V, M: Metric<V>> {
    metric: M,
    root: Arc<Node<V, M::Distance>>,
}

impl<V, M: Metric<V>> VantageTree<V, M> {
    /// Index `points` under `metric`.
    ///
    /// The list may be empty and may contain duplicates; duplicates are
    /// kept with their multiplicity.
    pub fn new(metric: M, points: Vec<V>) -> Self
    where
        V: PartialEq,
    {
        Self::new_with_rng(metric, points, &mut rand::rng())
    }

    /// Like [new](Self::new), but drawing pivot-selection samples from the
    /// given generator. Seed it for reproducible tree shapes.
    pub fn new_with_rng<R>(metric: M, points: Vec<V>, rng: &mut R) -> Self
    where
        V: PartialEq,
        R: Rng + ?Sized,
    {
        let root = build(&metric, points, rng);
        Self {
            metric,
            root: Arc::new(root),
        }
    }

    /// The number of points stored, duplicates included.
    pub fn len(&self) -> usize {
        self.root.len()
    }

    /// Whether the index stores no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The point closest to `query`, if the index is non-empty.
    pub fn nearest(&self, query: &V) -> Option<&V> {
        self.nearest_n(query, 1).into_iter().next()
    }

    /// Up to `n` points closest to `query`, ascending by distance.
    ///
    /// Returns every point when the index holds fewer than `n`, and an
    /// empty vector when `n` is zero. The result is exact: no point
    /// outside it is closer than any point inside it. Order among
    /// equidistant points is unspecified.
    pub fn nearest_n(&self, query: &V, n: usize) -> Vec<&V> {
        nearest_n(&self.root, &self.metric, query, n)
    }

    /// A new index over exactly the points strictly within `epsilon` of
    /// `query`, with multiplicities preserved.
    ///
    /// The result is a full index in its own right: queryable, iterable,
    /// and filterable again. Subtrees wholly inside the range are shared
    /// with `self` rather than copied. A non-positive `epsilon` yields an
    /// empty index, since no distance is ever negative.
    pub fn all_within(&self, query: &V, epsilon: M::Distance) -> Self
    where
        V: Clone,
        M: Clone,
    {
        let root = if epsilon <= zero() {
            Arc::new(Node::Empty)
        } else {
            within(&self.root, &self.metric, query, epsilon)
        };

        Self {
            metric: self.metric.clone(),
            root,
        }
    }

    /// Whether `point` is in the index.
    ///
    /// Generic metric spaces have no equality oracle, so this runs a tight
    /// range query and equality-checks the candidates. The fixed epsilon
    /// only affects how many candidates get checked, never the answer.
    pub fn contains(&self, point: &V) -> bool
    where
        V: Clone + PartialEq,
        M: Clone,
    {
        self.all_within(point, one()).iter().any(|w| w == point)
    }

    /// Visit every stored point exactly once, duplicates included, in
    /// unspecified order.
    pub fn iter(&self) -> Iter<'_, V, M::Distance> {
        Iter::new(&self.root)
    }
}

impl<V, M> Debug for VantageTree<V, M>
where
    V: Debug,
    M: Metric<V>,
    M::Distance: Debug,
{
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("VantageTree")
            .field("root", &self.root)
            .finish()
    }
}

impl<'a, V, M: Metric<V>> IntoIterator for &'a VantageTree<V, M> {
    type Item = &'a V;
    type IntoIter = Iter<'a, V, M::Distance>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A depth-first walk over the points in a tree.
///
/// The frontier is an explicit stack bounded by the tree depth, so deep
/// trees cannot overflow the call stack, and a fresh iterator can be
/// created over the same tree any number of times.
pub struct Iter<'a, V, D> {
    stack: Vec<&'a Node<V, D>>,
    leaf: std::slice::Iter<'a, V>,
    center: Option<(&'a V, usize)>,
}

impl<'a, V, D> Iter<'a, V, D> {
    fn new(root: &'a Node<V, D>) -> Self {
        Self {
            stack: vec![root],
            leaf: Default::default(),
            center: None,
        }
    }
}

impl<'a, V, D> Iterator for Iter<'a, V, D> {
    type Item = &'a V;

    fn next(&mut self) -> Option<&'a V> {
        loop {
            if let Some((v, remaining)) = self.center.take() {
                if remaining > 1 {
                    self.center = Some((v, remaining - 1));
                }
                return Some(v);
            }
            if let Some(v) = self.leaf.next() {
                return Some(v);
            }
            match self.stack.pop()? {
                Node::Empty => {}
                Node::Leaf(items) => self.leaf = items.iter(),
                Node::Split {
                    center,
                    count,
                    inside,
                    outside,
                    ..
                } => {
                    self.stack.push(outside);
                    self.stack.push(inside);
                    if *count > 0 {
                        self.center = Some((center, *count));
                    }
                }
            }
        }
    }
}
