//! Minkowski-family distances for dense vectors.
//!
//! All comparisons inside the library happen in the metric's "raw" space:
//! for [`DistanceKind::Euclidean`] that is **squared** L2, and square roots
//! are never taken internally. Results returned to callers stay in the same
//! space, which is also what the radius-search API expects.
//!
//! Every kernel accepts an early-exit `bound`: the running accumulator is
//! monotone nondecreasing, so once it exceeds `bound` the true distance
//! cannot beat it and the partial sum is returned as-is. Callers pass the
//! current worst accepted distance so non-improving points are rejected
//! after a few dimensions.

use serde::{Deserialize, Serialize};

/// Distance metric for dense vectors.
///
/// Configured once per index at build time and passed explicitly into every
/// component that measures distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceKind {
    /// Squared Euclidean (L2) distance. The default.
    Euclidean,
    /// Manhattan (L1) distance.
    Manhattan,
    /// General Minkowski distance of the given order, without the final root.
    Minkowski(u32),
}

impl Default for DistanceKind {
    fn default() -> Self {
        DistanceKind::Euclidean
    }
}

impl DistanceKind {
    /// Distance between `a` and `b`.
    ///
    /// If dimensions mismatch, returns `f32::INFINITY` so the pair is never
    /// selected as a nearest neighbor.
    #[inline]
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        self.distance_bounded(a, b, f32::INFINITY)
    }

    /// Distance with an early-exit threshold.
    ///
    /// Returns a value that is `>= ` the true distance; iteration stops as
    /// soon as the running sum exceeds `bound`.
    #[inline]
    #[must_use]
    pub fn distance_bounded(self, a: &[f32], b: &[f32], bound: f32) -> f32 {
        if a.len() != b.len() {
            return f32::INFINITY;
        }
        match self {
            DistanceKind::Euclidean => accumulate(a, b, bound, |d| d * d),
            DistanceKind::Manhattan => accumulate(a, b, bound, f32::abs),
            DistanceKind::Minkowski(order) => {
                let p = order as i32;
                accumulate(a, b, bound, move |d| d.abs().powi(p))
            }
        }
    }

    /// Contribution of a single coordinate, used for split-plane bounds.
    #[inline]
    #[must_use]
    pub fn axis_gap(self, a: f32, b: f32) -> f32 {
        let d = a - b;
        match self {
            DistanceKind::Euclidean => d * d,
            DistanceKind::Manhattan => d.abs(),
            DistanceKind::Minkowski(order) => d.abs().powi(order as i32),
        }
    }
}

/// Shared accumulation loop, unrolled by four with a bound check per block.
#[inline]
fn accumulate(a: &[f32], b: &[f32], bound: f32, term: impl Fn(f32) -> f32) -> f32 {
    let mut sum = 0.0f32;
    let mut chunks_a = a.chunks_exact(4);
    let mut chunks_b = b.chunks_exact(4);
    for (ca, cb) in chunks_a.by_ref().zip(chunks_b.by_ref()) {
        sum += term(ca[0] - cb[0])
            + term(ca[1] - cb[1])
            + term(ca[2] - cb[2])
            + term(ca[3] - cb[3]);
        if sum > bound {
            return sum;
        }
    }
    for (x, y) in chunks_a.remainder().iter().zip(chunks_b.remainder()) {
        sum += term(x - y);
    }
    sum
}
