//! Result containers for a single query.
//!
//! [`KnnResultSet`] keeps the best `k` points seen so far and exposes the
//! current k-th distance as a pruning bound. [`RadiusResultSet`] keeps
//! everything within a fixed radius. Both live only for the duration of one
//! query.

use smallvec::SmallVec;

/// One scored point: a dataset row index and its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub dist: f32,
}

/// Common contract between the KNN and radius collectors, so index
/// traversals are generic over the query family.
pub trait ResultSet {
    /// True once the worst-distance bound is active: capacity reached for
    /// KNN, always for radius. Traversals only stop on an exhausted checks
    /// budget when this holds, so a query never comes back empty.
    fn full(&self) -> bool;

    /// Offer a scored point. Duplicate indices are ignored.
    fn add_point(&mut self, dist: f32, index: usize);

    /// Current pruning bound: a point at or beyond this distance cannot
    /// improve the result.
    fn worst_dist(&self) -> f32;
}

/// Bounded top-k collector, sorted ascending by distance.
///
/// Insertion is a linear shift in a small sorted array; `k` is small in
/// practice, so this beats a heap on constant factors. Ties keep the
/// first-inserted point first.
#[derive(Debug, Clone)]
pub struct KnnResultSet {
    capacity: usize,
    entries: SmallVec<[Neighbor; 16]>,
}

impl KnnResultSet {
    /// Collector for the best `capacity` points.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: SmallVec::new(),
        }
    }

    /// Number of points collected so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collected points, ascending by distance.
    pub fn neighbors(&self) -> &[Neighbor] {
        &self.entries
    }
}

impl ResultSet for KnnResultSet {
    fn full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    fn add_point(&mut self, dist: f32, index: usize) {
        if self.full() && dist >= self.worst_dist() {
            return;
        }
        if self.entries.iter().any(|n| n.index == index) {
            return;
        }
        // Insert after any equal distance so earlier insertions win ties.
        let pos = self.entries.partition_point(|n| n.dist <= dist);
        self.entries.insert(pos, Neighbor { index, dist });
        self.entries.truncate(self.capacity);
    }

    fn worst_dist(&self) -> f32 {
        if self.full() {
            self.entries.last().map_or(0.0, |n| n.dist)
        } else {
            f32::INFINITY
        }
    }
}

/// Unbounded collector of every point within a fixed radius.
///
/// The radius is interpreted in the metric's raw space, i.e. **squared**
/// for Euclidean. Entries are kept in arrival order and sorted on drain.
#[derive(Debug, Clone)]
pub struct RadiusResultSet {
    radius: f32,
    entries: Vec<Neighbor>,
}

impl RadiusResultSet {
    /// Collector admitting every point with `dist <= radius`.
    pub fn new(radius: f32) -> Self {
        Self {
            radius,
            entries: Vec::new(),
        }
    }

    /// Number of points collected so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain into a list sorted ascending by distance, duplicates removed.
    pub fn into_sorted(mut self) -> Vec<Neighbor> {
        self.entries
            .sort_by(|a, b| a.dist.total_cmp(&b.dist).then(a.index.cmp(&b.index)));
        self.entries.dedup_by_key(|n| n.index);
        self.entries
    }
}

impl ResultSet for RadiusResultSet {
    fn full(&self) -> bool {
        // The radius bound prunes from the first point on.
        true
    }

    fn add_point(&mut self, dist: f32, index: usize) {
        if dist <= self.radius {
            self.entries.push(Neighbor { index, dist });
        }
    }

    fn worst_dist(&self) -> f32 {
        self.radius
    }
}
