//! Hierarchical k-means tree.
//!
//! # Algorithm
//!
//! Build partitions the points recursively: a node with more than
//! `branching` members picks initial centers (random / gonzales /
//! kmeans++), runs Lloyd's algorithm for up to `iterations` rounds, and
//! recurses into each cluster. Every node caches its center, its radius
//! (max distance from center to a descendant) and its variance (mean
//! distance from center to a member); the traversal and the autotuner both
//! consume these statistics.
//!
//! Search descends greedily into the closest child while deferring the
//! others on a branch heap. A non-chosen child's lower bound is its
//! center distance minus `cb_index` times its variance, so `cb_index`
//! trades exploration breadth against depth. Subtrees whose ball cannot
//! contain an improving point are pruned with a square-root-free triangle
//! test.
//!
//! # References
//!
//! - Fukunaga & Narendra (1975): "A branch and bound algorithm for
//!   computing k-nearest neighbors"
//! - Arthur & Vassilvitskii (2007): "k-means++: the advantages of careful
//!   seeding"

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;

use crate::dataset::Dataset;
use crate::distance::DistanceKind;
use crate::error::{NaborError, Result};
use crate::heap::BranchHeap;
use crate::index::{NNIndex, QueryContext};
use crate::params::{Algorithm, CentersInit, IndexParams, SearchParams};
use crate::result::ResultSet;

struct KMeansNode {
    center: Vec<f32>,
    /// Max distance from `center` to any descendant point (raw space).
    radius: f32,
    /// Mean distance from `center` to the member points (raw space).
    variance: f32,
    /// Member points; kept on interior nodes too for refinement and
    /// cluster extraction.
    points: Vec<u32>,
    /// Child node ids; empty for leaves.
    children: Vec<u32>,
}

/// Lloyd rounds used for `iterations = -1` (until convergence); the cap
/// breaks assignment oscillations on degenerate data.
const CONVERGE_ITERATIONS: usize = 100;

/// Hierarchical k-means tree index.
pub struct KMeansTreeIndex<'a> {
    dataset: Dataset<'a, f32>,
    branching: usize,
    /// Lloyd iteration cap per split.
    max_iterations: usize,
    centers_init: CentersInit,
    distance: DistanceKind,
    seed: Option<u64>,
    nodes: Vec<KMeansNode>,
    root: u32,
    built: bool,
}

impl<'a> KMeansTreeIndex<'a> {
    pub fn new(dataset: Dataset<'a, f32>, params: &IndexParams) -> Result<Self> {
        if params.branching < 2 {
            return Err(NaborError::InvalidArgument(format!(
                "branching must be at least 2, got {}",
                params.branching
            )));
        }
        Ok(Self {
            dataset,
            branching: params.branching,
            max_iterations: if params.iterations < 0 {
                CONVERGE_ITERATIONS
            } else {
                (params.iterations as usize).max(1)
            },
            centers_init: params.centers_init,
            distance: params.distance,
            seed: params.random_seed,
            nodes: Vec::new(),
            root: 0,
            built: false,
        })
    }

    /// Cluster centers for a flat partition of the dataset.
    ///
    /// Starting from the root, repeatedly expands the interior node whose
    /// replacement by its children lowers the total weighted variance the
    /// most, until expanding would exceed `clusters` or only leaves remain.
    /// Returns the centers actually obtained (at most `clusters`, possibly
    /// fewer).
    pub fn cluster_centers(&self, clusters: usize) -> Result<Vec<Vec<f32>>> {
        if !self.built {
            return Err(NaborError::NotBuilt);
        }
        if clusters == 0 {
            return Err(NaborError::InvalidArgument(
                "cluster count must be positive".to_string(),
            ));
        }

        let weighted = |id: u32| {
            let node = &self.nodes[id as usize];
            node.variance * node.points.len() as f32
        };

        let mut chosen: Vec<u32> = vec![self.root];
        let mut total_variance = weighted(self.root);
        while chosen.len() < clusters {
            let mut best: Option<(usize, f32)> = None;
            for (slot, &id) in chosen.iter().enumerate() {
                let node = &self.nodes[id as usize];
                if node.children.is_empty()
                    || chosen.len() + node.children.len() - 1 > clusters
                {
                    continue;
                }
                let mut variance = total_variance - weighted(id);
                for &child in &node.children {
                    variance += weighted(child);
                }
                if best.is_none_or(|(_, v)| variance < v) {
                    best = Some((slot, variance));
                }
            }
            let Some((slot, variance)) = best else { break };
            total_variance = variance;
            let children = self.nodes[chosen[slot] as usize].children.clone();
            chosen[slot] = children[0];
            chosen.extend_from_slice(&children[1..]);
        }

        Ok(chosen
            .into_iter()
            .map(|id| self.nodes[id as usize].center.clone())
            .collect())
    }

    fn build_node(&mut self, points: Vec<u32>, rng: &mut StdRng) -> u32 {
        let (center, radius, variance) = self.node_statistics(&points);
        let id = self.nodes.len() as u32;
        self.nodes.push(KMeansNode {
            center,
            radius,
            variance,
            points: points.clone(),
            children: Vec::new(),
        });

        if points.len() > self.branching {
            if let Some(clusters) = self.cluster(&points, rng) {
                let children: Vec<u32> = clusters
                    .into_iter()
                    .map(|members| self.build_node(members, rng))
                    .collect();
                self.nodes[id as usize].children = children;
            }
        }
        id
    }

    fn node_statistics(&self, points: &[u32]) -> (Vec<f32>, f32, f32) {
        let cols = self.dataset.cols();
        let mut center = vec![0.0f32; cols];
        for &p in points {
            for (c, v) in center.iter_mut().zip(self.dataset.row(p as usize)) {
                *c += v;
            }
        }
        for c in center.iter_mut() {
            *c /= points.len() as f32;
        }

        let mut radius = 0.0f32;
        let mut variance = 0.0f32;
        for &p in points {
            let dist = self.distance.distance(&center, self.dataset.row(p as usize));
            radius = radius.max(dist);
            variance += dist;
        }
        variance /= points.len() as f32;
        (center, radius, variance)
    }

    /// One level of k-means clustering. Returns `None` when the members
    /// cannot be split into at least two distinct clusters.
    fn cluster(&self, points: &[u32], rng: &mut StdRng) -> Option<Vec<Vec<u32>>> {
        let center_points = self.select_centers(points, rng);
        if center_points.len() < 2 {
            return None;
        }
        let k = center_points.len();
        let mut centers: Vec<Vec<f32>> = center_points
            .iter()
            .map(|&p| self.dataset.row(p as usize).to_vec())
            .collect();

        let mut assignment: Vec<usize> = points
            .iter()
            .map(|&p| self.nearest_center(p, &centers))
            .collect();
        self.fill_empty_clusters(&mut assignment, points, &centers);

        for _ in 0..self.max_iterations {
            recompute_centers(&mut centers, points, &assignment, self.dataset);

            let mut changed = false;
            for (slot, &p) in points.iter().enumerate() {
                let nearest = self.nearest_center(p, &centers);
                if assignment[slot] != nearest {
                    assignment[slot] = nearest;
                    changed = true;
                }
            }
            self.fill_empty_clusters(&mut assignment, points, &centers);
            if !changed {
                break;
            }
        }

        let mut clusters = vec![Vec::new(); k];
        for (slot, &p) in points.iter().enumerate() {
            clusters[assignment[slot]].push(p);
        }
        Some(clusters)
    }

    fn nearest_center(&self, point: u32, centers: &[Vec<f32>]) -> usize {
        let row = self.dataset.row(point as usize);
        let mut best = 0;
        let mut best_dist = f32::INFINITY;
        for (i, center) in centers.iter().enumerate() {
            let dist = self.distance.distance_bounded(row, center, best_dist);
            if dist < best_dist {
                best_dist = dist;
                best = i;
            }
        }
        best
    }

    /// Keep every cluster non-empty by reassigning the farthest member of
    /// the largest cluster; the recursion relies on strictly shrinking
    /// partitions.
    fn fill_empty_clusters(
        &self,
        assignment: &mut [usize],
        points: &[u32],
        centers: &[Vec<f32>],
    ) {
        let k = centers.len();
        let mut counts = vec![0usize; k];
        for &a in assignment.iter() {
            counts[a] += 1;
        }
        for empty in 0..k {
            if counts[empty] > 0 {
                continue;
            }
            let donor = (0..k).max_by_key(|&c| counts[c]).unwrap_or(0);
            if counts[donor] <= 1 {
                continue;
            }
            let farthest = assignment
                .iter()
                .enumerate()
                .filter(|&(_, &a)| a == donor)
                .map(|(slot, _)| {
                    let dist = self
                        .distance
                        .distance(self.dataset.row(points[slot] as usize), &centers[donor]);
                    (slot, dist)
                })
                .max_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((slot, _)) = farthest {
                assignment[slot] = empty;
                counts[donor] -= 1;
                counts[empty] += 1;
            }
        }
    }

    fn select_centers(&self, points: &[u32], rng: &mut StdRng) -> Vec<u32> {
        let k = self.branching.min(points.len());
        match self.centers_init {
            CentersInit::Random => rand::seq::index::sample(rng, points.len(), k)
                .iter()
                .map(|slot| points[slot])
                .collect(),
            CentersInit::Gonzales => self.centers_gonzales(points, k),
            CentersInit::KMeansPp => self.centers_kmeanspp(points, k, rng),
        }
    }

    /// Farthest-point heuristic: deterministic first pick, then repeatedly
    /// the member farthest from its closest chosen center.
    fn centers_gonzales(&self, points: &[u32], k: usize) -> Vec<u32> {
        let mut chosen = vec![points[0]];
        let first_row = self.dataset.row(points[0] as usize);
        let mut closest: Vec<f32> = points
            .iter()
            .map(|&p| self.distance.distance(self.dataset.row(p as usize), first_row))
            .collect();

        while chosen.len() < k {
            let (slot, dist) = closest
                .iter()
                .enumerate()
                .map(|(s, &d)| (s, d))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .expect("non-empty member set");
            if dist <= 0.0 {
                break; // remaining members coincide with a chosen center
            }
            chosen.push(points[slot]);
            let new_row = self.dataset.row(points[slot] as usize);
            for (c, &p) in closest.iter_mut().zip(points) {
                let d = self.distance.distance_bounded(self.dataset.row(p as usize), new_row, *c);
                if d < *c {
                    *c = d;
                }
            }
        }
        chosen
    }

    /// kmeans++ seeding: each next center is drawn with probability
    /// proportional to its distance (raw space, squared for L2) from the
    /// closest already-chosen center.
    fn centers_kmeanspp(&self, points: &[u32], k: usize, rng: &mut StdRng) -> Vec<u32> {
        let first_slot = rng.random_range(0..points.len());
        let mut chosen = vec![points[first_slot]];
        let first_row = self.dataset.row(points[first_slot] as usize);
        let mut closest: Vec<f32> = points
            .iter()
            .map(|&p| self.distance.distance(self.dataset.row(p as usize), first_row))
            .collect();

        while chosen.len() < k {
            let total: f64 = closest.iter().map(|&d| d as f64).sum();
            if total <= 0.0 {
                break;
            }
            let threshold = rng.random::<f64>() * total;
            let mut cumulative = 0.0f64;
            let mut slot = closest.len() - 1;
            for (s, &d) in closest.iter().enumerate() {
                cumulative += d as f64;
                if cumulative >= threshold {
                    slot = s;
                    break;
                }
            }
            if closest[slot] <= 0.0 {
                break;
            }
            chosen.push(points[slot]);
            let new_row = self.dataset.row(points[slot] as usize);
            for (c, &p) in closest.iter_mut().zip(points) {
                let d = self.distance.distance_bounded(self.dataset.row(p as usize), new_row, *c);
                if d < *c {
                    *c = d;
                }
            }
        }
        chosen
    }

    /// Greedy descent into the closest child, deferring the others.
    fn find_nn(
        &self,
        node_id: u32,
        result: &mut dyn ResultSet,
        query: &[f32],
        cb_index: f32,
        ctx: &mut QueryContext,
        heap: &mut BranchHeap<u32>,
    ) {
        let node = &self.nodes[node_id as usize];
        if self.ball_is_pruned(node, query, result.worst_dist()) {
            return;
        }

        if node.children.is_empty() {
            if ctx.budget_spent() && result.full() {
                return;
            }
            for &p in &node.points {
                let dist = self.distance.distance_bounded(
                    query,
                    self.dataset.row(p as usize),
                    result.worst_dist(),
                );
                result.add_point(dist, p as usize);
                ctx.spend_check();
            }
        } else {
            let best = self.explore_branches(node, query, cb_index, heap);
            self.find_nn(best, result, query, cb_index, ctx, heap);
        }
    }

    /// Push all non-closest children onto the heap; returns the closest
    /// child's node id.
    fn explore_branches(
        &self,
        node: &KMeansNode,
        query: &[f32],
        cb_index: f32,
        heap: &mut BranchHeap<u32>,
    ) -> u32 {
        let dists: SmallVec<[f32; 32]> = node
            .children
            .iter()
            .map(|&c| self.distance.distance(query, &self.nodes[c as usize].center))
            .collect();
        let best = dists
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .expect("interior node has children");

        for (i, &child) in node.children.iter().enumerate() {
            if i != best {
                let bound = dists[i] - cb_index * self.nodes[child as usize].variance;
                heap.push(bound, child);
            }
        }
        node.children[best]
    }

    /// Full ordered traversal, used when the checks budget is unlimited.
    fn find_exact(&self, node_id: u32, result: &mut dyn ResultSet, query: &[f32]) {
        let node = &self.nodes[node_id as usize];
        if self.ball_is_pruned(node, query, result.worst_dist()) {
            return;
        }

        if node.children.is_empty() {
            for &p in &node.points {
                let dist = self.distance.distance_bounded(
                    query,
                    self.dataset.row(p as usize),
                    result.worst_dist(),
                );
                result.add_point(dist, p as usize);
            }
        } else {
            let mut order: SmallVec<[(f32, u32); 32]> = node
                .children
                .iter()
                .map(|&c| {
                    (
                        self.distance.distance(query, &self.nodes[c as usize].center),
                        c,
                    )
                })
                .collect();
            order.sort_by(|a, b| a.0.total_cmp(&b.0));
            for (_, child) in order {
                self.find_exact(child, result, query);
            }
        }
    }

    /// Square-root-free triangle test: true when no point inside the
    /// node's ball can improve on `worst`.
    fn ball_is_pruned(&self, node: &KMeansNode, query: &[f32], worst: f32) -> bool {
        let center_dist = self.distance.distance(query, &node.center);
        let val = center_dist - node.radius - worst;
        val > 0.0 && val * val > 4.0 * node.radius * worst
    }
}

impl NNIndex for KMeansTreeIndex<'_> {
    fn build(&mut self) -> Result<()> {
        if self.built {
            return Err(NaborError::AlreadyBuilt);
        }
        let mut rng =
            StdRng::seed_from_u64(self.seed.unwrap_or_else(|| rand::rng().random()));
        let points: Vec<u32> = (0..self.dataset.rows() as u32).collect();
        self.root = self.build_node(points, &mut rng);
        self.built = true;
        Ok(())
    }

    fn find_neighbors(
        &self,
        result: &mut dyn ResultSet,
        query: &[f32],
        search: &SearchParams,
    ) -> Result<()> {
        if !self.built {
            return Err(NaborError::NotBuilt);
        }
        if query.len() != self.dataset.cols() {
            return Err(NaborError::DimensionMismatch {
                query_len: query.len(),
                row_len: self.dataset.cols(),
            });
        }

        if search.checks < 0 {
            self.find_exact(self.root, result, query);
            return Ok(());
        }

        let mut ctx = QueryContext::new(search.checks);
        let mut heap = BranchHeap::new();
        self.find_nn(self.root, result, query, search.cb_index, &mut ctx, &mut heap);
        while let Some((_, node)) = heap.pop() {
            if ctx.budget_spent() && result.full() {
                break;
            }
            self.find_nn(node, result, query, search.cb_index, &mut ctx, &mut heap);
        }
        Ok(())
    }

    fn size(&self) -> usize {
        self.dataset.rows()
    }

    fn veclen(&self) -> usize {
        self.dataset.cols()
    }

    fn used_memory(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| {
                std::mem::size_of::<KMeansNode>()
                    + n.center.len() * std::mem::size_of::<f32>()
                    + n.points.len() * std::mem::size_of::<u32>()
                    + n.children.len() * std::mem::size_of::<u32>()
            })
            .sum()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::KMeans
    }
}

/// Compute a flat k-means clustering of `dataset` through a tree build.
///
/// Returns the actual number of centers found, which can be smaller than
/// `clusters` when the tree cannot be expanded that far.
pub fn compute_cluster_centers(
    dataset: Dataset<'_, f32>,
    clusters: usize,
    params: &IndexParams,
) -> Result<Vec<Vec<f32>>> {
    let mut index = KMeansTreeIndex::new(dataset, params)?;
    index.build()?;
    index.cluster_centers(clusters)
}

fn recompute_centers(
    centers: &mut [Vec<f32>],
    points: &[u32],
    assignment: &[usize],
    dataset: Dataset<'_, f32>,
) {
    let mut counts = vec![0usize; centers.len()];
    for center in centers.iter_mut() {
        center.fill(0.0);
    }
    for (slot, &p) in points.iter().enumerate() {
        let cluster = assignment[slot];
        counts[cluster] += 1;
        for (c, v) in centers[cluster].iter_mut().zip(dataset.row(p as usize)) {
            *c += v;
        }
    }
    for (center, &count) in centers.iter_mut().zip(&counts) {
        if count > 0 {
            for c in center.iter_mut() {
                *c /= count as f32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::KnnResultSet;

    fn params_with(branching: usize, centers_init: CentersInit) -> IndexParams {
        IndexParams {
            branching,
            iterations: 11,
            centers_init,
            random_seed: Some(11),
            ..IndexParams::default()
        }
    }

    fn random_dataset(n: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n * dim).map(|_| rng.random::<f32>()).collect()
    }

    #[test]
    fn small_dataset_stays_a_leaf_and_is_exact() {
        let data = random_dataset(8, 3, 1);
        let dataset = Dataset::new(8, 3, &data).unwrap();
        let mut index =
            KMeansTreeIndex::new(dataset, &params_with(16, CentersInit::Random)).unwrap();
        index.build().unwrap();
        assert_eq!(index.nodes.len(), 1);

        let mut result = KnnResultSet::new(2);
        index
            .find_neighbors(&mut result, dataset.row(5), &SearchParams::with_checks(4))
            .unwrap();
        assert_eq!(result.neighbors()[0].index, 5);
        assert_eq!(result.neighbors()[0].dist, 0.0);
    }

    #[test]
    fn exact_traversal_matches_brute_force() {
        let n = 300;
        let data = random_dataset(n, 6, 2);
        let dataset = Dataset::new(n, 6, &data).unwrap();

        for init in [CentersInit::Random, CentersInit::Gonzales, CentersInit::KMeansPp] {
            let mut index = KMeansTreeIndex::new(dataset, &params_with(4, init)).unwrap();
            index.build().unwrap();

            let query = dataset.row(17);
            let mut result = KnnResultSet::new(5);
            index
                .find_neighbors(&mut result, query, &SearchParams::exact())
                .unwrap();

            let mut expected: Vec<(usize, f32)> = (0..n)
                .map(|i| (i, DistanceKind::Euclidean.distance(query, dataset.row(i))))
                .collect();
            expected.sort_by(|a, b| a.1.total_cmp(&b.1));
            let got: Vec<usize> = result.neighbors().iter().map(|r| r.index).collect();
            let want: Vec<usize> = expected[..5].iter().map(|e| e.0).collect();
            assert_eq!(got, want, "init strategy {init}");
        }
    }

    #[test]
    fn duplicate_points_do_not_break_the_build() {
        let mut data = vec![0.5f32; 40 * 2];
        data[0] = 0.0; // one distinct point among duplicates
        let dataset = Dataset::new(40, 2, &data).unwrap();
        let mut index =
            KMeansTreeIndex::new(dataset, &params_with(4, CentersInit::Gonzales)).unwrap();
        index.build().unwrap();

        let mut result = KnnResultSet::new(3);
        index
            .find_neighbors(&mut result, &[0.5, 0.5], &SearchParams::exact())
            .unwrap();
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn deterministic_given_seed() {
        let data = random_dataset(200, 4, 3);
        let dataset = Dataset::new(200, 4, &data).unwrap();
        let params = params_with(8, CentersInit::KMeansPp);

        let mut a = KMeansTreeIndex::new(dataset, &params).unwrap();
        let mut b = KMeansTreeIndex::new(dataset, &params).unwrap();
        a.build().unwrap();
        b.build().unwrap();

        let query = [0.3f32, 0.7, 0.1, 0.9];
        let mut ra = KnnResultSet::new(4);
        let mut rb = KnnResultSet::new(4);
        a.find_neighbors(&mut ra, &query, &SearchParams::with_checks(32))
            .unwrap();
        b.find_neighbors(&mut rb, &query, &SearchParams::with_checks(32))
            .unwrap();
        assert_eq!(ra.neighbors(), rb.neighbors());
    }

    #[test]
    fn cluster_centers_respects_requested_count() {
        let data = random_dataset(500, 4, 4);
        let dataset = Dataset::new(500, 4, &data).unwrap();
        let mut index =
            KMeansTreeIndex::new(dataset, &params_with(4, CentersInit::Random)).unwrap();
        index.build().unwrap();

        let centers = index.cluster_centers(7).unwrap();
        assert!(!centers.is_empty());
        assert!(centers.len() <= 7);
        assert!(centers.iter().all(|c| c.len() == 4));
    }
}
