//! Randomized KD-tree forest with best-bin-first search.
//!
//! # Algorithm
//!
//! Build constructs `T` trees over the same points. At every internal node
//! the split dimension is drawn uniformly from the five highest-variance
//! dimensions of a small sample of the node's subset, and the split value
//! is the sample mean along that dimension. The per-tree shuffles and the
//! randomized dimension choice decorrelate the trees, which is what makes
//! a forest beat a single tree at equal work.
//!
//! Search descends all trees through one shared branch heap and one shared
//! checks budget. Whenever a split is taken, the far side is deferred on
//! the heap with lower bound `parent_bound + gap(q[dim], split_value)`;
//! leaves score their point against the result set. A per-query visited
//! bitset keeps a point from being scored twice across trees.
//!
//! Nodes live in one arena indexed by `u32` ids, so branches on the heap
//! are plain integers and tree destruction is a single deallocation.
//!
//! # References
//!
//! - Silpa-Anan & Hartley (2008): "Optimised KD-trees for fast image
//!   descriptor matching"

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::dataset::Dataset;
use crate::distance::DistanceKind;
use crate::error::{NaborError, Result};
use crate::heap::BranchHeap;
use crate::index::{NNIndex, QueryContext};
use crate::params::{Algorithm, IndexParams, SearchParams};
use crate::result::ResultSet;

/// Points sampled per node when estimating the split mean and variances.
const SPLIT_SAMPLE: usize = 100;

/// Split dimension is drawn from this many top-variance dimensions.
const TOP_VARIANCE_DIMS: usize = 5;

#[derive(Debug, Clone, Copy)]
enum KdNode {
    /// Single point.
    Leaf { point: u32 },
    /// Axis-aligned split; `low` holds values `< value`.
    Split {
        dim: u32,
        value: f32,
        low: u32,
        high: u32,
    },
}

/// Forest of randomized KD-trees sharing one query state.
pub struct KdForestIndex<'a> {
    dataset: Dataset<'a, f32>,
    trees: usize,
    distance: DistanceKind,
    seed: Option<u64>,
    nodes: Vec<KdNode>,
    roots: Vec<u32>,
    built: bool,
}

impl<'a> KdForestIndex<'a> {
    pub fn new(dataset: Dataset<'a, f32>, params: &IndexParams) -> Result<Self> {
        if params.trees == 0 {
            return Err(NaborError::InvalidArgument(
                "kd forest needs at least one tree".to_string(),
            ));
        }
        Ok(Self {
            dataset,
            trees: params.trees,
            distance: params.distance,
            seed: params.random_seed,
            nodes: Vec::new(),
            roots: Vec::new(),
            built: false,
        })
    }

    fn build_subtree(&mut self, ind: &mut [u32], rng: &mut StdRng) -> u32 {
        if ind.len() == 1 {
            self.nodes.push(KdNode::Leaf { point: ind[0] });
            return (self.nodes.len() - 1) as u32;
        }

        let (dim, value, split) = self.mean_split(ind, rng);
        let (lo, hi) = ind.split_at_mut(split);
        let low = self.build_subtree(lo, rng);
        let high = self.build_subtree(hi, rng);
        self.nodes.push(KdNode::Split {
            dim: dim as u32,
            value,
            low,
            high,
        });
        (self.nodes.len() - 1) as u32
    }

    /// Pick a split dimension and value, partition `ind` around it, and
    /// return `(dim, value, split_position)` with both sides non-empty.
    fn mean_split(&self, ind: &mut [u32], rng: &mut StdRng) -> (usize, f32, usize) {
        let cols = self.dataset.cols();
        let sample = ind.len().min(SPLIT_SAMPLE);

        let mut mean = vec![0.0f32; cols];
        for &p in &ind[..sample] {
            for (m, v) in mean.iter_mut().zip(self.dataset.row(p as usize)) {
                *m += v;
            }
        }
        for m in mean.iter_mut() {
            *m /= sample as f32;
        }

        let mut var = vec![0.0f32; cols];
        for &p in &ind[..sample] {
            for ((v, x), m) in var.iter_mut().zip(self.dataset.row(p as usize)).zip(&mean) {
                let d = x - m;
                *v += d * d;
            }
        }

        let mut order: Vec<usize> = (0..cols).collect();
        order.sort_by(|&a, &b| var[b].total_cmp(&var[a]).then(a.cmp(&b)));
        let dim = order[rng.random_range(0..TOP_VARIANCE_DIMS.min(cols))];
        let value = mean[dim];

        // Two-pass three-way partition: [< value | == value | > value].
        let lim1 = partition_in_place(ind, |p| self.dataset.row(p as usize)[dim] < value);
        let lim2 = lim1
            + partition_in_place(&mut ind[lim1..], |p| {
                self.dataset.row(p as usize)[dim] <= value
            });

        // Put the boundary where it balances best while keeping both
        // children non-empty.
        let half = ind.len() / 2;
        let mut split = if lim1 > half {
            lim1
        } else if lim2 < half {
            lim2
        } else {
            half
        };
        if split == 0 || split == ind.len() {
            split = half.max(1).min(ind.len() - 1);
        }
        (dim, value, split)
    }

    /// Descend from `node`, deferring the far side of every split, until a
    /// leaf is scored or the subtree is pruned.
    fn search_level(
        &self,
        result: &mut dyn ResultSet,
        query: &[f32],
        mut node: u32,
        mindist: f32,
        ctx: &mut QueryContext,
        heap: &mut BranchHeap<u32>,
    ) {
        if mindist > result.worst_dist() {
            return;
        }
        loop {
            match self.nodes[node as usize] {
                KdNode::Leaf { point } => {
                    if ctx.budget_spent() && result.full() {
                        return;
                    }
                    if !ctx.first_visit(point as usize) {
                        return;
                    }
                    let dist = self.distance.distance_bounded(
                        query,
                        self.dataset.row(point as usize),
                        result.worst_dist(),
                    );
                    result.add_point(dist, point as usize);
                    ctx.spend_check();
                    return;
                }
                KdNode::Split {
                    dim,
                    value,
                    low,
                    high,
                } => {
                    let diff = query[dim as usize] - value;
                    let (near, far) = if diff < 0.0 { (low, high) } else { (high, low) };
                    let far_bound = mindist + self.distance.axis_gap(query[dim as usize], value);
                    if !result.full() || far_bound <= result.worst_dist() {
                        heap.push(far_bound, far);
                    }
                    // The near side inherits the parent's bound unchanged.
                    node = near;
                }
            }
        }
    }
}

impl NNIndex for KdForestIndex<'_> {
    fn build(&mut self) -> Result<()> {
        if self.built {
            return Err(NaborError::AlreadyBuilt);
        }
        let n = self.dataset.rows();
        let mut rng =
            StdRng::seed_from_u64(self.seed.unwrap_or_else(|| rand::rng().random()));

        self.nodes.reserve(self.trees * (2 * n - 1));
        let mut ind: Vec<u32> = (0..n as u32).collect();
        for _ in 0..self.trees {
            ind.shuffle(&mut rng);
            let mut tree_ind = ind.clone();
            let root = self.build_subtree(&mut tree_ind, &mut rng);
            self.roots.push(root);
        }
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

        let mut ctx = QueryContext::new(search.checks).with_visited(self.dataset.rows());
        let mut heap = BranchHeap::new();

        for &root in &self.roots {
            self.search_level(result, query, root, 0.0, &mut ctx, &mut heap);
        }
        while let Some((bound, node)) = heap.pop() {
            if ctx.budget_spent() && result.full() {
                break;
            }
            if bound > result.worst_dist() {
                break;
            }
            self.search_level(result, query, node, bound, &mut ctx, &mut heap);
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
        self.nodes.len() * std::mem::size_of::<KdNode>()
            + self.roots.len() * std::mem::size_of::<u32>()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::KdTree
    }
}

/// Move every element satisfying `pred` to the front; returns their count.
fn partition_in_place(ind: &mut [u32], pred: impl Fn(u32) -> bool) -> usize {
    let mut first = 0;
    for i in 0..ind.len() {
        if pred(ind[i]) {
            ind.swap(first, i);
            first += 1;
        }
    }
    first
}
