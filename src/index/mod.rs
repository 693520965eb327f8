//! Index structures and the common query contract.
//!
//! Every variant implements [`NNIndex`]: build once, then answer any number
//! of queries through a [`ResultSet`]. The traversal state a query needs
//! (visited set, checks budget) lives in a per-query context, never in the
//! index itself, so a built index is immutable during search.

pub mod composite;
pub mod kdtree;
pub mod kmeans;
pub mod linear;

use std::time::Instant;

use tracing::info;

use crate::autotune::Autotune;
use crate::dataset::{Dataset, DatasetMut};
use crate::error::{NaborError, Result};
use crate::params::{Algorithm, IndexParams, Params, SearchParams};
use crate::result::{KnnResultSet, Neighbor, RadiusResultSet, ResultSet};

pub use composite::CompositeIndex;
pub use kdtree::KdForestIndex;
pub use kmeans::{KMeansTreeIndex, compute_cluster_centers};
pub use linear::LinearIndex;

/// Row index written for missing neighbors when a query returns fewer than
/// `k` points.
pub const SENTINEL_INDEX: i32 = -1;

/// Capability shared by all index variants.
pub trait NNIndex {
    /// Build the index. One-shot; a second call returns
    /// [`NaborError::AlreadyBuilt`].
    fn build(&mut self) -> Result<()>;

    /// Answer one query, feeding scored points into `result`.
    fn find_neighbors(
        &self,
        result: &mut dyn ResultSet,
        query: &[f32],
        search: &SearchParams,
    ) -> Result<()>;

    /// Number of indexed points.
    fn size(&self) -> usize;

    /// Vector dimension.
    fn veclen(&self) -> usize;

    /// Approximate memory held by the index structure, in bytes.
    fn used_memory(&self) -> usize;

    /// Which variant this is.
    fn algorithm(&self) -> Algorithm;
}

impl std::fmt::Debug for dyn NNIndex + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn NNIndex")
            .field("algorithm", &self.algorithm())
            .field("size", &self.size())
            .field("veclen", &self.veclen())
            .finish()
    }
}

/// Per-query traversal state, passed explicitly through a search.
pub(crate) struct QueryContext {
    visited: Vec<u64>,
    checks: usize,
    max_checks: usize,
}

impl QueryContext {
    /// Context with the given checks budget; `-1` means unlimited.
    pub(crate) fn new(checks: i32) -> Self {
        Self {
            visited: Vec::new(),
            checks: 0,
            max_checks: if checks < 0 { usize::MAX } else { checks as usize },
        }
    }

    /// Attach a visited bitset covering `points` dataset rows, for
    /// traversals that may reach the same point through several trees.
    pub(crate) fn with_visited(mut self, points: usize) -> Self {
        self.visited = vec![0u64; points.div_ceil(64)];
        self
    }

    /// Mark `index` visited; returns `false` if it already was.
    pub(crate) fn first_visit(&mut self, index: usize) -> bool {
        let word = index / 64;
        let mask = 1u64 << (index % 64);
        if self.visited[word] & mask != 0 {
            false
        } else {
            self.visited[word] |= mask;
            true
        }
    }

    /// Record one leaf-point distance evaluation.
    pub(crate) fn spend_check(&mut self) {
        self.checks += 1;
    }

    /// True once the checks budget is used up.
    pub(crate) fn budget_spent(&self) -> bool {
        self.checks >= self.max_checks
    }
}

/// Construct (but do not build) the index variant selected by
/// `params.algorithm`.
pub fn create_index<'a>(
    dataset: Dataset<'a, f32>,
    params: &IndexParams,
) -> Result<Box<dyn NNIndex + 'a>> {
    Ok(match params.algorithm {
        Algorithm::Linear => Box::new(LinearIndex::new(dataset, params)?),
        Algorithm::KdTree => Box::new(KdForestIndex::new(dataset, params)?),
        Algorithm::KMeans => Box::new(KMeansTreeIndex::new(dataset, params)?),
        Algorithm::Composite => Box::new(CompositeIndex::new(dataset, params)?),
        Algorithm::VpTree => {
            return Err(NaborError::Unsupported("vptree".to_string()));
        }
    })
}

/// Build an index according to a [`Params`] bag.
///
/// If the bag carries a nonnegative `target_precision`, the autotuner picks
/// the algorithm and parameters; the chosen configuration (including
/// `checks`, `cb_index` and the measured `speedup`) is written back into
/// the bag. Otherwise the bag's fields are used directly.
pub fn build_index<'a>(
    dataset: Dataset<'a, f32>,
    params: &mut Params,
) -> Result<Box<dyn NNIndex + 'a>> {
    let tune = params.to_autotune_params();
    if tune.target_precision >= 0.0 {
        let mut tuner = Autotune::new(tune.build_weight, tune.memory_weight, tune.sample_fraction)?;
        if let Some(seed) = params.to_index_params().random_seed {
            tuner = tuner.with_seed(seed);
        }
        let chosen = tuner.estimate_build_params(&dataset, tune.target_precision)?;
        let index_params = chosen.to_index_params();
        params.set_index_params(&index_params);
        let mut index = create_index(dataset, &index_params)?;
        let start = Instant::now();
        index.build()?;
        info!(
            algorithm = %index_params.algorithm,
            elapsed = ?start.elapsed(),
            "built autotuned index"
        );
        tuner.estimate_search_params(index.as_ref(), &dataset, tune.target_precision, params)?;
        Ok(index)
    } else {
        let index_params = params.to_index_params();
        let mut index = create_index(dataset, &index_params)?;
        let start = Instant::now();
        index.build()?;
        info!(
            algorithm = %index_params.algorithm,
            elapsed = ?start.elapsed(),
            "built index"
        );
        Ok(index)
    }
}

/// Run a k-nearest-neighbor query for every row of `testset`.
///
/// `indices` and `dists` must both be `testset.rows() x k` matrices. Rows
/// that produce fewer than `k` neighbors are padded with
/// [`SENTINEL_INDEX`] and `f32::INFINITY`.
pub fn search_for_neighbors(
    index: &dyn NNIndex,
    testset: &Dataset<'_, f32>,
    indices: &mut DatasetMut<'_, i32>,
    dists: &mut DatasetMut<'_, f32>,
    search: &SearchParams,
) -> Result<()> {
    if testset.cols() != index.veclen() {
        return Err(NaborError::DimensionMismatch {
            query_len: testset.cols(),
            row_len: index.veclen(),
        });
    }
    if indices.rows() != testset.rows()
        || dists.rows() != testset.rows()
        || indices.cols() != dists.cols()
    {
        return Err(NaborError::InvalidArgument(
            "result matrices must be testset.rows() x k".to_string(),
        ));
    }

    let k = indices.cols();
    for (i, query) in testset.iter_rows().enumerate() {
        let mut result = KnnResultSet::new(k);
        index.find_neighbors(&mut result, query, search)?;

        let out_indices = indices.row_mut(i);
        let out_dists = dists.row_mut(i);
        for slot in 0..k {
            match result.neighbors().get(slot) {
                Some(n) => {
                    out_indices[slot] = n.index as i32;
                    out_dists[slot] = n.dist;
                }
                None => {
                    out_indices[slot] = SENTINEL_INDEX;
                    out_dists[slot] = f32::INFINITY;
                }
            }
        }
    }
    Ok(())
}

/// Find every point within `radius` of `query`, up to `max_nn` results.
///
/// `radius` is interpreted in the metric's raw space (squared for
/// Euclidean). Results are ordered ascending by distance; if more than
/// `max_nn` points qualify, the closest `max_nn` are returned.
pub fn radius_search(
    index: &dyn NNIndex,
    query: &[f32],
    radius: f32,
    max_nn: usize,
    search: &SearchParams,
) -> Result<Vec<Neighbor>> {
    if radius < 0.0 {
        return Err(NaborError::InvalidArgument(format!(
            "radius must be nonnegative, got {radius}"
        )));
    }
    let mut result = RadiusResultSet::new(radius);
    index.find_neighbors(&mut result, query, search)?;
    let mut out = result.into_sorted();
    out.truncate(max_nn);
    Ok(out)
}
