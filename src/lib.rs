//! nabor: approximate nearest-neighbor search over dense vectors.
//!
//! Four interchangeable index structures share one query contract:
//!
//! | Index | Module | When to use |
//! |-------|--------|-------------|
//! | Randomized KD-tree forest | [`index::kdtree`] | Low to moderate dimension, best general choice |
//! | Hierarchical k-means tree | [`index::kmeans`] | Clustered data, higher dimension |
//! | Composite (both) | [`index::composite`] | When neither dominates |
//! | Linear scan | [`index::linear`] | Small datasets; exact oracle |
//!
//! The tree indices are approximate: each query spends a bounded number of
//! leaf-point distance evaluations (`checks`), deferring unexplored
//! branches on a priority queue keyed by lower-bound distance. With an
//! unlimited budget (`checks = -1`) every variant returns exact results.
//!
//! Rather than picking parameters by hand, [`Autotune`] selects the
//! algorithm, its structure, and the `checks` budget for a target
//! precision by sampling the dataset and cross-validating against a
//! linear-scan ground truth; [`build_index`] runs it automatically when a
//! [`Params`] bag carries a nonnegative `target_precision`.
//!
//! Distances are Minkowski-family and flow in the metric's raw space
//! everywhere: squared values for Euclidean, no square roots taken.
//!
//! # Usage
//!
//! ```rust
//! use nabor::{create_index, Algorithm, Dataset, IndexParams, KnnResultSet, SearchParams};
//!
//! # fn main() -> nabor::Result<()> {
//! // Four points in the plane, row-major.
//! let data: Vec<f32> = vec![
//!     0.0, 0.0, //
//!     1.0, 0.0, //
//!     0.0, 1.0, //
//!     5.0, 5.0,
//! ];
//! let dataset = Dataset::new(4, 2, &data)?;
//!
//! let params = IndexParams {
//!     algorithm: Algorithm::KdTree,
//!     random_seed: Some(1),
//!     ..IndexParams::default()
//! };
//! let mut index = create_index(dataset, &params)?;
//! index.build()?;
//!
//! let mut result = KnnResultSet::new(2);
//! index.find_neighbors(&mut result, &[0.9, 0.1], &SearchParams::exact())?;
//! assert_eq!(result.neighbors()[0].index, 1);
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - Muja & Lowe (2009): "Fast approximate nearest neighbors with
//!   automatic algorithm configuration"
//! - Silpa-Anan & Hartley (2008): "Optimised KD-trees for fast image
//!   descriptor matching"

pub mod autotune;
pub mod dataset;
pub mod distance;
pub mod error;
pub mod eval;
pub mod index;
pub mod params;
pub mod result;

mod heap;

pub use autotune::Autotune;
pub use dataset::{Dataset, DatasetMut};
pub use distance::DistanceKind;
pub use error::{NaborError, Result};
pub use eval::{compute_ground_truth, test_with_checks, test_with_precision};
pub use index::{
    NNIndex, SENTINEL_INDEX, build_index, compute_cluster_centers, create_index, radius_search,
    search_for_neighbors,
};
pub use params::{Algorithm, AutotuneParams, CentersInit, IndexParams, Params, SearchParams, Value};
pub use result::{KnnResultSet, Neighbor, RadiusResultSet, ResultSet};
