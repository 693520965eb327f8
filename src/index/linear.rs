//! Exhaustive linear scan.
//!
//! No build cost and exact results; used directly for small datasets and as
//! the ground-truth oracle by the autotuner and the evaluation harness.

use crate::dataset::Dataset;
use crate::distance::DistanceKind;
use crate::error::{NaborError, Result};
use crate::index::NNIndex;
use crate::params::{Algorithm, IndexParams, SearchParams};
use crate::result::ResultSet;

/// Brute-force index: every query sweeps every row.
pub struct LinearIndex<'a> {
    dataset: Dataset<'a, f32>,
    distance: DistanceKind,
    built: bool,
}

impl<'a> LinearIndex<'a> {
    pub fn new(dataset: Dataset<'a, f32>, params: &IndexParams) -> Result<Self> {
        Ok(Self {
            dataset,
            distance: params.distance,
            built: false,
        })
    }
}

impl NNIndex for LinearIndex<'_> {
    fn build(&mut self) -> Result<()> {
        if self.built {
            return Err(NaborError::AlreadyBuilt);
        }
        self.built = true;
        Ok(())
    }

    fn find_neighbors(
        &self,
        result: &mut dyn ResultSet,
        query: &[f32],
        _search: &SearchParams,
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
        for (i, row) in self.dataset.iter_rows().enumerate() {
            let dist = self.distance.distance_bounded(query, row, result.worst_dist());
            result.add_point(dist, i);
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
        // The dataset is borrowed; the index itself holds nothing.
        0
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Linear
    }
}
