//! Composite index: a KD forest and a k-means tree over the same dataset.
//!
//! Both sub-indices receive every query with the same result set, so the
//! collector's duplicate filtering merges the two candidate streams into
//! one top-k. Each sub-index is built with its own canonical structure;
//! the caller's `algorithm` field selects the composite itself and is not
//! forwarded.

use crate::dataset::Dataset;
use crate::error::{NaborError, Result};
use crate::index::kdtree::KdForestIndex;
use crate::index::kmeans::KMeansTreeIndex;
use crate::index::NNIndex;
use crate::params::{Algorithm, IndexParams, SearchParams};
use crate::result::ResultSet;

/// Combined KD-forest + k-means-tree index.
pub struct CompositeIndex<'a> {
    kdtree: KdForestIndex<'a>,
    kmeans: KMeansTreeIndex<'a>,
}

impl<'a> CompositeIndex<'a> {
    pub fn new(dataset: Dataset<'a, f32>, params: &IndexParams) -> Result<Self> {
        Ok(Self {
            kdtree: KdForestIndex::new(dataset, params)?,
            kmeans: KMeansTreeIndex::new(dataset, params)?,
        })
    }
}

impl NNIndex for CompositeIndex<'_> {
    fn build(&mut self) -> Result<()> {
        self.kmeans.build()?;
        self.kdtree.build()?;
        Ok(())
    }

    fn find_neighbors(
        &self,
        result: &mut dyn ResultSet,
        query: &[f32],
        search: &SearchParams,
    ) -> Result<()> {
        self.kmeans.find_neighbors(result, query, search)?;
        self.kdtree.find_neighbors(result, query, search)?;
        Ok(())
    }

    fn size(&self) -> usize {
        self.kdtree.size()
    }

    fn veclen(&self) -> usize {
        self.kdtree.veclen()
    }

    fn used_memory(&self) -> usize {
        self.kdtree.used_memory() + self.kmeans.used_memory()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Composite
    }
}
