//! Precision-targeted algorithm and parameter selection.
//!
//! The tuner samples a working subset and a disjoint query subset from the
//! dataset, computes exact ground truth with a linear scan, then walks a
//! grid of candidate configurations. For each candidate it builds an index
//! on the working subset and binary-searches the smallest `checks` budget
//! reaching the target precision; the candidate with the lowest combined
//! cost wins:
//!
//! ```text
//! cost = search_time + build_weight * build_time + memory_weight * memory_bytes
//! ```
//!
//! A second pass ([`Autotune::estimate_search_params`]) tunes the search
//! side of the final index built over the full dataset: minimal `checks`,
//! the k-means `cb_index` (coarse grid, then refinement), and the measured
//! speedup over linear search.
//!
//! All sampling and tie-breaking is driven by a seedable RNG, so a fixed
//! seed reproduces the tuning outcome exactly.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::error::{NaborError, Result};
use crate::eval::{compute_ground_truth, test_with_checks, test_with_precision};
use crate::index::{NNIndex, create_index};
use crate::params::{Algorithm, CentersInit, IndexParams, Params, SearchParams};

/// KD-forest memory model: bytes per point per tree. Empirical; adjust if
/// the node layout changes.
pub const KDTREE_MEM_FACTOR: f32 = 32.0;

/// k-means-tree memory model: bytes per stored id/coordinate. Empirical.
pub const KMEANS_MEM_FACTOR: f32 = 4.0;

/// Smallest working sample the grid search is worth running on; below
/// this the tuner short-circuits to linear search.
const MIN_TUNING_SAMPLE: usize = 100;

/// Cap on the held-out query subset.
const TUNING_QUERIES: usize = 1000;

const KDTREE_GRID: [usize; 5] = [1, 4, 8, 16, 32];
const BRANCHING_GRID: [usize; 5] = [16, 32, 64, 128, 256];
const ITERATIONS_GRID: [i32; 4] = [1, 5, 7, 11];
const CENTERS_GRID: [CentersInit; 3] = [
    CentersInit::Random,
    CentersInit::Gonzales,
    CentersInit::KMeansPp,
];

/// Closed-form KD-forest memory estimate, in bytes.
fn kdtree_memory_bytes(rows: usize, trees: usize) -> f32 {
    KDTREE_MEM_FACTOR * rows as f32 * trees as f32
}

/// Closed-form k-means-tree memory estimate, in bytes: member id lists on
/// every level plus one center per interior node.
fn kmeans_memory_bytes(rows: usize, cols: usize, branching: usize) -> f32 {
    let depth = ((rows as f32).ln() / (branching as f32).ln()).max(1.0);
    let centers = rows as f32 / (branching as f32 - 1.0) * cols as f32;
    KMEANS_MEM_FACTOR * (rows as f32 * depth + centers)
}

#[derive(Debug, Clone)]
struct Candidate {
    params: IndexParams,
    checks: i32,
    cost: f32,
}

/// Algorithm and parameter selection for a target precision.
pub struct Autotune {
    build_weight: f32,
    memory_weight: f32,
    sample_fraction: f32,
    seed: Option<u64>,
}

impl Autotune {
    /// Create a tuner. Both weights must be nonnegative and the sample
    /// fraction must be in `(0, 1]`.
    pub fn new(build_weight: f32, memory_weight: f32, sample_fraction: f32) -> Result<Self> {
        if build_weight < 0.0 {
            return Err(NaborError::InvalidArgument(format!(
                "build_weight must be nonnegative, got {build_weight}"
            )));
        }
        if memory_weight < 0.0 {
            return Err(NaborError::InvalidArgument(format!(
                "memory_weight must be nonnegative, got {memory_weight}"
            )));
        }
        if !(sample_fraction > 0.0 && sample_fraction <= 1.0) {
            return Err(NaborError::InvalidArgument(format!(
                "sample_fraction must be in (0, 1], got {sample_fraction}"
            )));
        }
        Ok(Self {
            build_weight,
            memory_weight,
            sample_fraction,
            seed: None,
        })
    }

    /// Fix the RNG seed so sampling and tie-breaking are reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Choose the index algorithm and structural parameters for
    /// `target_precision`, returning them as a [`Params`] bag.
    pub fn estimate_build_params(
        &self,
        dataset: &Dataset<'_, f32>,
        target_precision: f32,
    ) -> Result<Params> {
        if !(target_precision > 0.0 && target_precision <= 1.0) {
            return Err(NaborError::InvalidArgument(format!(
                "target_precision must be in (0, 1], got {target_precision}"
            )));
        }

        let n = dataset.rows();
        let cols = dataset.cols();
        let mut sample_size = (self.sample_fraction * n as f32) as usize;
        let query_count = (sample_size / 10).clamp(1, TUNING_QUERIES);
        if sample_size + query_count > n {
            sample_size = n.saturating_sub(query_count);
        }
        if sample_size < MIN_TUNING_SAMPLE {
            info!(
                rows = n,
                sample = sample_size,
                "dataset too small to tune, falling back to linear search"
            );
            let mut params = Params::new();
            params.set_index_params(&IndexParams {
                algorithm: Algorithm::Linear,
                ..IndexParams::default()
            });
            params.set_int("checks", -1);
            return Ok(params);
        }

        let base_seed = self.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(base_seed);

        // Disjoint working and query subsets, drawn without replacement.
        let picks = rand::seq::index::sample(&mut rng, n, sample_size + query_count);
        let mut sample_buf = Vec::with_capacity(sample_size * cols);
        let mut query_buf = Vec::with_capacity(query_count * cols);
        for (slot, row_idx) in picks.iter().enumerate() {
            let row = dataset.row(row_idx);
            if slot < sample_size {
                sample_buf.extend_from_slice(row);
            } else {
                query_buf.extend_from_slice(row);
            }
        }
        let sample = Dataset::new(sample_size, cols, &sample_buf)?;
        let queries = Dataset::new(query_count, cols, &query_buf)?;

        let defaults = IndexParams::default();
        let ground_truth =
            compute_ground_truth(&sample, &queries, 1, 0, defaults.distance)?;
        info!(
            sample = sample_size,
            queries = query_count,
            target = target_precision,
            "estimating build parameters"
        );

        let mut best: Option<Candidate> = None;
        let mut candidate_seed = base_seed;
        let mut consider = |candidate: Candidate| {
            debug!(
                algorithm = %candidate.params.algorithm,
                trees = candidate.params.trees,
                branching = candidate.params.branching,
                iterations = candidate.params.iterations,
                centers_init = %candidate.params.centers_init,
                checks = candidate.checks,
                cost = candidate.cost,
                "evaluated candidate"
            );
            if best.as_ref().is_none_or(|b| candidate.cost < b.cost) {
                best = Some(candidate);
            }
        };

        for trees in KDTREE_GRID {
            candidate_seed = candidate_seed.wrapping_add(1);
            let params = IndexParams {
                algorithm: Algorithm::KdTree,
                trees,
                random_seed: Some(candidate_seed),
                ..defaults.clone()
            };
            let candidate = self.evaluate_candidate(
                &params,
                sample,
                &queries,
                &ground_truth,
                target_precision,
                kdtree_memory_bytes(sample_size, trees),
            )?;
            consider(candidate);
        }

        for branching in BRANCHING_GRID {
            for iterations in ITERATIONS_GRID {
                for centers_init in CENTERS_GRID {
                    candidate_seed = candidate_seed.wrapping_add(1);
                    let params = IndexParams {
                        algorithm: Algorithm::KMeans,
                        branching,
                        iterations,
                        centers_init,
                        random_seed: Some(candidate_seed),
                        ..defaults.clone()
                    };
                    let candidate = self.evaluate_candidate(
                        &params,
                        sample,
                        &queries,
                        &ground_truth,
                        target_precision,
                        kmeans_memory_bytes(sample_size, cols, branching),
                    )?;
                    consider(candidate);
                }
            }
        }

        let best = best.expect("grids are non-empty");
        info!(
            algorithm = %best.params.algorithm,
            trees = best.params.trees,
            branching = best.params.branching,
            checks = best.checks,
            cost = best.cost,
            "selected build parameters"
        );

        let mut params = Params::new();
        params.set_index_params(&best.params);
        params.set_int("checks", best.checks as i64);
        params.set_float("target_precision", target_precision as f64);
        Ok(params)
    }

    fn evaluate_candidate(
        &self,
        params: &IndexParams,
        sample: Dataset<'_, f32>,
        queries: &Dataset<'_, f32>,
        ground_truth: &[Vec<i32>],
        target_precision: f32,
        memory_bytes: f32,
    ) -> Result<Candidate> {
        let mut index = create_index(sample, params)?;
        let start = Instant::now();
        index.build()?;
        let build_time = start.elapsed().as_secs_f32();

        let (checks, search_time, _) = test_with_precision(
            index.as_ref(),
            queries,
            ground_truth,
            1,
            0,
            target_precision,
            &SearchParams::default(),
        )?;

        Ok(Candidate {
            params: params.clone(),
            checks,
            cost: search_time + self.build_weight * build_time + self.memory_weight * memory_bytes,
        })
    }

    /// Tune the search side of `index` (built over the full dataset):
    /// minimal `checks` for the target, `cb_index` for k-means variants,
    /// and the measured `speedup` over linear search. Results are written
    /// into `params`.
    pub fn estimate_search_params(
        &self,
        index: &dyn NNIndex,
        dataset: &Dataset<'_, f32>,
        target_precision: f32,
        params: &mut Params,
    ) -> Result<()> {
        let n = dataset.rows();
        let cols = dataset.cols();
        let query_count = (n / 10).min(TUNING_QUERIES);
        if query_count == 0 {
            params.set_int("checks", -1);
            return Ok(());
        }

        let base_seed = self.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(0x5eed));
        let picks = rand::seq::index::sample(&mut rng, n, query_count);
        let mut query_buf = Vec::with_capacity(query_count * cols);
        for row_idx in picks.iter() {
            query_buf.extend_from_slice(dataset.row(row_idx));
        }
        let queries = Dataset::new(query_count, cols, &query_buf)?;

        // Queries are dataset rows, so ground truth skips the self match.
        let ground_truth =
            compute_ground_truth(dataset, &queries, 1, 1, IndexParams::default().distance)?;

        let mut search = params.to_search_params();
        if matches!(index.algorithm(), Algorithm::KMeans | Algorithm::Composite) {
            search.cb_index =
                self.tune_cb_index(index, &queries, &ground_truth, target_precision, &search)?;
        }

        let (checks, ann_time, precision) = test_with_precision(
            index,
            &queries,
            &ground_truth,
            1,
            1,
            target_precision,
            &search,
        )?;
        search.checks = checks;

        // Linear baseline over the same queries for the speedup figure.
        let linear_params = IndexParams {
            algorithm: Algorithm::Linear,
            ..IndexParams::default()
        };
        let mut linear = create_index(*dataset, &linear_params)?;
        linear.build()?;
        let (_, linear_time) = test_with_checks(
            linear.as_ref(),
            &queries,
            &ground_truth,
            1,
            1,
            &SearchParams::default(),
        )?;
        let speedup = if ann_time > 0.0 {
            linear_time / ann_time
        } else {
            f32::INFINITY
        };

        info!(
            checks,
            cb_index = search.cb_index,
            precision,
            speedup,
            "estimated search parameters"
        );
        params.set_search_params(&search);
        params.set_float("speedup", speedup as f64);
        Ok(())
    }

    /// Bracketed search for the `cb_index` giving the fastest search at
    /// the target precision: coarse grid, then a finer sweep around the
    /// coarse winner.
    fn tune_cb_index(
        &self,
        index: &dyn NNIndex,
        queries: &Dataset<'_, f32>,
        ground_truth: &[Vec<i32>],
        target_precision: f32,
        search_template: &SearchParams,
    ) -> Result<f32> {
        let mut search = *search_template;
        let mut best_cb = search.cb_index;
        let mut best_time = f32::INFINITY;

        let probe = |cb: f32, search: &mut SearchParams| -> Result<f32> {
            search.cb_index = cb;
            let (_, time, _) = test_with_precision(
                index,
                queries,
                ground_truth,
                1,
                1,
                target_precision,
                search,
            )?;
            Ok(time)
        };

        for step in 0..=5 {
            let cb = step as f32 * 0.2;
            let time = probe(cb, &mut search)?;
            if time < best_time {
                best_time = time;
                best_cb = cb;
            }
        }

        let coarse_best = best_cb;
        for step in -3i32..=3 {
            if step == 0 {
                continue;
            }
            let cb = coarse_best + step as f32 * 0.05;
            if !(0.0..=1.0).contains(&cb) {
                continue;
            }
            let time = probe(cb, &mut search)?;
            if time < best_time {
                best_time = time;
                best_cb = cb;
            }
        }

        debug!(cb_index = best_cb, "tuned cluster-boundary blend");
        Ok(best_cb)
    }
}
