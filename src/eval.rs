//! Ground truth and precision measurement.
//!
//! Depends only on [`Dataset`] and the [`NNIndex`] capability, so any index
//! variant can be measured. Precision here is the fraction of returned
//! indices that appear in the exact top-k, averaged over a query set; tie
//! permutations among equal distances therefore do not count as misses.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::dataset::Dataset;
use crate::distance::DistanceKind;
use crate::error::{NaborError, Result};
use crate::index::NNIndex;
use crate::params::SearchParams;
use crate::result::{KnnResultSet, ResultSet};

/// Convergence band for the checks bisection in [`test_with_precision`].
const SEARCH_EPS: f32 = 0.001;

/// Exact nearest neighbors of every `testset` row over `dataset`.
///
/// Returns a `testset.rows() x k` matrix of dataset row indices, ascending
/// by distance. The first `skip` exact matches of each query are dropped,
/// which supports leave-one-out evaluation when the queries are dataset
/// rows themselves.
pub fn compute_ground_truth(
    dataset: &Dataset<'_, f32>,
    testset: &Dataset<'_, f32>,
    k: usize,
    skip: usize,
    distance: DistanceKind,
) -> Result<Vec<Vec<i32>>> {
    if dataset.cols() != testset.cols() {
        return Err(NaborError::DimensionMismatch {
            query_len: testset.cols(),
            row_len: dataset.cols(),
        });
    }
    if k == 0 {
        return Err(NaborError::InvalidArgument(
            "ground truth needs k > 0".to_string(),
        ));
    }

    let mut matches = Vec::with_capacity(testset.rows());
    for query in testset.iter_rows() {
        let mut result = KnnResultSet::new(k + skip);
        for (i, row) in dataset.iter_rows().enumerate() {
            let dist = distance.distance_bounded(query, row, result.worst_dist());
            result.add_point(dist, i);
        }
        matches.push(
            result.neighbors()[skip.min(result.len())..]
                .iter()
                .map(|n| n.index as i32)
                .collect(),
        );
    }
    Ok(matches)
}

/// How many of `found` appear among the first `k` entries of `truth`.
fn count_correct(found: &[i32], truth: &[i32], k: usize) -> usize {
    found
        .iter()
        .take(k)
        .filter(|id| truth[..k.min(truth.len())].contains(id))
        .count()
}

/// Run every query at fixed search settings and measure precision against
/// ground truth.
///
/// Returns `(precision, seconds_per_query)`. The first `skip` results of
/// each query are discarded before comparing, mirroring the `skip` used
/// when the ground truth was computed.
pub fn test_with_checks(
    index: &dyn NNIndex,
    testset: &Dataset<'_, f32>,
    matches: &[Vec<i32>],
    k: usize,
    skip: usize,
    search: &SearchParams,
) -> Result<(f32, f32)> {
    if matches.len() != testset.rows() {
        return Err(NaborError::InvalidArgument(format!(
            "ground truth has {} rows, testset has {}",
            matches.len(),
            testset.rows()
        )));
    }
    if matches.iter().any(|row| row.len() < k) {
        return Err(NaborError::InvalidArgument(format!(
            "ground truth rows must hold at least k = {k} matches"
        )));
    }

    let mut correct = 0usize;
    let start = Instant::now();
    for (query, truth) in testset.iter_rows().zip(matches) {
        let mut result = KnnResultSet::new(k + skip);
        index.find_neighbors(&mut result, query, search)?;
        let found: Vec<i32> = result.neighbors()[skip.min(result.len())..]
            .iter()
            .map(|n| n.index as i32)
            .collect();
        correct += count_correct(&found, truth, k);
    }
    let elapsed = start.elapsed().as_secs_f32();

    let precision = correct as f32 / (testset.rows() * k) as f32;
    let time = elapsed / testset.rows() as f32;
    debug!(checks = search.checks, precision, time, "measured precision");
    Ok((precision, time))
}

/// Find the smallest `checks` reaching `target_precision`, by doubling and
/// then bisecting.
///
/// Returns `(checks, seconds_per_query, precision)` at the chosen setting.
/// If the target is unreachable within a budget of twice the dataset size,
/// the best setting found is returned and the shortfall is logged; this is
/// not an error.
pub fn test_with_precision(
    index: &dyn NNIndex,
    testset: &Dataset<'_, f32>,
    matches: &[Vec<i32>],
    k: usize,
    skip: usize,
    target_precision: f32,
    search_template: &SearchParams,
) -> Result<(i32, f32, f32)> {
    let mut search = *search_template;

    let mut c2: i32 = 1;
    search.checks = c2;
    let (mut p2, mut time) = test_with_checks(index, testset, matches, k, skip, &search)?;
    if p2 >= target_precision {
        return Ok((c2, time, p2));
    }

    let cap = (index.size() as i32).saturating_mul(2).max(2);
    let mut c1 = c2;
    while p2 < target_precision && c2 < cap {
        c1 = c2;
        c2 = (c2 * 2).min(cap);
        search.checks = c2;
        (p2, time) = test_with_checks(index, testset, matches, k, skip, &search)?;
    }
    if p2 < target_precision {
        warn!(
            target = target_precision,
            achieved = p2,
            checks = c2,
            "target precision not reachable, returning best found"
        );
        return Ok((c2, time, p2));
    }

    if (p2 - target_precision).abs() <= SEARCH_EPS {
        return Ok((c2, time, p2));
    }

    info!(low = c1, high = c2, "bisecting checks for target precision");
    let mut cx = (c1 + c2) / 2;
    search.checks = cx;
    let (mut precision, mut cx_time) = test_with_checks(index, testset, matches, k, skip, &search)?;
    while (precision - target_precision).abs() > SEARCH_EPS {
        if precision < target_precision {
            c1 = cx;
        } else {
            c2 = cx;
        }
        let next = (c1 + c2) / 2;
        if next == c1 {
            debug!(checks = cx, "bisection converged");
            break;
        }
        cx = next;
        search.checks = cx;
        (precision, cx_time) = test_with_checks(index, testset, matches, k, skip, &search)?;
    }
    // Land on the side that meets the target.
    if precision < target_precision {
        search.checks = c2;
        let (p_final, t_final) = test_with_checks(index, testset, matches, k, skip, &search)?;
        return Ok((c2, t_final, p_final));
    }
    Ok((cx, cx_time, precision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::linear::LinearIndex;
    use crate::index::kdtree::KdForestIndex;
    use crate::params::IndexParams;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_data(n: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n * dim).map(|_| rng.random::<f32>()).collect()
    }

    #[test]
    fn ground_truth_self_query_with_skip() {
        let data = random_data(50, 4, 9);
        let dataset = Dataset::new(50, 4, &data).unwrap();
        let queries = Dataset::new(50, 4, &data).unwrap();

        let gt = compute_ground_truth(&dataset, &queries, 1, 1, DistanceKind::Euclidean).unwrap();
        for (i, row) in gt.iter().enumerate() {
            assert_eq!(row.len(), 1);
            // With skip = 1 the self match is dropped.
            assert_ne!(row[0], i as i32);
        }
    }

    #[test]
    fn linear_index_has_perfect_precision() {
        let data = random_data(120, 5, 10);
        let dataset = Dataset::new(120, 5, &data).unwrap();
        let qdata = random_data(30, 5, 11);
        let queries = Dataset::new(30, 5, &qdata).unwrap();

        let gt = compute_ground_truth(&dataset, &queries, 3, 0, DistanceKind::Euclidean).unwrap();

        let mut index = LinearIndex::new(dataset, &IndexParams::default()).unwrap();
        index.build().unwrap();
        let (precision, _) =
            test_with_checks(&index, &queries, &gt, 3, 0, &SearchParams::default()).unwrap();
        assert_eq!(precision, 1.0);
    }

    #[test]
    fn precision_search_reaches_target_on_kdtree() {
        let data = random_data(400, 6, 12);
        let dataset = Dataset::new(400, 6, &data).unwrap();
        let qdata = random_data(60, 6, 13);
        let queries = Dataset::new(60, 6, &qdata).unwrap();
        let gt = compute_ground_truth(&dataset, &queries, 1, 0, DistanceKind::Euclidean).unwrap();

        let params = IndexParams {
            trees: 4,
            random_seed: Some(21),
            ..IndexParams::default()
        };
        let mut index = KdForestIndex::new(dataset, &params).unwrap();
        index.build().unwrap();

        let (checks, _, precision) = test_with_precision(
            &index,
            &queries,
            &gt,
            1,
            0,
            0.9,
            &SearchParams::default(),
        )
        .unwrap();
        assert!(checks >= 1);
        assert!(precision >= 0.9 - SEARCH_EPS);
    }

    #[test]
    fn shape_mismatches_are_rejected() {
        let data = random_data(10, 3, 14);
        let dataset = Dataset::new(10, 3, &data).unwrap();
        let queries = Dataset::new(10, 3, &data).unwrap();
        let gt = vec![vec![0i32]; 4]; // wrong row count

        let mut index = LinearIndex::new(dataset, &IndexParams::default()).unwrap();
        index.build().unwrap();
        assert!(test_with_checks(&index, &queries, &gt, 1, 0, &SearchParams::default()).is_err());
    }
}
