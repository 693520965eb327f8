//! End-to-end autotuning and clustering scenarios.

use nabor::{
    build_index, compute_cluster_centers, compute_ground_truth, create_index, test_with_checks,
    Algorithm, Dataset, DistanceKind, IndexParams, Params, SearchParams,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_data(n: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dim).map(|_| rng.random::<f32>()).collect()
}

/// Standard normal via Box-Muller.
fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.random::<f32>().max(1e-7);
    let u2: f32 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

#[test]
fn autotuned_index_meets_target_on_held_out_queries() {
    // 1000 random points in R^8, tuned for 0.9 precision; an independent
    // query set must still come out close to the target.
    let n = 1000;
    let data = random_data(n, 8, 42);
    let dataset = Dataset::new(n, 8, &data).unwrap();

    let mut params = Params::new();
    params.set_float("target_precision", 0.9);
    params.set_float("build_weight", 0.01);
    params.set_float("memory_weight", 0.0);
    params.set_float("sample_fraction", 0.5);
    params.set_int("random_seed", 7);

    let index = build_index(dataset, &mut params).expect("autotuned build");

    // The tuner must report its operating point.
    let search = params.to_search_params();
    assert!(search.checks == -1 || search.checks >= 1);
    assert!(params.get_float("speedup").is_some());

    let qdata = random_data(500, 8, 1042);
    let queries = Dataset::new(500, 8, &qdata).unwrap();
    let ground_truth =
        compute_ground_truth(&dataset, &queries, 1, 0, DistanceKind::Euclidean).unwrap();
    let (precision, _) =
        test_with_checks(index.as_ref(), &queries, &ground_truth, 1, 0, &search).unwrap();
    assert!(
        precision >= 0.85,
        "tuned for 0.9, measured {precision} on independent queries"
    );
}

#[test]
fn estimate_build_params_emits_a_complete_configuration() {
    let n = 600;
    let data = random_data(n, 6, 21);
    let dataset = Dataset::new(n, 6, &data).unwrap();

    let tuner = nabor::Autotune::new(0.01, 0.0, 0.5)
        .expect("valid weights")
        .with_seed(5);
    let chosen = tuner.estimate_build_params(&dataset, 0.8).expect("tune");

    let index_params = chosen.to_index_params();
    assert!(matches!(
        index_params.algorithm,
        Algorithm::KdTree | Algorithm::KMeans | Algorithm::Linear
    ));
    let search = chosen.to_search_params();
    assert!(search.checks == -1 || search.checks >= 1);
    // The chosen structure must build cleanly on the full dataset.
    let mut index = create_index(dataset, &index_params).expect("create");
    index.build().expect("build");
}

#[test]
fn cluster_centers_recover_well_separated_blobs() {
    // Three Gaussian blobs in R^4; the extracted centers must map
    // one-to-one onto the true means.
    let means: [[f32; 4]; 3] = [
        [0.0, 0.0, 0.0, 0.0],
        [8.0, 8.0, 8.0, 8.0],
        [-8.0, 8.0, -8.0, 8.0],
    ];
    let mut rng = StdRng::seed_from_u64(33);
    let n = 500;
    let mut data = Vec::with_capacity(n * 4);
    for i in 0..n {
        let mean = &means[i % 3];
        for &m in mean {
            data.push(m + 0.3 * gaussian(&mut rng));
        }
    }
    let dataset = Dataset::new(n, 4, &data).unwrap();

    let params = IndexParams {
        branching: 3,
        iterations: 11,
        random_seed: Some(3),
        ..IndexParams::default()
    };
    let centers = compute_cluster_centers(dataset, 3, &params).expect("cluster centers");
    assert_eq!(centers.len(), 3);

    let mut matched = vec![false; 3];
    for center in &centers {
        let (slot, dist) = means
            .iter()
            .enumerate()
            .map(|(i, m)| (i, DistanceKind::Euclidean.distance(center, m)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap();
        assert!(dist < 1.0, "center {center:?} too far from any true mean");
        assert!(!matched[slot], "two centers mapped to the same mean");
        matched[slot] = true;
    }
}

#[test]
fn kmeans_tree_reaches_high_precision_with_a_generous_budget() {
    // precision@10 over 500 queries on 5000 random points in R^16.
    let n = 5000;
    let dim = 16;
    let data = random_data(n, dim, 55);
    let dataset = Dataset::new(n, dim, &data).unwrap();
    let qdata = random_data(500, dim, 56);
    let queries = Dataset::new(500, dim, &qdata).unwrap();

    let params = IndexParams {
        algorithm: Algorithm::KMeans,
        branching: 16,
        iterations: 11,
        random_seed: Some(2),
        ..IndexParams::default()
    };
    let mut index = create_index(dataset, &params).expect("create");
    index.build().expect("build");

    let k = 10;
    let ground_truth =
        compute_ground_truth(&dataset, &queries, k, 0, DistanceKind::Euclidean).unwrap();
    let (precision, _) = test_with_checks(
        index.as_ref(),
        &queries,
        &ground_truth,
        k,
        0,
        &SearchParams::with_checks(3000),
    )
    .unwrap();
    assert!(precision >= 0.99, "measured precision@10 = {precision}");
}
