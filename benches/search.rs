//! Build and search benchmarks across index variants.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nabor::{create_index, Algorithm, Dataset, IndexParams, KnnResultSet, SearchParams};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const N: usize = 2000;
const DIM: usize = 32;
const K: usize = 10;

fn random_data(n: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dim).map(|_| rng.random::<f32>()).collect()
}

fn params_for(algorithm: Algorithm) -> IndexParams {
    IndexParams {
        algorithm,
        trees: 4,
        branching: 32,
        random_seed: Some(1),
        ..IndexParams::default()
    }
}

fn bench_build(c: &mut Criterion) {
    let data = random_data(N, DIM, 42);

    let mut group = c.benchmark_group("build");
    group.sample_size(10);
    for algorithm in [Algorithm::KdTree, Algorithm::KMeans, Algorithm::Composite] {
        group.bench_with_input(
            BenchmarkId::from_parameter(algorithm),
            &algorithm,
            |b, &algorithm| {
                b.iter(|| {
                    let dataset = Dataset::new(N, DIM, &data).unwrap();
                    let mut index = create_index(dataset, &params_for(algorithm)).unwrap();
                    index.build().unwrap();
                    black_box(index.used_memory())
                });
            },
        );
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let data = random_data(N, DIM, 42);
    let dataset = Dataset::new(N, DIM, &data).unwrap();
    let queries = random_data(100, DIM, 43);

    let mut group = c.benchmark_group("search");
    for algorithm in [
        Algorithm::Linear,
        Algorithm::KdTree,
        Algorithm::KMeans,
        Algorithm::Composite,
    ] {
        let mut index = create_index(dataset, &params_for(algorithm)).unwrap();
        index.build().unwrap();
        let search = SearchParams::with_checks(64);

        group.bench_with_input(
            BenchmarkId::from_parameter(algorithm),
            &algorithm,
            |b, _| {
                let mut next = 0;
                b.iter(|| {
                    let query = &queries[next * DIM..(next + 1) * DIM];
                    next = (next + 1) % 100;
                    let mut result = KnnResultSet::new(K);
                    index
                        .find_neighbors(&mut result, black_box(query), &search)
                        .unwrap();
                    black_box(result.len())
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_search);
criterion_main!(benches);
