//! Geometric scenarios with hand-computable answers.

use nabor::{
    create_index, radius_search, Algorithm, Dataset, IndexParams, KnnResultSet, NNIndex,
    SearchParams,
};

const ALL_VARIANTS: [Algorithm; 4] = [
    Algorithm::Linear,
    Algorithm::KdTree,
    Algorithm::KMeans,
    Algorithm::Composite,
];

fn build<'a>(dataset: Dataset<'a, f32>, algorithm: Algorithm) -> Box<dyn NNIndex + 'a> {
    let params = IndexParams {
        algorithm,
        trees: 4,
        branching: 4,
        random_seed: Some(17),
        ..IndexParams::default()
    };
    let mut index = create_index(dataset, &params).expect("create index");
    index.build().expect("build index");
    index
}

/// 4x4 axis-aligned grid; point (x, y) is row 4x + y.
fn grid_4x4() -> Vec<f32> {
    let mut data = Vec::with_capacity(32);
    for x in 0..4 {
        for y in 0..4 {
            data.push(x as f32);
            data.push(y as f32);
        }
    }
    data
}

/// 5x5x4 unit lattice in R^3; point (x, y, z) is row 20x + 4y + z.
fn lattice_100() -> Vec<f32> {
    let mut data = Vec::with_capacity(300);
    for x in 0..5 {
        for y in 0..5 {
            for z in 0..4 {
                data.push(x as f32);
                data.push(y as f32);
                data.push(z as f32);
            }
        }
    }
    data
}

#[test]
fn unit_cell_corners_for_every_variant() {
    let data = grid_4x4();
    let dataset = Dataset::new(16, 2, &data).unwrap();

    for algorithm in ALL_VARIANTS {
        let index = build(dataset, algorithm);
        let mut result = KnnResultSet::new(3);
        index
            .find_neighbors(&mut result, &[1.1, 0.9], &SearchParams::exact())
            .expect("search");

        // Closest corner is (1,1); (1,0) and (2,1) tie at squared
        // distance 0.82.
        let ids: Vec<usize> = result.neighbors().iter().map(|n| n.index).collect();
        assert_eq!(ids[0], 5, "{algorithm}");
        assert!(
            ids[1..] == [4, 9] || ids[1..] == [9, 4],
            "{algorithm}: got {ids:?}"
        );
        let dists: Vec<f32> = result.neighbors().iter().map(|n| n.dist).collect();
        assert!((dists[0] - 0.02).abs() < 1e-5, "{algorithm}");
        assert!(dists.windows(2).all(|w| w[0] <= w[1]), "{algorithm}");
    }
}

#[test]
fn lattice_radius_query_finds_self_and_face_neighbors() {
    let data = lattice_100();
    let dataset = Dataset::new(100, 3, &data).unwrap();

    for algorithm in ALL_VARIANTS {
        let index = build(dataset, algorithm);
        // Interior lattice point (2, 2, 1); squared radius 1.0 covers the
        // point itself plus its six face neighbors.
        let found = radius_search(
            index.as_ref(),
            &[2.0, 2.0, 1.0],
            1.0,
            10,
            &SearchParams::exact(),
        )
        .expect("radius search");

        assert_eq!(found.len(), 7, "{algorithm}");
        assert_eq!(found[0].index, 49, "{algorithm}: self first");
        assert_eq!(found[0].dist, 0.0);
        let mut rest: Vec<usize> = found[1..].iter().map(|n| n.index).collect();
        rest.sort_unstable();
        assert_eq!(rest, vec![29, 45, 48, 50, 53, 69], "{algorithm}");
        assert!(found[1..].iter().all(|n| n.dist == 1.0), "{algorithm}");
    }
}

#[test]
fn radius_truncation_keeps_the_closest_max_nn() {
    let data = lattice_100();
    let dataset = Dataset::new(100, 3, &data).unwrap();
    let index = build(dataset, Algorithm::KdTree);

    // Squared radius 2.0 additionally admits the twelve edge-diagonal
    // neighbors; max_nn truncates the sorted list.
    let found = radius_search(
        index.as_ref(),
        &[2.0, 2.0, 1.0],
        2.0,
        5,
        &SearchParams::exact(),
    )
    .expect("radius search");

    assert_eq!(found.len(), 5);
    assert_eq!(found[0].index, 49);
    assert!(found.windows(2).all(|w| w[0].dist <= w[1].dist));
    assert!(found.iter().all(|n| n.dist <= 2.0));
}

#[test]
fn radius_results_agree_across_variants() {
    let data = lattice_100();
    let dataset = Dataset::new(100, 3, &data).unwrap();

    let expected: Vec<(usize, f32)> = {
        let index = build(dataset, Algorithm::Linear);
        radius_search(index.as_ref(), &[1.0, 3.0, 2.0], 1.0, 100, &SearchParams::exact())
            .unwrap()
            .iter()
            .map(|n| (n.index, n.dist))
            .collect()
    };
    assert_eq!(expected.len(), 7);

    for algorithm in [Algorithm::KdTree, Algorithm::KMeans, Algorithm::Composite] {
        let index = build(dataset, algorithm);
        let found: Vec<(usize, f32)> = radius_search(
            index.as_ref(),
            &[1.0, 3.0, 2.0],
            1.0,
            100,
            &SearchParams::exact(),
        )
        .unwrap()
        .iter()
        .map(|n| (n.index, n.dist))
        .collect();
        assert_eq!(found, expected, "{algorithm}");
    }
}
