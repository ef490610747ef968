//! Thread-count consistency of the parallel drivers.
//!
//! Per-sample PRNG streams are derived from `(master_seed, sample index)`
//! alone, so per-sample outputs must be identical for any worker count
//! and reduced sums may differ only by floating-point associativity.

use cobars::random_variables::ChordLength;
use cobars::{Driver, RandomVariable, Sampler, Settings};
use ndarray::array;

fn decagon_driver(threads: usize) -> Driver<3> {
    let proto = Sampler::<3>::new(10, Settings::default()).unwrap();
    Driver::new(proto, threads).unwrap().with_seed(42)
}

// ─────────────────────────────────────────────────────────────
//  Reduced sums
// ─────────────────────────────────────────────────────────────

/// The edge-space-weighted mass over 4096 samples agrees between one and
/// four workers to within accumulation round-off.
#[test]
fn weighted_mass_is_thread_count_invariant() {
    let functionals: Vec<Box<dyn RandomVariable<3>>> = vec![Box::new(ChordLength { vertex: 5 })];
    let ranges = array![[0.0, 1.0]];

    let single = decagon_driver(1)
        .sample_binned(&functionals, ranges.view(), 16, 3, 4096)
        .unwrap();
    let quad = decagon_driver(4)
        .sample_binned(&functionals, ranges.view(), 16, 3, 4096)
        .unwrap();

    let mass_1 = single.moments[[1, 0, 0]];
    let mass_4 = quad.moments[[1, 0, 0]];
    assert!(
        (mass_1 - mass_4).abs() <= 1e-8 * mass_1.abs(),
        "edge-space mass differs: {mass_1:.12e} vs {mass_4:.12e}"
    );

    // All rows and moments stay within associativity noise.
    for row in 0..3 {
        for j in 0..3 {
            let a = single.moments[[row, 0, j]];
            let b = quad.moments[[row, 0, j]];
            assert!(
                (a - b).abs() <= 1e-8 * a.abs().max(1.0),
                "moments[{row}, 0, {j}]: {a:.12e} vs {b:.12e}"
            );
        }
    }

    eprintln!("weighted mass: T=1 → {mass_1:.12e}, T=4 → {mass_4:.12e}");
}

// ─────────────────────────────────────────────────────────────
//  Per-sample outputs
// ─────────────────────────────────────────────────────────────

/// Per-sample tensors are written to disjoint slices and derive from
/// per-sample streams, so they match exactly across worker counts.
#[test]
fn per_sample_outputs_match_across_thread_counts() {
    let single = decagon_driver(1).random_closed_polygons(256).unwrap();
    let quad = decagon_driver(4).random_closed_polygons(256).unwrap();

    assert_eq!(single.x, quad.x);
    assert_eq!(single.w, quad.w);
    assert_eq!(single.y, quad.y);
    assert_eq!(single.edge_space_weights, quad.edge_space_weights);
    assert_eq!(single.quotient_space_weights, quad.quotient_space_weights);
}

/// The same holds for the raw sphere-point batches.
#[test]
fn sphere_point_batches_match_across_thread_counts() {
    let single = decagon_driver(1).random_spherical_points(128).unwrap();
    let tri = decagon_driver(3).random_spherical_points(128).unwrap();
    assert_eq!(single, tri);
}

// ─────────────────────────────────────────────────────────────
//  Reproducibility within a fixed configuration
// ─────────────────────────────────────────────────────────────

/// A fixed seed and thread count reproduce bitwise-identical results.
#[test]
fn fixed_seed_and_thread_count_reproduce_exactly() {
    let first = decagon_driver(4).random_closed_polygons(512).unwrap();
    let second = decagon_driver(4).random_closed_polygons(512).unwrap();

    assert_eq!(first.x, second.x);
    assert_eq!(first.edge_space_weights, second.edge_space_weights);
    assert_eq!(first.quotient_space_weights, second.quotient_space_weights);
}

/// Different master seeds draw different configurations.
#[test]
fn different_seeds_draw_different_polygons() {
    let proto = Sampler::<3>::new(10, Settings::default()).unwrap();
    let a = Driver::new(proto.clone(), 1)
        .unwrap()
        .with_seed(42)
        .random_closed_polygons(4)
        .unwrap();
    let b = Driver::new(proto, 1)
        .unwrap()
        .with_seed(43)
        .random_closed_polygons(4)
        .unwrap();
    assert_ne!(a.x, b.x);
}
