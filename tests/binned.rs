//! Binned Monte-Carlo statistics: histogram and moment accumulation,
//! normalisation, and input validation of the binned driver call.

use approx::assert_abs_diff_eq;
use cobars::random_variables::{BendingEnergy, ChordLength, HydrodynamicRadius};
use cobars::{CobarsError, Driver, RandomVariable, Sampler, Settings};
use ndarray::array;

fn octagon_driver(threads: usize) -> Driver<3> {
    let proto = Sampler::<3>::with_weights(&[1.0; 8], &[1.0; 8], Settings::default()).unwrap();
    Driver::new(proto, threads).unwrap().with_seed(42)
}

// ─────────────────────────────────────────────────────────────
//  Scenario: half-chord histogram of unit octagons
// ─────────────────────────────────────────────────────────────

/// 10 000 octagon samples binned on the chord from vertex 0 to vertex 4.
/// After normalisation the unweighted total mass is 1 and the in-range
/// bin mass cannot exceed it.
#[test]
fn chord_histogram_normalises_to_unit_mass() {
    let driver = octagon_driver(1);
    let functionals: Vec<Box<dyn RandomVariable<3>>> = vec![Box::new(ChordLength { vertex: 4 })];
    let ranges = array![[0.0, 8.0]];

    let mut samples = driver
        .sample_binned(&functionals, ranges.view(), 32, 3, 10_000)
        .unwrap();

    // Raw unweighted mass counts every sample once.
    assert_eq!(samples.moments[[0, 0, 0]], 10_000.0);

    samples.normalize().unwrap();
    for row in 0..3 {
        assert_abs_diff_eq!(samples.moments[[row, 0, 0]], 1.0, epsilon = 1e-12);
    }

    let bin_mass: f64 = (0..32).map(|b| samples.bins[[0, 0, b]]).sum();
    assert!(
        bin_mass > 0.0 && bin_mass <= 1.0 + 1e-12,
        "bin mass = {bin_mass}"
    );

    // The chord from vertex 0 to vertex 4 is at most half the perimeter,
    // so the upper half of the range stays empty.
    let upper_half: f64 = (16..32).map(|b| samples.bins[[0, 0, b]]).sum();
    assert_eq!(upper_half, 0.0);

    eprintln!(
        "chord histogram: in-range mass = {:.6}, first moment = {:.6}",
        bin_mass,
        samples.moments[[0, 0, 1]]
    );
}

// ─────────────────────────────────────────────────────────────
//  Several functionals side by side
// ─────────────────────────────────────────────────────────────

/// Functionals with and without a space curve coexist in one batch and
/// produce finite, positive masses under all three weightings.
#[test]
fn mixed_functionals_accumulate_finite_moments() {
    let driver = octagon_driver(2);
    let functionals: Vec<Box<dyn RandomVariable<3>>> = vec![
        Box::new(BendingEnergy { p: 2.0 }),
        Box::new(HydrodynamicRadius),
        Box::new(ChordLength { vertex: 4 }),
    ];
    let ranges = array![[0.0, 100.0], [0.0, 8.0], [0.0, 8.0]];

    let samples = driver
        .sample_binned(&functionals, ranges.view(), 16, 3, 500)
        .unwrap();

    for row in 0..3 {
        for fun in 0..3 {
            let mass = samples.moments[[row, fun, 0]];
            assert!(
                mass.is_finite() && mass > 0.0,
                "row {row}, functional {fun}: mass = {mass}"
            );
            for j in 0..3 {
                assert!(samples.moments[[row, fun, j]].is_finite());
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Validation
// ─────────────────────────────────────────────────────────────

#[test]
fn binned_call_rejects_bad_input() {
    let driver = octagon_driver(1);
    let chord: Vec<Box<dyn RandomVariable<3>>> = vec![Box::new(ChordLength { vertex: 4 })];

    let empty: Vec<Box<dyn RandomVariable<3>>> = Vec::new();
    assert!(matches!(
        driver.sample_binned(&empty, array![[0.0, 1.0]].view(), 8, 3, 10),
        Err(CobarsError::InvalidInput(_))
    ));

    // Inverted range.
    assert!(matches!(
        driver.sample_binned(&chord, array![[1.0, 1.0]].view(), 8, 3, 10),
        Err(CobarsError::InvalidInput(_))
    ));

    // Range count must match the functional count.
    assert!(matches!(
        driver.sample_binned(&chord, array![[0.0, 1.0], [0.0, 1.0]].view(), 8, 3, 10),
        Err(CobarsError::InvalidInput(_))
    ));

    // Degenerate bin and moment counts.
    assert!(matches!(
        driver.sample_binned(&chord, array![[0.0, 8.0]].view(), 0, 3, 10),
        Err(CobarsError::InvalidInput(_))
    ));
    assert!(matches!(
        driver.sample_binned(&chord, array![[0.0, 8.0]].view(), 8, 0, 10),
        Err(CobarsError::InvalidInput(_))
    ));
}

// ─────────────────────────────────────────────────────────────
//  Range hints from the functionals
// ─────────────────────────────────────────────────────────────

/// The built-in functionals report usable binning ranges.
#[test]
fn functional_ranges_bracket_observed_values() {
    let mut s = Sampler::<3>::with_weights(&[1.0; 8], &[1.0; 8], Settings::default()).unwrap();
    s.reseed_for_sample(42, 0);
    s.randomize_initial_directions();
    s.compute_shift_vector();
    s.optimize().unwrap();
    s.compute_space_coordinates();

    let functionals: Vec<Box<dyn RandomVariable<3>>> = vec![
        Box::new(BendingEnergy { p: 2.0 }),
        Box::new(HydrodynamicRadius),
        Box::new(ChordLength { vertex: 4 }),
    ];
    for f in &functionals {
        let value = f.evaluate(&s);
        let lo = f.min_value(&s);
        let hi = f.max_value(&s);
        assert!(
            lo <= value && value <= hi,
            "{}: {value} outside [{lo}, {hi}]",
            f.tag()
        );
    }
}
