#![cfg(test)]

use approx::assert_relative_eq;
use proptest::prelude::*;

use super::subspace::{
    find_first_positive, find_last_positive, GapBounds, Subspace, SubspaceSizes,
};

const SPECTRUM: [f64; 6] = [0.1, 0.2, 0.21, 0.5, 0.52, 0.9];

#[test]
fn search_returns_length_when_nothing_is_positive() {
    let v = [1.0, 2.0, 3.0];
    assert_eq!(find_first_positive(&v, 1.0, -10.0), 3);
    assert_eq!(find_last_positive(&v, 1.0, -10.0), 3);
    assert_eq!(find_first_positive(&[], 1.0, 0.0), 0);
}

#[test]
fn search_finds_first_and_last_hits() {
    let v = [1.0, 5.0, 2.0, 6.0, 0.0];
    assert_eq!(find_first_positive(&v, 1.0, -1.5), 1);
    assert_eq!(find_last_positive(&v, 1.0, -1.5), 3);
    assert_eq!(find_last_positive(&v, -1.0, 1.5), 4);
}

#[test]
fn near_degenerate_bands_join_the_subspaces() {
    let sizes = SubspaceSizes::from_spectrum(&SPECTRUM, 3, 4, 0.1, 0.1);
    assert_eq!((sizes.nl, sizes.nu), (2, 2));
    assert_eq!(sizes.bands(Subspace::Lower), 2..=3);
    assert_eq!(sizes.bands(Subspace::Upper), 4..=5);
}

#[test]
fn tight_tolerances_keep_single_bands() {
    let sizes = SubspaceSizes::from_spectrum(&SPECTRUM, 3, 4, 0.01, 0.01);
    assert_eq!((sizes.nl, sizes.nu), (1, 1));
    assert_eq!(sizes.bands(Subspace::Lower), 3..=3);
    assert_eq!(sizes.bands(Subspace::Upper), 4..=4);
}

#[test]
fn lower_search_without_hits_takes_every_band_below() {
    let flat = [0.3, 0.3, 0.3, 0.8];
    let sizes = SubspaceSizes::from_spectrum(&flat, 3, 4, 0.0, 0.0);
    assert_eq!(sizes.nl, 3);
    assert_eq!(sizes.bands(Subspace::Lower), 1..=3);
}

#[test]
fn upper_search_without_hits_takes_every_band_above() {
    let sizes = SubspaceSizes::from_spectrum(&SPECTRUM, 3, 4, 0.0, 5.0);
    assert_eq!(sizes.nu, 3);
    assert_eq!(sizes.bands(Subspace::Upper), 4..=6);
}

#[test]
fn zero_frequency_band_keeps_a_one_band_subspace() {
    let gamma = [0.0, 0.4, 0.9];
    let sizes = SubspaceSizes::from_spectrum(&gamma, 1, 2, 0.2, 0.2);
    assert_eq!((sizes.nl, sizes.nu), (1, 1));
}

#[test]
#[should_panic(expected = "gap bands must satisfy")]
fn sizes_reject_inverted_bands() {
    let _ = SubspaceSizes::from_spectrum(&SPECTRUM, 4, 3, 0.1, 0.1);
}

#[test]
fn gap_bounds_fold_max_lower_and_min_upper() {
    let mut bounds = GapBounds::default();
    assert_relative_eq!(bounds.lambda_l, 0.0);
    assert_relative_eq!(bounds.lambda_u, 100.0);
    bounds.merge(GapBounds::from_spectrum(&SPECTRUM, 3, 4));
    bounds.merge(GapBounds::from_spectrum(&[0.1, 0.25, 0.3, 0.45, 0.6, 0.7], 3, 4));
    assert_relative_eq!(bounds.lambda_l, 0.3);
    assert_relative_eq!(bounds.lambda_u, 0.45);
    assert_relative_eq!(bounds.eigen_gap(), 2.0 * 0.15 / 0.75, epsilon = 1e-12);
    let (wl, wu) = (0.3f64.sqrt(), 0.45f64.sqrt());
    assert_relative_eq!(bounds.freq_gap(), 2.0 * (wu - wl) / (wl + wu), epsilon = 1e-12);
}

#[test]
fn side_scales_are_opposite() {
    assert_relative_eq!(Subspace::Lower.scale(), -1.0);
    assert_relative_eq!(Subspace::Upper.scale(), 1.0);
}

proptest! {
    #[test]
    fn forward_search_returns_first_hit(
        v in prop::collection::vec(-10.0f64..10.0, 0..20),
        scale in -2.0f64..2.0,
        shift in -5.0f64..5.0,
    ) {
        let r = find_first_positive(&v, scale, shift);
        let hit = |x: f64| x * scale + shift > 0.0;
        if r < v.len() {
            prop_assert!(hit(v[r]));
        } else {
            prop_assert_eq!(r, v.len());
        }
        prop_assert!(v[..r.min(v.len())].iter().all(|&x| !hit(x)));
    }

    #[test]
    fn backward_search_returns_last_hit(
        v in prop::collection::vec(-10.0f64..10.0, 0..20),
        scale in -2.0f64..2.0,
        shift in -5.0f64..5.0,
    ) {
        let r = find_last_positive(&v, scale, shift);
        let hit = |x: f64| x * scale + shift > 0.0;
        if r < v.len() {
            prop_assert!(hit(v[r]));
            prop_assert!(v[r + 1..].iter().all(|&x| !hit(x)));
        } else {
            prop_assert!(v.iter().all(|&x| !hit(x)));
        }
    }

    #[test]
    fn subspace_sizes_stay_in_range(
        mut v in prop::collection::vec(0.0f64..4.0, 3..16),
        low_tol in 0.0f64..0.5,
        upp_tol in 0.0f64..0.5,
        pick in 0usize..1000,
    ) {
        v.sort_by(|a, b| a.total_cmp(b));
        let num_bands = v.len();
        let band1 = 1 + pick % (num_bands - 1);
        let band2 = band1 + 1;
        let sizes = SubspaceSizes::from_spectrum(&v, band1, band2, low_tol, upp_tol);
        prop_assert!(sizes.nl >= 1 && sizes.nl <= band1);
        prop_assert!(sizes.nu >= 1 && sizes.nu <= num_bands - band2 + 1);
        prop_assert!(*sizes.bands(Subspace::Lower).start() >= 1);
        prop_assert!(*sizes.bands(Subspace::Upper).end() <= num_bands);
    }
}
