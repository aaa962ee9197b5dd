#![cfg(test)]

use approx::assert_relative_eq;
use num_complex::Complex64;

use super::field::{field_energy, into_energy_density, VectorField};
use super::grid::Grid;
use super::layout::{FieldLayout, Transform};

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn patterned(samples: usize, seed: f64) -> VectorField {
    let data = (0..3 * samples)
        .map(|i| {
            let x = i as f64 + seed;
            c((0.7 * x).sin(), (1.3 * x).cos())
        })
        .collect();
    VectorField::from_vec(samples, data)
}

#[test]
fn zeros_stores_three_components_per_sample() {
    let field = VectorField::zeros(5);
    assert_eq!(field.samples(), 5);
    assert_eq!(field.as_slice().len(), 15);
    assert!(field.as_slice().iter().all(|v| *v == Complex64::default()));
}

#[test]
#[should_panic(expected = "data length must be three components per sample")]
fn from_vec_rejects_mismatched_lengths() {
    let _ = VectorField::from_vec(2, vec![Complex64::default(); 5]);
}

#[test]
fn vector_accessors_address_interleaved_components() {
    let mut field = VectorField::zeros(3);
    field.set_vector(1, [c(1.0, 0.0), c(2.0, 0.0), c(3.0, 0.0)]);
    assert_eq!(field.as_slice()[3], c(1.0, 0.0));
    assert_eq!(field.as_slice()[5], c(3.0, 0.0));
    assert_eq!(field.vector(1)[1], c(2.0, 0.0));
    assert_eq!(field.vector(0), [Complex64::default(); 3]);
}

#[test]
fn complex_layout_energy_is_plain_hermitian_sum() {
    let layout = FieldLayout::serial(Grid::planar(3, 2, 1.0, 1.0), Transform::Complex);
    let f1 = patterned(layout.len(), 0.0);
    let f2 = patterned(layout.len(), 0.5);
    let expected: Complex64 = f1
        .as_slice()
        .iter()
        .zip(f2.as_slice())
        .map(|(a, b)| a.conj() * b)
        .sum();
    let energy = field_energy(&layout, &f1, &f2);
    assert_relative_eq!(energy.re, expected.re, epsilon = 1e-12);
    assert_relative_eq!(energy.im, expected.im, epsilon = 1e-12);
}

#[test]
fn real_layout_counts_interior_samples_twice_with_conjugate() {
    // nx = 4: stored samples 0, 1, 2; only sample 1 has a distinct partner.
    let layout = FieldLayout::serial(Grid::new(4, 1, 1, 1.0, 1.0, 1.0), Transform::RealToComplex);
    assert_eq!(layout.len(), 3);
    let mut f1 = VectorField::zeros(3);
    let mut f2 = VectorField::zeros(3);
    let one = [c(1.0, 0.0), Complex64::default(), Complex64::default()];
    for i in 0..3 {
        f1.set_vector(i, one);
    }
    f2.set_vector(0, [c(1.0, 1.0), Complex64::default(), Complex64::default()]);
    f2.set_vector(1, [c(2.0, 3.0), Complex64::default(), Complex64::default()]);
    f2.set_vector(2, [c(5.0, 7.0), Complex64::default(), Complex64::default()]);

    let energy = field_energy(&layout, &f1, &f2);
    // (1+i) + (2+3i) + (2-3i) + (5+7i)
    assert_relative_eq!(energy.re, 10.0, epsilon = 1e-12);
    assert_relative_eq!(energy.im, 8.0, epsilon = 1e-12);
}

#[test]
fn energy_density_reuses_first_field_and_matches_energy() {
    let layout = FieldLayout::serial(Grid::planar(4, 4, 1.0, 1.0), Transform::RealToComplex);
    let f1 = patterned(layout.len(), 0.25);
    let f2 = patterned(layout.len(), 1.75);
    let expected_energy = field_energy(&layout, &f1, &f2);
    let expected_products: Vec<Complex64> = (0..layout.len())
        .map(|i| {
            let a = f1.vector(i);
            let b = f2.vector(i);
            a[0].conj() * b[0] + a[1].conj() * b[1] + a[2].conj() * b[2]
        })
        .collect();

    let (energy, density) = into_energy_density(&layout, f1, &f2);
    assert_eq!(density.len(), layout.len());
    assert_relative_eq!(energy.re, expected_energy.re, epsilon = 1e-12);
    assert_relative_eq!(energy.im, expected_energy.im, epsilon = 1e-12);
    for (got, want) in density.as_slice().iter().zip(&expected_products) {
        assert_relative_eq!(got.re, want.re, epsilon = 1e-12);
        assert_relative_eq!(got.im, want.im, epsilon = 1e-12);
    }
}
