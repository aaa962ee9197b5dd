//! Tests for the plane-wave reference solver.
//!
//! Besides the usual spectral sanity checks these pin down the two
//! identities the optimizer relies on: `<D, E> / N` is the squared
//! frequency, and the adjoint gradient matches a finite difference of the
//! eigenvalue.

#![cfg(test)]

use approx::assert_relative_eq;
use num_complex::Complex64;

use gapopt_core::engine::{apply_inverse_epsilon, EngineError, ModeSolver};
use gapopt_core::field::{field_energy, VectorField};
use gapopt_core::grid::Grid;
use gapopt_core::material::{DensityGrid, MaterialModel};
use gapopt_core::polarization::Polarization;
use gapopt_core::reduce::LocalReducer;
use gapopt_core::sensitivity::{DesignSensitivity, PairSlot, SensitivityContext};
use gapopt_core::subspace::GapBounds;

use crate::{Fft2d, PlaneWaveSolver};

const DESIGN: [f64; 4] = [0.2, 0.7, 0.4, 0.9];
const K_GENERIC: [f64; 3] = [0.3, 0.17, 0.0];

fn planar_grid() -> Grid {
    Grid::planar(8, 8, 1.0, 1.0)
}

fn patterned(grid: &Grid, design: &[f64]) -> DensityGrid {
    let mut material = DensityGrid::covering(grid, [2, 2, 1], 1.0, 12.0, 0.5);
    material.set_design(design);
    material
}

fn homogeneous(grid: &Grid) -> DensityGrid {
    // eps = 1 + 6 * 0.5 = 4
    DensityGrid::covering(grid, [1, 1, 1], 1.0, 7.0, 0.5)
}

fn eigenvalue(design: &[f64], polarization: Polarization, band: usize) -> f64 {
    let grid = planar_grid();
    let mut solver = PlaneWaveSolver::new(grid, polarization, 4, &patterned(&grid, design));
    solver.solve_kpoint(K_GENERIC).expect("dense solve");
    solver.eigenvalues().expect("solved")[band]
}

// ============================================================================
// FFT
// ============================================================================

#[test]
fn fft_roundtrip_recovers_signal() {
    let fft = Fft2d::new(4, 3);
    let original: Vec<Complex64> = (0..12)
        .map(|i| Complex64::new((i as f64).sin(), -(i as f64) * 0.5))
        .collect();
    let mut data = original.clone();
    fft.forward(&mut data);
    fft.inverse(&mut data);
    for (rec, expect) in data.iter().zip(&original) {
        let diff = (*rec / 12.0 - *expect).norm();
        assert!(diff < 1e-12, "FFT roundtrip diverged: diff={diff}");
    }
}

#[test]
fn fft_forward_of_constant_is_dc_component() {
    let fft = Fft2d::new(4, 4);
    let mut data = vec![Complex64::new(1.0, 0.0); 16];
    fft.forward(&mut data);
    assert_relative_eq!(data[0].re, 16.0, epsilon = 1e-12);
    assert!(data[1..].iter().all(|v| v.norm() < 1e-12));
}

// ============================================================================
// Spectra
// ============================================================================

#[test]
fn homogeneous_planar_cell_gives_light_cone() {
    let grid = planar_grid();
    for polarization in [Polarization::TM, Polarization::TE] {
        let mut solver = PlaneWaveSolver::new(grid, polarization, 4, &homogeneous(&grid));
        let freqs = solver.solve_kpoint([0.25, 0.0, 0.0]).unwrap();
        // omega = |k + G| / sqrt(eps) in c/a, eps = 4
        assert_relative_eq!(freqs[0], 0.125, epsilon = 1e-10);
        assert_relative_eq!(freqs[1], 0.375, epsilon = 1e-10);
        let diagonal = (0.25f64 * 0.25 + 1.0).sqrt() / 2.0;
        assert_relative_eq!(freqs[2], diagonal, epsilon = 1e-10);
        assert_relative_eq!(freqs[3], diagonal, epsilon = 1e-10);
    }
}

#[test]
fn homogeneous_line_gives_folded_bands() {
    let grid = Grid::new(16, 1, 1, 1.0, 1.0, 1.0);
    let mut solver = PlaneWaveSolver::new(grid, Polarization::TM, 3, &homogeneous(&grid));
    let freqs = solver.solve_kpoint([0.1, 0.0, 0.0]).unwrap();
    assert_relative_eq!(freqs[0], 0.05, epsilon = 1e-10);
    assert_relative_eq!(freqs[1], 0.45, epsilon = 1e-10);
    assert_relative_eq!(freqs[2], 0.55, epsilon = 1e-10);
}

#[test]
fn vacuum_zone_edge_gap_is_not_clipped() {
    let grid = Grid::new(16, 1, 1, 1.0, 1.0, 1.0);
    let vacuum = DensityGrid::covering(&grid, [1, 1, 1], 1.0, 7.0, 0.0);
    let mut solver = PlaneWaveSolver::new(grid, Polarization::TM, 6, &vacuum);
    let freqs = solver.solve_kpoint([0.5, 0.0, 0.0]).unwrap();
    for (f, expected) in freqs.iter().zip([0.5, 0.5, 1.5, 1.5, 2.5, 2.5]) {
        assert_relative_eq!(*f, expected, epsilon = 1e-10);
    }

    let eigenvalues = solver.eigenvalues().unwrap();
    let bounds = GapBounds::from_spectrum(eigenvalues, 4, 5);
    assert_relative_eq!(bounds.lambda_l, 2.25, epsilon = 1e-9);
    assert_relative_eq!(bounds.lambda_u, 6.25, epsilon = 1e-9);
    assert!(bounds.lambda_u < GapBounds::default().lambda_u);
    assert_relative_eq!(bounds.eigen_gap(), 2.0 * 4.0 / 8.5, epsilon = 1e-9);
    assert_relative_eq!(bounds.freq_gap(), 2.0 * 1.0 / 4.0, epsilon = 1e-9);
}

#[test]
fn epsilon_grid_samples_the_material_cells() {
    let grid = planar_grid();
    let solver = PlaneWaveSolver::new(grid, Polarization::TM, 2, &patterned(&grid, &DESIGN));
    let eps = solver.epsilon_grid();
    assert_eq!(eps.len(), 64);
    assert_relative_eq!(eps[grid.idx(0, 0, 0)], 1.0 + 11.0 * 0.2);
    assert_relative_eq!(eps[grid.idx(5, 0, 0)], 1.0 + 11.0 * 0.7);
    assert_relative_eq!(eps[grid.idx(0, 5, 0)], 1.0 + 11.0 * 0.4);
    assert_relative_eq!(eps[grid.idx(7, 7, 0)], 1.0 + 11.0 * 0.9);
}

// ============================================================================
// Fields
// ============================================================================

#[test]
fn fields_are_unavailable_before_a_solve() {
    let grid = planar_grid();
    let solver = PlaneWaveSolver::new(grid, Polarization::TM, 2, &homogeneous(&grid));
    let mut out = VectorField::for_layout(solver.layout());
    assert!(matches!(solver.d_field(0, &mut out), Err(EngineError::NotSolved)));
}

#[test]
fn bands_beyond_the_computed_set_are_rejected() {
    let grid = planar_grid();
    let mut solver = PlaneWaveSolver::new(grid, Polarization::TE, 4, &homogeneous(&grid));
    solver.solve_kpoint(K_GENERIC).unwrap();
    let mut out = VectorField::for_layout(solver.layout());
    assert!(matches!(
        solver.d_field(4, &mut out),
        Err(EngineError::BandNotComputed { band: 4, available: 4 })
    ));
}

#[test]
fn d_dot_e_over_grid_size_is_the_eigenvalue() {
    let grid = planar_grid();
    for polarization in [Polarization::TM, Polarization::TE] {
        let mut solver = PlaneWaveSolver::new(grid, polarization, 4, &patterned(&grid, &DESIGN));
        solver.solve_kpoint(K_GENERIC).unwrap();
        let lambdas = solver.eigenvalues().unwrap().to_vec();
        for (band, lambda) in lambdas.iter().enumerate() {
            let mut d = VectorField::for_layout(solver.layout());
            solver.d_field(band, &mut d).unwrap();
            let mut e = d.clone();
            apply_inverse_epsilon(&solver, &mut e);
            let energy = field_energy(solver.layout(), &d, &e) / grid.len() as f64;
            assert_relative_eq!(energy.re, *lambda, max_relative = 1e-9);
            assert!(energy.im.abs() < 1e-9 * lambda.abs().max(1.0));
        }
    }
}

#[test]
fn slabs_partition_the_serial_field() {
    let grid = planar_grid();
    let material = patterned(&grid, &DESIGN);
    let local_energy = |mut solver: PlaneWaveSolver| {
        solver.solve_kpoint(K_GENERIC).unwrap();
        let mut d = VectorField::for_layout(solver.layout());
        solver.d_field(1, &mut d).unwrap();
        let mut e = d.clone();
        apply_inverse_epsilon(&solver, &mut e);
        field_energy(solver.layout(), &d, &e)
    };
    let serial = local_energy(PlaneWaveSolver::new(grid, Polarization::TM, 3, &material));
    let split: Complex64 = (0..3)
        .map(|rank| {
            local_energy(PlaneWaveSolver::with_slab(
                grid,
                Polarization::TM,
                3,
                &material,
                rank,
                3,
            ))
        })
        .sum();
    assert_relative_eq!(split.re, serial.re, max_relative = 1e-10);
}

// ============================================================================
// Adjoint gradient
// ============================================================================

#[test]
fn adjoint_gradient_matches_centered_difference() {
    let grid = planar_grid();
    let step = 1e-5;
    for polarization in [Polarization::TM, Polarization::TE] {
        let material = patterned(&grid, &DESIGN);
        let mut solver = PlaneWaveSolver::new(grid, polarization, 4, &material);
        solver.solve_kpoint(K_GENERIC).unwrap();
        let lambdas = solver.eigenvalues().unwrap().to_vec();
        let deps = DesignSensitivity::compute(solver.layout(), &material);
        let ctx = SensitivityContext::new(&solver, &LocalReducer, &deps, &DESIGN).unwrap();

        for band in 0..2 {
            let mut out = vec![Complex64::default(); DESIGN.len() + 1];
            ctx.band_pair(band + 1, band + 1, 1.0, PairSlot::new(&mut out, 0, 1))
                .unwrap();

            // residual + <A, u> restores A0 = omega^2
            let a0 = out[DESIGN.len()].re
                + out[..DESIGN.len()]
                    .iter()
                    .zip(&DESIGN)
                    .map(|(a, u)| a.re * u)
                    .sum::<f64>();
            assert_relative_eq!(a0, lambdas[band], max_relative = 1e-9);

            for j in 0..DESIGN.len() {
                let mut plus = DESIGN;
                let mut minus = DESIGN;
                plus[j] += step;
                minus[j] -= step;
                let fd = (eigenvalue(&plus, polarization, band)
                    - eigenvalue(&minus, polarization, band))
                    / (2.0 * step);
                assert!(
                    (out[j].re - fd).abs() < 1e-6 * (1.0 + fd.abs()),
                    "{polarization:?} band {band} var {j}: adjoint {} vs fd {fd}",
                    out[j].re
                );
                assert_eq!(out[j].im, 0.0);
            }
        }
    }
}
