//! Plane-wave reference mode solver built on rustfft.
//!
//! Every grid wavevector is a basis function, so the discrete Maxwell
//! operator
//!
//! ```text
//! M[G, G'] = f(k + G) . f(k + G') eta_hat(G - G')
//! ```
//!
//! is a dense Hermitian matrix of the grid size. `eta_hat` is the FFT of
//! `1 / eps` divided by the number of grid points and indexed cyclically, and
//! `f(q)` is `|q|` for TM and `q` itself for TE. Wavevectors are measured
//! in units of `2 pi / a`, so the eigenvalues are squared frequencies in
//! `(c / a)^2`. D fields are unnormalized inverse FFTs of
//! `i q x h`, which makes `<D, E> / N` equal to the eigenvalue exactly.
//!
//! Intended for small 1-D and 2-D cells and tests; the optimizer only sees it
//! through [`ModeSolver`].

use std::sync::Arc;

use log::debug;
use nalgebra::{DMatrix, SymmetricEigen};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

use gapopt_core::engine::{EngineError, ModeSolver, SymmetricTensor};
use gapopt_core::field::VectorField;
use gapopt_core::grid::Grid;
use gapopt_core::layout::{FieldLayout, Transform};
use gapopt_core::material::MaterialModel;
use gapopt_core::polarization::Polarization;

// ============================================================================
// 2-D transforms
// ============================================================================

/// Row/column FFT pair over an x-fastest `nx * ny` buffer.
pub(crate) struct Fft2d {
    nx: usize,
    ny: usize,
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl Fft2d {
    pub(crate) fn new(nx: usize, ny: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            nx,
            ny,
            row_forward: planner.plan_fft_forward(nx),
            row_inverse: planner.plan_fft_inverse(nx),
            col_forward: planner.plan_fft_forward(ny),
            col_inverse: planner.plan_fft_inverse(ny),
        }
    }

    pub(crate) fn forward(&self, data: &mut [Complex64]) {
        self.apply(data, &self.row_forward, &self.col_forward);
    }

    /// Unnormalized inverse.
    pub(crate) fn inverse(&self, data: &mut [Complex64]) {
        self.apply(data, &self.row_inverse, &self.col_inverse);
    }

    fn apply(&self, data: &mut [Complex64], rows: &Arc<dyn Fft<f64>>, cols: &Arc<dyn Fft<f64>>) {
        assert_eq!(data.len(), self.nx * self.ny, "FFT buffer size mismatch");
        for row in data.chunks_exact_mut(self.nx) {
            rows.process(row);
        }
        if self.ny > 1 {
            let mut column = vec![Complex64::default(); self.ny];
            for ix in 0..self.nx {
                for (iy, value) in column.iter_mut().enumerate() {
                    *value = data[iy * self.nx + ix];
                }
                cols.process(&mut column);
                for (iy, value) in column.iter().enumerate() {
                    data[iy * self.nx + ix] = *value;
                }
            }
        }
    }
}

/// Signed alias of wave index `m` on an axis of `n` samples.
#[inline]
fn signed_index(m: usize, n: usize) -> f64 {
    if 2 * m <= n {
        m as f64
    } else {
        m as f64 - n as f64
    }
}

// ============================================================================
// Solver
// ============================================================================

struct Solved {
    eigenvalues: Vec<f64>,
    /// D field of every band over the full grid, x fastest.
    fields: Vec<Vec<[Complex64; 3]>>,
}

pub struct PlaneWaveSolver {
    grid: Grid,
    layout: FieldLayout,
    polarization: Polarization,
    num_bands: usize,
    fft: Fft2d,
    epsilon: Vec<f64>,
    eta_hat: Vec<Complex64>,
    solved: Option<Solved>,
}

impl PlaneWaveSolver {
    /// Solver holding the whole field on one process.
    pub fn new(
        grid: Grid,
        polarization: Polarization,
        num_bands: usize,
        material: &dyn MaterialModel,
    ) -> Self {
        Self::with_layout(
            FieldLayout::serial(grid, Transform::Complex),
            polarization,
            num_bands,
            material,
        )
    }

    /// Solver exposing the y-slab `rank` of `ranks`.
    ///
    /// The eigenproblem is solved redundantly on every rank; only the stored
    /// field samples are split.
    pub fn with_slab(
        grid: Grid,
        polarization: Polarization,
        num_bands: usize,
        material: &dyn MaterialModel,
        rank: usize,
        ranks: usize,
    ) -> Self {
        Self::with_layout(
            FieldLayout::slab(grid, Transform::Complex, rank, ranks),
            polarization,
            num_bands,
            material,
        )
    }

    pub fn with_layout(
        layout: FieldLayout,
        polarization: Polarization,
        num_bands: usize,
        material: &dyn MaterialModel,
    ) -> Self {
        let grid = *layout.grid();
        assert_eq!(grid.nz, 1, "plane-wave solver handles 1-D and 2-D cells only");
        assert_eq!(
            layout.transform(),
            Transform::Complex,
            "plane-wave solver stores complex fields"
        );
        assert!(
            num_bands > 0 && num_bands <= grid.len(),
            "num_bands must lie in 1..={}",
            grid.len()
        );
        let mut solver = Self {
            grid,
            layout,
            polarization,
            num_bands,
            fft: Fft2d::new(grid.nx, grid.ny),
            epsilon: Vec::new(),
            eta_hat: Vec::new(),
            solved: None,
        };
        solver.update_dielectric(material);
        solver
    }

    pub fn polarization(&self) -> Polarization {
        self.polarization
    }

    /// Squared frequencies of the last solve, ascending.
    pub fn eigenvalues(&self) -> Option<&[f64]> {
        self.solved.as_ref().map(|s| s.eigenvalues.as_slice())
    }

    /// Cartesian `k + G` for every grid wavevector in units of `2 pi / a`,
    /// x fastest.
    fn wavevectors(&self, k: [f64; 3]) -> Vec<[f64; 2]> {
        let Grid { nx, ny, lx, ly, .. } = self.grid;
        let mut qs = Vec::with_capacity(nx * ny);
        for my in 0..ny {
            let qy = (k[1] + signed_index(my, ny)) / ly;
            for mx in 0..nx {
                let qx = (k[0] + signed_index(mx, nx)) / lx;
                qs.push([qx, qy]);
            }
        }
        qs
    }

    fn coupling(&self, a: [f64; 2], b: [f64; 2]) -> f64 {
        match self.polarization {
            Polarization::TM => a[0].hypot(a[1]) * b[0].hypot(b[1]),
            Polarization::TE => a[0] * b[0] + a[1] * b[1],
        }
    }

    fn operator(&self, qs: &[[f64; 2]]) -> DMatrix<Complex64> {
        let Grid { nx, ny, .. } = self.grid;
        let n = qs.len();
        let mut m = DMatrix::zeros(n, n);
        for a in 0..n {
            let (ax, ay) = (a % nx, a / nx);
            for b in 0..=a {
                let (bx, by) = (b % nx, b / nx);
                let dx = (ax + nx - bx) % nx;
                let dy = (ay + ny - by) % ny;
                let value = self.eta_hat[dy * nx + dx] * self.coupling(qs[a], qs[b]);
                if a == b {
                    m[(a, a)] = Complex64::new(value.re, 0.0);
                } else {
                    m[(a, b)] = value;
                    m[(b, a)] = value.conj();
                }
            }
        }
        m
    }

    /// Real-space D field of one eigenvector.
    fn d_from_coefficients(&self, qs: &[[f64; 2]], coeffs: &[Complex64]) -> Vec<[Complex64; 3]> {
        let n = qs.len();
        let i = Complex64::i();
        let mut components = [
            vec![Complex64::default(); n],
            vec![Complex64::default(); n],
            vec![Complex64::default(); n],
        ];
        for (m, (q, &h)) in qs.iter().zip(coeffs).enumerate() {
            match self.polarization {
                Polarization::TM => {
                    components[2][m] = i * q[0].hypot(q[1]) * h;
                }
                Polarization::TE => {
                    components[0][m] = i * q[1] * h;
                    components[1][m] = -i * q[0] * h;
                }
            }
        }
        let active: &[usize] = match self.polarization {
            Polarization::TM => &[2],
            Polarization::TE => &[0, 1],
        };
        for &c in active {
            self.fft.inverse(&mut components[c]);
        }
        (0..n)
            .map(|p| [components[0][p], components[1][p], components[2][p]])
            .collect()
    }

    fn solved(&self) -> Result<&Solved, EngineError> {
        self.solved.as_ref().ok_or(EngineError::NotSolved)
    }
}

impl ModeSolver for PlaneWaveSolver {
    fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    fn num_bands(&self) -> usize {
        self.num_bands
    }

    fn solve_kpoint(&mut self, k: [f64; 3]) -> Result<Vec<f64>, EngineError> {
        let qs = self.wavevectors(k);
        let operator = self.operator(&qs);
        let eig = SymmetricEigen::try_new(operator, f64::EPSILON, 10_000).ok_or_else(|| {
            EngineError::Eigensolver(format!("dense eigensolve did not converge at k = {k:?}"))
        })?;

        let mut order: Vec<usize> = (0..qs.len()).collect();
        order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
        order.truncate(self.num_bands);

        let eigenvalues: Vec<f64> = order.iter().map(|&c| eig.eigenvalues[c]).collect();
        let fields = order
            .iter()
            .map(|&c| {
                let coeffs: Vec<Complex64> = eig.eigenvectors.column(c).iter().copied().collect();
                self.d_from_coefficients(&qs, &coeffs)
            })
            .collect();
        let freqs: Vec<f64> = eigenvalues.iter().map(|&l| l.max(0.0).sqrt()).collect();
        debug!(
            "[kpoint] k = ({:.4}, {:.4}): lowest frequencies {:?}",
            k[0],
            k[1],
            &freqs[..freqs.len().min(4)]
        );
        self.solved = Some(Solved {
            eigenvalues,
            fields,
        });
        Ok(freqs)
    }

    fn d_field(&self, band: usize, out: &mut VectorField) -> Result<(), EngineError> {
        let solved = self.solved()?;
        let field = solved.fields.get(band).ok_or(EngineError::BandNotComputed {
            band,
            available: solved.fields.len(),
        })?;
        assert_eq!(out.samples(), self.layout.len(), "output field does not match layout");
        for sample in self.layout.samples() {
            let [x, y, z] = sample.coords;
            out.set_vector(sample.index, field[self.grid.idx(x, y, z)]);
        }
        Ok(())
    }

    fn inverse_epsilon(&self, index: usize) -> SymmetricTensor {
        let [x, y, z] = self.layout.sample(index).coords;
        SymmetricTensor::isotropic(1.0 / self.epsilon[self.grid.idx(x, y, z)])
    }

    fn update_dielectric(&mut self, material: &dyn MaterialModel) {
        let grid = self.grid;
        let mut epsilon = vec![0.0; grid.len()];
        for iy in 0..grid.ny {
            for ix in 0..grid.nx {
                epsilon[grid.idx(ix, iy, 0)] = material.epsilon_at(grid.point([ix, iy, 0]));
            }
        }
        let scale = 1.0 / grid.len() as f64;
        let mut eta_hat: Vec<Complex64> = epsilon
            .iter()
            .map(|&e| Complex64::new(1.0 / e, 0.0))
            .collect();
        self.fft.forward(&mut eta_hat);
        for value in &mut eta_hat {
            *value *= scale;
        }
        self.epsilon = epsilon;
        self.eta_hat = eta_hat;
        self.solved = None;
    }

    fn epsilon_grid(&self) -> Vec<f64> {
        self.epsilon.clone()
    }
}

#[cfg(test)]
mod _tests_lib;
