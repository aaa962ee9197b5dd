//! Contract between the optimizer and an electromagnetic mode solver.

use num_complex::Complex64;
use thiserror::Error;

use crate::field::VectorField;
use crate::layout::FieldLayout;
use crate::material::MaterialModel;

/// Real symmetric 3x3 tensor, stored as its upper triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymmetricTensor {
    pub m00: f64,
    pub m11: f64,
    pub m22: f64,
    pub m01: f64,
    pub m02: f64,
    pub m12: f64,
}

impl SymmetricTensor {
    pub fn isotropic(value: f64) -> Self {
        Self {
            m00: value,
            m11: value,
            m22: value,
            m01: 0.0,
            m02: 0.0,
            m12: 0.0,
        }
    }

    #[inline]
    pub fn apply(&self, v: [Complex64; 3]) -> [Complex64; 3] {
        [
            v[0] * self.m00 + v[1] * self.m01 + v[2] * self.m02,
            v[0] * self.m01 + v[1] * self.m11 + v[2] * self.m12,
            v[0] * self.m02 + v[1] * self.m12 + v[2] * self.m22,
        ]
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("band index {band} requested but only {available} bands were computed")]
    BandNotComputed { band: usize, available: usize },

    #[error("no k-point has been solved yet")]
    NotSolved,

    #[error("eigensolver failed: {0}")]
    Eigensolver(String),
}

/// Eigenmodes of the periodic Maxwell operator at one k-point.
///
/// Band indices are zero-based. Fields are sampled on [`ModeSolver::layout`].
pub trait ModeSolver {
    fn layout(&self) -> &FieldLayout;

    fn num_bands(&self) -> usize;

    /// Reset the starting guess of an iterative solver.
    fn randomize_fields(&mut self) {}

    /// Solve at `k` (reciprocal-lattice coordinates), returning ascending
    /// frequencies for every computed band.
    fn solve_kpoint(&mut self, k: [f64; 3]) -> Result<Vec<f64>, EngineError>;

    /// Displacement field of `band` at the last solved k-point.
    fn d_field(&self, band: usize, out: &mut VectorField) -> Result<(), EngineError>;

    /// Local inverse dielectric tensor at sample `index`.
    fn inverse_epsilon(&self, index: usize) -> SymmetricTensor;

    /// Electric field of `band`, `eps^-1 D`.
    fn e_field(&self, band: usize, out: &mut VectorField) -> Result<(), EngineError> {
        self.d_field(band, out)?;
        apply_inverse_epsilon(self, out);
        Ok(())
    }

    /// Resample the dielectric function from `material`.
    fn update_dielectric(&mut self, material: &dyn MaterialModel);

    /// Dielectric function over the full grid, x fastest.
    fn epsilon_grid(&self) -> Vec<f64>;
}

/// Turn a D field into an E field in place.
pub fn apply_inverse_epsilon<S: ModeSolver + ?Sized>(solver: &S, field: &mut VectorField) {
    for index in 0..field.samples() {
        let e = solver.inverse_epsilon(index).apply(field.vector(index));
        field.set_vector(index, e);
    }
}
