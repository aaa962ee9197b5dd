//! Adjoint sensitivities of squared frequencies with respect to the design.
//!
//! For a band pair `(b1, b2)` the linearization around the current design `u`
//! is
//!
//! ```text
//! A0    = s / N * <D_b1, E_b2>
//! A[j]  = -s / N * sum_x deps/du_j(x) conj(E_b1(x)) . E_b2(x)
//! A[n]  = A0 - sum_j A[j] u[j]
//! ```
//!
//! with `s` the side sign and `N` the number of grid points. Inner products
//! run over the locally stored samples and are then summed over every rank
//! holding a slab of the field.

use log::trace;
use num_complex::Complex64;
use rayon::prelude::*;
use thiserror::Error;

use crate::engine::{apply_inverse_epsilon, EngineError, ModeSolver};
use crate::field::{field_energy, into_energy_density, VectorField};
use crate::layout::FieldLayout;
use crate::material::MaterialModel;
use crate::reduce::{ReduceError, Reducer};
use crate::subspace::{Subspace, SubspaceSizes};
use crate::triplet::{packed_index, packed_len, SymmetricTriplets};

#[derive(Debug, Error)]
pub enum SensitivityError {
    #[error("band {band} requested but only {num_bands} bands were computed")]
    BandOutOfRange { band: usize, num_bands: usize },

    #[error("design vector has {found} entries, sensitivity table expects {expected}")]
    DesignLength { expected: usize, found: usize },

    #[error("sensitivity table covers {found} samples, field layout stores {expected}")]
    LayoutMismatch { expected: usize, found: usize },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Reduce(#[from] ReduceError),
}

// ============================================================================
// deps/du table
// ============================================================================

/// `d eps / d u_j` at every locally stored sample, `values[index * ntot + j]`.
///
/// Depends only on the material parametrization, so one table serves every
/// k-point and band pair of an iteration.
#[derive(Debug, Clone)]
pub struct DesignSensitivity {
    ntot: usize,
    samples: usize,
    values: Vec<f64>,
}

impl DesignSensitivity {
    pub fn compute(layout: &FieldLayout, material: &dyn MaterialModel) -> Self {
        let ntot = material.ntot();
        let samples = layout.len();
        let grid = *layout.grid();
        let mut values = vec![0.0; ntot * samples];
        if ntot > 0 {
            values
                .par_chunks_mut(ntot)
                .enumerate()
                .for_each(|(index, row)| {
                    let sample = layout.sample(index);
                    material.add_gradient_at(grid.point(sample.coords), 1.0, row);
                    if let Some(mirror) = sample.mirror {
                        material.add_gradient_at(grid.point(mirror), 1.0, row);
                    }
                });
        }
        Self {
            ntot,
            samples,
            values,
        }
    }

    pub fn ntot(&self) -> usize {
        self.ntot
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    #[inline]
    pub fn row(&self, index: usize) -> &[f64] {
        &self.values[index * self.ntot..(index + 1) * self.ntot]
    }
}

// ============================================================================
// Band pairs
// ============================================================================

/// Strided destination: entry `j` lands at `data[offset + j * stride]`.
pub struct PairSlot<'a> {
    data: &'a mut [Complex64],
    offset: usize,
    stride: usize,
}

impl<'a> PairSlot<'a> {
    pub fn new(data: &'a mut [Complex64], offset: usize, stride: usize) -> Self {
        Self {
            data,
            offset,
            stride,
        }
    }

    #[inline]
    fn set(&mut self, j: usize, value: Complex64) {
        self.data[self.offset + j * self.stride] = value;
    }

    #[inline]
    fn get(&self, j: usize) -> Complex64 {
        self.data[self.offset + j * self.stride]
    }
}

/// Everything a sensitivity evaluation reads, for one k-point.
pub struct SensitivityContext<'a, S: ?Sized, R: ?Sized> {
    solver: &'a S,
    reducer: &'a R,
    deps: &'a DesignSensitivity,
    design: &'a [f64],
}

impl<'a, S, R> SensitivityContext<'a, S, R>
where
    S: ModeSolver + ?Sized,
    R: Reducer + ?Sized,
{
    pub fn new(
        solver: &'a S,
        reducer: &'a R,
        deps: &'a DesignSensitivity,
        design: &'a [f64],
    ) -> Result<Self, SensitivityError> {
        if design.len() != deps.ntot() {
            return Err(SensitivityError::DesignLength {
                expected: deps.ntot(),
                found: design.len(),
            });
        }
        let local = solver.layout().len();
        if deps.samples() != local {
            return Err(SensitivityError::LayoutMismatch {
                expected: local,
                found: deps.samples(),
            });
        }
        Ok(Self {
            solver,
            reducer,
            deps,
            design,
        })
    }

    pub fn ntot(&self) -> usize {
        self.deps.ntot()
    }

    fn check_band(&self, band: usize) -> Result<(), SensitivityError> {
        let num_bands = self.solver.num_bands();
        if band == 0 || band > num_bands {
            return Err(SensitivityError::BandOutOfRange { band, num_bands });
        }
        Ok(())
    }

    /// Linearization of one band pair (1-based), written to `out[0..=ntot]`.
    ///
    /// Entries `0..ntot` are the gradient, entry `ntot` the first-order
    /// residual.
    pub fn band_pair(
        &self,
        band1: usize,
        band2: usize,
        scale: f64,
        mut out: PairSlot<'_>,
    ) -> Result<(), SensitivityError> {
        self.check_band(band1)?;
        self.check_band(band2)?;
        let layout = self.solver.layout();
        let ntot = self.ntot();
        let scale = scale / layout.grid().len() as f64;

        let mut field1 = VectorField::for_layout(layout);
        self.solver.d_field(band1 - 1, &mut field1)?;
        let field2 = if band1 == band2 {
            let mut e = field1.clone();
            apply_inverse_epsilon(self.solver, &mut e);
            e
        } else {
            let mut e = VectorField::for_layout(layout);
            self.solver.e_field(band2 - 1, &mut e)?;
            e
        };

        let energy = field_energy(layout, &field1, &field2);
        let mut a0 = [energy.re, energy.im];
        self.reducer.sum_in_place(&mut a0)?;
        let a0 = Complex64::new(a0[0], a0[1]) * scale;

        // D_b1 is no longer needed: turn it into E_b1 and then into the product.
        apply_inverse_epsilon(self.solver, &mut field1);
        let (_, density) = into_energy_density(layout, field1, &field2);

        let mut sums = vec![0.0; 2 * ntot];
        for (index, product) in density.as_slice().iter().enumerate() {
            for (j, &d) in self.deps.row(index).iter().enumerate() {
                sums[2 * j] += d * product.re;
                sums[2 * j + 1] += d * product.im;
            }
        }
        self.reducer.sum_in_place(&mut sums)?;

        let grad_scale = -scale;
        let mut projected = Complex64::default();
        for j in 0..ntot {
            let a = Complex64::new(sums[2 * j], sums[2 * j + 1]) * grad_scale;
            out.set(j, a);
            projected += out.get(j) * self.design[j];
        }
        out.set(ntot, a0 - projected);
        trace!("[kpoint] pair ({band1},{band2}): A0 = {a0}");
        Ok(())
    }

    /// Gradient table of one side of the gap.
    pub fn subspace(
        &self,
        sizes: &SubspaceSizes,
        side: Subspace,
    ) -> Result<SubspaceGradients, SensitivityError> {
        let spdim = sizes.size(side);
        let first_band = *sizes.bands(side).start();
        let mut table = SubspaceGradients::zeros(side, spdim, self.ntot());
        let stride = table.stride();
        let columns = table.columns();
        for r in 0..spdim {
            for c in 0..=r {
                let count = packed_index(r, c);
                let slot = PairSlot::new(&mut table.data, count, stride);
                self.band_pair(first_band + r, first_band + c, side.scale(), slot)?;
                let diag = if r == c { 1.0 } else { 0.0 };
                let (lower_row, upper_row) = match side {
                    Subspace::Lower => (diag, 0.0),
                    Subspace::Upper => (0.0, -diag),
                };
                table.data[count + (columns - 2) * stride] = Complex64::new(lower_row, 0.0);
                table.data[count + (columns - 1) * stride] = Complex64::new(upper_row, 0.0);
            }
        }
        Ok(table)
    }
}

// ============================================================================
// Subspace tables
// ============================================================================

/// Packed Hermitian blocks of one subspace, one per design-vector column.
///
/// Columns `0..ntot` hold gradients, `ntot` the residual, `ntot + 1` the
/// lower-bound identity and `ntot + 2` the upper-bound identity.
#[derive(Debug, Clone, PartialEq)]
pub struct SubspaceGradients {
    side: Subspace,
    spdim: usize,
    columns: usize,
    data: Vec<Complex64>,
}

impl SubspaceGradients {
    pub fn zeros(side: Subspace, spdim: usize, ntot: usize) -> Self {
        let columns = ntot + 3;
        Self {
            side,
            spdim,
            columns,
            data: vec![Complex64::default(); columns * packed_len(spdim)],
        }
    }

    pub fn side(&self) -> Subspace {
        self.side
    }

    pub fn spdim(&self) -> usize {
        self.spdim
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn stride(&self) -> usize {
        packed_len(self.spdim)
    }

    pub fn column(&self, j: usize) -> &[Complex64] {
        let stride = self.stride();
        &self.data[j * stride..(j + 1) * stride]
    }

    /// Real symmetric block handed to the conic solver for column `j`.
    pub fn triplets(&self, j: usize) -> SymmetricTriplets {
        SymmetricTriplets::embed_hermitian(self.spdim, self.column(j))
    }
}
