//! Material parametrization: design vector to dielectric function.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::grid::Grid;

/// A dielectric function controlled by a flat vector of design variables.
///
/// Points are Cartesian positions measured from the cell center, as produced
/// by [`Grid::point`].
pub trait MaterialModel: Send + Sync {
    /// Number of design variables.
    fn ntot(&self) -> usize;

    fn design(&self) -> Vec<f64>;

    fn set_design(&mut self, u: &[f64]);

    fn epsilon_at(&self, p: [f64; 3]) -> f64;

    /// Accumulate `scale * d eps(p) / d u_j` into `out[j]` for every `j`.
    fn add_gradient_at(&self, p: [f64; 3], scale: f64, out: &mut [f64]);

    /// Serialize the current design.
    fn save(&self, writer: &mut dyn Write) -> io::Result<()>;
}

/// Piecewise-constant density cells spanning the unit cell.
///
/// Cell `(cx, cy, cz)` holds density `u` in `[0, 1]` and dielectric
/// `eps_min + (eps_max - eps_min) * u`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityGrid {
    pub cells: [usize; 3],
    pub lengths: [f64; 3],
    pub eps_min: f64,
    pub eps_max: f64,
    pub values: Vec<f64>,
}

impl DensityGrid {
    pub fn uniform(cells: [usize; 3], lengths: [f64; 3], eps_min: f64, eps_max: f64, u0: f64) -> Self {
        assert!(
            cells.iter().all(|&c| c > 0),
            "material grid needs at least one cell per axis"
        );
        let count = cells[0] * cells[1] * cells[2];
        Self {
            cells,
            lengths,
            eps_min,
            eps_max,
            values: vec![u0; count],
        }
    }

    /// Cells sized to cover `grid`.
    pub fn covering(grid: &Grid, cells: [usize; 3], eps_min: f64, eps_max: f64, u0: f64) -> Self {
        Self::uniform(cells, grid.lengths(), eps_min, eps_max, u0)
    }

    fn cell_of(&self, p: [f64; 3]) -> usize {
        let mut idx = [0usize; 3];
        for axis in 0..3 {
            let n = self.cells[axis];
            if n == 1 {
                continue;
            }
            let center = 0.5 * self.lengths[axis];
            let f = ((p[axis] + center) / self.lengths[axis]).rem_euclid(1.0);
            // nodes that land on a cell boundary belong to the upper cell
            idx[axis] = ((f * n as f64 + 1e-9).floor() as usize).min(n - 1);
        }
        (idx[2] * self.cells[1] + idx[1]) * self.cells[0] + idx[0]
    }

    fn contrast(&self) -> f64 {
        self.eps_max - self.eps_min
    }
}

impl MaterialModel for DensityGrid {
    fn ntot(&self) -> usize {
        self.values.len()
    }

    fn design(&self) -> Vec<f64> {
        self.values.clone()
    }

    fn set_design(&mut self, u: &[f64]) {
        assert_eq!(u.len(), self.values.len(), "design length mismatch");
        self.values.copy_from_slice(u);
    }

    fn epsilon_at(&self, p: [f64; 3]) -> f64 {
        self.eps_min + self.contrast() * self.values[self.cell_of(p)]
    }

    fn add_gradient_at(&self, p: [f64; 3], scale: f64, out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.values.len());
        out[self.cell_of(p)] += scale * self.contrast();
    }

    fn save(&self, writer: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *writer, self)?;
        writer.write_all(b"\n")
    }
}
