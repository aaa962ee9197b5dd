//! Uniform real-space grid over the unit cell.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub nx: usize,
    #[serde(default = "default_count")]
    pub ny: usize,
    #[serde(default = "default_count")]
    pub nz: usize,
    #[serde(default = "default_length")]
    pub lx: f64,
    #[serde(default = "default_length")]
    pub ly: f64,
    #[serde(default = "default_length")]
    pub lz: f64,
}

impl Grid {
    pub fn new(nx: usize, ny: usize, nz: usize, lx: f64, ly: f64, lz: f64) -> Self {
        assert!(
            nx > 0 && ny > 0 && nz > 0,
            "grid dimensions must be non-zero"
        );
        Self {
            nx,
            ny,
            nz,
            lx,
            ly,
            lz,
        }
    }

    /// Two-dimensional grid with a unit-length z extent.
    pub fn planar(nx: usize, ny: usize, lx: f64, ly: f64) -> Self {
        Self::new(nx, ny, 1, lx, ly, 1.0)
    }

    pub fn len(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    pub fn lengths(&self) -> [f64; 3] {
        [self.lx, self.ly, self.lz]
    }

    /// Number of non-trivial axes (1, 2 or 3).
    pub fn rank(&self) -> usize {
        if self.nz == 1 {
            if self.ny == 1 {
                1
            } else {
                2
            }
        } else {
            3
        }
    }

    /// Row-major index with x running fastest.
    #[inline]
    pub fn idx(&self, ix: usize, iy: usize, iz: usize) -> usize {
        (iz * self.ny + iy) * self.nx + ix
    }

    /// Cartesian position of a grid node, measured from the cell center.
    ///
    /// Axes with a single sample sit at the origin.
    pub fn point(&self, coords: [usize; 3]) -> [f64; 3] {
        let dims = self.dims();
        let lengths = self.lengths();
        let mut p = [0.0; 3];
        for axis in 0..3 {
            let step = lengths[axis] / dims[axis] as f64;
            let center = if dims[axis] <= 1 {
                0.0
            } else {
                0.5 * lengths[axis]
            };
            p[axis] = coords[axis] as f64 * step - center;
        }
        p
    }

    /// Fractional position in `[0, 1)` along each axis for a centered point.
    pub fn fractional(&self, p: [f64; 3]) -> [f64; 3] {
        let dims = self.dims();
        let lengths = self.lengths();
        let mut f = [0.0; 3];
        for axis in 0..3 {
            let center = if dims[axis] <= 1 {
                0.0
            } else {
                0.5 * lengths[axis]
            };
            f[axis] = ((p[axis] + center) / lengths[axis]).rem_euclid(1.0);
        }
        f
    }
}

fn default_count() -> usize {
    1
}

fn default_length() -> f64 {
    1.0
}
