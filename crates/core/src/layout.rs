//! Storage layouts of real-space field samples.
//!
//! A mode solver stores its fields either as a full complex grid or, when the
//! transform exploits the conjugate symmetry of real input, as the
//! non-redundant half along the last non-trivial axis. Independently the
//! samples may be split across the ranks of a field group in slabs along y,
//! in which case the first two axes are stored transposed.
//!
//! [`FieldLayout`] hides those four cases behind one sample iterator. Every
//! sample knows its storage index, its grid coordinates and, for halved
//! storage, the coordinates of the conjugate partner it stands in for.

use serde::{Deserialize, Serialize};

use crate::grid::Grid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Full complex grid.
    Complex,
    /// Real input, last non-trivial axis cut to `n/2 + 1` samples.
    RealToComplex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decomposition {
    Serial,
    /// Slab of `local_ny` rows starting at `local_y_start` along the split axis.
    Slab {
        local_ny: usize,
        local_y_start: usize,
    },
}

/// One locally stored sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub index: usize,
    pub coords: [usize; 3],
    /// Coordinates of the conjugate partner represented by this sample.
    pub mirror: Option<[usize; 3]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldLayout {
    grid: Grid,
    transform: Transform,
    decomposition: Decomposition,
}

impl FieldLayout {
    pub fn serial(grid: Grid, transform: Transform) -> Self {
        Self {
            grid,
            transform,
            decomposition: Decomposition::Serial,
        }
    }

    /// Layout of rank `rank` out of `ranks` sharing one field.
    ///
    /// Rows along y (the halved axis for planar real transforms) are dealt
    /// out contiguously, earlier ranks taking one extra row each when the
    /// count does not divide evenly.
    pub fn slab(grid: Grid, transform: Transform, rank: usize, ranks: usize) -> Self {
        assert!(ranks > 0, "slab decomposition needs at least one rank");
        assert!(rank < ranks, "rank {rank} out of range for {ranks} ranks");
        if transform == Transform::RealToComplex {
            assert!(
                grid.rank() >= 2,
                "real-to-complex slabs need a grid of rank 2 or more"
            );
        }
        let rows = match (transform, grid.nz) {
            (Transform::RealToComplex, 1) => grid.ny / 2 + 1,
            _ => grid.ny,
        };
        assert!(
            ranks <= rows,
            "cannot split {rows} rows across {ranks} ranks"
        );
        let base = rows / ranks;
        let rem = rows % ranks;
        let local_ny = base + usize::from(rank < rem);
        let local_y_start = rank * base + rank.min(rem);
        Self {
            grid,
            transform,
            decomposition: Decomposition::Slab {
                local_ny,
                local_y_start,
            },
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn decomposition(&self) -> Decomposition {
        self.decomposition
    }

    /// Size of the axis that real transforms cut in half.
    pub fn last_dim(&self) -> usize {
        match self.grid.rank() {
            3 => self.grid.nz,
            2 => self.grid.ny,
            _ => self.grid.nx,
        }
    }

    /// Stored length of the last axis.
    pub fn last_dim_stored(&self) -> usize {
        match self.transform {
            Transform::Complex => self.last_dim(),
            Transform::RealToComplex => self.last_dim() / 2 + 1,
        }
    }

    fn other_dims(&self) -> usize {
        self.grid.len() / self.last_dim()
    }

    /// Stored length of z in a real-to-complex slab.
    fn local_nz(&self) -> usize {
        if self.grid.nz > 1 {
            self.grid.nz / 2 + 1
        } else {
            1
        }
    }

    /// Number of locally stored samples.
    pub fn len(&self) -> usize {
        let (nx, nz) = (self.grid.nx, self.grid.nz);
        match (self.transform, self.decomposition) {
            (Transform::Complex, Decomposition::Serial) => self.grid.len(),
            (Transform::Complex, Decomposition::Slab { local_ny, .. }) => nx * local_ny * nz,
            (Transform::RealToComplex, Decomposition::Serial) => {
                self.other_dims() * self.last_dim_stored()
            }
            (Transform::RealToComplex, Decomposition::Slab { local_ny, .. }) => {
                local_ny * nx * self.local_nz()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample stored at `index`.
    pub fn sample(&self, index: usize) -> Sample {
        debug_assert!(index < self.len(), "sample index out of range");
        let Grid { nx, ny, nz, .. } = self.grid;
        match (self.transform, self.decomposition) {
            (Transform::Complex, Decomposition::Serial) => {
                let k = index % nz;
                let j = (index / nz) % ny;
                let i = index / (ny * nz);
                Sample {
                    index,
                    coords: [i, j, k],
                    mirror: None,
                }
            }
            (Transform::Complex, Decomposition::Slab { local_y_start, .. }) => {
                let k = index % nz;
                let i = (index / nz) % nx;
                let j = index / (nx * nz);
                Sample {
                    index,
                    coords: [i, j + local_y_start, k],
                    mirror: None,
                }
            }
            (Transform::RealToComplex, Decomposition::Serial) => {
                let n_last = self.last_dim_stored();
                let i = index / n_last;
                let j = index % n_last;
                let coords = match self.grid.rank() {
                    3 => [i / ny, i % ny, j],
                    2 => [i, j, 0],
                    _ => [j, 0, 0],
                };
                Sample {
                    index,
                    coords,
                    mirror: self.mirror_for(j, coords),
                }
            }
            (Transform::RealToComplex, Decomposition::Slab { local_y_start, .. }) => {
                let local_nz = self.local_nz();
                let k = index % local_nz;
                let i = (index / local_nz) % nx;
                let j = index / (nx * local_nz);
                let coords = [i, j + local_y_start, k];
                let last_index = if nz == 1 { j + local_y_start } else { k };
                Sample {
                    index,
                    coords,
                    mirror: self.mirror_for(last_index, coords),
                }
            }
        }
    }

    /// Whether the sample at `index` also counts for its conjugate partner.
    pub fn is_doubled(&self, index: usize) -> bool {
        match (self.transform, self.decomposition) {
            (Transform::Complex, _) => false,
            (Transform::RealToComplex, Decomposition::Serial) => {
                self.halves(index % self.last_dim_stored())
            }
            (Transform::RealToComplex, Decomposition::Slab { local_y_start, .. }) => {
                let last_index = if self.grid.nz == 1 {
                    index / self.grid.nx + local_y_start
                } else {
                    index % self.local_nz()
                };
                self.halves(last_index)
            }
        }
    }

    #[inline]
    fn halves(&self, last_index: usize) -> bool {
        last_index != 0 && 2 * last_index != self.last_dim()
    }

    fn mirror_for(&self, last_index: usize, coords: [usize; 3]) -> Option<[usize; 3]> {
        self.halves(last_index).then(|| self.mirror_coords(coords))
    }

    /// Coordinates of the point `-r` on the periodic grid.
    pub fn mirror_coords(&self, coords: [usize; 3]) -> [usize; 3] {
        let dims = self.grid.dims();
        let mut out = [0; 3];
        for axis in 0..3 {
            out[axis] = if coords[axis] == 0 {
                0
            } else {
                dims[axis] - coords[axis]
            };
        }
        out
    }

    pub fn samples(&self) -> Samples<'_> {
        Samples {
            layout: self,
            next: 0,
            len: self.len(),
        }
    }
}

pub struct Samples<'a> {
    layout: &'a FieldLayout,
    next: usize,
    len: usize,
}

impl Iterator for Samples<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        if self.next >= self.len {
            return None;
        }
        let sample = self.layout.sample(self.next);
        self.next += 1;
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Samples<'_> {}
