//! Real symmetric embedding of Hermitian subspace blocks.
//!
//! A Hermitian `s x s` matrix `H = R + iI` is handed to a real semidefinite
//! cone as the `2s x 2s` block `-[[R, -I], [I, R]]`, stored as the lower
//! triangle in coordinate form. Inputs are the packed lower triangle of `H`,
//! row by row: `(0,0), (1,0), (1,1), (2,0), ...`.
//!
//! The coordinate list has four segments:
//!
//! | segment | entries | position | value |
//! |---|---|---|---|
//! | 0 | `s(s+1)/2` | `(r, c)` | `-Re H[r,c]` |
//! | 1 | `s(s+1)/2` | `(r+s, c+s)` | `-Re H[r,c]` |
//! | 2 | `s(s+1)/2` | `(r+s, c)` | `-Im H[r,c]` |
//! | 3 | `s(s-1)/2` | `(c+s, r)`, `c < r` | `+Im H[r,c]` |

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Length of a packed lower triangle of an `spdim x spdim` matrix.
#[inline]
pub const fn packed_len(spdim: usize) -> usize {
    spdim * (spdim + 1) / 2
}

/// Number of stored entries in the embedding of an `spdim` block.
#[inline]
pub const fn embedded_nnz(spdim: usize) -> usize {
    spdim * (2 * spdim + 1)
}

/// Lower-triangular coordinate form of a real symmetric matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymmetricTriplets {
    pub dim: usize,
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
    pub values: Vec<f64>,
}

impl SymmetricTriplets {
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Embed the packed Hermitian triangle `packed` of an `spdim` block.
    pub fn embed_hermitian(spdim: usize, packed: &[Complex64]) -> Self {
        let stride = packed_len(spdim);
        assert_eq!(packed.len(), stride, "packed triangle has the wrong length");
        let (rows, cols) = embedding_pattern(spdim);
        let mut values = vec![0.0; embedded_nnz(spdim)];
        let mut off_diag = 0;
        let mut count = 0;
        for r in 0..spdim {
            for c in 0..=r {
                let h = packed[count];
                values[count] = -h.re;
                values[count + stride] = -h.re;
                values[count + 2 * stride] = -h.im;
                if r != c {
                    values[off_diag + 3 * stride] = h.im;
                    off_diag += 1;
                }
                count += 1;
            }
        }
        Self {
            dim: 2 * spdim,
            rows,
            cols,
            values,
        }
    }

    /// Inverse of [`SymmetricTriplets::embed_hermitian`].
    pub fn unembed_hermitian(&self) -> Vec<Complex64> {
        assert!(self.dim % 2 == 0, "embedding dimension must be even");
        let spdim = self.dim / 2;
        let stride = packed_len(spdim);
        assert_eq!(self.values.len(), embedded_nnz(spdim), "unexpected entry count");
        (0..stride)
            .map(|count| Complex64::new(-self.values[count], -self.values[count + 2 * stride]))
            .collect()
    }

    /// Dense symmetric matrix, row-major.
    pub fn to_dense(&self) -> Vec<f64> {
        let n = self.dim;
        let mut dense = vec![0.0; n * n];
        for ((&r, &c), &v) in self.rows.iter().zip(&self.cols).zip(&self.values) {
            dense[r * n + c] = v;
            dense[c * n + r] = v;
        }
        dense
    }
}

/// Coordinates shared by every embedded block of dimension `spdim`.
pub fn embedding_pattern(spdim: usize) -> (Vec<usize>, Vec<usize>) {
    let stride = packed_len(spdim);
    let nnz = embedded_nnz(spdim);
    let mut rows = vec![0; nnz];
    let mut cols = vec![0; nnz];
    let mut off_diag = 0;
    let mut count = 0;
    for r in 0..spdim {
        for c in 0..=r {
            rows[count] = r;
            cols[count] = c;
            rows[count + stride] = r + spdim;
            cols[count + stride] = c + spdim;
            rows[count + 2 * stride] = r + spdim;
            cols[count + 2 * stride] = c;
            if r != c {
                rows[off_diag + 3 * stride] = c + spdim;
                cols[off_diag + 3 * stride] = r;
                off_diag += 1;
            }
            count += 1;
        }
    }
    (rows, cols)
}

/// Position of `(r, c)`, `c <= r`, in a packed lower triangle.
#[inline]
pub const fn packed_index(r: usize, c: usize) -> usize {
    r * (r + 1) / 2 + c
}
