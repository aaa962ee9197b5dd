//! Conic problem description.
//!
//! The layout follows the task API of commercial conic solvers: scalar
//! variables with bounds, linear constraints with bounds, and positive
//! semidefinite "bar" variables whose coefficients are weighted sums of
//! sparse symmetric matrices registered once and referenced by index.
//!
//! ```text
//! min  c'x + sum_j <C_j, X_j> + c_fix
//! s.t. l_i <= a_i'x + sum_j <A_ij, X_j> <= u_i
//!      x within its bounds, X_j psd
//! ```
//!
//! Fresh variables are free, fresh constraints are fixed to zero.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bound on a scalar variable or a constraint row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Free,
    Lower(f64),
    Upper(f64),
    Fixed(f64),
}

/// Lower triangle of a symmetric matrix in triplet form.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseSymMat {
    dim: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl SparseSymMat {
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Dense symmetric matrix; repeated coordinates add up.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut m = DMatrix::zeros(self.dim, self.dim);
        self.add_scaled_to(1.0, &mut m);
        m
    }

    pub(crate) fn add_scaled_to(&self, weight: f64, out: &mut DMatrix<f64>) {
        for ((&r, &c), &v) in self.rows.iter().zip(&self.cols).zip(&self.values) {
            out[(r, c)] += weight * v;
            if r != c {
                out[(c, r)] += weight * v;
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Row {
    coeffs: BTreeMap<usize, f64>,
    bound: Bound,
}

impl Default for Row {
    fn default() -> Self {
        Self {
            coeffs: BTreeMap::new(),
            bound: Bound::Fixed(0.0),
        }
    }
}

/// Weighted reference to registered matrices.
pub(crate) type MatrixTerms = Vec<(usize, f64)>;

#[derive(Debug, Clone, Default)]
pub struct SdpProblem {
    c: Vec<f64>,
    c_fixed: f64,
    var_bounds: Vec<Bound>,
    rows: Vec<Row>,
    bar_dims: Vec<usize>,
    matrices: Vec<SparseSymMat>,
    bar_a: BTreeMap<(usize, usize), MatrixTerms>,
    bar_c: BTreeMap<usize, MatrixTerms>,
}

impl SdpProblem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(num_cons: usize, num_vars: usize) -> Self {
        let mut problem = Self::new();
        problem.append_cons(num_cons);
        problem.append_vars(num_vars);
        problem
    }

    pub fn append_cons(&mut self, count: usize) {
        self.rows.resize_with(self.rows.len() + count, Row::default);
    }

    pub fn append_vars(&mut self, count: usize) {
        let total = self.c.len() + count;
        self.c.resize(total, 0.0);
        self.var_bounds.resize(total, Bound::Free);
    }

    /// Append positive semidefinite variables; returns the index of the first.
    pub fn append_barvars(&mut self, dims: &[usize]) -> usize {
        let first = self.bar_dims.len();
        self.bar_dims.extend_from_slice(dims);
        first
    }

    pub fn num_cons(&self) -> usize {
        self.rows.len()
    }

    pub fn num_vars(&self) -> usize {
        self.c.len()
    }

    pub fn num_barvars(&self) -> usize {
        self.bar_dims.len()
    }

    pub fn bar_dim(&self, barvar: usize) -> Option<usize> {
        self.bar_dims.get(barvar).copied()
    }

    pub fn num_matrices(&self) -> usize {
        self.matrices.len()
    }

    fn check_con(&self, index: usize) -> Result<(), SdpError> {
        if index >= self.num_cons() {
            return Err(SdpError::ConstraintIndex {
                index,
                count: self.num_cons(),
            });
        }
        Ok(())
    }

    fn check_var(&self, index: usize) -> Result<(), SdpError> {
        if index >= self.num_vars() {
            return Err(SdpError::VariableIndex {
                index,
                count: self.num_vars(),
            });
        }
        Ok(())
    }

    pub fn put_c_j(&mut self, var: usize, value: f64) -> Result<(), SdpError> {
        self.check_var(var)?;
        self.c[var] = value;
        Ok(())
    }

    pub fn put_cfix(&mut self, value: f64) {
        self.c_fixed = value;
    }

    pub fn put_var_bound(&mut self, var: usize, bound: Bound) -> Result<(), SdpError> {
        self.check_var(var)?;
        self.var_bounds[var] = bound;
        Ok(())
    }

    pub fn put_con_bound(&mut self, con: usize, bound: Bound) -> Result<(), SdpError> {
        self.check_con(con)?;
        self.rows[con].bound = bound;
        Ok(())
    }

    /// Set (replace) the linear coefficient of `var` in row `con`.
    pub fn put_aij(&mut self, con: usize, var: usize, value: f64) -> Result<(), SdpError> {
        self.check_con(con)?;
        self.check_var(var)?;
        self.rows[con].coeffs.insert(var, value);
        Ok(())
    }

    /// Register a symmetric matrix given by its lower triangle.
    pub fn append_sparse_symmat(
        &mut self,
        dim: usize,
        rows: &[usize],
        cols: &[usize],
        values: &[f64],
    ) -> Result<usize, SdpError> {
        if rows.len() != values.len() || cols.len() != values.len() {
            return Err(SdpError::LengthMismatch {
                what: "triplet arrays",
                expected: values.len(),
                found: rows.len().max(cols.len()),
            });
        }
        for (&row, &col) in rows.iter().zip(cols) {
            if row >= dim || col > row {
                return Err(SdpError::MatrixEntry { row, col, dim });
            }
        }
        self.matrices.push(SparseSymMat {
            dim,
            rows: rows.to_vec(),
            cols: cols.to_vec(),
            values: values.to_vec(),
        });
        Ok(self.matrices.len() - 1)
    }

    fn check_terms(&self, barvar: usize, mats: &[usize], weights: &[f64]) -> Result<MatrixTerms, SdpError> {
        let dim = self.bar_dim(barvar).ok_or(SdpError::BarVariableIndex {
            index: barvar,
            count: self.num_barvars(),
        })?;
        if mats.len() != weights.len() {
            return Err(SdpError::LengthMismatch {
                what: "matrix weights",
                expected: mats.len(),
                found: weights.len(),
            });
        }
        for &m in mats {
            let matrix = self.matrices.get(m).ok_or(SdpError::MatrixIndex {
                index: m,
                count: self.matrices.len(),
            })?;
            if matrix.dim != dim {
                return Err(SdpError::DimensionMismatch {
                    barvar,
                    expected: dim,
                    found: matrix.dim,
                });
            }
        }
        Ok(mats.iter().copied().zip(weights.iter().copied()).collect())
    }

    /// Set (replace) the coefficient of bar variable `barvar` in row `con` to
    /// `sum_k weights[k] * matrix[mats[k]]`.
    pub fn put_bar_aij(
        &mut self,
        con: usize,
        barvar: usize,
        mats: &[usize],
        weights: &[f64],
    ) -> Result<(), SdpError> {
        self.check_con(con)?;
        let terms = self.check_terms(barvar, mats, weights)?;
        self.bar_a.insert((con, barvar), terms);
        Ok(())
    }

    /// Set (replace) the objective coefficient of bar variable `barvar`.
    pub fn put_barc_j(&mut self, barvar: usize, mats: &[usize], weights: &[f64]) -> Result<(), SdpError> {
        let terms = self.check_terms(barvar, mats, weights)?;
        self.bar_c.insert(barvar, terms);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Read access for backends
    // ------------------------------------------------------------------------

    pub fn c(&self) -> &[f64] {
        &self.c
    }

    pub fn c_fixed(&self) -> f64 {
        self.c_fixed
    }

    pub fn var_bound(&self, var: usize) -> Bound {
        self.var_bounds[var]
    }

    pub fn con_bound(&self, con: usize) -> Bound {
        self.rows[con].bound
    }

    /// Nonzero linear coefficients of row `con`, ordered by variable.
    pub fn row(&self, con: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.rows[con].coeffs.iter().map(|(&j, &v)| (j, v))
    }

    /// Dense coefficient of `barvar` in row `con`, if one was set.
    pub fn bar_a_dense(&self, con: usize, barvar: usize) -> Option<DMatrix<f64>> {
        self.bar_a.get(&(con, barvar)).map(|terms| self.combine(barvar, terms))
    }

    /// Rows holding a coefficient for `barvar`, ascending.
    pub fn bar_a_rows(&self, barvar: usize) -> Vec<usize> {
        self.bar_a
            .keys()
            .filter(|(_, j)| *j == barvar)
            .map(|(i, _)| *i)
            .collect()
    }

    pub fn bar_c_dense(&self, barvar: usize) -> DMatrix<f64> {
        match self.bar_c.get(&barvar) {
            Some(terms) => self.combine(barvar, terms),
            None => {
                let dim = self.bar_dims[barvar];
                DMatrix::zeros(dim, dim)
            }
        }
    }

    fn combine(&self, barvar: usize, terms: &[(usize, f64)]) -> DMatrix<f64> {
        let dim = self.bar_dims[barvar];
        let mut out = DMatrix::zeros(dim, dim);
        for &(m, w) in terms {
            self.matrices[m].add_scaled_to(w, &mut out);
        }
        out
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum SdpError {
    #[error("constraint index {index} out of range ({count} constraints)")]
    ConstraintIndex { index: usize, count: usize },

    #[error("variable index {index} out of range ({count} variables)")]
    VariableIndex { index: usize, count: usize },

    #[error("bar variable index {index} out of range ({count} bar variables)")]
    BarVariableIndex { index: usize, count: usize },

    #[error("matrix index {index} out of range ({count} matrices)")]
    MatrixIndex { index: usize, count: usize },

    #[error("entry ({row}, {col}) is not in the lower triangle of a {dim}x{dim} matrix")]
    MatrixEntry { row: usize, col: usize, dim: usize },

    #[error("bar variable {barvar} has dimension {expected}, matrix has {found}")]
    DimensionMismatch {
        barvar: usize,
        expected: usize,
        found: usize,
    },

    #[error("{what}: expected {expected} entries, found {found}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("constraint {index} is free; rows must be bounded")]
    FreeConstraint { index: usize },

    #[error("problem has no constraints")]
    NoConstraints,
}
