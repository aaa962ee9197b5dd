//! Homogenized SDP whose dual carries the next design.
//!
//! With `ntot` design variables the program has `n = ntot + 3` rows and
//! `2 ntot + 4` scalar variables:
//!
//! ```text
//! min  x[2ntot+3]
//! row i < ntot : -x[2i] + x[2i+1]          + sum_k <A_i^k, X_k> = 0
//! row ntot     : sum_{j<=ntot} x[2j]        + sum_k <A_n^k, X_k> = 0
//! row ntot+1   : x[2ntot+1] + x[2ntot+3]    + sum_k <L^k, X_k>   = -2
//! row ntot+2   : x[2ntot+2] + x[2ntot+3]    + sum_k <U^k, X_k>   = 2
//! ```
//!
//! where every scalar variable except the last is bounded above by zero and
//! each k-point contributes one PSD variable per side of the gap. Row `j` of a
//! k-point's blocks is the embedded column `j` of its gradient tables. The
//! dual `y` maps back to the design as `u[j] = y[j] / y[ntot]`.

use gapopt_core::sensitivity::SubspaceGradients;
use gapopt_core::triplet::SymmetricTriplets;
use gapopt_sdp::{Bound, SdpError, SdpProblem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapFormulation {
    ntot: usize,
}

impl GapFormulation {
    pub fn new(ntot: usize) -> Self {
        Self { ntot }
    }

    pub fn ntot(&self) -> usize {
        self.ntot
    }

    /// Constraint rows, one per design-vector entry.
    pub fn rows(&self) -> usize {
        self.ntot + 3
    }

    pub fn scalar_vars(&self) -> usize {
        2 * self.ntot + 4
    }

    /// The free variable whose value is the objective.
    pub fn objective_var(&self) -> usize {
        2 * self.ntot + 3
    }

    /// Fresh problem holding the k-independent structure.
    pub fn structural(&self) -> Result<SdpProblem, SdpError> {
        let ntot = self.ntot;
        let mut problem = SdpProblem::with_size(self.rows(), self.scalar_vars());
        let theta = self.objective_var();

        problem.put_c_j(theta, 1.0)?;
        for var in 0..theta {
            problem.put_var_bound(var, Bound::Upper(0.0))?;
        }
        problem.put_var_bound(theta, Bound::Free)?;

        for con in 0..=ntot {
            problem.put_con_bound(con, Bound::Fixed(0.0))?;
        }
        problem.put_con_bound(ntot + 1, Bound::Fixed(-2.0))?;
        problem.put_con_bound(ntot + 2, Bound::Fixed(2.0))?;

        for i in 0..ntot {
            problem.put_aij(i, 2 * i, -1.0)?;
            problem.put_aij(i, 2 * i + 1, 1.0)?;
        }
        for j in 0..=ntot {
            problem.put_aij(ntot, 2 * j, 1.0)?;
        }
        problem.put_aij(ntot + 1, 2 * ntot + 1, 1.0)?;
        problem.put_aij(ntot + 2, 2 * ntot + 2, 1.0)?;
        problem.put_aij(ntot + 1, theta, 1.0)?;
        problem.put_aij(ntot + 2, theta, 1.0)?;
        Ok(problem)
    }

    /// Register `triplets` and attach it to `(row, barvar)` with weight 1.
    pub fn attach_block(
        &self,
        problem: &mut SdpProblem,
        row: usize,
        barvar: usize,
        triplets: &SymmetricTriplets,
    ) -> Result<(), SdpError> {
        let matrix = problem.append_sparse_symmat(
            triplets.dim,
            &triplets.rows,
            &triplets.cols,
            &triplets.values,
        )?;
        problem.put_bar_aij(row, barvar, &[matrix], &[1.0])
    }

    /// Attach every column of `table` to the rows of `barvar`.
    pub fn attach_table(
        &self,
        problem: &mut SdpProblem,
        barvar: usize,
        table: &SubspaceGradients,
    ) -> Result<(), SdpError> {
        if table.columns() != self.rows() {
            return Err(SdpError::LengthMismatch {
                what: "gradient table columns",
                expected: self.rows(),
                found: table.columns(),
            });
        }
        for column in 0..table.columns() {
            self.attach_block(problem, column, barvar, &table.triplets(column))?;
        }
        Ok(())
    }

    /// Design recovered from the dual solution, if the homogenizing entry is
    /// usable.
    pub fn design_from_dual(&self, y: &[f64]) -> Option<Vec<f64>> {
        let scale = *y.get(self.ntot)?;
        if scale == 0.0 || !scale.is_finite() {
            return None;
        }
        let u: Vec<f64> = y[..self.ntot].iter().map(|&v| v / scale).collect();
        u.iter().all(|v| v.is_finite()).then_some(u)
    }
}

// ============================================================================
// Tests
// ============================================================================
