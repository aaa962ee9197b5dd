//! Backend contract and solution reporting.

use std::fmt;

use serde::Serialize;

use crate::problem::{SdpError, SdpProblem};

/// Termination status of a solve.
///
/// Only the first two carry a usable dual solution; the rest are expected
/// outcomes of a non-convex outer loop and are reported, not raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionStatus {
    Optimal,
    NearOptimal,
    PrimalInfeasibleCertificate,
    DualInfeasibleCertificate,
    Unknown,
}

impl SolutionStatus {
    pub fn has_solution(self) -> bool {
        matches!(self, SolutionStatus::Optimal | SolutionStatus::NearOptimal)
    }

    pub fn is_certificate(self) -> bool {
        matches!(
            self,
            SolutionStatus::PrimalInfeasibleCertificate | SolutionStatus::DualInfeasibleCertificate
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SolutionStatus::Optimal => "optimal",
            SolutionStatus::NearOptimal => "near_optimal",
            SolutionStatus::PrimalInfeasibleCertificate => "primal_infeasible",
            SolutionStatus::DualInfeasibleCertificate => "dual_infeasible",
            SolutionStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SdpSolution {
    pub status: SolutionStatus,
    /// Scalar primal variables in the caller's variable space.
    pub x: Vec<f64>,
    /// Constraint duals, one per row.
    pub y: Vec<f64>,
    pub primal_objective: f64,
    pub dual_objective: f64,
    pub iterations: usize,
}

/// A conic solver able to handle linear and semidefinite blocks.
pub trait SdpSolver {
    fn solve(&mut self, problem: &SdpProblem) -> Result<SdpSolution, SdpError>;
}

impl<S: SdpSolver + ?Sized> SdpSolver for Box<S> {
    fn solve(&mut self, problem: &SdpProblem) -> Result<SdpSolution, SdpError> {
        (**self).solve(problem)
    }
}
