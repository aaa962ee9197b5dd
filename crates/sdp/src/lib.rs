//! Semidefinite programs for the gap optimizer.
//!
//! [`SdpProblem`] describes a mixed linear/semidefinite program through a
//! task-style API (append variables, set bounds, register sparse symmetric
//! matrices, attach them to constraint slots). Any [`SdpSolver`] can consume
//! it; [`InteriorPointSolver`] is the bundled dense backend.

pub mod ipm;
pub mod problem;
pub mod solver;

pub use ipm::{InteriorPointSolver, IpmSettings};
pub use problem::{Bound, SdpError, SdpProblem, SparseSymMat};
pub use solver::{SdpSolution, SdpSolver, SolutionStatus};
