//! Gapopt Driver - distributed band-gap optimization over k-point groups.
//!
//! The driver maximizes the relative gap between two bands of a photonic
//! crystal by repeatedly linearizing the band edges in the material design and
//! solving a semidefinite program whose dual is the next design. It handles:
//!
//! - **Transport**: ranks grouped per k-point share, with group-local sums,
//!   world barriers and broadcasts, and leader-to-coordinator messages
//! - **Assembly**: shipping every group's gradient blocks to the coordinator,
//!   round by round, into one SDP
//! - **Formulation**: the homogenized program and the dual-to-design map
//! - **Outer loop**: iteration, convergence and fluctuation detection,
//!   per-iteration artifacts and metrics
//!
//! # Usage
//!
//! A job is described by a TOML file (see [`OptimizationConfig`]) and run
//! with [`run_job`], which starts one thread per rank. [`GapOptimizer`] can be
//! driven directly with any [`Communicator`], mode solver and material.

pub mod artifacts;
pub mod assembly;
pub mod config;
pub mod driver;
pub mod formulation;
pub mod transport;

pub use artifacts::{ArtifactSink, FileArtifacts, NullArtifacts};
pub use assembly::{AssemblyError, Assembler, KBarVars, KContribution};
pub use config::{ConfigError, OptimizationConfig};
pub use driver::{
    run_job, GapOptimizer, IterationObserver, IterationReport, OptimizationReport, OptimizeError,
    RunSettings,
};
pub use formulation::GapFormulation;
pub use transport::{ClusterEndpoint, Communicator, LocalCluster, Message, SingleProcess, TransportError};
