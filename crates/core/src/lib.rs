//! Core math and contracts for distributed band-gap optimization.
//!
//! The pieces here are process-local: field layouts and energies, the
//! material parametrization, adjoint sensitivities, the Hermitian block
//! embedding, subspace sizing, k-point partitioning and convergence
//! bookkeeping. Message passing and the conic solve live in other crates.

pub mod engine;
pub mod field;
pub mod grid;
pub mod layout;
pub mod material;
pub mod metrics;
pub mod monitor;
pub mod partition;
pub mod polarization;
pub mod reduce;
pub mod sensitivity;
pub mod subspace;
pub mod triplet;

#[cfg(test)]
mod _tests_field;
#[cfg(test)]
mod _tests_layout;
#[cfg(test)]
mod _tests_material;
#[cfg(test)]
mod _tests_metrics;
#[cfg(test)]
mod _tests_monitor;
#[cfg(test)]
mod _tests_partition;
#[cfg(test)]
mod _tests_subspace;
