//! Cross-group assembly of the global SDP on the coordinator.
//!
//! Work is done in rounds. In each round every group handles at most one
//! k-point; then groups `1..groups` take turns shipping their share to the
//! coordinator (a header, then one block per design-vector column and side),
//! each turn closed by a world barrier. Group 0's share is inserted directly.
//! Groups without a k-point in a round still send a header carrying their
//! bounds and still take every barrier.

use std::collections::BTreeMap;

use log::{debug, trace};
use thiserror::Error;

use gapopt_core::sensitivity::SubspaceGradients;
use gapopt_core::subspace::{GapBounds, Subspace, SubspaceSizes};
use gapopt_sdp::{SdpError, SdpProblem};

use crate::formulation::GapFormulation;
use crate::transport::{Communicator, Message, TransportError};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Sdp(#[from] SdpError),

    #[error("coordinator has no problem instance to assemble into")]
    MissingProblem,

    #[error("k-point {0} was assembled twice in one iteration")]
    DuplicateK(usize),
}

/// Everything a group computed at one k-point.
#[derive(Debug, Clone)]
pub struct KContribution {
    pub k: usize,
    pub sizes: SubspaceSizes,
    pub lower: SubspaceGradients,
    pub upper: SubspaceGradients,
}

impl KContribution {
    pub fn table(&self, side: Subspace) -> &SubspaceGradients {
        match side {
            Subspace::Lower => &self.lower,
            Subspace::Upper => &self.upper,
        }
    }
}

/// PSD variables the coordinator appended for one k-point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KBarVars {
    pub lower: usize,
    pub upper: usize,
}

impl KBarVars {
    pub fn get(&self, side: Subspace) -> usize {
        match side {
            Subspace::Lower => self.lower,
            Subspace::Upper => self.upper,
        }
    }
}

/// Per-iteration assembly state.
pub struct Assembler {
    formulation: GapFormulation,
    barvars: BTreeMap<usize, KBarVars>,
}

impl Assembler {
    pub fn new(formulation: GapFormulation) -> Self {
        Self {
            formulation,
            barvars: BTreeMap::new(),
        }
    }

    /// Bar variables by k-point, as appended so far.
    pub fn barvars(&self) -> &BTreeMap<usize, KBarVars> {
        &self.barvars
    }

    /// Run one round of the exchange.
    ///
    /// `local` is this group's contribution for the round, `bounds` the
    /// group's running gap bounds. On the coordinator `problem` must be set
    /// and `bounds` ends up folded over every group.
    pub fn exchange<C: Communicator>(
        &mut self,
        comm: &C,
        problem: Option<&mut SdpProblem>,
        local: Option<&KContribution>,
        bounds: &mut GapBounds,
    ) -> Result<(), AssemblyError> {
        if comm.is_coordinator() {
            let problem = problem.ok_or(AssemblyError::MissingProblem)?;
            if let Some(contribution) = local {
                self.insert_local(problem, contribution)?;
            }
            for group in 1..comm.groups() {
                self.receive_group(comm, problem, group, bounds)?;
                comm.barrier()?;
            }
        } else {
            for group in 1..comm.groups() {
                if group == comm.group() && comm.is_leader() {
                    transmit(comm, local, *bounds)?;
                }
                comm.barrier()?;
            }
        }
        Ok(())
    }

    fn append_k(
        &mut self,
        problem: &mut SdpProblem,
        k: usize,
        nl: usize,
        nu: usize,
    ) -> Result<KBarVars, AssemblyError> {
        if self.barvars.contains_key(&k) {
            return Err(AssemblyError::DuplicateK(k));
        }
        let first = problem.append_barvars(&[2 * nl, 2 * nu]);
        let vars = KBarVars {
            lower: first,
            upper: first + 1,
        };
        self.barvars.insert(k, vars);
        debug!("[comm] k {k}: bar variables {first} (2x{nl}) and {} (2x{nu})", first + 1);
        Ok(vars)
    }

    fn insert_local(
        &mut self,
        problem: &mut SdpProblem,
        contribution: &KContribution,
    ) -> Result<(), AssemblyError> {
        let vars = self.append_k(
            problem,
            contribution.k,
            contribution.sizes.nl,
            contribution.sizes.nu,
        )?;
        for side in Subspace::BOTH {
            self.formulation
                .attach_table(problem, vars.get(side), contribution.table(side))?;
        }
        Ok(())
    }

    fn receive_group<C: Communicator>(
        &mut self,
        comm: &C,
        problem: &mut SdpProblem,
        group: usize,
        bounds: &mut GapBounds,
    ) -> Result<(), AssemblyError> {
        let (k, nl, nu) = match comm.recv_from_group(group)? {
            Message::Header {
                k,
                nl,
                nu,
                bounds: remote,
            } => {
                bounds.merge(remote);
                (k, nl, nu)
            }
            other => {
                return Err(TransportError::UnexpectedMessage {
                    expected: format!("header from group {group}"),
                    found: other.tag(),
                }
                .into())
            }
        };
        let Some(k) = k else {
            trace!("[comm] group {group} idle this round");
            return Ok(());
        };

        let vars = self.append_k(problem, k, nl, nu)?;
        for side in Subspace::BOTH {
            for column in 0..self.formulation.rows() {
                match comm.recv_from_group(group)? {
                    Message::Block {
                        k: bk,
                        column: bc,
                        side: bs,
                        triplets,
                    } if bk == k && bc == column && bs == side => {
                        self.formulation
                            .attach_block(problem, column, vars.get(side), &triplets)?;
                    }
                    other => {
                        return Err(TransportError::UnexpectedMessage {
                            expected: format!("block(k={k}, column={column}, {side:?})"),
                            found: other.tag(),
                        }
                        .into())
                    }
                }
            }
        }
        Ok(())
    }
}

/// Ship one group's share of a round from its leader.
fn transmit<C: Communicator>(
    comm: &C,
    local: Option<&KContribution>,
    bounds: GapBounds,
) -> Result<(), TransportError> {
    let (k, nl, nu) = match local {
        Some(c) => (Some(c.k), c.sizes.nl, c.sizes.nu),
        None => (None, 0, 0),
    };
    comm.send_to_coordinator(Message::Header { k, nl, nu, bounds })?;
    let Some(contribution) = local else {
        return Ok(());
    };
    for side in Subspace::BOTH {
        let table = contribution.table(side);
        for column in 0..table.columns() {
            comm.send_to_coordinator(Message::Block {
                k: contribution.k,
                column,
                side,
                triplets: table.triplets(column),
            })?;
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
