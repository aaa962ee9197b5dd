//! Message passing between process groups.
//!
//! Ranks are numbered `group * ranks_per_group + local_rank`. Global rank 0
//! is the coordinator and also the leader of group 0. Group sums only involve
//! the ranks of one group; barriers and broadcasts span the whole world.
//! Point-to-point traffic only flows from a group leader to the coordinator.
//!
//! Sends are synchronous handshakes: a send returns once the coordinator has
//! taken the message.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, trace};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use gapopt_core::reduce::{ReduceError, Reducer};
use gapopt_core::subspace::{GapBounds, Subspace};
use gapopt_core::triplet::SymmetricTriplets;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rank {rank} is not the leader of its group and may not send")]
    NotLeader { rank: usize },

    #[error("rank {rank} is not the coordinator and may not receive")]
    NotCoordinator { rank: usize },

    #[error("no route from group {group} to the coordinator")]
    NoRoute { group: usize },

    #[error("peer of group {group} disconnected")]
    Disconnected { group: usize },

    #[error("a peer left the run")]
    PeerLeft,

    #[error("expected {expected}, received {found}")]
    UnexpectedMessage {
        expected: String,
        found: String,
    },

    #[error("broadcast of {found} values into a buffer of {expected}")]
    LengthMismatch { expected: usize, found: usize },
}

// ============================================================================
// Messages
// ============================================================================

/// Records a group leader ships to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Opens a group's share of a round. `k` is `None` when the group had no
    /// k-point in this round; the bounds are still folded.
    Header {
        k: Option<usize>,
        nl: usize,
        nu: usize,
        bounds: GapBounds,
    },
    /// Real symmetric block of design-vector column `column` on one side.
    Block {
        k: usize,
        column: usize,
        side: Subspace,
        triplets: SymmetricTriplets,
    },
}

impl Message {
    /// Short `(kind, k)` tag used in logs and protocol errors.
    pub fn tag(&self) -> String {
        match self {
            Message::Header { k: Some(k), .. } => format!("header(k={k})"),
            Message::Header { k: None, .. } => "header(idle)".to_string(),
            Message::Block { k, column, side, .. } => {
                format!("block(k={k}, column={column}, {side:?})")
            }
        }
    }
}

// ============================================================================
// Communicator
// ============================================================================

/// One process's view of the group-partitioned world.
///
/// As a [`Reducer`] a communicator sums over the ranks of its own group,
/// which are exactly the ranks sharing one field.
pub trait Communicator: Reducer {
    /// Global rank.
    fn rank(&self) -> usize;

    /// Number of ranks in the world.
    fn size(&self) -> usize;

    fn group(&self) -> usize;

    fn groups(&self) -> usize;

    /// Rank within the group.
    fn local_rank(&self) -> usize;

    fn group_size(&self) -> usize;

    fn is_coordinator(&self) -> bool {
        self.rank() == 0
    }

    fn is_leader(&self) -> bool {
        self.local_rank() == 0
    }

    /// Block until every rank of the world has arrived.
    fn barrier(&self) -> Result<(), TransportError>;

    /// Replace `values` on every rank with the coordinator's copy.
    fn broadcast(&self, values: &mut [f64]) -> Result<(), TransportError>;

    /// Hand `message` to the coordinator. Only group leaders outside group 0
    /// have a route.
    fn send_to_coordinator(&self, message: Message) -> Result<(), TransportError>;

    /// Next message from the leader of `group`. Coordinator only.
    fn recv_from_group(&self, group: usize) -> Result<Message, TransportError>;
}

// ============================================================================
// Single process
// ============================================================================

/// The trivial world: one group of one rank.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcess;

impl Reducer for SingleProcess {
    fn sum_in_place(&self, _values: &mut [f64]) -> Result<(), ReduceError> {
        Ok(())
    }
}

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn group(&self) -> usize {
        0
    }

    fn groups(&self) -> usize {
        1
    }

    fn local_rank(&self) -> usize {
        0
    }

    fn group_size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn broadcast(&self, _values: &mut [f64]) -> Result<(), TransportError> {
        Ok(())
    }

    fn send_to_coordinator(&self, _message: Message) -> Result<(), TransportError> {
        Err(TransportError::NoRoute { group: 0 })
    }

    fn recv_from_group(&self, group: usize) -> Result<Message, TransportError> {
        Err(TransportError::NoRoute { group })
    }
}

// ============================================================================
// In-process cluster
// ============================================================================

struct BarrierState {
    arrived: usize,
    generation: u64,
    aborted: bool,
}

/// Reusable barrier that can be torn down when a participant leaves.
struct AbortableBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl AbortableBarrier {
    fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                aborted: false,
            }),
            cvar: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.aborted {
            return Err(TransportError::PeerLeft);
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation += 1;
            self.cvar.notify_all();
            return Ok(());
        }
        while state.generation == generation && !state.aborted {
            self.cvar.wait(&mut state);
        }
        if state.generation == generation {
            Err(TransportError::PeerLeft)
        } else {
            Ok(())
        }
    }

    fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        self.cvar.notify_all();
    }
}

struct Shared {
    world: AbortableBarrier,
    group_barriers: Vec<AbortableBarrier>,
    group_sums: Vec<Mutex<Vec<f64>>>,
    broadcast: Mutex<Vec<f64>>,
}

impl Shared {
    /// Release everyone waiting on the world barrier or on `group`'s barrier.
    fn abort(&self, group: usize) {
        self.world.abort();
        self.group_barriers[group].abort();
    }
}

/// Endpoints of an in-process world of `groups x ranks_per_group` ranks, one
/// per thread.
pub struct LocalCluster;

impl LocalCluster {
    /// Build every endpoint, ordered by global rank.
    pub fn endpoints(groups: usize, ranks_per_group: usize) -> Vec<ClusterEndpoint> {
        assert!(groups > 0, "cluster needs at least one group");
        assert!(ranks_per_group > 0, "cluster needs at least one rank per group");
        let size = groups * ranks_per_group;
        let shared = Arc::new(Shared {
            world: AbortableBarrier::new(size),
            group_barriers: (0..groups)
                .map(|_| AbortableBarrier::new(ranks_per_group))
                .collect(),
            group_sums: (0..groups).map(|_| Mutex::new(Vec::new())).collect(),
            broadcast: Mutex::new(Vec::new()),
        });

        // rendezvous channel per non-coordinator group
        let mut outboxes: Vec<Option<Sender<Message>>> = vec![None];
        let mut inboxes: Vec<Option<Receiver<Message>>> = vec![None];
        for _ in 1..groups {
            let (tx, rx) = bounded(0);
            outboxes.push(Some(tx));
            inboxes.push(Some(rx));
        }

        let mut endpoints = Vec::with_capacity(size);
        for group in 0..groups {
            for local_rank in 0..ranks_per_group {
                let rank = group * ranks_per_group + local_rank;
                let outbox = if local_rank == 0 {
                    outboxes[group].take()
                } else {
                    None
                };
                let inboxes = if rank == 0 {
                    std::mem::take(&mut inboxes)
                } else {
                    Vec::new()
                };
                endpoints.push(ClusterEndpoint {
                    rank,
                    group,
                    local_rank,
                    groups,
                    ranks_per_group,
                    shared: Arc::clone(&shared),
                    outbox,
                    inboxes,
                });
            }
        }
        endpoints
    }

    /// Run `job` on every endpoint in its own thread and collect the results
    /// by rank.
    ///
    /// A dropped endpoint releases the world barrier and its group's barrier
    /// with [`TransportError::PeerLeft`], so a failing rank never leaves the
    /// others blocked. Every rank must therefore end on a world collective.
    pub fn run<T, F>(groups: usize, ranks_per_group: usize, job: F) -> Vec<thread::Result<T>>
    where
        T: Send,
        F: Fn(ClusterEndpoint) -> T + Sync,
    {
        let endpoints = Self::endpoints(groups, ranks_per_group);
        thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|endpoint| {
                    let job = &job;
                    scope.spawn(move || job(endpoint))
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        })
    }
}

/// One rank of a [`LocalCluster`].
pub struct ClusterEndpoint {
    rank: usize,
    group: usize,
    local_rank: usize,
    groups: usize,
    ranks_per_group: usize,
    shared: Arc<Shared>,
    outbox: Option<Sender<Message>>,
    inboxes: Vec<Option<Receiver<Message>>>,
}

impl ClusterEndpoint {
    fn group_barrier(&self) -> Result<(), TransportError> {
        self.shared.group_barriers[self.group].wait()
    }

    fn try_group_sum(&self, values: &mut [f64]) -> Result<(), TransportError> {
        let acc = &self.shared.group_sums[self.group];
        if self.local_rank == 0 {
            let mut acc = acc.lock();
            acc.clear();
            acc.resize(values.len(), 0.0);
        }
        self.group_barrier()?;
        {
            let mut acc = acc.lock();
            if acc.len() != values.len() {
                return Err(TransportError::LengthMismatch {
                    expected: values.len(),
                    found: acc.len(),
                });
            }
            for (a, v) in acc.iter_mut().zip(values.iter()) {
                *a += *v;
            }
        }
        self.group_barrier()?;
        values.copy_from_slice(&acc.lock());
        self.group_barrier()
    }
}

impl Drop for ClusterEndpoint {
    fn drop(&mut self) {
        self.shared.abort(self.group);
    }
}

impl Reducer for ClusterEndpoint {
    fn sum_in_place(&self, values: &mut [f64]) -> Result<(), ReduceError> {
        if self.ranks_per_group == 1 {
            return Ok(());
        }
        self.try_group_sum(values).map_err(|err| {
            debug!("[comm] rank {}: group sum abandoned: {err}", self.rank);
            ReduceError::new(err)
        })
    }
}

impl Communicator for ClusterEndpoint {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.groups * self.ranks_per_group
    }

    fn group(&self) -> usize {
        self.group
    }

    fn groups(&self) -> usize {
        self.groups
    }

    fn local_rank(&self) -> usize {
        self.local_rank
    }

    fn group_size(&self) -> usize {
        self.ranks_per_group
    }

    fn barrier(&self) -> Result<(), TransportError> {
        self.shared.world.wait()
    }

    fn broadcast(&self, values: &mut [f64]) -> Result<(), TransportError> {
        if self.rank == 0 {
            let mut slot = self.shared.broadcast.lock();
            slot.clear();
            slot.extend_from_slice(values);
        }
        self.barrier()?;
        if self.rank != 0 {
            let slot = self.shared.broadcast.lock();
            if slot.len() != values.len() {
                return Err(TransportError::LengthMismatch {
                    expected: values.len(),
                    found: slot.len(),
                });
            }
            values.copy_from_slice(&slot);
        }
        self.barrier()
    }

    fn send_to_coordinator(&self, message: Message) -> Result<(), TransportError> {
        if self.local_rank != 0 {
            return Err(TransportError::NotLeader { rank: self.rank });
        }
        let outbox = self
            .outbox
            .as_ref()
            .ok_or(TransportError::NoRoute { group: self.group })?;
        trace!("[comm] group {} -> coordinator: {}", self.group, message.tag());
        outbox
            .send(message)
            .map_err(|_| TransportError::Disconnected { group: self.group })
    }

    fn recv_from_group(&self, group: usize) -> Result<Message, TransportError> {
        if self.rank != 0 {
            return Err(TransportError::NotCoordinator { rank: self.rank });
        }
        let inbox = self
            .inboxes
            .get(group)
            .and_then(Option::as_ref)
            .ok_or(TransportError::NoRoute { group })?;
        let message = inbox
            .recv()
            .map_err(|_| TransportError::Disconnected { group })?;
        trace!("[comm] coordinator <- group {group}: {}", message.tag());
        Ok(message)
    }
}

// ============================================================================
// Tests
// ============================================================================
