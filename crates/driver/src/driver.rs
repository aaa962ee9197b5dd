//! The outer optimization loop.
//!
//! Every rank runs the same loop:
//!
//! 1. **Build**: the coordinator starts a fresh problem holding the
//!    k-independent structure.
//! 2. **Sensitivity**: each group solves its k-points round by round, sizes
//!    the subspaces around the gap and computes their gradient tables; the
//!    tables are shipped to the coordinator after each round.
//! 3. **Solve**: the coordinator runs the SDP solver and, on an optimal or
//!    near-optimal outcome, takes the normalized dual as the new design.
//!    Infeasibility certificates and unknown outcomes keep the design.
//! 4. **Update**: the design and the stopping statistic are broadcast, the
//!    dielectric is regenerated and group 0 writes the iteration artifacts.
//! 5. **Check**: stop after `max_runs` iterations or once the statistic drops
//!    below the tolerance.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use gapopt_backend_cpu::PlaneWaveSolver;
use gapopt_core::engine::{EngineError, ModeSolver};
use gapopt_core::material::MaterialModel;
use gapopt_core::metrics::{MetricsEvent, MetricsRecorder};
use gapopt_core::monitor::ConvergenceMonitor;
use gapopt_core::partition::{KPartition, PartitionStrategy};
use gapopt_core::sensitivity::{DesignSensitivity, SensitivityContext, SensitivityError};
use gapopt_core::subspace::{GapBounds, Subspace, SubspaceSizes};
use gapopt_sdp::{InteriorPointSolver, SdpError, SdpProblem, SdpSolver, SolutionStatus};

use crate::artifacts::{ArtifactSink, FileArtifacts, NullArtifacts};
use crate::assembly::{AssemblyError, Assembler, KContribution};
use crate::config::{ConfigError, OptimizationConfig};
use crate::formulation::GapFormulation;
use crate::transport::{Communicator, LocalCluster, TransportError};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("SDP backend: {0}")]
    Sdp(#[from] SdpError),

    #[error(transparent)]
    Sensitivity(#[from] SensitivityError),

    #[error("mode solver: {0}")]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("the coordinator has no SDP solver")]
    MissingSdpSolver,

    #[error("no k-points to optimize over")]
    NoKPoints,

    #[error("gap bands must satisfy 1 <= band1 < band2 (got {band1}, {band2})")]
    InvalidGap { band1: usize, band2: usize },

    #[error("band {band} requested but the mode solver computes {num_bands}")]
    BandOutOfRange { band: usize, num_bands: usize },

    #[error("rank {rank} panicked")]
    RankPanicked { rank: usize },
}

impl OptimizeError {
    /// Whether this error only reports that some other rank failed first.
    pub fn is_secondary(&self) -> bool {
        let transport = match self {
            OptimizeError::Transport(err) => err,
            OptimizeError::Assembly(AssemblyError::Transport(err)) => err,
            OptimizeError::Sensitivity(SensitivityError::Reduce(err)) => {
                match err.cause::<TransportError>() {
                    Some(err) => err,
                    None => return false,
                }
            }
            _ => return false,
        };
        matches!(
            transport,
            TransportError::PeerLeft | TransportError::Disconnected { .. }
        )
    }
}

// ============================================================================
// Settings and reports
// ============================================================================

/// Loop parameters shared by every rank.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub k_points: Vec<[f64; 3]>,
    pub band1: usize,
    pub band2: usize,
    pub max_runs: usize,
    pub tolerance: f64,
    pub lower_tolerance: f64,
    pub upper_tolerance: f64,
    pub max_window: usize,
    pub partition: PartitionStrategy,
}

impl RunSettings {
    pub fn from_config(config: &OptimizationConfig) -> Self {
        Self {
            k_points: config.k_vectors(),
            band1: config.gap.band1,
            band2: config.gap.band2,
            max_runs: config.run.max_runs,
            tolerance: config.run.tolerance,
            lower_tolerance: config.run.lower_tolerance,
            upper_tolerance: config.run.upper_tolerance,
            max_window: config.run.max_fluctuation_window,
            partition: config.run.partition,
        }
    }
}

/// Outcome of one outer iteration, identical on every rank except `status`.
#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    /// 0-based iteration index.
    pub iteration: usize,
    /// Solver outcome, known on the coordinator only.
    pub status: Option<SolutionStatus>,
    pub lambda_l: f64,
    pub lambda_u: f64,
    /// Relative gap in squared frequency.
    pub gap: f64,
    /// Relative gap in frequency.
    pub freq_gap: f64,
    /// Dual objective, NaN when the solve gave no usable design.
    pub objective: f64,
    /// Mean absolute design change of this iteration.
    pub change_in_u: f64,
    /// Statistic compared against the tolerance, after fluctuation relaxation.
    pub stopping: f64,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub design: Vec<f64>,
    pub iterations: Vec<IterationReport>,
    /// Stopped on the tolerance rather than the iteration budget.
    pub converged: bool,
}

impl OptimizationReport {
    pub fn objectives(&self) -> Vec<f64> {
        self.iterations.iter().map(|r| r.objective).collect()
    }

    pub fn gaps(&self) -> Vec<f64> {
        self.iterations.iter().map(|r| r.gap).collect()
    }
}

pub type IterationObserver = Box<dyn FnMut(&IterationReport) + Send>;

/// Broadcast tail after the design: bounds, objective, change, statistic.
const PAYLOAD_TAIL: usize = 5;

// ============================================================================
// Optimizer
// ============================================================================

pub struct GapOptimizer<C, S, M> {
    comm: C,
    solver: S,
    material: M,
    settings: RunSettings,
    formulation: GapFormulation,
    partition: KPartition,
    sdp: Option<Box<dyn SdpSolver + Send>>,
    artifacts: Arc<dyn ArtifactSink>,
    metrics: Option<Arc<MetricsRecorder>>,
    observer: Option<IterationObserver>,
}

impl<C, S, M> GapOptimizer<C, S, M>
where
    C: Communicator,
    S: ModeSolver,
    M: MaterialModel,
{
    /// Check the run against the mode solver and set up the k-point partition.
    pub fn new(comm: C, solver: S, material: M, settings: RunSettings) -> Result<Self, OptimizeError> {
        if settings.k_points.is_empty() {
            return Err(OptimizeError::NoKPoints);
        }
        let (band1, band2) = (settings.band1, settings.band2);
        if band1 == 0 || band1 >= band2 {
            return Err(OptimizeError::InvalidGap { band1, band2 });
        }
        if band2 > solver.num_bands() {
            return Err(OptimizeError::BandOutOfRange {
                band: band2,
                num_bands: solver.num_bands(),
            });
        }
        let formulation = GapFormulation::new(material.ntot());
        let partition = KPartition::new(settings.k_points.len(), comm.groups(), settings.partition);
        Ok(Self {
            comm,
            solver,
            material,
            settings,
            formulation,
            partition,
            sdp: None,
            artifacts: Arc::new(NullArtifacts),
            metrics: None,
            observer: None,
        })
    }

    /// Conic backend used by the coordinator. Ignored elsewhere.
    pub fn with_sdp_solver(mut self, sdp: Box<dyn SdpSolver + Send>) -> Self {
        self.sdp = Some(sdp);
        self
    }

    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactSink>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Callback run after every iteration.
    pub fn with_observer(mut self, observer: IterationObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn material(&self) -> &M {
        &self.material
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    fn emit(&self, event: MetricsEvent<'_>) {
        if let Some(metrics) = &self.metrics {
            metrics.emit(event);
        }
    }

    fn apply_design(&mut self, u: &[f64]) {
        self.material.set_design(u);
        self.solver.update_dielectric(&self.material);
    }

    /// Run the loop to completion.
    pub fn run(&mut self) -> Result<OptimizationReport, OptimizeError> {
        let started = Instant::now();
        let coordinator = self.comm.is_coordinator();
        if coordinator && self.sdp.is_none() {
            return Err(OptimizeError::MissingSdpSolver);
        }
        let ntot = self.formulation.ntot();
        let RunSettings {
            max_runs,
            tolerance,
            max_window,
            ..
        } = self.settings;

        // everyone starts from the coordinator's design
        let mut u = self.material.design();
        self.comm.broadcast(&mut u)?;
        self.apply_design(&u);

        if coordinator {
            info!(
                "[opt] {} design variables, {} k-points over {} groups of {}, gap between bands {} and {}",
                ntot,
                self.settings.k_points.len(),
                self.comm.groups(),
                self.comm.group_size(),
                self.settings.band1,
                self.settings.band2
            );
            self.emit(MetricsEvent::OptimizationStart {
                ntot,
                k_points: self.settings.k_points.len(),
                groups: self.comm.groups(),
                band1: self.settings.band1,
                band2: self.settings.band2,
                max_runs,
                tol: tolerance,
            });
        }

        let mut monitor = ConvergenceMonitor::new(tolerance, max_window, max_runs);
        let mut stopping = ntot as f64;
        let mut iterations = Vec::new();
        let mut irun = 0;
        while monitor.should_continue(irun, max_runs, stopping) {
            let report = self.iterate(irun, &mut monitor, &mut u, stopping)?;
            stopping = report.stopping;
            if let Some(observer) = self.observer.as_mut() {
                observer(&report);
            }
            iterations.push(report);
            irun += 1;
        }

        let converged = stopping < tolerance;
        if coordinator {
            info!(
                "[opt] finished after {irun} iterations ({}), {:.2}s",
                if converged { "converged" } else { "iteration budget spent" },
                started.elapsed().as_secs_f64()
            );
            self.emit(MetricsEvent::OptimizationDone {
                iterations: irun,
                converged,
                duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            });
        }
        Ok(OptimizationReport {
            design: u,
            iterations,
            converged,
        })
    }

    fn iterate(
        &mut self,
        irun: usize,
        monitor: &mut ConvergenceMonitor,
        u: &mut Vec<f64>,
        stopping: f64,
    ) -> Result<IterationReport, OptimizeError> {
        let started = Instant::now();
        let ntot = self.formulation.ntot();
        let group = self.comm.group();

        let mut problem = if self.comm.is_coordinator() {
            Some(self.formulation.structural()?)
        } else {
            None
        };

        let deps = DesignSensitivity::compute(self.solver.layout(), &self.material);
        let mut assembler = Assembler::new(self.formulation);
        let mut bounds = GapBounds::default();
        for round in 0..self.partition.rounds() {
            let local = match self.partition.k_in_round(group, round) {
                Some(k) => Some(self.sensitivity_at(irun, k, &deps, u, &mut bounds)?),
                None => None,
            };
            assembler.exchange(&self.comm, problem.as_mut(), local.as_ref(), &mut bounds)?;
        }

        let mut payload = vec![0.0; ntot + PAYLOAD_TAIL];
        let mut status = None;
        if let Some(problem) = problem {
            for (&k, vars) in assembler.barvars() {
                for side in Subspace::BOTH {
                    self.emit(MetricsEvent::BlockAssembled {
                        iteration: irun,
                        k_index: k,
                        side,
                        columns: self.formulation.rows(),
                        dim: problem.bar_dim(vars.get(side)).unwrap_or(0),
                    });
                }
            }
            let outcome = self.solve(irun, &problem, u, bounds, monitor, stopping)?;
            status = Some(outcome.status);
            payload[..ntot].copy_from_slice(&outcome.design);
            payload[ntot..].copy_from_slice(&[
                bounds.lambda_l,
                bounds.lambda_u,
                outcome.objective,
                outcome.change,
                outcome.stopping,
            ]);
        }

        self.comm.broadcast(&mut payload)?;
        u.copy_from_slice(&payload[..ntot]);
        let bounds = GapBounds {
            lambda_l: payload[ntot],
            lambda_u: payload[ntot + 1],
        };
        let (objective, change, stopping) = (payload[ntot + 2], payload[ntot + 3], payload[ntot + 4]);
        self.apply_design(u);

        if group == 0 && self.comm.is_leader() {
            let epsilon = self.solver.epsilon_grid();
            self.artifacts
                .write_epsilon(irun + 1, self.solver.layout().grid(), &epsilon)?;
            self.artifacts.write_grid(irun + 1, &self.material)?;
        }

        let report = IterationReport {
            iteration: irun,
            status,
            lambda_l: bounds.lambda_l,
            lambda_u: bounds.lambda_u,
            gap: bounds.eigen_gap(),
            freq_gap: bounds.freq_gap(),
            objective,
            change_in_u: change,
            stopping,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        if self.comm.is_coordinator() {
            info!(
                "[opt] iteration {:>3}: gap = {:.6} (frequency {:.6}), objective = {:+.6e}, change in u = {:.3e}",
                irun + 1,
                report.gap,
                report.freq_gap,
                report.objective,
                report.change_in_u
            );
            self.emit(MetricsEvent::IterationDone {
                iteration: irun,
                gap: report.gap,
                freq_gap: report.freq_gap,
                change_in_u: report.change_in_u,
                duration_ms: report.duration_ms,
            });
        }
        Ok(report)
    }

    /// Solve at k-point `k` and build both gradient tables. Every rank of the
    /// owning group takes part.
    fn sensitivity_at(
        &mut self,
        irun: usize,
        k: usize,
        deps: &DesignSensitivity,
        u: &[f64],
        bounds: &mut GapBounds,
    ) -> Result<KContribution, OptimizeError> {
        let started = Instant::now();
        let RunSettings {
            band1,
            band2,
            lower_tolerance,
            upper_tolerance,
            ..
        } = self.settings;

        self.solver.randomize_fields();
        let freqs = self.solver.solve_kpoint(self.settings.k_points[k])?;
        if freqs.len() < band2 {
            return Err(OptimizeError::BandOutOfRange {
                band: band2,
                num_bands: freqs.len(),
            });
        }
        let lambdas: Vec<f64> = freqs.iter().map(|w| w * w).collect();
        let sizes = SubspaceSizes::from_spectrum(&lambdas, band1, band2, lower_tolerance, upper_tolerance);
        let local = GapBounds::from_spectrum(&lambdas, band1, band2);
        bounds.merge(local);

        let ctx = SensitivityContext::new(&self.solver, &self.comm, deps, u)?;
        let lower = ctx.subspace(&sizes, Subspace::Lower)?;
        let upper = ctx.subspace(&sizes, Subspace::Upper)?;

        if self.comm.is_leader() {
            debug!(
                "[kpoint] group {} k {}: nl = {}, nu = {}, lambda = [{:.6}, {:.6}]",
                self.comm.group(),
                k,
                sizes.nl,
                sizes.nu,
                local.lambda_l,
                local.lambda_u
            );
            self.emit(MetricsEvent::KPointSensitivity {
                iteration: irun,
                k_index: k,
                group: self.comm.group(),
                nl: sizes.nl,
                nu: sizes.nu,
                lambda_l: local.lambda_l,
                lambda_u: local.lambda_u,
                duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            });
        }
        Ok(KContribution {
            k,
            sizes,
            lower,
            upper,
        })
    }

    fn solve(
        &mut self,
        irun: usize,
        problem: &SdpProblem,
        u: &[f64],
        bounds: GapBounds,
        monitor: &mut ConvergenceMonitor,
        stopping: f64,
    ) -> Result<SolveOutcome, OptimizeError> {
        let started = Instant::now();
        let sdp = self.sdp.as_mut().ok_or(OptimizeError::MissingSdpSolver)?;
        let solution = sdp.solve(problem)?;
        let status = solution.status;
        monitor.record_gap(bounds.eigen_gap());

        let design = if status.has_solution() {
            self.formulation.design_from_dual(&solution.y)
        } else {
            None
        };
        let outcome = match design {
            Some(design) => {
                let change = u
                    .iter()
                    .zip(&design)
                    .map(|(a, b)| (a - b).abs())
                    .sum::<f64>()
                    / u.len().max(1) as f64;
                let objective = solution.dual_objective;
                let stopping = monitor.record_objective(objective, change);
                SolveOutcome {
                    status,
                    design,
                    objective,
                    change,
                    stopping,
                }
            }
            None => {
                if status.has_solution() {
                    warn!("[sdp] iteration {}: dual solution cannot be normalized; keeping the design", irun + 1);
                } else if status.is_certificate() {
                    warn!("[sdp] iteration {}: {status} certificate; keeping the design", irun + 1);
                } else {
                    warn!("[sdp] iteration {}: solver status {status}; keeping the design", irun + 1);
                }
                monitor.record_failure();
                SolveOutcome {
                    status,
                    design: u.to_vec(),
                    objective: f64::NAN,
                    change: 0.0,
                    stopping,
                }
            }
        };

        self.emit(MetricsEvent::SolverOutcome {
            iteration: irun,
            status: status.as_str(),
            dual_objective: outcome.objective.is_finite().then_some(outcome.objective),
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        });
        debug!(
            "[sdp] iteration {}: {status} after {} interior-point steps",
            irun + 1,
            solution.iterations
        );
        Ok(outcome)
    }
}

struct SolveOutcome {
    status: SolutionStatus,
    design: Vec<f64>,
    objective: f64,
    change: f64,
    stopping: f64,
}

// ============================================================================
// Configured jobs
// ============================================================================

/// Run `config` on an in-process cluster, one thread per rank, and return the
/// coordinator's report.
///
/// `observer` is attached to the coordinator. When several ranks fail, the
/// first error that is not merely a consequence of another rank leaving is
/// returned.
pub fn run_job(
    config: &OptimizationConfig,
    observer: Option<IterationObserver>,
) -> Result<OptimizationReport, OptimizeError> {
    config.validate()?;
    let settings = RunSettings::from_config(config);
    let grid = config.grid.to_grid();
    let artifacts: Arc<dyn ArtifactSink> = match &config.output.directory {
        Some(dir) => Arc::new(FileArtifacts::new(dir, config.output.prefix.clone())?),
        None => Arc::new(NullArtifacts),
    };
    let metrics = config.metrics.build_recorder()?.map(Arc::new);
    let observer = Mutex::new(observer);
    let cluster = config.cluster;

    let results = LocalCluster::run(cluster.groups, cluster.ranks_per_group, |comm| {
        let material = config.material.build(&grid);
        let solver = PlaneWaveSolver::with_slab(
            grid,
            config.engine.polarization,
            config.engine.num_bands,
            &material,
            comm.local_rank(),
            comm.group_size(),
        );
        let coordinator = comm.is_coordinator();
        let mut optimizer = GapOptimizer::new(comm, solver, material, settings.clone())?
            .with_artifacts(Arc::clone(&artifacts));
        if let Some(metrics) = &metrics {
            optimizer = optimizer.with_metrics(Arc::clone(metrics));
        }
        if coordinator {
            optimizer = optimizer.with_sdp_solver(Box::new(InteriorPointSolver::new(config.solver.clone())));
            if let Some(observer) = observer.lock().take() {
                optimizer = optimizer.with_observer(observer);
            }
        }
        optimizer.run()
    });

    let mut report = None;
    let mut errors = Vec::new();
    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(Ok(r)) if rank == 0 => report = Some(r),
            Ok(Ok(_)) => {}
            Ok(Err(err)) => errors.push(err),
            Err(_) => errors.push(OptimizeError::RankPanicked { rank }),
        }
    }
    if !errors.is_empty() {
        let index = errors.iter().position(|e| !e.is_secondary()).unwrap_or(0);
        return Err(errors.swap_remove(index));
    }
    report.ok_or(OptimizeError::RankPanicked { rank: 0 })
}

// ============================================================================
// Tests
// ============================================================================
