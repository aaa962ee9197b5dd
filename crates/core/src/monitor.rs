//! Convergence bookkeeping for the outer optimization loop.

use log::{debug, info};

/// Default longest oscillation period searched for.
pub const DEFAULT_MAX_WINDOW: usize = 5;

/// Relax the stopping statistic when the objective has settled into a cycle.
///
/// `objectives[..=irun]` is the history. Windows `j = 1..=min((irun+1)/2,
/// max_window)` are tried in turn; a window whose mean relative change
/// `|obj[i] - obj[i-j]| / |obj[i]|` over the last `j` entries is at most `tol`
/// ends the search and the statistic becomes `tol / 10`. Otherwise `usum` is
/// returned unchanged.
pub fn detect_fluctuation(
    objectives: &[f64],
    irun: usize,
    max_window: usize,
    usum: f64,
    tol: f64,
) -> f64 {
    assert!(irun < objectives.len(), "history shorter than iteration index");
    let backshift = ((irun + 1) / 2).min(max_window);
    for j in 1..=backshift {
        let errsum: f64 = (0..j)
            .map(|i| {
                let current = objectives[irun - i];
                ((current - objectives[irun - i - j]) / current).abs()
            })
            .sum();
        debug!("[opt] window {j}: errsum = {errsum:+.6e}, usum = {usum:+.6e}");
        if errsum / j as f64 <= tol {
            info!("[opt] fluctuation in gap detected with period {j}");
            return tol / 10.0;
        }
    }
    usum
}

/// Objective and gap histories of one run.
///
/// Iterations whose solve produced no objective are recorded as NaN, which
/// never satisfies the fluctuation test.
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    tol: f64,
    max_window: usize,
    objectives: Vec<f64>,
    gaps: Vec<f64>,
}

impl ConvergenceMonitor {
    pub fn new(tol: f64, max_window: usize, max_runs: usize) -> Self {
        Self {
            tol,
            max_window,
            objectives: Vec::with_capacity(max_runs),
            gaps: Vec::with_capacity(max_runs),
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tol
    }

    pub fn record_gap(&mut self, gap: f64) {
        self.gaps.push(gap);
    }

    /// Record this iteration's objective and return the stopping statistic.
    pub fn record_objective(&mut self, objective: f64, usum: f64) -> f64 {
        self.objectives.push(objective);
        let irun = self.objectives.len() - 1;
        detect_fluctuation(&self.objectives, irun, self.max_window, usum, self.tol)
    }

    /// Record an iteration whose solve gave no usable objective.
    pub fn record_failure(&mut self) {
        self.objectives.push(f64::NAN);
    }

    /// Whether another iteration should run.
    pub fn should_continue(&self, irun: usize, max_runs: usize, usum: f64) -> bool {
        irun < max_runs && usum >= self.tol
    }

    pub fn objectives(&self) -> &[f64] {
        &self.objectives
    }

    pub fn gaps(&self) -> &[f64] {
        &self.gaps
    }
}
