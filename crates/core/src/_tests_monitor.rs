#![cfg(test)]

use approx::assert_relative_eq;
use proptest::prelude::*;

use super::monitor::{detect_fluctuation, ConvergenceMonitor, DEFAULT_MAX_WINDOW};

const TOL: f64 = 1e-3;

/// Feed `objectives` one by one; return the first iteration at which the
/// stopping statistic was forced below tolerance.
fn first_forced(objectives: &[f64], max_window: usize) -> Option<usize> {
    let mut monitor = ConvergenceMonitor::new(TOL, max_window, objectives.len());
    objectives.iter().enumerate().find_map(|(irun, &obj)| {
        let usum = monitor.record_objective(obj, 1.0);
        (usum < TOL).then_some(irun)
    })
}

#[test]
fn period_two_cycle_is_caught_by_the_fourth_iteration() {
    let objectives = [1.0, 2.0, 1.0, 2.0, 1.0, 2.0];
    assert_eq!(first_forced(&objectives, DEFAULT_MAX_WINDOW), Some(3));
}

#[test]
fn settled_objective_is_caught_immediately_after_two_iterations() {
    let objectives = [5.0, 5.0, 5.0];
    assert_eq!(first_forced(&objectives, DEFAULT_MAX_WINDOW), Some(1));
}

#[test]
fn forced_statistic_is_a_tenth_of_tolerance() {
    let objectives = [3.0, 3.0];
    let usum = detect_fluctuation(&objectives, 1, DEFAULT_MAX_WINDOW, 0.7, TOL);
    assert_relative_eq!(usum, TOL / 10.0);
}

#[test]
fn first_iteration_never_has_a_window() {
    let usum = detect_fluctuation(&[1.0], 0, DEFAULT_MAX_WINDOW, 0.42, TOL);
    assert_relative_eq!(usum, 0.42);
}

#[test]
fn window_is_capped_by_max_window() {
    // Period 3 would be found at irun = 5 with a window of 3, but not with 2.
    let objectives = [1.0, 2.0, 4.0, 1.0, 2.0, 4.0, 1.0, 2.0];
    assert_eq!(first_forced(&objectives, 2), None);
    assert_eq!(first_forced(&objectives, 3), Some(5));
}

#[test]
fn failed_iterations_never_trigger_detection() {
    let mut monitor = ConvergenceMonitor::new(TOL, DEFAULT_MAX_WINDOW, 4);
    monitor.record_failure();
    let usum = monitor.record_objective(2.0, 0.5);
    assert_relative_eq!(usum, 0.5);
    assert_eq!(monitor.objectives().len(), 2);
    assert!(monitor.objectives()[0].is_nan());
}

#[test]
fn should_continue_honors_budget_and_tolerance() {
    let monitor = ConvergenceMonitor::new(TOL, DEFAULT_MAX_WINDOW, 3);
    assert!(monitor.should_continue(0, 3, 1.0));
    assert!(!monitor.should_continue(3, 3, 1.0));
    assert!(!monitor.should_continue(1, 3, TOL / 10.0));
}

proptest! {
    #[test]
    fn periodic_objectives_converge_by_twice_the_period(
        period in 1usize..=DEFAULT_MAX_WINDOW,
        base in prop::collection::vec(0.5f64..10.0, DEFAULT_MAX_WINDOW),
        cycles in 2usize..4,
    ) {
        let objectives: Vec<f64> = (0..period * cycles).map(|i| base[i % period]).collect();
        let hit = first_forced(&objectives, DEFAULT_MAX_WINDOW);
        prop_assert!(hit.is_some());
        prop_assert!(hit.unwrap_or(usize::MAX) < 2 * period);
    }

    #[test]
    fn steadily_decreasing_objectives_never_force_convergence(
        start in 10.0f64..100.0,
        ratio in 0.5f64..0.9,
        len in 2usize..12,
    ) {
        let objectives: Vec<f64> = (0..len).map(|i| start * ratio.powi(i as i32)).collect();
        prop_assert_eq!(first_forced(&objectives, DEFAULT_MAX_WINDOW), None);
    }
}
