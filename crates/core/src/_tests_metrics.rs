#![cfg(test)]

use std::fs;

use super::metrics::{MetricsConfig, MetricsEvent, MetricsRecorder};
use super::subspace::Subspace;

fn read_lines(path: &std::path::Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn disabled_config_builds_nothing() {
    let config = MetricsConfig::default();
    assert!(config.build_recorder().unwrap().is_none());
}

#[test]
fn enabled_config_needs_a_path() {
    let config = MetricsConfig {
        enabled: true,
        output: None,
    };
    let err = config.build_recorder().err().unwrap();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn events_are_tagged_and_sequenced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/metrics.jsonl");
    let recorder = MetricsRecorder::create(&path).unwrap();
    assert!(recorder.is_empty());

    recorder.emit(MetricsEvent::BlockAssembled {
        iteration: 0,
        k_index: 3,
        side: Subspace::Upper,
        columns: 7,
        dim: 4,
    });
    recorder.emit(MetricsEvent::SolverOutcome {
        iteration: 0,
        status: "optimal",
        dual_objective: None,
        duration_ms: 1.5,
    });
    assert_eq!(recorder.len(), 2);

    let lines = read_lines(recorder.path());
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["event"], "block_assembled");
    assert_eq!(lines[0]["side"], "upper");
    assert_eq!(lines[0]["seq"], 0);
    assert_eq!(lines[1]["event"], "solver_outcome");
    assert_eq!(lines[1]["seq"], 1);
    assert!(lines[1]["dual_objective"].is_null());
    assert!(lines[1]["timestamp_ms"].as_f64().unwrap() > 0.0);
}

#[test]
fn shared_recorder_keeps_lines_whole() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = MetricsRecorder::create(&dir.path().join("m.jsonl")).unwrap();
    std::thread::scope(|scope| {
        for group in 0..4 {
            let recorder = &recorder;
            scope.spawn(move || {
                for k in 0..25 {
                    recorder.emit(MetricsEvent::KPointSensitivity {
                        iteration: 0,
                        k_index: k,
                        group,
                        nl: 1,
                        nu: 2,
                        lambda_l: 0.5,
                        lambda_u: 0.75,
                        duration_ms: 0.0,
                    });
                }
            });
        }
    });
    let lines = read_lines(recorder.path());
    assert_eq!(lines.len(), 100);
    let mut seqs: Vec<u64> = lines.iter().map(|l| l["seq"].as_u64().unwrap()).collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (0..100).collect::<Vec<_>>());
}
