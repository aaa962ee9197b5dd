//! JSON-lines event log for the optimization loop.
//!
//! One object per line, tagged by `event`, carrying a wall-clock
//! `timestamp_ms` and a per-recorder sequence number `seq`. The recorder is
//! shared between ranks; lines never interleave.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::subspace::Subspace;

/// `[metrics]` section of a job file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub output: Option<PathBuf>,
}

impl MetricsConfig {
    /// Open the log when enabled.
    pub fn build_recorder(&self) -> io::Result<Option<MetricsRecorder>> {
        if !self.enabled {
            return Ok(None);
        }
        match &self.output {
            Some(path) => MetricsRecorder::create(path).map(Some),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "metrics are enabled but no output path is set",
            )),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MetricsEvent<'a> {
    OptimizationStart {
        ntot: usize,
        k_points: usize,
        groups: usize,
        band1: usize,
        band2: usize,
        max_runs: usize,
        tol: f64,
    },
    KPointSensitivity {
        iteration: usize,
        k_index: usize,
        group: usize,
        nl: usize,
        nu: usize,
        lambda_l: f64,
        lambda_u: f64,
        duration_ms: f64,
    },
    BlockAssembled {
        iteration: usize,
        k_index: usize,
        side: Subspace,
        columns: usize,
        dim: usize,
    },
    SolverOutcome {
        iteration: usize,
        status: &'a str,
        dual_objective: Option<f64>,
        duration_ms: f64,
    },
    IterationDone {
        iteration: usize,
        gap: f64,
        freq_gap: f64,
        change_in_u: f64,
        duration_ms: f64,
    },
    OptimizationDone {
        iterations: usize,
        converged: bool,
        duration_ms: f64,
    },
}

#[derive(Serialize)]
struct Line<'a> {
    seq: u64,
    timestamp_ms: f64,
    #[serde(flatten)]
    event: MetricsEvent<'a>,
}

struct Log {
    writer: BufWriter<File>,
    next_seq: u64,
}

pub struct MetricsRecorder {
    path: PathBuf,
    log: Mutex<Log>,
}

impl MetricsRecorder {
    /// Truncate or create `path`, making parent directories as needed.
    pub fn create(path: &Path) -> io::Result<Self> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)?,
            _ => {}
        }
        Ok(Self {
            path: path.to_path_buf(),
            log: Mutex::new(Log {
                writer: BufWriter::new(File::create(path)?),
                next_seq: 0,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events written so far.
    pub fn len(&self) -> u64 {
        self.log.lock().next_seq
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `event`. Failures are logged and otherwise ignored.
    pub fn emit(&self, event: MetricsEvent<'_>) {
        if let Err(err) = self.append(event) {
            log::warn!("[metrics] dropping event for {}: {err}", self.path.display());
        }
    }

    fn append(&self, event: MetricsEvent<'_>) -> io::Result<()> {
        let mut log = self.log.lock();
        let line = Line {
            seq: log.next_seq,
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0.0, |d| d.as_secs_f64() * 1e3),
            event,
        };
        let mut text = serde_json::to_string(&line)?;
        text.push('\n');
        log.writer.write_all(text.as_bytes())?;
        log.writer.flush()?;
        log.next_seq += 1;
        Ok(())
    }
}
