//! Per-iteration output: dielectric snapshots and material grids.
//!
//! - **File**: writes `{prefix}{iteration:04}-epsilon.csv` and
//!   `{prefix}{iteration:04}-grid.json` into an output directory.
//! - **Null**: discards everything (tests, benchmarking).

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;
use parking_lot::Mutex;

use gapopt_core::grid::Grid;
use gapopt_core::material::MaterialModel;

// ============================================================================
// Sink Trait
// ============================================================================

/// Destination for the artifacts of one optimization run.
///
/// `iteration` is 1-based, matching the file names.
pub trait ArtifactSink: Send + Sync {
    /// Dielectric function over the full grid, x fastest.
    fn write_epsilon(&self, iteration: usize, grid: &Grid, epsilon: &[f64]) -> io::Result<()>;

    /// Current material design.
    fn write_grid(&self, iteration: usize, material: &dyn MaterialModel) -> io::Result<()>;
}

// ============================================================================
// File Sink
// ============================================================================

pub struct FileArtifacts {
    directory: PathBuf,
    prefix: String,
    written: Mutex<Vec<PathBuf>>,
}

impl FileArtifacts {
    /// Sink writing into `directory`, created on demand.
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> io::Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            prefix: prefix.into(),
            written: Mutex::new(Vec::new()),
        })
    }

    pub fn path_for(&self, iteration: usize, suffix: &str) -> PathBuf {
        self.directory
            .join(format!("{}{:04}-{}", self.prefix, iteration, suffix))
    }

    /// Every file written so far, in order.
    pub fn written(&self) -> Vec<PathBuf> {
        self.written.lock().clone()
    }

    fn create(&self, path: &Path) -> io::Result<BufWriter<File>> {
        debug!("[design] writing {}", path.display());
        let file = File::create(path)?;
        self.written.lock().push(path.to_path_buf());
        Ok(BufWriter::new(file))
    }
}

impl ArtifactSink for FileArtifacts {
    fn write_epsilon(&self, iteration: usize, grid: &Grid, epsilon: &[f64]) -> io::Result<()> {
        let path = self.path_for(iteration, "epsilon.csv");
        let mut writer = self.create(&path)?;
        writeln!(writer, "ix,iy,iz,epsilon")?;
        for iz in 0..grid.nz {
            for iy in 0..grid.ny {
                for ix in 0..grid.nx {
                    let value = epsilon[grid.idx(ix, iy, iz)];
                    writeln!(writer, "{ix},{iy},{iz},{value:.10e}")?;
                }
            }
        }
        writer.flush()
    }

    fn write_grid(&self, iteration: usize, material: &dyn MaterialModel) -> io::Result<()> {
        let path = self.path_for(iteration, "grid.json");
        let mut writer = self.create(&path)?;
        material.save(&mut writer)?;
        writer.flush()
    }
}

// ============================================================================
// Null Sink
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct NullArtifacts;

impl ArtifactSink for NullArtifacts {
    fn write_epsilon(&self, _iteration: usize, _grid: &Grid, _epsilon: &[f64]) -> io::Result<()> {
        Ok(())
    }

    fn write_grid(&self, _iteration: usize, _material: &dyn MaterialModel) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
