//! Configuration for a gap optimization job.
//!
//! A job is a single TOML file:
//!
//! ```toml
//! k_points = [[0.0, 0.0], [0.5, 0.0], [0.5, 0.5]]
//!
//! [gap]
//! band1 = 1
//! band2 = 2
//!
//! [run]
//! max_runs = 20
//! tolerance = 1e-3
//! lower_tolerance = 0.01
//! upper_tolerance = 0.01
//!
//! [cluster]
//! groups = 3
//! ranks_per_group = 1
//!
//! [grid]
//! nx = 16
//! ny = 16
//!
//! [material]
//! cells = [4, 4, 1]
//! eps_min = 1.0
//! eps_max = 12.0
//!
//! [engine]
//! num_bands = 4
//! polarization = "TM"
//! ```
//!
//! `k_points` must come before the first `[section]` header, or TOML folds it
//! into that section. Each k-point lists one to three reciprocal-lattice
//! coordinates; missing trailing ones are zero.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gapopt_core::grid::Grid;
use gapopt_core::material::DensityGrid;
use gapopt_core::metrics::MetricsConfig;
use gapopt_core::monitor::DEFAULT_MAX_WINDOW;
use gapopt_core::partition::PartitionStrategy;
use gapopt_core::polarization::Polarization;
use gapopt_sdp::IpmSettings;

// ============================================================================
// Sections
// ============================================================================

/// Bands bracketing the gap (1-based, `band1 < band2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapConfig {
    pub band1: usize,
    pub band2: usize,
}

/// Outer loop controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Iteration budget.
    #[serde(default = "default_max_runs")]
    pub max_runs: usize,

    /// Stop once the mean design change drops below this.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Relative window below `band1` whose bands join the lower subspace.
    #[serde(default)]
    pub lower_tolerance: f64,

    /// Relative window above `band2` whose bands join the upper subspace.
    #[serde(default)]
    pub upper_tolerance: f64,

    /// Longest objective oscillation period looked for.
    #[serde(default = "default_max_window")]
    pub max_fluctuation_window: usize,

    /// How k-points are dealt out to groups.
    #[serde(default)]
    pub partition: PartitionStrategy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_runs: default_max_runs(),
            tolerance: default_tolerance(),
            lower_tolerance: 0.0,
            upper_tolerance: 0.0,
            max_fluctuation_window: default_max_window(),
            partition: PartitionStrategy::default(),
        }
    }
}

fn default_max_runs() -> usize {
    50
}

fn default_tolerance() -> f64 {
    1e-3
}

fn default_max_window() -> usize {
    DEFAULT_MAX_WINDOW
}

/// Process groups and the ranks sharing each group's field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_one")]
    pub groups: usize,
    #[serde(default = "default_one")]
    pub ranks_per_group: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            groups: 1,
            ranks_per_group: 1,
        }
    }
}

fn default_one() -> usize {
    1
}

/// Computational grid. Unset axes collapse to one sample of unit length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub nx: usize,
    #[serde(default = "default_one")]
    pub ny: usize,
    #[serde(default = "default_one")]
    pub nz: usize,
    #[serde(default = "default_length")]
    pub lx: f64,
    #[serde(default = "default_length")]
    pub ly: f64,
    #[serde(default = "default_length")]
    pub lz: f64,
}

fn default_length() -> f64 {
    1.0
}

impl GridConfig {
    pub fn to_grid(&self) -> Grid {
        Grid::new(self.nx, self.ny, self.nz, self.lx, self.ly, self.lz)
    }
}

/// Density cells and their dielectric range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialConfig {
    pub cells: [usize; 3],
    pub eps_min: f64,
    pub eps_max: f64,
    /// Starting density of every cell.
    #[serde(default = "default_initial")]
    pub initial: f64,
}

fn default_initial() -> f64 {
    0.5
}

impl MaterialConfig {
    pub fn build(&self, grid: &Grid) -> DensityGrid {
        DensityGrid::covering(grid, self.cells, self.eps_min, self.eps_max, self.initial)
    }

    pub fn ntot(&self) -> usize {
        self.cells.iter().product()
    }
}

/// Mode solver settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub num_bands: usize,
    #[serde(default)]
    pub polarization: Polarization,
}

/// Where per-iteration artifacts go. No directory means no artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: None,
            prefix: default_prefix(),
        }
    }
}

fn default_prefix() -> String {
    "gapopt-".to_string()
}

// ============================================================================
// Job
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub k_points: Vec<Vec<f64>>,
    pub gap: GapConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    pub grid: GridConfig,
    pub material: MaterialConfig,
    pub engine: EngineConfig,
    #[serde(default)]
    pub solver: IpmSettings,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl OptimizationConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let config: OptimizationConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// k-points padded to three coordinates.
    pub fn k_vectors(&self) -> Vec<[f64; 3]> {
        self.k_points
            .iter()
            .map(|k| {
                let mut v = [0.0; 3];
                v[..k.len()].copy_from_slice(k);
                v
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.k_points.is_empty() {
            return Err(ConfigError::InvalidKPoints("k_points must not be empty".into()));
        }
        if let Some(i) = self.k_points.iter().position(|k| k.is_empty() || k.len() > 3) {
            return Err(ConfigError::InvalidKPoints(format!(
                "k-point {i} must have one to three coordinates"
            )));
        }
        if self.k_points.iter().flatten().any(|c| !c.is_finite()) {
            return Err(ConfigError::InvalidKPoints("k-point coordinates must be finite".into()));
        }

        let GapConfig { band1, band2 } = self.gap;
        if band1 == 0 {
            return Err(ConfigError::InvalidBands("band1 is 1-based and must be >= 1".into()));
        }
        if band1 >= band2 {
            return Err(ConfigError::InvalidBands(format!(
                "band1 ({band1}) must be below band2 ({band2})"
            )));
        }
        if band2 > self.engine.num_bands {
            return Err(ConfigError::InvalidBands(format!(
                "band2 ({band2}) exceeds engine.num_bands ({})",
                self.engine.num_bands
            )));
        }

        let run = &self.run;
        if run.max_runs == 0 {
            return Err(ConfigError::InvalidRun("max_runs must be positive".into()));
        }
        for (name, value) in [
            ("tolerance", run.tolerance),
            ("lower_tolerance", run.lower_tolerance),
            ("upper_tolerance", run.upper_tolerance),
        ] {
            if !(value >= 0.0) {
                return Err(ConfigError::InvalidRun(format!("{name} must be non-negative")));
            }
        }

        if self.cluster.groups == 0 || self.cluster.ranks_per_group == 0 {
            return Err(ConfigError::InvalidCluster(
                "groups and ranks_per_group must be positive".into(),
            ));
        }

        let grid = &self.grid;
        if grid.nx == 0 || grid.ny == 0 || grid.nz == 0 {
            return Err(ConfigError::InvalidGrid("grid dimensions must be positive".into()));
        }
        if !(grid.lx > 0.0 && grid.ly > 0.0 && grid.lz > 0.0) {
            return Err(ConfigError::InvalidGrid("cell lengths must be positive".into()));
        }
        if grid.nz != 1 {
            return Err(ConfigError::InvalidGrid(
                "the plane-wave engine handles 1-D and 2-D cells only (nz = 1)".into(),
            ));
        }
        if self.cluster.ranks_per_group > grid.ny {
            return Err(ConfigError::InvalidCluster(format!(
                "cannot split {} rows across {} ranks",
                grid.ny, self.cluster.ranks_per_group
            )));
        }
        if self.engine.num_bands > grid.nx * grid.ny * grid.nz {
            return Err(ConfigError::InvalidBands(format!(
                "num_bands ({}) exceeds the number of grid points",
                self.engine.num_bands
            )));
        }

        let material = &self.material;
        if material.cells.iter().any(|&c| c == 0) {
            return Err(ConfigError::InvalidMaterial("cells must be positive".into()));
        }
        if !(material.eps_min > 0.0) {
            return Err(ConfigError::InvalidMaterial("eps_min must be positive".into()));
        }
        if !(material.eps_max >= material.eps_min) {
            return Err(ConfigError::InvalidMaterial("eps_max must be >= eps_min".into()));
        }
        if !(0.0..=1.0).contains(&material.initial) {
            return Err(ConfigError::InvalidMaterial("initial density must lie in [0, 1]".into()));
        }

        if self.solver.max_iterations == 0 || !(self.solver.tolerance > 0.0) {
            return Err(ConfigError::InvalidSolver(
                "max_iterations and tolerance must be positive".into(),
            ));
        }
        if !(self.solver.step_fraction > 0.0 && self.solver.step_fraction < 1.0) {
            return Err(ConfigError::InvalidSolver("step_fraction must lie in (0, 1)".into()));
        }

        if self.metrics.enabled && self.metrics.output.is_none() {
            return Err(ConfigError::InvalidOutput(
                "metrics.output must be set when metrics are enabled".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid k-points: {0}")]
    InvalidKPoints(String),

    #[error("Invalid gap bands: {0}")]
    InvalidBands(String),

    #[error("Invalid run settings: {0}")]
    InvalidRun(String),

    #[error("Invalid cluster layout: {0}")]
    InvalidCluster(String),

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Invalid material: {0}")]
    InvalidMaterial(String),

    #[error("Invalid solver settings: {0}")]
    InvalidSolver(String),

    #[error("Invalid output configuration: {0}")]
    InvalidOutput(String),
}

// ============================================================================
// Tests
// ============================================================================
