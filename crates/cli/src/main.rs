use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use gapopt_driver::{run_job, IterationObserver, IterationReport, OptimizationConfig};

#[derive(Parser, Debug)]
#[command(name = "gapopt", about = "Maximize a photonic band gap by semidefinite programming")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: PathBuf,
    /// Override the number of outer iterations
    #[arg(long)]
    max_runs: Option<usize>,
    /// Override the number of k-point groups
    #[arg(long)]
    groups: Option<usize>,
    /// Write the final report as JSON
    #[arg(long)]
    summary: Option<PathBuf>,
    /// Only log warnings and hide the progress bar
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = if cli.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    info!("[cli] loading config {}", cli.config.display());
    let mut config = OptimizationConfig::from_file(&cli.config)?;
    if let Some(max_runs) = cli.max_runs {
        config.run.max_runs = max_runs;
    }
    if let Some(groups) = cli.groups {
        config.cluster.groups = groups;
    }

    let pb = if cli.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(config.run.max_runs as u64)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("█▓░"),
    );
    let progress = pb.clone();
    let observer: IterationObserver = Box::new(move |report: &IterationReport| {
        progress.set_message(format!("gap {:.6}", report.gap));
        progress.inc(1);
    });

    let report = run_job(&config, Some(observer))?;
    pb.finish_and_clear();

    let last_gap = report.gaps().last().copied().unwrap_or(f64::NAN);
    info!(
        "[cli] {} after {} iterations, final gap {:.6}",
        if report.converged { "converged" } else { "stopped" },
        report.iterations.len(),
        last_gap
    );
    if let Some(path) = &cli.summary {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &report)?;
        writeln!(writer)?;
        writer.flush()?;
        info!("[cli] wrote summary to {}", path.display());
    }
    Ok(())
}
