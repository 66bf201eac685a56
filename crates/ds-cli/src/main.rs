//! DiffSigma CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ds_core::{AnalysisConfig, DdCutoffMode, FoldingMode};
use ds_inference::model::{ProcessModel, SimEvent};
use ds_inference::pipeline::{self, DataSource};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

mod demo;
mod report;

#[derive(Parser)]
#[command(name = "diffsigma")]
#[command(about = "DiffSigma - combinatorial diffractive cross-section extraction")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the extraction on measured rate vectors and a simulated model
    Fit {
        /// Analysis spec (JSON): config, data vectors, simulated events
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for CSV/JSON outputs
        #[arg(short, long, default_value = "out")]
        output_dir: PathBuf,

        /// Base RNG seed for bootstrap replicas
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Threads (0 = auto)
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Run the synthetic closure demo
    Demo {
        /// Directory for CSV/JSON outputs
        #[arg(short, long, default_value = "out-demo")]
        output_dir: PathBuf,

        /// Number of simulated model events
        #[arg(long, default_value = "200000")]
        mc_events: usize,

        /// Pseudo-data scale relative to the simulated sample
        #[arg(long, default_value = "5.0")]
        data_scale: f64,

        /// Number of bootstrap replicas
        #[arg(long, default_value = "100")]
        bootstrap: usize,

        /// Base RNG seed
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Threads (0 = auto)
        #[arg(long, default_value = "0")]
        threads: usize,
    },
}

/// On-disk analysis specification.
#[derive(Deserialize)]
struct AnalysisSpec {
    #[serde(default)]
    config: AnalysisConfig,
    data: DataSource,
    model: ModelSpec,
}

/// Simulated source description.
#[derive(Deserialize)]
struct ModelSpec {
    /// Combinatorial dimension (number of detector channels).
    dimension: usize,
    /// Flat simulated event records.
    events: Vec<SimEvent>,
    /// Double-diffractive cutoff convention.
    #[serde(default = "default_dd_mode")]
    dd_cutoff_mode: DdCutoffMode,
}

fn default_dd_mode() -> DdCutoffMode {
    DdCutoffMode::Product
}

fn init_threads(threads: usize) -> Result<()> {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("configuring the rayon thread pool")?;
    }
    Ok(())
}

fn run_fit(input: &PathBuf, output_dir: &PathBuf, seed: u64) -> Result<()> {
    tracing::info!(path = %input.display(), "loading analysis spec");
    let spec: AnalysisSpec = serde_json::from_reader(
        std::fs::File::open(input).with_context(|| format!("opening {}", input.display()))?,
    )
    .context("parsing analysis spec")?;
    spec.config.validate()?;

    let mut model = ProcessModel::new(
        spec.model.dimension,
        spec.model.events,
        spec.model.dd_cutoff_mode,
        spec.config.skip_central_diffraction,
        spec.config.folding_mode,
    )?;

    let cancel = AtomicBool::new(false);
    let report = pipeline::run(&spec.data, &mut model, &spec.config, seed, &cancel)?;
    print_report(&report);
    report::write_all(output_dir, &report)?;
    tracing::info!(dir = %output_dir.display(), "outputs written");
    Ok(())
}

fn run_demo(
    output_dir: &PathBuf,
    mc_events: usize,
    data_scale: f64,
    bootstrap: usize,
    seed: u64,
) -> Result<()> {
    let config = AnalysisConfig {
        n_bootstrap: bootstrap,
        scan_parameters: false,
        folding_mode: FoldingMode::Charged,
        ..Default::default()
    };
    let (mut model, data) = demo::demo_setup(mc_events, data_scale, seed, &config)?;

    let cancel = AtomicBool::new(false);
    let report = pipeline::run(&data, &mut model, &config, seed, &cancel)?;

    println!("true fractions:      {:?}", demo::DEMO_FRACTIONS);
    let visible = &report.levels[0].final_cross_sections;
    let total: f64 = visible.iter().map(|xs| xs.value).sum();
    let fitted: Vec<f64> = visible.iter().map(|xs| xs.value / total).collect();
    println!(
        "fitted visible shares: [{}]",
        fitted.iter().map(|v| format!("{v:.3}")).collect::<Vec<_>>().join(", ")
    );
    print_report(&report);
    report::write_all(output_dir, &report)?;
    tracing::info!(dir = %output_dir.display(), "outputs written");
    Ok(())
}

fn print_report(report: &pipeline::AnalysisReport) {
    println!(
        "sigma_vis = {:.2} +- {:.2} mb, sigma_fid(unf) = {:.2} mb, sigma_tot(unf) = {:.2} mb",
        report.visible.sigma_vis,
        report.visible.sigma_vis_error,
        report.sigma_fid_unfolded,
        report.sigma_tot_unfolded
    );
    if report.beam_gas_clamped_bins > 0 || report.pileup_clamped_bins > 0 {
        println!(
            "clamped bins: beam-gas {}, pileup {}",
            report.beam_gas_clamped_bins, report.pileup_clamped_bins
        );
    }
    if !report.unfold_within_bounds {
        println!("WARNING: central unfolding escaped its sanity band");
    }
    for scan in &report.levels {
        println!("-- extraction level {} --", scan.level.number());
        for xs in &scan.final_cross_sections {
            println!("  {}", xs.summary());
        }
        if let Some(ext) = &scan.extrapolation {
            println!(
                "  extrapolated total inelastic: {:.2} mb (objective {:.3e})",
                ext.best.sigma_total, ext.best.objective
            );
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Fit { input, output_dir, seed, threads } => {
            init_threads(threads)?;
            run_fit(&input, &output_dir, seed)
        }
        Commands::Demo { output_dir, mc_events, data_scale, bootstrap, seed, threads } => {
            init_threads(threads)?;
            run_demo(&output_dir, mc_events, data_scale, bootstrap, seed)
        }
    }
}
