//! steplog CLI

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use steplog::config::AnalysisConfig;
use steplog::distance::{frechet_distance, GaussianSummary};
use steplog::report::{self, validate_pairs, validate_runs, Report, RunFiles};

#[derive(Parser)]
#[command(name = "steplog")]
#[command(about = "steplog - analytics for sparse step-indexed training logs")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    /// Analysis config (JSON); flags below override individual fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output file for the report (pretty JSON). Defaults to stdout.
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Overrides {
    /// Metric key for training loss
    #[arg(long, global = true)]
    loss_key: Option<String>,

    /// Metric key for the mean absolute gradient
    #[arg(long, global = true)]
    grad_key: Option<String>,

    /// Metric key for the Hutchinson trace mean
    #[arg(long, global = true)]
    curv_key: Option<String>,

    /// Metric key for the Hutchinson trace std
    #[arg(long, global = true)]
    curv_std_key: Option<String>,

    /// Metric key for FID
    #[arg(long, global = true)]
    fid_key: Option<String>,

    /// Metric key for the mean sampled SNR
    #[arg(long, global = true)]
    snr_key: Option<String>,

    /// Moving-average window for curvature
    #[arg(long, global = true)]
    smooth_window: Option<usize>,

    /// Last step of the early-phase view
    #[arg(long, global = true)]
    early_max_step: Option<i64>,
}

#[derive(Args)]
struct RunsArgs {
    /// Log files, one per run (or loss/results pairs for paired commands)
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Run names, one per run
    #[arg(long, num_args = 1.., required = true)]
    names: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Loss and gradient norms against step
    GradStats(RunsArgs),
    /// Curvature diagnostics of one run
    Curvature {
        /// Training log
        path: PathBuf,
        /// Run name (default: file stem)
        #[arg(long)]
        name: Option<String>,
    },
    /// Smoothed curvature of several runs on one axis
    CurvatureOverlay(RunsArgs),
    /// Curvature at each FID milestone
    CurvatureVsFid(RunsArgs),
    /// Unweighted and weight-curve-weighted per-timestep loss
    EffectiveLoss(RunsArgs),
    /// Logged weight curves on a normalised timestep axis
    WeightCurves(RunsArgs),
    /// Last logged per-timestep loss profile
    PerTProfile(RunsArgs),
    /// Loss, FID, gradient and curvature against step (loss/results pairs)
    StepCurves(RunsArgs),
    /// FID against approximate wall time (loss/results pairs)
    WalltimeFid {
        #[command(flatten)]
        runs: RunsArgs,
        /// Report time in minutes instead of seconds
        #[arg(long)]
        minutes: bool,
    },
    /// Gradient norm and curvature against mean SNR, per record
    SnrGeometry(RunsArgs),
    /// Early-phase, weight-curve and sampled-timestep diagnostics of one run
    MinsnrDiagnostics {
        /// Training log
        path: PathBuf,
        /// Run name (default: file stem)
        #[arg(long)]
        name: Option<String>,
    },
    /// Fréchet distance between two reference-statistics files
    Fid {
        /// First statistics file ({"mu": [..], "sigma": [[..]]})
        a: PathBuf,
        /// Second statistics file
        b: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(cli.log_level).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    run(cli)
}

/// Dispatch a parsed command. Run arguments are validated before the config
/// or any log is read.
fn run(cli: Cli) -> Result<()> {
    let load = || load_config(cli.config.as_deref(), &cli.overrides);
    let out = cli.out.as_deref();

    match cli.command {
        Commands::GradStats(args) => {
            let runs = validate_runs(&args.paths, &args.names)?;
            finish(out, &report::grad_stats(&runs, &load()?))
        }
        Commands::Curvature { path, name } => {
            let run = single_run(path, name);
            finish(out, &report::curvature(&run, &load()?)?)
        }
        Commands::CurvatureOverlay(args) => {
            let runs = validate_runs(&args.paths, &args.names)?;
            finish(out, &report::curvature_overlay(&runs, &load()?))
        }
        Commands::CurvatureVsFid(args) => {
            let runs = validate_runs(&args.paths, &args.names)?;
            finish(out, &report::curvature_vs_fid(&runs, &load()?))
        }
        Commands::EffectiveLoss(args) => {
            let runs = validate_runs(&args.paths, &args.names)?;
            finish(out, &report::effective_loss(&runs, &load()?))
        }
        Commands::WeightCurves(args) => {
            let runs = validate_runs(&args.paths, &args.names)?;
            finish(out, &report::weight_curves(&runs, &load()?))
        }
        Commands::PerTProfile(args) => {
            let runs = validate_runs(&args.paths, &args.names)?;
            finish(out, &report::per_t_profile(&runs, &load()?))
        }
        Commands::StepCurves(args) => {
            let runs = validate_pairs(&args.paths, &args.names)?;
            finish(out, &report::step_curves(&runs, &load()?))
        }
        Commands::WalltimeFid { runs, minutes } => {
            let runs = validate_pairs(&runs.paths, &runs.names)?;
            finish(out, &report::walltime_fid(&runs, &load()?, minutes))
        }
        Commands::SnrGeometry(args) => {
            let runs = validate_runs(&args.paths, &args.names)?;
            finish(out, &report::snr_geometry(&runs, &load()?))
        }
        Commands::MinsnrDiagnostics { path, name } => {
            let run = single_run(path, name);
            finish(out, &report::minsnr_diagnostics(&run, &load()?)?)
        }
        Commands::Fid { a, b } => cmd_fid(&a, &b, out),
    }
}

fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<AnalysisConfig> {
    let mut config = match path {
        Some(path) => AnalysisConfig::load_json(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    let keys = &mut config.keys;
    if let Some(key) = &overrides.loss_key {
        keys.loss.clone_from(key);
    }
    if let Some(key) = &overrides.grad_key {
        keys.grad_abs_mean.clone_from(key);
    }
    if let Some(key) = &overrides.curv_key {
        keys.curvature_mean.clone_from(key);
    }
    if let Some(key) = &overrides.curv_std_key {
        keys.curvature_std.clone_from(key);
    }
    if let Some(key) = &overrides.fid_key {
        keys.fid.clone_from(key);
    }
    if let Some(key) = &overrides.snr_key {
        keys.snr_mean.clone_from(key);
    }
    if let Some(window) = overrides.smooth_window {
        config.smooth_window = window;
    }
    if let Some(step) = overrides.early_max_step {
        config.early_max_step = step;
    }
    Ok(config)
}

fn single_run(path: PathBuf, name: Option<String>) -> RunFiles {
    let name = name.unwrap_or_else(|| {
        path.file_stem()
            .map_or_else(|| "run".to_string(), |s| s.to_string_lossy().into_owned())
    });
    RunFiles::new(name, path)
}

fn finish<T: Serialize>(out: Option<&Path>, report: &Report<T>) -> Result<()> {
    write_json(out, report)?;
    if report.all_skipped() {
        bail!("{}: every run was skipped (see warnings above)", report.kind());
    }
    Ok(())
}

fn cmd_fid(a: &Path, b: &Path, out: Option<&Path>) -> Result<()> {
    let first = GaussianSummary::load_json(a).with_context(|| format!("reading {}", a.display()))?;
    let second = GaussianSummary::load_json(b).with_context(|| format!("reading {}", b.display()))?;
    let fid = frechet_distance(&first, &second)?;
    write_json(
        out,
        &serde_json::json!({
            "a": a.display().to_string(),
            "b": b.display().to_string(),
            "dim": first.dim(),
            "fid": fid,
        }),
    )
}

fn write_json<T: Serialize + ?Sized>(out: Option<&Path>, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    if let Some(path) = out {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote report");
    } else {
        println!("{text}");
    }
    Ok(())
}
