//! CLI entry point for the sharp frame extractor
//!
//! Parses command line arguments, assembles the run configuration and prints
//! the run summary. Exit code 0 on success, 2 when some videos were degraded
//! or failed, 1 when every video failed or the run could not start.

use clap::Parser;
use sharp_frame_extractor::{
    expand_inputs, new_shared_metrics, run_metrics_server, run_startup_checks,
    spawn_metrics_updater, ExtractConfig, FfmpegDecoder, HostResources, ImageFrameWriter,
    JobStatus, ResourcePlan, RunReport, SamplingMode, Scheduler, Settings, TenengradScorer,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Settings file read from the working directory when --settings is not given
const DEFAULT_SETTINGS_FILE: &str = "sharp-frame-extractor.toml";

/// Sharp Frame Extractor - keep the sharpest frame of every block of a video
#[derive(Parser, Debug)]
#[command(name = "sharp-frame-extractor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video files, or directories to search for videos
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Base output directory (default: next to each video)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of frames to extract per video
    #[arg(short = 'n', long, conflicts_with = "every")]
    count: Option<u32>,

    /// Extract one frame every this many seconds
    #[arg(short, long)]
    every: Option<f64>,

    /// Videos processed concurrently (default: derived from CPU cores)
    #[arg(short, long)]
    jobs: Option<u32>,

    /// Scoring workers shared by all videos (default: derived from CPU cores)
    #[arg(short, long)]
    workers: Option<u32>,

    /// Memory for buffered frames in MiB (default: half of available memory)
    #[arg(long)]
    memory_limit_mb: Option<u64>,

    /// Settings file (TOML)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Serve live metrics as JSON on this address, e.g. 127.0.0.1:7878
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// Write the run report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Skip startup checks (ffmpeg/ffprobe availability and version)
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Log debug detail
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Log warnings and errors only
    #[arg(short, long)]
    quiet: bool,
}

fn install_tracing(args: &Args) {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else if args.quiet {
        LevelFilter::WARN
    } else {
        LevelFilter::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("Unable to initialize logging: {}", e);
    }
}

fn load_settings(args: &Args) -> Result<Settings, String> {
    let loaded = match &args.settings {
        Some(path) => Settings::load(path),
        None => Settings::load_or_default(DEFAULT_SETTINGS_FILE),
    };
    let mut settings = loaded.map_err(|e| e.to_string())?;

    // Command line beats environment and file
    if let Some(jobs) = args.jobs {
        settings.resources.jobs = jobs;
    }
    if let Some(workers) = args.workers {
        settings.resources.workers = workers;
    }
    if let Some(mb) = args.memory_limit_mb {
        settings.resources.memory_limit_mb = mb;
    }
    Ok(settings)
}

fn build_config(args: &Args, settings: &Settings) -> Result<ExtractConfig, String> {
    let mode = SamplingMode::from_options(args.count, args.every).map_err(|e| e.to_string())?;

    // Explicit zeros are errors, not "derive from host"
    for (name, value) in [
        ("jobs", args.jobs.map(u64::from)),
        ("workers", args.workers.map(u64::from)),
        ("memory-limit-mb", args.memory_limit_mb),
    ] {
        if value == Some(0) {
            return Err(format!("--{} must be > 0", name));
        }
    }

    let plan = ResourcePlan::derive(&settings.resources, &HostResources::detect());
    info!(
        jobs = plan.jobs,
        workers = plan.workers,
        memory_limit_bytes = plan.memory_limit_bytes,
        "resource plan"
    );

    let config = ExtractConfig {
        video_paths: expand_inputs(&args.inputs),
        output_base: args.output.clone(),
        mode,
        jobs: plan.jobs,
        workers: plan.workers,
        memory_limit_bytes: plan.memory_limit_bytes,
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn print_summary(report: &RunReport) {
    for job in &report.jobs {
        let status = match job.status {
            JobStatus::Completed => "completed",
            JobStatus::Degraded => "degraded",
            JobStatus::Failed => "failed",
        };
        println!(
            "{:<9} {} -> {} ({} of {} frames)",
            status,
            job.input_path.display(),
            job.output_dir.display(),
            job.written_blocks.len(),
            job.blocks_planned
        );
        for warning in &job.warnings {
            println!("          warning: {}", warning);
        }
        if let Some(error) = &job.error {
            println!("          error: {}", error);
        }
    }
    println!(
        "{:?}: {} files from {} videos in {:.1}s",
        report.outcome,
        report.files_written(),
        report.jobs.len(),
        report.elapsed_ms as f64 / 1000.0
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    install_tracing(&args);

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = match build_config(&args, &settings) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid arguments: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.skip_checks {
        warn!("skipping startup checks (--skip-checks enabled)");
    } else if let Err(e) = run_startup_checks() {
        eprintln!("Startup check failed: {}", e);
        return ExitCode::FAILURE;
    }

    let metrics = new_shared_metrics();
    let scheduler = Scheduler::new(
        config,
        Arc::new(FfmpegDecoder::new()),
        Arc::new(ImageFrameWriter::new(settings.output.image_format)),
        Arc::new(TenengradScorer::new(&settings.scoring)),
    )
    .with_metrics(metrics.clone());

    let ctx = scheduler.context();
    let updater = spawn_metrics_updater(
        metrics.clone(),
        ctx.budget.clone(),
        ctx.pool.clone(),
        Duration::from_secs(1),
    );
    let server = args.metrics_addr.map(|addr| {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(metrics, addr).await {
                warn!("metrics server stopped: {}", e);
            }
        })
    });

    let result = scheduler.run().await;

    updater.abort();
    if let Some(server) = server {
        server.abort();
    }
    scheduler.context().pool.shutdown();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Run aborted: {}", e);
            return ExitCode::FAILURE;
        }
    };

    print_summary(&report);

    if let Some(path) = &args.report {
        let written = serde_json::to_string_pretty(&report)
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(path, json).map_err(|e| e.to_string()));
        if let Err(e) = written {
            eprintln!("Failed to write report to {}: {}", path.display(), e);
        }
    }

    ExitCode::from(report.outcome.exit_code())
}
