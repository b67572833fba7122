// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::Context;
use clap::{Parser, Subcommand};
use mwmr_config::PlatformManifest;
use mwmr_core::metrics::ChannelMetrics;
use mwmr_core::platform::{Platform, RunReport, StopReason};
use mwmr_core::snapshot::ControllerSnapshot;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

const EXIT_PASS: u8 = 0;
const EXIT_INCOMPLETE: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const RESULT_SCHEMA_VERSION: &str = "1.0";

#[derive(Parser, Debug)]
#[command(author, version, about = "MWMR channel simulator", long_about = None)]
struct Cli {
    /// Enable debug-level controller tracing
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a platform manifest until its workload completes or a limit is hit.
    Run(RunArgs),

    /// Parse and validate a platform manifest without running it.
    Validate(ValidateArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the platform manifest (YAML)
    #[arg(short, long)]
    platform: PathBuf,

    /// Override the manifest's tick limit
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Override the manifest's no-progress limit
    #[arg(long)]
    no_progress_ticks: Option<u64>,

    /// Write the final controller snapshot (JSON) to this path
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Print the run summary as a single JSON line on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct ValidateArgs {
    /// Path to the platform manifest (YAML)
    #[arg(short, long)]
    platform: PathBuf,
}

#[derive(Debug, Serialize)]
struct MetricsSummary {
    elections: u64,
    lock_retries: u64,
    bailouts: u64,
    not_running: u64,
    words_moved: u64,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    result_schema_version: &'static str,
    status: &'static str,
    platform: String,
    #[serde(flatten)]
    report: RunReport,
    metrics: MetricsSummary,
    controller: ControllerSnapshot,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so `--json` output stays machine readable.
    let level = if cli.trace {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Validate(args) => validate(args),
    }
}

fn load_manifest(path: &Path) -> anyhow::Result<PlatformManifest> {
    PlatformManifest::from_file(path)
        .with_context(|| format!("Invalid platform manifest {:?}", path))
}

fn validate(args: ValidateArgs) -> ExitCode {
    match load_manifest(&args.platform) {
        Ok(manifest) => {
            info!(
                "Manifest '{}' is valid: {} channels, {} tasks",
                manifest.name,
                manifest.channels.len(),
                manifest.workload.len()
            );
            ExitCode::from(EXIT_PASS)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn run(args: RunArgs) -> ExitCode {
    let manifest = match load_manifest(&args.platform) {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let mut platform = match Platform::from_manifest(&manifest) {
        Ok(platform) => platform,
        Err(e) => {
            error!("Failed to build platform: {:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let metrics = Arc::new(ChannelMetrics::new());
    platform.observers.push(metrics.clone());

    let max_ticks = args.max_ticks.unwrap_or(manifest.limits.max_ticks);
    let no_progress = args.no_progress_ticks.or(manifest.limits.no_progress_ticks);
    info!("Running '{}' for at most {} ticks", manifest.name, max_ticks);

    let report = match platform.run(max_ticks, no_progress) {
        Ok(report) => report,
        Err(e) => {
            error!("Simulation error after {} ticks: {}", platform.ticks(), e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };

    let snapshot = platform.controller.snapshot();
    if let Some(path) = &args.snapshot {
        write_snapshot(path, &snapshot);
    }

    for task in &report.tasks {
        info!(
            "Task '{}': {}/{} words, {} lock retries, {} blocked",
            task.name, task.progress, task.total, task.stats.lock_retries, task.stats.blocked
        );
    }
    info!(
        "Controller: {} elections, {} words moved, {:.0} words/s",
        metrics.get_elections(),
        metrics.get_words_moved(),
        metrics.get_throughput()
    );

    let passed = report.stop_reason == StopReason::WorkloadComplete;
    if args.json {
        let summary = RunSummary {
            result_schema_version: RESULT_SCHEMA_VERSION,
            status: if passed { "complete" } else { "incomplete" },
            platform: manifest.name.clone(),
            report,
            metrics: MetricsSummary {
                elections: metrics.get_elections(),
                lock_retries: metrics.get_lock_retries(),
                bailouts: metrics.get_bailouts(),
                not_running: metrics.get_not_running(),
                words_moved: metrics.get_words_moved(),
            },
            controller: snapshot,
        };
        match serde_json::to_string(&summary) {
            Ok(line) => println!("{}", line),
            Err(e) => {
                error!("Failed to serialize run summary: {}", e);
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        }
    }

    if passed {
        ExitCode::from(EXIT_PASS)
    } else {
        ExitCode::from(EXIT_INCOMPLETE)
    }
}

fn write_snapshot(path: &Path, snapshot: &ControllerSnapshot) {
    match std::fs::File::create(path) {
        Ok(f) => {
            if let Err(e) = serde_json::to_writer_pretty(f, snapshot) {
                error!("Failed to write snapshot {:?}: {}", path, e);
            }
        }
        Err(e) => error!("Failed to create snapshot {:?}: {}", path, e),
    }
}
