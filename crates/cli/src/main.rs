//! CLI entry point for the media conformer
//!
//! Analyses media files for anomalies and renders them to the configured
//! encode profiles. Results are printed to stdout as JSON; logs go to
//! stderr.

use clap::{Parser, Subcommand};
use media_conformer::{expand_inputs, AnalysisResult, Config, Conformer, RenderResult};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Media conformer - analyse and conform media files with ffmpeg
#[derive(Parser, Debug)]
#[command(name = "conformer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file; defaults are used when it is missing
    #[arg(short, long, default_value = "conformer.toml")]
    config: PathBuf,

    /// Skip startup checks (ffmpeg, ffprobe version)
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe files and detect field order, anomalies and loudness
    Analyze {
        /// Files or directories to analyse
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Analyse files, then render each one to every encode profile
    Render {
        /// Files or directories to render
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            error!(error = %e, "failed to serialize results");
            false
        }
    }
}

/// Analyses every input, logging failures; returns the successful results.
async fn analyze(conformer: &Conformer, inputs: &[PathBuf]) -> (Vec<AnalysisResult>, bool) {
    let mut all_ok = true;
    let mut analyses = Vec::new();
    for (input, result) in inputs.iter().zip(conformer.analyze_all(inputs).await) {
        match result {
            Ok(analysis) => analyses.push(analysis),
            Err(e) => {
                error!(input = %input.display(), error = %e, "analysis failed");
                all_ok = false;
            }
        }
    }
    (analyses, all_ok)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(config = %args.config.display(), error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let conformer = if args.skip_checks {
        warn!("skipping startup checks (--skip-checks enabled)");
        Conformer::new_without_checks(config)
    } else {
        match Conformer::new(config).await {
            Ok(conformer) => conformer,
            Err(e) => {
                error!(error = %e, "failed to initialize conformer");
                return ExitCode::FAILURE;
            }
        }
    };

    let mut progress = conformer.subscribe();
    let progress_task = tokio::spawn(async move {
        while let Some(report) = progress.recv().await {
            info!(
                kind = %report.kind,
                path = %report.path.display(),
                percent = report.progress * 100.0,
                "progress"
            );
        }
    });

    let paths = match &args.command {
        Command::Analyze { paths } | Command::Render { paths } => paths,
    };
    let inputs = expand_inputs(paths);
    if inputs.is_empty() {
        error!("no media files found in the given paths");
        return ExitCode::FAILURE;
    }
    info!(files = inputs.len(), "processing inputs");

    let (analyses, mut all_ok) = analyze(&conformer, &inputs).await;

    let printed = match args.command {
        Command::Analyze { .. } => print_json(&analyses),
        Command::Render { .. } => {
            let renders: Vec<RenderResult> = conformer.render_all(&analyses).await;
            all_ok &= renders.iter().all(|r| r.failures.is_empty());
            print_json(&renders)
        }
    };

    drop(conformer);
    progress_task.abort();

    if all_ok && printed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
