//! Flow Duration Scoring - Main Entry Point
//!
//! Loads the flow-duration pipeline, scores a CSV of flows and writes the
//! predictions with per-service red flags.

use anyhow::{Context, Result};
use clap::Parser;
use flow_duration_scoring::{
    config::{AppConfig, LoggingConfig},
    models::loader::ArtifactSource,
    runner::{self, RunRequest},
    ScoredTable, ScoringError,
};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow-score")]
#[command(about = "Score flow_duration with a saved regression pipeline", long_about = None)]
struct Cli {
    /// Config file path (defaults to config/config.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local path to the model artifact
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// URL to download the model from if not present locally
    #[arg(long)]
    model_url: Option<String>,

    /// CSV to score (must match the training columns)
    #[arg(long)]
    input_csv: Option<PathBuf>,

    /// Historical flows with the target column, for red-flag thresholds
    #[arg(long)]
    reference_csv: Option<PathBuf>,

    /// Where to write the predictions CSV
    #[arg(long)]
    output_csv: Option<PathBuf>,

    /// Quantile used for the per-service thresholds (e.g. 0.85 or 0.90)
    #[arg(long)]
    percentile: Option<f64>,

    /// Also print predictions as JSON to stdout
    #[arg(long)]
    print_json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!("flow_duration_scoring={level},flow_score={level}"))
    })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

/// Diagnostic lines and exit status for failures reported without a backtrace
fn failure_report(err: &ScoringError, file_name: &str) -> Option<(i32, Vec<String>)> {
    match err {
        ScoringError::ArtifactNotFound { tried } => {
            let mut lines = vec![format!("Could not find model '{}'. Tried:", file_name)];
            lines.extend(tried.iter().map(|path| format!(" - {}", path.display())));
            lines.push(format!(
                "Fix by either passing --model-path /path/to/{} or providing --model-url https://.../{}",
                file_name, file_name
            ));
            Some((1, lines))
        }
        _ => None,
    }
}

fn render_json(scored: &ScoredTable) -> Result<String> {
    Ok(serde_json::to_string_pretty(&scored.to_json())?)
}

fn output_path(cli: &Cli, config: &AppConfig) -> PathBuf {
    cli.output_csv
        .clone()
        .unwrap_or_else(|| Path::new(&config.output.path).to_path_buf())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => AppConfig::load().context("Failed to load configuration")?,
    };

    if let Some(percentile) = cli.percentile {
        config.scoring.percentile = percentile;
    }
    config.validate().context("Invalid configuration")?;

    init_logging(&config.logging, cli.verbose)?;
    info!("Starting flow duration scoring");
    info!(
        percentile = config.scoring.percentile,
        transform = %config.scoring.target_transform,
        prediction_column = %config.output.prediction_column,
        "Configuration loaded"
    );

    let mut source = ArtifactSource::from_config(&config.artifact);
    if let Some(path) = &cli.model_path {
        source = source.with_explicit(path);
    }
    if let Some(url) = &cli.model_url {
        source = source.with_url(url);
    }

    let request = RunRequest {
        input_csv: cli.input_csv.clone(),
        reference_csv: cli
            .reference_csv
            .clone()
            .or_else(|| config.scoring.reference_csv.as_ref().map(PathBuf::from)),
        output_csv: output_path(&cli, &config),
    };

    let report = match runner::run(&config, &source, &request) {
        Ok(report) => report,
        Err(e) => match failure_report(&e, &config.artifact.file_name) {
            Some((status, lines)) => {
                for line in &lines {
                    error!("{}", line);
                }
                std::process::exit(status);
            }
            None => return Err(e).context("Scoring run failed"),
        },
    };

    if cli.print_json {
        println!("{}", render_json(&report.scored)?);
    }

    report.metrics.print_summary();
    info!(path = %report.output_path.display(), "Done");

    Ok(())
}
