//! One scoring run: model -> thresholds -> input -> predictions -> output

use crate::config::AppConfig;
use crate::dataset::{FlowTable, ScoredTable};
use crate::error::Result;
use crate::metrics::RunMetrics;
use crate::models::inference::InferenceEngine;
use crate::models::loader::{ArtifactSource, ModelLoader};
use crate::threshold::ServiceThresholdTable;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Inputs of a single run
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Flows to score; `None` scores the built-in example flow
    pub input_csv: Option<PathBuf>,
    /// Historical flows for thresholds; `None` disables red flags
    pub reference_csv: Option<PathBuf>,
    /// Where the scored CSV is written
    pub output_csv: PathBuf,
}

/// Everything a run produced
#[derive(Debug)]
pub struct RunReport {
    pub scored: ScoredTable,
    pub thresholds: ServiceThresholdTable,
    pub metrics: RunMetrics,
    pub output_path: PathBuf,
}

/// Scores flow tables with a loaded model and a fixed threshold table
pub struct Scorer<'a> {
    engine: InferenceEngine,
    thresholds: ServiceThresholdTable,
    config: &'a AppConfig,
}

impl<'a> Scorer<'a> {
    pub fn new(
        engine: InferenceEngine,
        thresholds: ServiceThresholdTable,
        config: &'a AppConfig,
    ) -> Self {
        Self {
            engine,
            thresholds,
            config,
        }
    }

    pub fn thresholds(&self) -> &ServiceThresholdTable {
        &self.thresholds
    }

    pub fn into_thresholds(self) -> ServiceThresholdTable {
        self.thresholds
    }

    /// Predict and flag every row of `table`
    pub fn score(&self, table: &FlowTable) -> Result<ScoredTable> {
        let scoring = &self.config.scoring;
        let records = self.engine.score(
            table.rows(),
            &self.thresholds,
            &scoring.service_column,
            &scoring.default_service,
        )?;

        ScoredTable::new(
            table,
            records,
            &self.config.output.prediction_column,
            &self.config.output.flag_column,
        )
    }
}

/// Build the threshold table from the reference CSV, or an empty one
pub fn build_thresholds(config: &AppConfig, reference_csv: Option<&Path>) -> Result<ServiceThresholdTable> {
    let scoring = &config.scoring;
    let Some(path) = reference_csv else {
        warn!("No reference data configured, red flags are disabled");
        return ServiceThresholdTable::empty(scoring.percentile);
    };

    let reference = FlowTable::from_path(path)?;
    let samples = reference.reference_samples(
        &scoring.service_column,
        &scoring.target_column,
        &scoring.default_service,
    )?;
    let table = ServiceThresholdTable::build(&samples, scoring.percentile)?;

    info!(
        percentile = scoring.percentile,
        services = table.len(),
        samples = samples.len(),
        "Service thresholds built"
    );
    Ok(table)
}

/// Execute a full run.
///
/// Nothing is written unless every row was scored.
pub fn run(config: &AppConfig, source: &ArtifactSource, request: &RunRequest) -> Result<RunReport> {
    let mut metrics = RunMetrics::new();

    let started = Instant::now();
    let loader = ModelLoader::from_config(&config.artifact);
    let predictor = loader.load(source)?;
    let engine = InferenceEngine::new(predictor, config.scoring.target_transform);
    metrics.timings.load_model = started.elapsed();

    let started = Instant::now();
    let thresholds = build_thresholds(config, request.reference_csv.as_deref())?;
    metrics.timings.build_thresholds = started.elapsed();

    let input = match &request.input_csv {
        Some(path) => FlowTable::from_path(path)?,
        None => {
            info!("No input CSV provided, scoring the example flow");
            FlowTable::example()
        }
    };
    info!(rows = input.len(), model = %engine.model_name(), "Scoring flows");

    let started = Instant::now();
    let scorer = Scorer::new(engine, thresholds, config);
    let scored = scorer.score(&input)?;
    metrics.timings.inference = started.elapsed();
    metrics.record_batch(scored.records(), scorer.thresholds());

    let started = Instant::now();
    scored.write_csv_path(&request.output_csv)?;
    metrics.timings.write_output = started.elapsed();
    info!(
        path = %request.output_csv.display(),
        rows = scored.len(),
        flagged = metrics.rows_flagged,
        "Saved predictions"
    );

    Ok(RunReport {
        scored,
        thresholds: scorer.into_thresholds(),
        metrics,
        output_path: request.output_csv.clone(),
    })
}
