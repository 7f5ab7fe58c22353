//! Batch inference engine for flow-duration prediction

use crate::error::{Result, ScoringError};
use crate::models::predictor::Predictor;
use crate::threshold::ServiceThresholdTable;
use crate::types::{FeatureRow, PredictionRecord};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, info};

/// Transform the pipeline's target was trained under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetTransform {
    /// Trained on `ln(1 + y)`; predictions are inverted with `exp(x) - 1`
    #[default]
    Log1p,
    /// Trained on raw seconds; predictions pass through unchanged
    #[serde(rename = "none", alias = "identity")]
    Identity,
}

impl TargetTransform {
    /// Map a raw model output back to seconds
    pub fn invert(self, raw: f64) -> f64 {
        match self {
            TargetTransform::Log1p => raw.exp_m1(),
            TargetTransform::Identity => raw,
        }
    }
}

impl fmt::Display for TargetTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetTransform::Log1p => write!(f, "log1p"),
            TargetTransform::Identity => write!(f, "none"),
        }
    }
}

/// Runs a predictor over a batch and converts its output to seconds
pub struct InferenceEngine {
    /// Loaded pipeline, owned for the whole run
    predictor: Box<dyn Predictor>,
    /// Inverse of the training-time target transform
    transform: TargetTransform,
}

impl InferenceEngine {
    pub fn new(predictor: Box<dyn Predictor>, transform: TargetTransform) -> Self {
        info!(
            model = %predictor.name(),
            transform = %transform,
            "Inference engine initialized"
        );
        Self {
            predictor,
            transform,
        }
    }

    pub fn model_name(&self) -> &str {
        self.predictor.name()
    }

    pub fn transform(&self) -> TargetTransform {
        self.transform
    }

    /// Predict flow duration in seconds for every row, in input order.
    ///
    /// The whole batch fails if the predictor rejects any row.
    pub fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<f64>> {
        if rows.is_empty() {
            debug!("Empty batch, skipping predictor");
            return Ok(Vec::new());
        }

        let raw = self.predictor.predict(rows)?;
        if raw.len() != rows.len() {
            return Err(ScoringError::SchemaMismatch(format!(
                "model `{}` returned {} predictions for {} rows",
                self.predictor.name(),
                raw.len(),
                rows.len()
            )));
        }

        let predictions: Vec<f64> = raw.into_iter().map(|x| self.transform.invert(x)).collect();

        debug!(
            model = %self.predictor.name(),
            rows = rows.len(),
            "Batch inference complete"
        );
        Ok(predictions)
    }

    /// Predict and red-flag every row against the per-service thresholds
    pub fn score(
        &self,
        rows: &[FeatureRow],
        thresholds: &ServiceThresholdTable,
        service_column: &str,
        default_service: &str,
    ) -> Result<Vec<PredictionRecord>> {
        let predictions = self.predict(rows)?;

        let records = rows
            .iter()
            .zip(predictions)
            .map(|(row, value)| {
                let mut record =
                    PredictionRecord::new(row.service(service_column, default_service), value);
                record.flagged = crate::threshold::flag(&record, thresholds);
                record
            })
            .collect();

        Ok(records)
    }
}
