//! Predictor abstraction shared by all model backends

use crate::error::Result;
use crate::types::FeatureRow;

/// An externally trained regression pipeline.
///
/// Implementations take whole rows (raw feature columns) and return one
/// log-space value per row, in row order. They do any preprocessing the
/// pipeline was fit with and reject rows that do not match its schema with
/// [`ScoringError::SchemaMismatch`](crate::error::ScoringError::SchemaMismatch).
pub trait Predictor {
    /// Human-readable model name for logs
    fn name(&self) -> &str;

    /// Run the pipeline over a batch of rows
    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<f64>>;
}
