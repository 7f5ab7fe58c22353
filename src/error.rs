//! Error types for the scoring pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a model or scoring a batch
#[derive(Debug, Error)]
pub enum ScoringError {
    /// No candidate location held the model artifact and no URL was given
    #[error("model artifact not found, tried: {}", display_paths(.tried))]
    ArtifactNotFound { tried: Vec<PathBuf> },

    /// The artifact exists but could not be turned into a predictor
    #[error("failed to deserialize model artifact {}: {message}", .path.display())]
    Deserialization { path: PathBuf, message: String },

    /// The input rows do not fit what the predictor was trained on
    #[error("input does not match the model schema: {0}")]
    SchemaMismatch(String),

    #[error("failed to download model from {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid percentile {0}: must be a finite value within [0, 1]")]
    InvalidPercentile(f64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScoringError {
    pub(crate) fn deserialization(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        ScoringError::Deserialization {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "(no candidate paths)".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, ScoringError>;
