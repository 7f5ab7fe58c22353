//! Configuration management for the scoring pipeline

use crate::error::{Result, ScoringError};
use crate::models::inference::TargetTransform;
use crate::types::DEFAULT_SERVICE;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Default configuration file, read when present
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Prefix for environment overrides, e.g. `FLOW_SCORE__SCORING__PERCENTILE`
pub const ENV_PREFIX: &str = "FLOW_SCORE";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub artifact: ArtifactConfig,
    pub scoring: ScoringConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// Model artifact location
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Explicit artifact path; disables the default search
    pub path: Option<String>,
    /// Artifact file name looked up in each search directory
    pub file_name: String,
    /// Directories searched in order
    pub search_dirs: Vec<String>,
    /// Remote fallback when no local artifact exists
    pub url: Option<String>,
    /// Directory a downloaded artifact is stored in
    pub cache_dir: String,
    /// Download timeout; unset waits indefinitely
    pub download_timeout_secs: Option<u64>,
    /// Number of threads for ONNX inference
    pub onnx_threads: usize,
    /// Input column order for ONNX models
    pub onnx_features: Vec<String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            path: None,
            file_name: "flow_duration_pipeline.json".to_string(),
            search_dirs: vec!["artifacts".to_string(), "../artifacts".to_string()],
            url: None,
            cache_dir: "artifacts".to_string(),
            download_timeout_secs: None,
            onnx_threads: 1,
            onnx_features: Vec::new(),
        }
    }
}

/// Prediction and red-flag settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Quantile of the reference durations used as the per-service threshold
    pub percentile: f64,
    /// Transform the model's target was trained under
    pub target_transform: TargetTransform,
    /// Reference (training) CSV the thresholds are derived from
    pub reference_csv: Option<String>,
    /// Target column in the reference CSV
    pub target_column: String,
    /// Categorical column thresholds are grouped by
    pub service_column: String,
    /// Service used when a row has none
    pub default_service: String,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            percentile: 0.90,
            target_transform: TargetTransform::Log1p,
            reference_csv: None,
            target_column: "flow_duration".to_string(),
            service_column: "service".to_string(),
            default_service: DEFAULT_SERVICE.to_string(),
        }
    }
}

/// Output file layout
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Predictions CSV path
    pub path: String,
    /// Name of the appended prediction column
    pub prediction_column: String,
    /// Name of the appended red-flag column
    pub flag_column: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: "predictions.csv".to_string(),
            prediction_column: "predicted_flow_duration_sec".to_string(),
            flag_column: "red_flag".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load `config/config.toml` if it exists, plus environment overrides
    pub fn load() -> Result<Self> {
        Self::build(File::with_name(DEFAULT_CONFIG_PATH).required(false))
    }

    /// Load configuration from a specific path, which must exist
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::build(File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ScoringError::Config(format!("failed to build configuration: {}", e)))?;

        let config: AppConfig = config.try_deserialize().map_err(|e| {
            ScoringError::Config(format!("failed to deserialize configuration: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no run could use
    pub fn validate(&self) -> Result<()> {
        let percentile = self.scoring.percentile;
        if !percentile.is_finite() || !(0.0..=1.0).contains(&percentile) {
            return Err(ScoringError::InvalidPercentile(percentile));
        }
        if self.output.prediction_column == self.output.flag_column {
            return Err(ScoringError::Config(format!(
                "prediction and flag columns must differ (both `{}`)",
                self.output.flag_column
            )));
        }
        if self.artifact.onnx_threads == 0 {
            return Err(ScoringError::Config("onnx_threads must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.scoring.percentile, 0.90);
        assert_eq!(config.scoring.target_transform, TargetTransform::Log1p);
        assert_eq!(config.scoring.default_service, "-");
        assert_eq!(config.output.path, "predictions.csv");
        assert_eq!(config.output.prediction_column, "predicted_flow_duration_sec");
        assert_eq!(config.artifact.search_dirs, vec!["artifacts", "../artifacts"]);
        assert!(config.artifact.download_timeout_secs.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scoring.toml");
        std::fs::write(
            &path,
            r#"
[scoring]
percentile = 0.85
target_transform = "none"

[output]
prediction_column = "pred_flow_duration"

[artifact]
url = "https://example.com/flow_duration_pipeline.json"
download_timeout_secs = 60
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.scoring.percentile, 0.85);
        assert_eq!(config.scoring.target_transform, TargetTransform::Identity);
        assert_eq!(config.output.prediction_column, "pred_flow_duration");
        // untouched sections keep their defaults
        assert_eq!(config.output.flag_column, "red_flag");
        assert_eq!(config.scoring.target_column, "flow_duration");
        assert_eq!(config.artifact.download_timeout_secs, Some(60));
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ScoringError::Config(_)));
    }

    #[test]
    fn test_invalid_percentile_rejected() {
        let mut config = AppConfig::default();
        config.scoring.percentile = 90.0;
        assert!(matches!(
            config.validate(),
            Err(ScoringError::InvalidPercentile(_))
        ));
    }

    #[test]
    fn test_clashing_columns_rejected() {
        let mut config = AppConfig::default();
        config.output.flag_column = config.output.prediction_column.clone();
        assert!(config.validate().is_err());
    }
}
