//! Flow Duration Scoring Library
//!
//! Applies a pre-trained flow-duration regression pipeline to network-flow
//! records and red-flags predictions above their service's historical
//! percentile.

pub mod config;
pub mod dataset;
pub mod error;
pub mod metrics;
pub mod models;
pub mod runner;
pub mod threshold;
pub mod types;

pub use config::AppConfig;
pub use dataset::{FlowTable, ScoredTable};
pub use error::{Result, ScoringError};
pub use models::inference::{InferenceEngine, TargetTransform};
pub use models::loader::{ArtifactSource, ModelLoader};
pub use models::predictor::Predictor;
pub use threshold::ServiceThresholdTable;
pub use types::{FeatureRow, FeatureValue, PredictionRecord};
