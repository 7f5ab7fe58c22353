//! Type definitions for the scoring pipeline

pub mod record;

pub use record::{
    format_float, format_number, FeatureRow, FeatureValue, PredictionRecord, ReferenceSample,
    DEFAULT_SERVICE, NA_TOKENS,
};
