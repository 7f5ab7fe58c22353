//! Flow record data structures

use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Placeholder service used when a record carries no service value
pub const DEFAULT_SERVICE: &str = "-";

/// Cell texts read as missing values, in addition to the empty cell
pub const NA_TOKENS: [&str; 18] = [
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// A single cell of a flow record
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    /// Numeric feature (counts, sizes, ratios, durations)
    Number(f64),
    /// Categorical feature (protocol, service, ...)
    Text(String),
    /// Empty cell
    Missing,
}

impl FeatureValue {
    /// Parse a raw CSV cell: empty or NA token -> missing, numeric -> number,
    /// otherwise text
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || NA_TOKENS.contains(&trimmed) {
            return FeatureValue::Missing;
        }
        match trimmed.parse::<f64>() {
            Ok(value) if value.is_nan() => FeatureValue::Missing,
            Ok(value) => FeatureValue::Number(value),
            Err(_) => FeatureValue::Text(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Categorical view of the value; numbers are rendered the way they print
    pub fn as_category(&self) -> Option<Cow<'_, str>> {
        match self {
            FeatureValue::Text(text) => Some(Cow::Borrowed(text.as_str())),
            FeatureValue::Number(value) => Some(Cow::Owned(value.to_string())),
            FeatureValue::Missing => None,
        }
    }

    /// Empty cells and NaN numbers
    pub fn is_missing(&self) -> bool {
        match self {
            FeatureValue::Missing => true,
            FeatureValue::Number(value) => value.is_nan(),
            FeatureValue::Text(_) => false,
        }
    }

    /// JSON view used for `--print-json`
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FeatureValue::Number(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FeatureValue::Text(text) => serde_json::Value::String(text.clone()),
            FeatureValue::Missing => serde_json::Value::Null,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Number(value) => write!(f, "{}", format_number(*value)),
            FeatureValue::Text(text) => write!(f, "{}", text),
            FeatureValue::Missing => Ok(()),
        }
    }
}

/// Plain decimal for ordinary magnitudes, exponent form outside `[1e-4, 1e16)`
pub fn format_number(value: f64) -> String {
    let magnitude = value.abs();
    if value.is_finite() && value != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        format!("{:e}", value)
    } else {
        value.to_string()
    }
}

/// Float column text: always carries a decimal point or exponent, NaN is empty
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        format!("{:?}", value)
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        FeatureValue::Number(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        FeatureValue::Text(value.to_string())
    }
}

/// One input flow: column name -> value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRow {
    values: HashMap<String, FeatureValue>,
}

impl FeatureRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from (column, value) pairs
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<FeatureValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&FeatureValue> {
        self.values.get(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: FeatureValue) {
        self.values.insert(column.into(), value);
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Service of this flow, falling back to `default` when absent or empty
    pub fn service<'a>(&'a self, column: &str, default: &'a str) -> Cow<'a, str> {
        self.get(column)
            .and_then(FeatureValue::as_category)
            .unwrap_or(Cow::Borrowed(default))
    }
}

/// Scored flow: one per input row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    /// Service the threshold was looked up for
    pub service: String,
    /// Predicted flow duration in seconds
    #[serde(serialize_with = "serialize_finite")]
    pub predicted_value: f64,
    /// Whether the prediction exceeds the service's historical percentile
    pub flagged: bool,
}

impl PredictionRecord {
    pub fn new(service: impl Into<String>, predicted_value: f64) -> Self {
        Self {
            service: service.into(),
            predicted_value,
            flagged: false,
        }
    }
}

fn serialize_finite<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        serializer.serialize_none()
    }
}

/// Historical observation used to derive per-service thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSample {
    pub service: String,
    pub target: f64,
}

impl ReferenceSample {
    pub fn new(service: impl Into<String>, target: f64) -> Self {
        Self {
            service: service.into(),
            target,
        }
    }
}
