//! Per-service red-flag thresholds
//!
//! Thresholds are built once per run from historical (reference) flows:
//! every service gets the configured quantile of its observed durations.
//! A prediction is red-flagged when it is strictly above its service's
//! threshold. Services never seen in the reference set are never flagged.

use crate::error::{Result, ScoringError};
use crate::types::{PredictionRecord, ReferenceSample};
use std::collections::BTreeMap;
use tracing::debug;

/// Service name -> threshold, derived from a reference dataset
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceThresholdTable {
    /// Quantile the thresholds were computed at (0.0 - 1.0)
    percentile: f64,
    /// Thresholds keyed by service
    thresholds: BTreeMap<String, f64>,
}

impl ServiceThresholdTable {
    /// Table with no services; nothing will be flagged against it.
    pub fn empty(percentile: f64) -> Result<Self> {
        validate_percentile(percentile)?;
        Ok(Self {
            percentile,
            thresholds: BTreeMap::new(),
        })
    }

    /// Group samples by service and compute the requested quantile per group.
    ///
    /// Samples whose target is NaN are ignored. A service whose samples are
    /// all NaN gets no entry.
    pub fn build(samples: &[ReferenceSample], percentile: f64) -> Result<Self> {
        validate_percentile(percentile)?;

        let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for sample in samples {
            if sample.target.is_nan() {
                continue;
            }
            groups
                .entry(sample.service.as_str())
                .or_default()
                .push(sample.target);
        }

        let mut thresholds = BTreeMap::new();
        for (service, mut values) in groups {
            values.sort_by(f64::total_cmp);
            if let Some(threshold) = quantile_sorted(&values, percentile) {
                debug!(
                    service = %service,
                    samples = values.len(),
                    threshold = threshold,
                    "Computed service threshold"
                );
                thresholds.insert(service.to_string(), threshold);
            }
        }

        Ok(Self {
            percentile,
            thresholds,
        })
    }

    pub fn percentile(&self) -> f64 {
        self.percentile
    }

    pub fn get(&self, service: &str) -> Option<f64> {
        self.thresholds.get(service).copied()
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Thresholds in service-name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.thresholds.iter().map(|(s, t)| (s.as_str(), *t))
    }

    /// True iff the service is known and `value` is strictly above its threshold.
    pub fn exceeds(&self, service: &str, value: f64) -> bool {
        match self.get(service) {
            Some(threshold) => value > threshold,
            None => false,
        }
    }
}

/// Red-flag decision for one prediction
pub fn flag(record: &PredictionRecord, table: &ServiceThresholdTable) -> bool {
    table.exceeds(&record.service, record.predicted_value)
}

/// Quantile of an ascending slice with linear interpolation between the two
/// closest ranks (`h = (n - 1) * q`).
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let h = (sorted.len() - 1) as f64 * q;
    let lower = h.floor() as usize;
    let upper = h.ceil() as usize;
    let fraction = h - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

fn validate_percentile(percentile: f64) -> Result<()> {
    if percentile.is_finite() && (0.0..=1.0).contains(&percentile) {
        Ok(())
    } else {
        Err(ScoringError::InvalidPercentile(percentile))
    }
}
