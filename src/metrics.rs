//! Per-run statistics for the scoring pipeline.

use crate::threshold::ServiceThresholdTable;
use crate::types::PredictionRecord;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

/// Counters for one service
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ServiceStats {
    pub rows: u64,
    pub flagged: u64,
    /// Threshold the service was checked against, if it had one
    pub threshold: Option<f64>,
}

/// Distribution of predicted durations (seconds)
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PredictionStats {
    pub count: u64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub max: f64,
}

/// Wall-clock time spent in each stage
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StageTimings {
    pub load_model: Duration,
    pub build_thresholds: Duration,
    pub inference: Duration,
    pub write_output: Duration,
}

/// Metrics collected over a single scoring run
#[derive(Debug, Default, Clone)]
pub struct RunMetrics {
    /// Rows scored
    pub rows_scored: u64,
    /// Rows red-flagged
    pub rows_flagged: u64,
    /// Breakdown by service
    services: BTreeMap<String, ServiceStats>,
    /// Predicted values, in input order
    predictions: Vec<f64>,
    /// Percentile the thresholds were built at
    percentile: f64,
    /// Number of services with a threshold
    thresholds_known: usize,
    pub timings: StageTimings,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the scored batch and the thresholds it was checked against
    pub fn record_batch(&mut self, records: &[PredictionRecord], thresholds: &ServiceThresholdTable) {
        self.percentile = thresholds.percentile();
        self.thresholds_known = thresholds.len();

        for record in records {
            self.rows_scored += 1;
            self.predictions.push(record.predicted_value);

            let stats = self.services.entry(record.service.clone()).or_default();
            stats.rows += 1;
            stats.threshold = thresholds.get(&record.service);
            if record.flagged {
                stats.flagged += 1;
                self.rows_flagged += 1;
            }
        }
    }

    pub fn service_stats(&self) -> &BTreeMap<String, ServiceStats> {
        &self.services
    }

    pub fn flag_rate(&self) -> f64 {
        if self.rows_scored > 0 {
            self.rows_flagged as f64 / self.rows_scored as f64
        } else {
            0.0
        }
    }

    /// Summary of predicted durations; NaN predictions are left out
    pub fn prediction_stats(&self) -> PredictionStats {
        let mut sorted: Vec<f64> = self
            .predictions
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .collect();
        if sorted.is_empty() {
            return PredictionStats::default();
        }
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();

        PredictionStats {
            count: count as u64,
            mean: sum / count as f64,
            p50: sorted[count / 2],
            p95: sorted[((count as f64 * 0.95) as usize).min(count - 1)],
            max: sorted[count - 1],
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let stats = self.prediction_stats();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            FLOW DURATION SCORING - RUN SUMMARY               ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Rows Scored: {:>8}  │  Red Flags: {:>6} ({:>5.1}%)           ║",
            self.rows_scored,
            self.rows_flagged,
            self.flag_rate() * 100.0
        );
        info!(
            "║ Thresholds: p{:<5.1} over {:>4} services                        ║",
            self.percentile * 100.0,
            self.thresholds_known
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Predicted (s): mean={:.3} p50={:.3} p95={:.3} max={:.3}",
            stats.mean, stats.p50, stats.p95, stats.max
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ By Service:                                                  ║");
        for (service, s) in &self.services {
            let threshold = s
                .threshold
                .map(|t| format!("{:.3}", t))
                .unwrap_or_else(|| "none".to_string());
            info!(
                "║   {:12}: {:>6} rows  {:>6} flagged  threshold={}",
                service, s.rows, s.flagged, threshold
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
        info!(
            load_model_ms = self.timings.load_model.as_millis() as u64,
            build_thresholds_ms = self.timings.build_thresholds.as_millis() as u64,
            inference_ms = self.timings.inference.as_millis() as u64,
            write_output_ms = self.timings.write_output.as_millis() as u64,
            "Stage timings"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReferenceSample;

    fn flagged(service: &str, value: f64, flagged: bool) -> PredictionRecord {
        let mut record = PredictionRecord::new(service, value);
        record.flagged = flagged;
        record
    }

    #[test]
    fn test_metrics_recording() {
        let thresholds =
            ServiceThresholdTable::build(&[ReferenceSample::new("http", 5.0)], 0.9).unwrap();
        let mut metrics = RunMetrics::new();

        metrics.record_batch(
            &[
                flagged("http", 9.0, true),
                flagged("http", 1.0, false),
                flagged("mqtt", 50.0, false),
            ],
            &thresholds,
        );

        assert_eq!(metrics.rows_scored, 3);
        assert_eq!(metrics.rows_flagged, 1);
        assert!((metrics.flag_rate() - 1.0 / 3.0).abs() < 1e-12);

        let http = &metrics.service_stats()["http"];
        assert_eq!(http.rows, 2);
        assert_eq!(http.flagged, 1);
        assert_eq!(http.threshold, Some(5.0));
        assert_eq!(metrics.service_stats()["mqtt"].threshold, None);
    }

    #[test]
    fn test_prediction_stats() {
        let thresholds = ServiceThresholdTable::empty(0.9).unwrap();
        let mut metrics = RunMetrics::new();
        let records: Vec<PredictionRecord> = (1..=10)
            .map(|i| PredictionRecord::new("http", i as f64))
            .chain(std::iter::once(PredictionRecord::new("http", f64::NAN)))
            .collect();
        metrics.record_batch(&records, &thresholds);

        let stats = metrics.prediction_stats();
        assert_eq!(stats.count, 10);
        assert!((stats.mean - 5.5).abs() < 1e-12);
        assert_eq!(stats.p50, 6.0);
        assert_eq!(stats.p95, 10.0);
        assert_eq!(stats.max, 10.0);
    }

    #[test]
    fn test_empty_run() {
        let metrics = RunMetrics::new();
        assert_eq!(metrics.flag_rate(), 0.0);
        assert_eq!(metrics.prediction_stats(), PredictionStats::default());
    }
}
