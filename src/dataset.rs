//! Tabular flow data: CSV input, reference samples and scored output

use crate::error::{Result, ScoringError};
use crate::types::{format_float, FeatureRow, FeatureValue, PredictionRecord, ReferenceSample};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Ordered columns plus rows, as read from a CSV file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowTable {
    columns: Vec<String>,
    rows: Vec<FeatureRow>,
    /// Cell text per row, aligned with `columns`, written back unchanged
    raw: Vec<Vec<String>>,
}

impl FlowTable {
    pub fn new(columns: Vec<String>, rows: Vec<FeatureRow>) -> Self {
        let raw = rows
            .iter()
            .map(|row| columns.iter().map(|c| cell(row, c)).collect())
            .collect();
        Self { columns, rows, raw }
    }

    /// Read a CSV file with a header row
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let table = Self::from_reader(file)?;
        info!(
            path = %path.display(),
            rows = table.len(),
            columns = table.columns.len(),
            "Loaded flow table"
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut rows = Vec::new();
        let mut raw = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row = FeatureRow::from_pairs(
                columns
                    .iter()
                    .zip(record.iter())
                    .map(|(column, cell)| (column.clone(), FeatureValue::parse(cell))),
            );
            rows.push(row);
            raw.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self { columns, rows, raw })
    }

    /// The single flow scored when no input file is given
    pub fn example() -> Self {
        let pairs: Vec<(&str, FeatureValue)> = vec![
            ("proto", "tcp".into()),
            ("service", "http".into()),
            ("fwd_pkts_tot", 120.0.into()),
            ("down_up_ratio", 1.5.into()),
            ("fwd_header_size_tot", 320.0.into()),
            ("bwd_header_size_min", 40.0.into()),
            ("flow_syn_flag_count", 1.0.into()),
            ("flow_rst_flag_count", 0.0.into()),
            ("flow_ack_flag_count", 10.0.into()),
            ("fwd_pkts_payload_tot", 200.0.into()),
            ("fwd_pkts_payload_avg", 100.0.into()),
            ("bwd_pkts_payload_max", 150.0.into()),
            ("bwd_pkts_payload_avg", 70.0.into()),
            ("flow_pkts_payload_avg", 85.0.into()),
            ("fwd_iat_min", 5.0.into()),
            ("bwd_iat_min", 7.0.into()),
            ("fwd_subflow_pkts", 15.0.into()),
            ("bwd_subflow_pkts", 10.0.into()),
            ("fwd_subflow_bytes", 2048.0.into()),
        ];
        let columns = pairs.iter().map(|(c, _)| c.to_string()).collect();
        Self::new(columns, vec![FeatureRow::from_pairs(pairs)])
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// (service, target) pairs for threshold building.
    ///
    /// Rows with an empty target are kept as NaN so the threshold builder
    /// can skip them; a non-numeric target is a schema error.
    pub fn reference_samples(
        &self,
        service_column: &str,
        target_column: &str,
        default_service: &str,
    ) -> Result<Vec<ReferenceSample>> {
        if !self.has_column(target_column) {
            return Err(ScoringError::SchemaMismatch(format!(
                "reference data has no `{}` column",
                target_column
            )));
        }

        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let target = match row.get(target_column) {
                    Some(FeatureValue::Number(v)) => *v,
                    Some(FeatureValue::Missing) | None => f64::NAN,
                    Some(FeatureValue::Text(text)) => {
                        return Err(ScoringError::SchemaMismatch(format!(
                            "reference row {}: `{}` is not a number: `{}`",
                            i, target_column, text
                        )))
                    }
                };
                Ok(ReferenceSample::new(
                    row.service(service_column, default_service),
                    target,
                ))
            })
            .collect()
    }
}

/// Input table annotated with predictions and red flags
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTable {
    columns: Vec<String>,
    prediction_column: String,
    flag_column: String,
    rows: Vec<FeatureRow>,
    raw: Vec<Vec<String>>,
    records: Vec<PredictionRecord>,
}

impl ScoredTable {
    /// Append (or overwrite) the prediction and flag columns.
    ///
    /// `records` must be in the same order as the table's rows.
    pub fn new(
        input: &FlowTable,
        records: Vec<PredictionRecord>,
        prediction_column: &str,
        flag_column: &str,
    ) -> Result<Self> {
        if records.len() != input.len() {
            return Err(ScoringError::SchemaMismatch(format!(
                "{} predictions for {} input rows",
                records.len(),
                input.len()
            )));
        }

        let mut columns = input.columns.clone();
        for column in [prediction_column, flag_column] {
            if !columns.iter().any(|c| c == column) {
                columns.push(column.to_string());
            }
        }

        let rows = input
            .rows
            .iter()
            .zip(&records)
            .map(|(row, record)| {
                let mut row = row.clone();
                row.insert(prediction_column, FeatureValue::Number(record.predicted_value));
                row.insert(flag_column, FeatureValue::Text(record.flagged.to_string()));
                row
            })
            .collect();

        Ok(Self {
            columns,
            prediction_column: prediction_column.to_string(),
            flag_column: flag_column.to_string(),
            rows,
            raw: input.raw.clone(),
            records,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[PredictionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write header plus rows; an empty table still gets its header.
    ///
    /// Input cells are written as read; only the prediction and flag
    /// columns are rendered.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.columns)?;
        for (raw, record) in self.raw.iter().zip(&self.records) {
            let cells = self.columns.iter().enumerate().map(|(i, column)| {
                if *column == self.prediction_column {
                    format_float(record.predicted_value)
                } else if *column == self.flag_column {
                    record.flagged.to_string()
                } else {
                    raw.get(i).cloned().unwrap_or_default()
                }
            });
            writer.write_record(cells)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_csv_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        self.write_csv(std::io::BufWriter::new(file))?;
        debug!(path = %path.display(), rows = self.len(), "Wrote scored table");
        Ok(())
    }

    /// Records as JSON objects with keys in column order
    pub fn to_json(&self) -> serde_json::Value {
        let records = self
            .rows
            .iter()
            .zip(&self.records)
            .map(|(row, record)| {
                let mut object = serde_json::Map::new();
                for column in &self.columns {
                    let value = row
                        .get(column)
                        .map(FeatureValue::to_json)
                        .unwrap_or(serde_json::Value::Null);
                    object.insert(column.clone(), value);
                }
                // flags as real booleans rather than the CSV text form
                object.insert(
                    self.flag_column.clone(),
                    serde_json::Value::Bool(record.flagged),
                );
                serde_json::Value::Object(object)
            })
            .collect();
        serde_json::Value::Array(records)
    }
}

fn cell(row: &FeatureRow, column: &str) -> String {
    row.get(column).map(|v| v.to_string()).unwrap_or_default()
}
