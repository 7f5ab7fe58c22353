//! ONNX Runtime backend
//!
//! Expects a regression model with a single float input of shape
//! `[batch, n_features]`, columns in `feature_names` order.

use crate::error::{Result, ScoringError};
use crate::models::predictor::Predictor;
use crate::types::{FeatureRow, FeatureValue};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, info};

/// Loaded ONNX regression model
pub struct OnnxPredictor {
    name: String,
    /// ONNX Runtime session (run needs `&mut`)
    session: RwLock<Session>,
    input_name: String,
    output_name: String,
    feature_names: Vec<String>,
}

impl OnnxPredictor {
    pub fn load(path: &Path, threads: usize, feature_names: Vec<String>) -> Result<Self> {
        let deser = |e: ort::Error| ScoringError::deserialization(path, e);

        if feature_names.is_empty() {
            return Err(ScoringError::deserialization(
                path,
                "ONNX models need `artifact.onnx_features` to order the input columns",
            ));
        }

        ort::init().commit().map_err(deser)?;

        let session = Session::builder()
            .map_err(deser)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(deser)?
            .with_intra_threads(threads)
            .map_err(deser)?
            .commit_from_file(path)
            .map_err(deser)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("variable") || o.name.contains("output"))
            .or_else(|| session.outputs.first())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "variable".to_string());

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        info!(
            model = %name,
            input = %input_name,
            output = %output_name,
            features = feature_names.len(),
            threads = threads,
            "ONNX model loaded"
        );

        Ok(Self {
            name,
            session: RwLock::new(session),
            input_name,
            output_name,
            feature_names,
        })
    }

    /// Row-major `[rows, features]` matrix
    fn input_matrix(&self, rows: &[FeatureRow]) -> Result<Vec<f32>> {
        let mut data = Vec::with_capacity(rows.len() * self.feature_names.len());
        for (i, row) in rows.iter().enumerate() {
            for column in &self.feature_names {
                let value = match row.get(column) {
                    Some(FeatureValue::Number(v)) => *v as f32,
                    Some(FeatureValue::Missing) => f32::NAN,
                    Some(FeatureValue::Text(text)) => {
                        return Err(ScoringError::SchemaMismatch(format!(
                            "row {}: column `{}` expects a number, got `{}`",
                            i, column, text
                        )))
                    }
                    None => {
                        return Err(ScoringError::SchemaMismatch(format!(
                            "row {}: missing column `{}`",
                            i, column
                        )))
                    }
                };
                data.push(value);
            }
        }
        Ok(data)
    }
}

impl Predictor for OnnxPredictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<f64>> {
        let schema = |e: ort::Error| ScoringError::SchemaMismatch(e.to_string());

        let data = self.input_matrix(rows)?;
        let shape = vec![rows.len() as i64, self.feature_names.len() as i64];
        let input_tensor = Tensor::from_array((shape, data)).map_err(schema)?;

        let mut session = self
            .session
            .write()
            .map_err(|e| ScoringError::SchemaMismatch(format!("Lock error: {}", e)))?;

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(schema)?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            ScoringError::SchemaMismatch(format!("model has no output `{}`", self.output_name))
        })?;
        let (shape, values) = output.try_extract_tensor::<f32>().map_err(schema)?;
        check_output_shape(&shape[..], rows.len())?;

        let predictions: Vec<f64> = values.iter().map(|&v| v as f64).collect();

        debug!(model = %self.name, rows = rows.len(), "ONNX inference complete");
        Ok(predictions)
    }
}

/// A regression output is `[batch]` or `[batch, 1]`
fn check_output_shape(dims: &[i64], rows: usize) -> Result<()> {
    let batch = rows as i64;
    match dims {
        [n] | [n, 1] if *n == batch => Ok(()),
        _ => Err(ScoringError::SchemaMismatch(format!(
            "model output has shape {:?}, expected [{}] or [{}, 1]",
            dims, rows, rows
        ))),
    }
}
