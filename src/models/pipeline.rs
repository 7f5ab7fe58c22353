//! Native JSON pipeline artifacts
//!
//! A pipeline is a column preprocessor (numeric scaling with imputation,
//! one-hot encoding for categoricals) followed by a regression estimator
//! (linear, or a gradient-boosted ensemble of sklearn-style trees). The
//! estimator predicts in log-space; the inference engine inverts that.

use crate::error::{Result, ScoringError};
use crate::models::predictor::Predictor;
use crate::types::{FeatureRow, FeatureValue};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Artifact layout version this build can read
pub const PIPELINE_FORMAT_VERSION: u32 = 1;

fn default_scale() -> f64 {
    1.0
}

/// Preprocessing of one input column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureSpec {
    /// `(x - center) / scale`, missing cells replaced by `impute` first
    Numeric {
        name: String,
        #[serde(default)]
        center: f64,
        #[serde(default = "default_scale")]
        scale: f64,
        #[serde(default)]
        impute: Option<f64>,
    },
    /// One-hot over `categories`; unknown or missing values encode as all zeros
    Categorical {
        name: String,
        categories: Vec<String>,
    },
}

impl FeatureSpec {
    pub fn name(&self) -> &str {
        match self {
            FeatureSpec::Numeric { name, .. } | FeatureSpec::Categorical { name, .. } => name,
        }
    }

    /// Number of encoded slots this column occupies
    pub fn width(&self) -> usize {
        match self {
            FeatureSpec::Numeric { .. } => 1,
            FeatureSpec::Categorical { categories, .. } => categories.len(),
        }
    }

    fn encode_into(&self, row: &FeatureRow, out: &mut Vec<f64>) -> Result<()> {
        match self {
            FeatureSpec::Numeric {
                name,
                center,
                scale,
                impute,
            } => {
                let value = match row.get(name) {
                    None => {
                        return Err(ScoringError::SchemaMismatch(format!(
                            "missing column `{}`",
                            name
                        )))
                    }
                    Some(FeatureValue::Text(text)) => {
                        return Err(ScoringError::SchemaMismatch(format!(
                            "column `{}` expects a number, got `{}`",
                            name, text
                        )))
                    }
                    Some(FeatureValue::Number(v)) if !v.is_nan() => *v,
                    // empty cell or NaN
                    Some(_) => impute.ok_or_else(|| {
                        ScoringError::SchemaMismatch(format!(
                            "column `{}` is empty and the pipeline has no imputation value",
                            name
                        ))
                    })?,
                };
                out.push((value - center) / scale);
            }
            FeatureSpec::Categorical { name, categories } => {
                let value = row.get(name).ok_or_else(|| {
                    ScoringError::SchemaMismatch(format!("missing column `{}`", name))
                })?;
                let category = value.as_category();
                for known in categories {
                    let hot = category.as_deref() == Some(known.as_str());
                    out.push(if hot { 1.0 } else { 0.0 });
                }
            }
        }
        Ok(())
    }
}

/// A node of a regression tree, stored in a flat array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    /// `x[feature] <= threshold` goes to `left`, otherwise `right`
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// A regression tree; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    pub fn leaf(value: f64) -> Self {
        Self {
            nodes: vec![TreeNode::Leaf { value }],
        }
    }

    pub fn evaluate(&self, x: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    // NaN goes right, like sklearn
                    index = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Children must point forward so evaluation always terminates.
    fn validate(&self, width: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= width {
                    return Err(format!(
                        "node {} splits on feature {} but the preprocessor yields {} features",
                        index, feature, width
                    ));
                }
                for child in [*left, *right] {
                    if child <= index || child >= self.nodes.len() {
                        return Err(format!("node {} has invalid child {}", index, child));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Regression estimator applied to the encoded feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Estimator {
    Linear {
        intercept: f64,
        coefficients: Vec<f64>,
    },
    /// `init + learning_rate * sum(tree(x))`
    GradientBoosting {
        init: f64,
        learning_rate: f64,
        trees: Vec<Tree>,
    },
}

impl Estimator {
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        match self {
            Estimator::Linear {
                intercept,
                coefficients,
            } => intercept + coefficients.iter().zip(x).map(|(c, v)| c * v).sum::<f64>(),
            Estimator::GradientBoosting {
                init,
                learning_rate,
                trees,
            } => init + learning_rate * trees.iter().map(|t| t.evaluate(x)).sum::<f64>(),
        }
    }

    fn validate(&self, width: usize) -> std::result::Result<(), String> {
        match self {
            Estimator::Linear { coefficients, .. } => {
                if coefficients.len() != width {
                    return Err(format!(
                        "linear estimator has {} coefficients but the preprocessor yields {} features",
                        coefficients.len(),
                        width
                    ));
                }
            }
            Estimator::GradientBoosting { trees, .. } => {
                for (i, tree) in trees.iter().enumerate() {
                    tree.validate(width).map_err(|e| format!("tree {}: {}", i, e))?;
                }
            }
        }
        Ok(())
    }
}

/// Serialized pipeline: preprocessing + estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineArtifact {
    pub format_version: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub features: Vec<FeatureSpec>,
    pub estimator: Estimator,
}

impl PipelineArtifact {
    /// Width of the encoded feature vector
    pub fn encoded_width(&self) -> usize {
        self.features.iter().map(FeatureSpec::width).sum()
    }

    /// Check version and internal consistency
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.format_version != PIPELINE_FORMAT_VERSION {
            return Err(format!(
                "artifact format version {} is not supported (expected {})",
                self.format_version, PIPELINE_FORMAT_VERSION
            ));
        }
        for spec in &self.features {
            if let FeatureSpec::Numeric { name, scale, .. } = spec {
                if *scale == 0.0 || !scale.is_finite() {
                    return Err(format!("numeric feature `{}` has invalid scale {}", name, scale));
                }
            }
        }
        self.estimator.validate(self.encoded_width())
    }

    /// Encode one row into the estimator's input vector
    pub fn encode(&self, row: &FeatureRow) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(self.encoded_width());
        for spec in &self.features {
            spec.encode_into(row, &mut out)?;
        }
        Ok(out)
    }
}

/// [`Predictor`] backed by a [`PipelineArtifact`]
#[derive(Debug, Clone)]
pub struct PipelinePredictor {
    name: String,
    artifact: PipelineArtifact,
}

impl PipelinePredictor {
    /// Validate an in-memory artifact
    pub fn new(artifact: PipelineArtifact) -> std::result::Result<Self, String> {
        artifact.validate()?;
        let name = artifact
            .name
            .clone()
            .unwrap_or_else(|| "pipeline".to_string());
        Ok(Self { name, artifact })
    }

    /// Read and validate an artifact from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes, path)
    }

    /// Parse artifact bytes; `origin` is only used in error messages
    pub fn from_slice(bytes: &[u8], origin: &Path) -> Result<Self> {
        let artifact: PipelineArtifact = serde_json::from_slice(bytes)
            .map_err(|e| ScoringError::deserialization(origin, e))?;
        let predictor =
            Self::new(artifact).map_err(|e| ScoringError::deserialization(origin, e))?;

        info!(
            model = %predictor.name,
            features = predictor.artifact.features.len(),
            encoded_width = predictor.artifact.encoded_width(),
            "Pipeline artifact loaded"
        );
        Ok(predictor)
    }

    pub fn artifact(&self) -> &PipelineArtifact {
        &self.artifact
    }

    /// Column names the pipeline reads
    pub fn feature_names(&self) -> Vec<&str> {
        self.artifact.features.iter().map(FeatureSpec::name).collect()
    }
}

impl Predictor for PipelinePredictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<f64>> {
        let mut predictions = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let x = self.artifact.encode(row).map_err(|e| match e {
                ScoringError::SchemaMismatch(msg) => {
                    ScoringError::SchemaMismatch(format!("row {}: {}", i, msg))
                }
                other => other,
            })?;
            predictions.push(self.artifact.estimator.evaluate(&x));
        }
        debug!(model = %self.name, rows = rows.len(), "Pipeline prediction complete");
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> PipelineArtifact {
        PipelineArtifact {
            format_version: PIPELINE_FORMAT_VERSION,
            name: Some("gbr".to_string()),
            features: vec![
                FeatureSpec::Categorical {
                    name: "proto".to_string(),
                    categories: vec!["tcp".to_string(), "udp".to_string()],
                },
                FeatureSpec::Numeric {
                    name: "fwd_pkts_tot".to_string(),
                    center: 10.0,
                    scale: 2.0,
                    impute: Some(10.0),
                },
            ],
            estimator: Estimator::GradientBoosting {
                init: 1.0,
                learning_rate: 0.5,
                trees: vec![
                    // udp slot
                    Tree {
                        nodes: vec![
                            TreeNode::Split {
                                feature: 1,
                                threshold: 0.5,
                                left: 1,
                                right: 2,
                            },
                            TreeNode::Leaf { value: 0.0 },
                            TreeNode::Leaf { value: 2.0 },
                        ],
                    },
                    Tree::leaf(0.2),
                ],
            },
        }
    }

    #[test]
    fn test_encoding() {
        let artifact = artifact();
        let row = FeatureRow::from_pairs([
            ("proto", FeatureValue::from("udp")),
            ("fwd_pkts_tot", FeatureValue::from(14.0)),
        ]);
        assert_eq!(artifact.encode(&row).unwrap(), vec![0.0, 1.0, 2.0]);

        let mut row = FeatureRow::from_pairs([("proto", "icmp")]);
        row.insert("fwd_pkts_tot", FeatureValue::Missing);
        assert_eq!(artifact.encode(&row).unwrap(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_nan_and_na_cells_are_imputed() {
        let artifact = artifact();
        let cells = [
            FeatureValue::Number(f64::NAN),
            FeatureValue::parse("NA"),
            FeatureValue::parse("nan"),
        ];
        for cell in cells {
            let mut row = FeatureRow::from_pairs([("proto", "tcp")]);
            row.insert("fwd_pkts_tot", cell);
            // impute 10.0 centers to 0
            assert_eq!(artifact.encode(&row).unwrap(), vec![1.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn test_gradient_boosting_prediction() {
        let predictor = PipelinePredictor::new(artifact()).unwrap();
        let rows = vec![
            FeatureRow::from_pairs([
                ("proto", FeatureValue::from("udp")),
                ("fwd_pkts_tot", FeatureValue::from(10.0)),
            ]),
            FeatureRow::from_pairs([
                ("proto", FeatureValue::from("tcp")),
                ("fwd_pkts_tot", FeatureValue::from(10.0)),
            ]),
        ];
        let predictions = predictor.predict(&rows).unwrap();
        // 1.0 + 0.5 * (2.0 + 0.2), 1.0 + 0.5 * (0.0 + 0.2)
        assert!((predictions[0] - 2.1).abs() < 1e-12);
        assert!((predictions[1] - 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_linear_prediction() {
        let predictor = PipelinePredictor::new(PipelineArtifact {
            format_version: PIPELINE_FORMAT_VERSION,
            name: None,
            features: vec![FeatureSpec::Numeric {
                name: "x".to_string(),
                center: 0.0,
                scale: 1.0,
                impute: None,
            }],
            estimator: Estimator::Linear {
                intercept: 0.5,
                coefficients: vec![2.0],
            },
        })
        .unwrap();
        assert_eq!(predictor.name(), "pipeline");

        let rows = vec![FeatureRow::from_pairs([("x", 1.5)])];
        assert_eq!(predictor.predict(&rows).unwrap(), vec![3.5]);
    }

    #[test]
    fn test_schema_mismatch() {
        let predictor = PipelinePredictor::new(artifact()).unwrap();

        let missing = vec![FeatureRow::from_pairs([("proto", "tcp")])];
        match predictor.predict(&missing) {
            Err(ScoringError::SchemaMismatch(msg)) => {
                assert!(msg.contains("row 0"));
                assert!(msg.contains("fwd_pkts_tot"));
            }
            other => panic!("expected schema mismatch, got {:?}", other),
        }

        let text = vec![FeatureRow::from_pairs([("proto", "tcp"), ("fwd_pkts_tot", "many")])];
        assert!(matches!(
            predictor.predict(&text),
            Err(ScoringError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_version_skew_rejected() {
        let mut artifact = artifact();
        artifact.format_version = 2;
        let bytes = serde_json::to_vec(&artifact).unwrap();

        let err = PipelinePredictor::from_slice(&bytes, Path::new("model.json")).unwrap_err();
        assert!(matches!(err, ScoringError::Deserialization { .. }));
        assert!(err.to_string().contains("format version 2"));
    }

    #[test]
    fn test_inconsistent_artifacts_rejected() {
        let mut artifact = artifact();
        artifact.estimator = Estimator::Linear {
            intercept: 0.0,
            coefficients: vec![1.0],
        };
        assert!(PipelinePredictor::new(artifact).is_err());

        let mut artifact = self::artifact();
        artifact.estimator = Estimator::GradientBoosting {
            init: 0.0,
            learning_rate: 1.0,
            trees: vec![Tree {
                nodes: vec![TreeNode::Split {
                    feature: 0,
                    threshold: 0.0,
                    left: 0,
                    right: 0,
                }],
            }],
        };
        assert!(PipelinePredictor::new(artifact).is_err());
    }

    #[test]
    fn test_corrupt_bytes_rejected() {
        let err = PipelinePredictor::from_slice(b"\x80\x04\x95joblib", Path::new("m.json"))
            .unwrap_err();
        assert!(matches!(err, ScoringError::Deserialization { .. }));
    }

    #[test]
    fn test_json_layout() {
        let json = r#"{
            "format_version": 1,
            "features": [
                {"kind": "categorical", "name": "service", "categories": ["http", "dns"]},
                {"kind": "numeric", "name": "fwd_iat_min", "center": 5.0, "scale": 2.5}
            ],
            "estimator": {
                "type": "gradient_boosting",
                "init": 0.3,
                "learning_rate": 0.1,
                "trees": [
                    {"nodes": [
                        {"feature": 2, "threshold": 0.0, "left": 1, "right": 2},
                        {"value": -1.0},
                        {"value": 1.0}
                    ]}
                ]
            }
        }"#;
        let predictor = PipelinePredictor::from_slice(json.as_bytes(), Path::new("m.json")).unwrap();
        assert_eq!(predictor.feature_names(), vec!["service", "fwd_iat_min"]);

        let rows = vec![FeatureRow::from_pairs([
            ("service", FeatureValue::from("http")),
            ("fwd_iat_min", FeatureValue::from(10.0)),
        ])];
        let predictions = predictor.predict(&rows).unwrap();
        assert!((predictions[0] - 0.4).abs() < 1e-12);
    }
}
