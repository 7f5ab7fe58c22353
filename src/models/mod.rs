//! Model loading and inference components

pub mod inference;
pub mod loader;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pipeline;
pub mod predictor;

pub use inference::{InferenceEngine, TargetTransform};
pub use loader::{ArtifactSource, ModelLoader};
pub use pipeline::{PipelineArtifact, PipelinePredictor};
pub use predictor::Predictor;
