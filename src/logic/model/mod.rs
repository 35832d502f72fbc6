//! Model Module - Content Classification
//!
//! - `labels`: typed label set bound to the model output layout
//! - `preprocess`: frame -> input tensor
//! - `inference`: ONNX engine + `InferenceEngine` trait

pub mod labels;
pub mod preprocess;
pub mod inference;

// Re-export common types
pub use labels::{Label, LabelScores, RiskTier, LABEL_COUNT};
pub use preprocess::{preprocess, InputLayout};
pub use inference::{
    ClassificationResult, ClassifierConfig, EngineStatus, InferenceEngine, ModelMetadata,
    OnnxClassifier,
};
