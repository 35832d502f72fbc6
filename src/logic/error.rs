//! Pipeline Error Taxonomy
//!
//! Every fallible operation in the pipeline returns `PipelineResult`.
//! Classifier, capture and store-write errors are recovered at the cycle
//! boundary; config errors are rejected at the write boundary.

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Model is not loaded (or was unloaded)
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Inference failed (corrupt input, bad output shape, runtime error)
    #[error("inference error: {0}")]
    Inference(String),

    /// Capture provider could not supply a frame
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// I/O, SQL or crypto failure in the event store
    #[error("storage error: {0}")]
    Storage(String),

    /// Rejected configuration write
    #[error("invalid config: {0}")]
    ConfigInvalid(String),
}

/// A name that matches no known label, severity or audit action.
/// Callers decide which `PipelineError` kind it becomes; `?` maps it to
/// `Storage`, the only place stored names are read back.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ModelUnavailable(_) => "model_unavailable",
            PipelineError::Inference(_) => "inference_error",
            PipelineError::CaptureUnavailable(_) => "capture_unavailable",
            PipelineError::Storage(_) => "storage_error",
            PipelineError::ConfigInvalid(_) => "config_invalid",
        }
    }
}

impl From<UnknownVariant> for PipelineError {
    fn from(err: UnknownVariant) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

impl From<rusqlite_migration::Error> for PipelineError {
    fn from(err: rusqlite_migration::Error) -> Self {
        PipelineError::Storage(format!("migration failed: {}", err))
    }
}

impl From<aes_gcm::Error> for PipelineError {
    fn from(_: aes_gcm::Error) -> Self {
        // opaque, carries no detail
        PipelineError::Storage("cipher operation failed".to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Storage(format!("io: {}", err))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Storage(format!("json: {}", err))
    }
}

impl From<ort::Error> for PipelineError {
    fn from(err: ort::Error) -> Self {
        PipelineError::Inference(err.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::Inference(format!("image error: {}", err))
    }
}
