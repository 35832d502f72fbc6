//! Inference Engine - ONNX Runtime Integration
//!
//! Loads the content classification model and maps a decoded frame to a
//! score per label. One session per engine, serialized behind a mutex.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use image::DynamicImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::labels::{Label, LabelScores, LABEL_COUNT};
use super::preprocess::{preprocess, InputLayout};
use crate::constants::MODEL_INPUT_SIZE;
use crate::logic::error::{PipelineError, PipelineResult};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Result of one classification. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Top label
    pub label: Label,
    /// Score of the top label (0.0 - 1.0)
    pub confidence: f32,
    /// Every label's score
    pub scores: LabelScores,
}

impl ClassificationResult {
    pub fn from_scores(scores: LabelScores) -> Self {
        let (label, confidence) = scores.top();
        Self { label, confidence, scores }
    }

    /// Build from a raw output row (checks width against the label set)
    pub fn from_raw(raw: &[f32]) -> PipelineResult<Self> {
        Ok(Self::from_scores(LabelScores::from_slice(raw)?))
    }
}

/// Classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Square input side in pixels
    pub input_size: u32,
    /// Tensor layout of the model input
    pub layout: InputLayout,
    /// Apply softmax to raw outputs (for models exporting logits)
    pub apply_softmax: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            input_size: MODEL_INPUT_SIZE,
            layout: InputLayout::Nhwc,
            apply_softmax: false,
        }
    }
}

/// Model metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_path: String,
    pub input_size: u32,
    pub layout: InputLayout,
    pub labels: usize,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

/// Engine Status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub model_loaded: bool,
    pub model_name: String,
    pub inference_device: String,
    pub avg_latency_ms: f32,
    pub inference_count: u64,
}

// ============================================================================
// INFERENCE ENGINE TRAIT
// ============================================================================

/// Anything that can turn a frame into a `ClassificationResult`.
///
/// Implementations must be safe to call from several threads; the pipeline
/// only ever runs one cycle at a time, but UI code may check `is_loaded`.
pub trait InferenceEngine: Send + Sync {
    fn classify(&self, image: &DynamicImage) -> PipelineResult<ClassificationResult>;
    fn is_loaded(&self) -> bool;
    fn unload(&self);
}

// ============================================================================
// ONNX IMPLEMENTATION
// ============================================================================

pub struct OnnxClassifier {
    session: Mutex<Option<Session>>,
    config: ClassifierConfig,
    metadata: ModelMetadata,
    latency_sum_us: AtomicU64,
    inference_count: AtomicU64,
}

impl OnnxClassifier {
    /// Load ONNX model from file. A missing or unreadable model is
    /// `ModelUnavailable`; the caller treats it as fatal.
    pub fn load(model_path: &Path, config: ClassifierConfig) -> PipelineResult<Self> {
        log::info!("Loading ONNX model from: {}", model_path.display());

        if !model_path.exists() {
            return Err(PipelineError::ModelUnavailable(format!(
                "model not found: {}",
                model_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| PipelineError::ModelUnavailable(format!("session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PipelineError::ModelUnavailable(format!("optimization: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| PipelineError::ModelUnavailable(format!("load failed: {}", e)))?;

        log::info!("ONNX model loaded successfully");
        Ok(Self::with_session(session, model_path.display().to_string(), config))
    }

    /// Load ONNX model from bytes
    pub fn load_from_bytes(model_bytes: &[u8], config: ClassifierConfig) -> PipelineResult<Self> {
        log::info!("Loading ONNX model from memory ({} bytes)", model_bytes.len());

        let session = Session::builder()
            .map_err(|e| PipelineError::ModelUnavailable(format!("session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PipelineError::ModelUnavailable(format!("optimization: {}", e)))?
            .commit_from_memory(model_bytes)
            .map_err(|e| PipelineError::ModelUnavailable(format!("load from memory: {}", e)))?;

        Ok(Self::with_session(session, "<memory>".to_string(), config))
    }

    fn with_session(session: Session, model_path: String, config: ClassifierConfig) -> Self {
        let metadata = ModelMetadata {
            model_path,
            input_size: config.input_size,
            layout: config.layout,
            labels: LABEL_COUNT,
            loaded_at: chrono::Utc::now(),
        };

        Self {
            session: Mutex::new(Some(session)),
            config,
            metadata,
            latency_sum_us: AtomicU64::new(0),
            inference_count: AtomicU64::new(0),
        }
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn status(&self) -> EngineStatus {
        let sum = self.latency_sum_us.load(Ordering::Relaxed);
        let count = self.inference_count.load(Ordering::Relaxed);
        let avg = if count > 0 { (sum as f32 / count as f32) / 1000.0 } else { 0.0 };

        EngineStatus {
            model_loaded: self.is_loaded(),
            model_name: self.metadata.model_path.clone(),
            inference_device: "ONNX Runtime (CPU)".to_string(),
            avg_latency_ms: avg,
            inference_count: count,
        }
    }

    fn run(&self, image: &DynamicImage) -> PipelineResult<Vec<f32>> {
        let input = preprocess(image, self.config.input_size, self.config.layout)?;

        let mut guard = self.session.lock();
        let session = guard
            .as_mut()
            .ok_or_else(|| PipelineError::ModelUnavailable("model not loaded".to_string()))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| PipelineError::Inference("no output defined".to_string()))?;

        let input_tensor = Value::from_array(input)
            .map_err(|e| PipelineError::Inference(format!("tensor error: {}", e)))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| PipelineError::Inference(format!("inference failed: {}", e)))?;

        let output = outputs
            .get(&output_name)
            .ok_or_else(|| PipelineError::Inference("no output".to_string()))?;

        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::Inference(format!("extract error: {}", e)))?;

        Ok(data.to_vec())
    }
}

impl InferenceEngine for OnnxClassifier {
    fn classify(&self, image: &DynamicImage) -> PipelineResult<ClassificationResult> {
        let start_time = std::time::Instant::now();

        let mut raw = self.run(image)?;
        if self.config.apply_softmax {
            softmax_in_place(&mut raw);
        }
        let result = ClassificationResult::from_raw(&raw)?;

        self.latency_sum_us
            .fetch_add(start_time.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.inference_count.fetch_add(1, Ordering::Relaxed);

        log::debug!(
            "[Classifier] {} ({:.1}%) in {:?}",
            result.label,
            result.confidence * 100.0,
            start_time.elapsed()
        );
        Ok(result)
    }

    fn is_loaded(&self) -> bool {
        self.session.lock().is_some()
    }

    fn unload(&self) {
        if self.session.lock().take().is_some() {
            log::info!("ONNX model unloaded");
        }
    }
}

/// Numerically stable softmax
pub fn softmax_in_place(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return;
    }
    let mut sum = 0.0f32;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in values.iter_mut() {
            *v /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_from_raw_picks_top_label() {
        let result = ClassificationResult::from_raw(&[0.05, 0.05, 0.1, 0.75, 0.05]).unwrap();
        assert_eq!(result.label, Label::Porn);
        assert!((result.confidence - 0.75).abs() < 1e-6);
        assert_eq!(result.scores.iter().count(), LABEL_COUNT);
    }

    #[test]
    fn test_result_rejects_width_mismatch() {
        let err = ClassificationResult::from_raw(&[0.5, 0.5]).unwrap_err();
        assert!(matches!(err, PipelineError::Inference(_)));
    }

    #[test]
    fn test_softmax() {
        let mut v = vec![1.0, 2.0, 3.0];
        softmax_in_place(&mut v);
        let sum: f32 = v.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(v[2] > v[1] && v[1] > v[0]);
    }

    #[test]
    fn test_missing_model_is_unavailable() {
        let result = OnnxClassifier::load(
            Path::new("/nonexistent/oathkeeper/model.onnx"),
            ClassifierConfig::default(),
        );
        assert!(matches!(result, Err(PipelineError::ModelUnavailable(_))));
    }
}
