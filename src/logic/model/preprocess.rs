//! Frame Preprocessing
//!
//! Deterministic: resize to the model's square input with a bilinear
//! (triangle) filter, RGB order, values scaled into [0, 1].

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::logic::error::{PipelineError, PipelineResult};

/// Tensor layout expected by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputLayout {
    /// (1, H, W, 3) - TFLite/Keras exports
    Nhwc,
    /// (1, 3, H, W) - PyTorch exports
    Nchw,
}

impl Default for InputLayout {
    fn default() -> Self {
        InputLayout::Nhwc
    }
}

/// Convert a decoded frame into a single-image input tensor
pub fn preprocess(image: &DynamicImage, size: u32, layout: InputLayout) -> PipelineResult<Array4<f32>> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::Inference("empty frame".to_string()));
    }
    if size == 0 {
        return Err(PipelineError::Inference("model input size is zero".to_string()));
    }

    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(&rgb, size, size, FilterType::Triangle);

    let side = size as usize;
    let plane = side * side;
    let mut data = vec![0f32; 3 * plane];

    for (i, pixel) in resized.pixels().enumerate() {
        let r = pixel[0] as f32 / 255.0;
        let g = pixel[1] as f32 / 255.0;
        let b = pixel[2] as f32 / 255.0;

        match layout {
            InputLayout::Nhwc => {
                data[i * 3] = r;
                data[i * 3 + 1] = g;
                data[i * 3 + 2] = b;
            }
            InputLayout::Nchw => {
                data[i] = r;
                data[plane + i] = g;
                data[2 * plane + i] = b;
            }
        }
    }

    let shape = match layout {
        InputLayout::Nhwc => (1, side, side, 3),
        InputLayout::Nchw => (1, 3, side, side),
    };

    Array4::from_shape_vec(shape, data)
        .map_err(|e| PipelineError::Inference(format!("tensor shape error: {}", e)))
}
