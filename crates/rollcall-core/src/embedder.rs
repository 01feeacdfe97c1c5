//! Embedding backends.
//!
//! [`EmbeddingBackend`] is the capability seam: given a frame and one
//! detected face, produce a fixed-length identity embedding, or `None` when
//! the backend cannot embed that particular crop. The concrete provider is
//! ArcFace (w600k_r50) via ONNX Runtime.

use crate::alignment;
use crate::frame::Frame;
use crate::types::{DetectedFace, Embedding};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
// Symmetric normalization — intentionally not the detector's 128.0.
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_ID: &str = "arcface-w600k_r50";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Capability contract for an embedding provider.
pub trait EmbeddingBackend {
    /// Stable identifier recorded in gallery blobs, used to detect loads
    /// against a different backend.
    fn model_id(&self) -> &'static str;

    /// Embed one detected face. `Ok(None)` means the backend could not
    /// produce an embedding for this crop; the caller degrades that face to
    /// unknown rather than aborting the batch.
    fn embed(
        &mut self,
        frame: &Frame,
        face: &DetectedFace,
    ) -> Result<Option<Embedding>, EmbedderError>;
}

/// ArcFace embedding provider.
#[derive(Debug)]
pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Preprocess a 112x112 BGR crop into a NCHW float tensor in RGB
    /// channel order.
    fn preprocess(crop: &[u8]) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                let base = (y * size + x) * 3;
                let b = crop.get(base).copied().unwrap_or(0) as f32;
                let g = crop.get(base + 1).copied().unwrap_or(0) as f32;
                let r = crop.get(base + 2).copied().unwrap_or(0) as f32;

                tensor[[0, 0, y, x]] = (r - ARCFACE_MEAN) / ARCFACE_STD;
                tensor[[0, 1, y, x]] = (g - ARCFACE_MEAN) / ARCFACE_STD;
                tensor[[0, 2, y, x]] = (b - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        tensor
    }
}

impl EmbeddingBackend for ArcFaceEmbedder {
    fn model_id(&self) -> &'static str {
        ARCFACE_MODEL_ID
    }

    fn embed(
        &mut self,
        frame: &Frame,
        face: &DetectedFace,
    ) -> Result<Option<Embedding>, EmbedderError> {
        // Landmarked detections get canonical alignment; cascade detections
        // carry no landmarks and are crop-resized instead.
        let crop = match &face.landmarks {
            Some(landmarks) => alignment::align_face(frame, landmarks),
            None => alignment::crop_resize(frame, &face.location),
        };

        let input = Self::preprocess(&crop);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm <= 0.0 {
            tracing::warn!("backend produced a zero-norm embedding; treating as no embedding");
            return Ok(None);
        }

        let values: Vec<f32> = raw.iter().map(|x| x / norm).collect();
        Ok(Some(Embedding::new(values)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let crop = vec![128u8; ARCFACE_INPUT_SIZE * ARCFACE_INPUT_SIZE * 3];
        let tensor = ArcFaceEmbedder::preprocess(&crop);
        assert_eq!(
            tensor.shape(),
            &[1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE]
        );
    }

    #[test]
    fn test_preprocess_normalization() {
        let crop = vec![128u8; ARCFACE_INPUT_SIZE * ARCFACE_INPUT_SIZE * 3];
        let tensor = ArcFaceEmbedder::preprocess(&crop);
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_channel_order() {
        // One BGR pixel (b=10, g=20, r=30) top-left, rest zero.
        let mut crop = vec![0u8; ARCFACE_INPUT_SIZE * ARCFACE_INPUT_SIZE * 3];
        crop[0] = 10;
        crop[1] = 20;
        crop[2] = 30;
        let tensor = ArcFaceEmbedder::preprocess(&crop);

        // Channel 0 is red, channel 2 is blue.
        assert!((tensor[[0, 0, 0, 0]] - (30.0 - ARCFACE_MEAN) / ARCFACE_STD).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] - (20.0 - ARCFACE_MEAN) / ARCFACE_STD).abs() < 1e-6);
        assert!((tensor[[0, 2, 0, 0]] - (10.0 - ARCFACE_MEAN) / ARCFACE_STD).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_short_crop_pads_black() {
        // A truncated crop reads missing bytes as 0.
        let crop = vec![128u8; 10];
        let tensor = ArcFaceEmbedder::preprocess(&crop);
        let expected = (0.0 - ARCFACE_MEAN) / ARCFACE_STD;
        let last = ARCFACE_INPUT_SIZE - 1;
        assert!((tensor[[0, 0, last, last]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_load_missing_model() {
        let err = ArcFaceEmbedder::load("/nonexistent/w600k_r50.onnx").unwrap_err();
        assert!(matches!(err, EmbedderError::ModelNotFound(_)));
    }
}
