//! Classical cascade detector — the optional secondary method.
//!
//! Wraps the rustface funnel cascade. Slower per-face and landmark-free, but
//! it has no ONNX dependency and catches frontal faces the learned detector
//! occasionally misses on low-quality frames, which is why fusion can run it
//! alongside the primary.

use crate::detector::{DetectorError, FaceDetector};
use crate::frame::Frame;
use crate::geometry;
use crate::types::DetectedFace;
use std::path::Path;

// Matches the minimum face size the surrounding system has always used.
const MIN_FACE_SIZE_PX: u32 = 30;
const SCORE_THRESHOLD: f64 = 2.0;
const PYRAMID_SCALE_FACTOR: f32 = 0.8;
const SLIDE_WINDOW_STEP: u32 = 4;

pub struct CascadeDetector {
    inner: Box<dyn rustface::Detector>,
}

impl CascadeDetector {
    /// Load the cascade model from the configured path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let mut inner = rustface::create_detector(model_path)
            .map_err(|e| DetectorError::ModelLoad(format!("cascade model: {e}")))?;
        inner.set_min_face_size(MIN_FACE_SIZE_PX);
        inner.set_score_thresh(SCORE_THRESHOLD);
        inner.set_pyramid_scale_factor(PYRAMID_SCALE_FACTOR);
        inner.set_slide_window_step(SLIDE_WINDOW_STEP, SLIDE_WINDOW_STEP);

        tracing::info!(path = model_path, "cascade detector loaded");
        Ok(Self { inner })
    }
}

impl FaceDetector for CascadeDetector {
    fn name(&self) -> &'static str {
        "cascade"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectorError> {
        let luma = frame.to_luma();
        let mut image = rustface::ImageData::new(&luma, frame.width(), frame.height());

        let mut faces: Vec<DetectedFace> = self
            .inner
            .detect(&mut image)
            .into_iter()
            .filter_map(|info| {
                let bbox = info.bbox();
                let left = i64::from(bbox.x());
                let top = i64::from(bbox.y());
                let location = geometry::clamp_box(
                    frame.width(),
                    frame.height(),
                    top,
                    left + i64::from(bbox.width()),
                    top + i64::from(bbox.height()),
                    left,
                )?;
                Some(DetectedFace {
                    location,
                    // Raw cascade score; comparable within this method only,
                    // not calibrated to [0, 1].
                    confidence: info.score() as f32,
                    landmarks: None,
                    embedding: None,
                })
            })
            .collect();

        faces.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!(count = faces.len(), "cascade detection pass");
        Ok(faces)
    }
}
