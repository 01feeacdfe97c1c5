//! Face detector adapters.
//!
//! [`FaceDetector`] is the capability seam every detection method implements.
//! The primary adapter is SCRFD (Sample and Computation Redistribution for
//! Efficient Face Detection) via ONNX Runtime, with 3-stride anchor-free
//! decoding and NMS post-processing.

use crate::frame::Frame;
use crate::geometry;
use crate::types::DetectedFace;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Capability contract for a face detection method.
///
/// Implementations report zero faces as `Ok(vec![])`; an `Err` means the
/// backend itself failed. Fusion keeps the two distinguishable in logs even
/// though both degrade the same way to callers.
pub trait FaceDetector {
    /// Short method name for logs (e.g. "scrfd", "cascade").
    fn name(&self) -> &'static str;

    /// Detect faces, sorted by confidence descending.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectorError>;
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// A decoded detection still in float image coordinates, pre-NMS.
#[derive(Debug, Clone)]
struct RawDetection {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    landmarks: Option<[(f32, f32); 5]>,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based primary detector.
pub struct ScrfdDetector {
    session: Session,
    input_height: usize,
    input_width: usize,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    /// Discovered by name at load time; falls back to positional ordering.
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::ModelLoad(format!(
                "SCRFD model requires 9 outputs (3 strides x score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_height: SCRFD_INPUT_SIZE,
            input_width: SCRFD_INPUT_SIZE,
            stride_indices,
        })
    }

    /// Preprocess a BGR frame into a letterboxed NCHW float tensor in RGB
    /// channel order, normalized to the SCRFD input distribution.
    fn preprocess(&self, frame: &Frame) -> (Array4<f32>, LetterboxInfo) {
        let width = frame.width() as usize;
        let height = frame.height() as usize;

        let scale_w = self.input_width as f32 / width as f32;
        let scale_h = self.input_height as f32 / height as f32;
        let scale = scale_w.min(scale_h);

        let new_w = (width as f32 * scale).round() as usize;
        let new_h = (height as f32 * scale).round() as usize;
        let pad_x = (self.input_width - new_w) as f32 / 2.0;
        let pad_y = (self.input_height - new_h) as f32 / 2.0;
        let pad_x_start = pad_x.floor() as usize;
        let pad_y_start = pad_y.floor() as usize;

        let letterbox = LetterboxInfo { scale, pad_x, pad_y };

        // Zeros are already the normalized pad value: (127.5 - 127.5) / 128 = 0.
        let mut tensor = Array4::<f32>::zeros((1, 3, self.input_height, self.input_width));

        let inv_scale = 1.0 / scale;
        for y in 0..new_h {
            let src_y = (y as f32 + 0.5) * inv_scale - 0.5;
            let y0 = (src_y.floor() as i64).clamp(0, height as i64 - 1) as usize;
            let y1 = (y0 + 1).min(height - 1);
            let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

            for x in 0..new_w {
                let src_x = (x as f32 + 0.5) * inv_scale - 0.5;
                let x0 = (src_x.floor() as i64).clamp(0, width as i64 - 1) as usize;
                let x1 = (x0 + 1).min(width - 1);
                let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

                let (b, g, r) = bilinear_bgr(frame, x0, x1, y0, y1, fx, fy);

                let ty = y + pad_y_start;
                let tx = x + pad_x_start;
                // RGB channel order into the tensor.
                tensor[[0, 0, ty, tx]] = (r - SCRFD_MEAN) / SCRFD_STD;
                tensor[[0, 1, ty, tx]] = (g - SCRFD_MEAN) / SCRFD_STD;
                tensor[[0, 2, ty, tx]] = (b - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, letterbox)
    }
}

impl FaceDetector for ScrfdDetector {
    fn name(&self) -> &'static str {
        "scrfd"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectorError> {
        let (input, letterbox) = self.preprocess(frame);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
                })?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
                })?;
            let (_, kps) = outputs[kps_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("kps stride {stride}: {e}"))
            })?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                self.input_width,
                self.input_height,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let kept = nms(all_detections, SCRFD_NMS_THRESHOLD);
        Ok(finalize_detections(kept, frame.width(), frame.height()))
    }
}

/// Sample one bilinear BGR triple from the frame.
fn bilinear_bgr(
    frame: &Frame,
    x0: usize,
    x1: usize,
    y0: usize,
    y1: usize,
    fx: f32,
    fy: f32,
) -> (f32, f32, f32) {
    let tl = frame.bgr_at(x0 as u32, y0 as u32);
    let tr = frame.bgr_at(x1 as u32, y0 as u32);
    let bl = frame.bgr_at(x0 as u32, y1 as u32);
    let br = frame.bgr_at(x1 as u32, y1 as u32);

    let mix = |tl: u8, tr: u8, bl: u8, br: u8| -> f32 {
        tl as f32 * (1.0 - fx) * (1.0 - fy)
            + tr as f32 * fx * (1.0 - fy)
            + bl as f32 * (1.0 - fx) * fy
            + br as f32 * fx * fy
    };

    (
        mix(tl.0, tr.0, bl.0, br.0),
        mix(tl.1, tr.1, bl.1, br.1),
        mix(tl.2, tr.2, bl.2, br.2),
    )
}

/// Discover output tensor ordering by name.
///
/// SCRFD exports may name tensors "score_8"/"bbox_16"/"kps_32" or use
/// generic numeric names. Named patterns are mapped to stride slots;
/// otherwise the standard positional ordering applies:
///   [0-2] = scores, [3-5] = bboxes, [6-8] = kps, each for strides 8/16/32.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named = SCRFD_STRIDES.iter().all(|&stride| {
        find("score", stride).is_some()
            && find("bbox", stride).is_some()
            && find("kps", stride).is_some()
    });

    if named {
        tracing::info!("SCRFD: using name-based output tensor mapping");
        std::array::from_fn(|i| {
            let stride = SCRFD_STRIDES[i];
            (
                find("score", stride).unwrap(),
                find("bbox", stride).unwrap(),
                find("kps", stride).unwrap(),
            )
        })
    } else {
        tracing::info!(
            ?names,
            "SCRFD: output names not recognized, using positional mapping"
        );
        [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
    }
}

/// Decode detections for a single stride level into frame coordinates.
#[allow(clippy::too_many_arguments)]
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_width: usize,
    input_height: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<RawDetection> {
    let grid_h = input_height / stride;
    let grid_w = input_width / stride;
    let num_anchors = grid_h * grid_w * SCRFD_ANCHORS_PER_CELL;

    let unmap_x = |x: f32| (x - letterbox.pad_x) / letterbox.scale;
    let unmap_y = |y: f32| (y - letterbox.pad_y) / letterbox.scale;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid_w) as f32 * stride as f32;
        let anchor_cy = (anchor_idx / grid_w) as f32 * stride as f32;

        // Box regression: [x1_off, y1_off, x2_off, y2_off] * stride.
        let bbox_off = idx * 4;
        if bbox_off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = anchor_cx - bboxes[bbox_off] * stride as f32;
        let y1 = anchor_cy - bboxes[bbox_off + 1] * stride as f32;
        let x2 = anchor_cx + bboxes[bbox_off + 2] * stride as f32;
        let y2 = anchor_cy + bboxes[bbox_off + 3] * stride as f32;

        let kps_off = idx * 10;
        let landmarks = if kps_off + 9 < kps.len() {
            let mut lms = [(0.0f32, 0.0f32); 5];
            for (i, lm) in lms.iter_mut().enumerate() {
                let lx = anchor_cx + kps[kps_off + i * 2] * stride as f32;
                let ly = anchor_cy + kps[kps_off + i * 2 + 1] * stride as f32;
                *lm = (unmap_x(lx), unmap_y(ly));
            }
            Some(lms)
        } else {
            None
        };

        detections.push(RawDetection {
            x1: unmap_x(x1),
            y1: unmap_y(y1),
            x2: unmap_x(x2),
            y2: unmap_y(y2),
            score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression over raw float detections.
fn nms(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union of two raw detections.
fn iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = area_a + area_b - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Clamp surviving detections into integer boxes, dropping any that become
/// degenerate, and order by confidence descending.
fn finalize_detections(raw: Vec<RawDetection>, width: u32, height: u32) -> Vec<DetectedFace> {
    let mut faces: Vec<DetectedFace> = raw
        .into_iter()
        .filter_map(|d| {
            let location = geometry::clamp_box(
                width,
                height,
                d.y1.round() as i64,
                d.x2.round() as i64,
                d.y2.round() as i64,
                d.x1.round() as i64,
            )?;
            Some(DetectedFace {
                location,
                confidence: d.score,
                landmarks: d.landmarks,
                embedding: None,
            })
        })
        .collect();

    faces.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    faces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> RawDetection {
        RawDetection {
            x1,
            y1,
            x2,
            y2,
            score,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = raw(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = raw(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = raw(20.0, 20.0, 30.0, 30.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_half_shift() {
        let a = raw(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = raw(5.0, 0.0, 15.0, 10.0, 1.0);
        // Intersection 5x10 = 50, union 150.
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            raw(0.0, 0.0, 100.0, 100.0, 0.9),
            raw(5.0, 5.0, 105.0, 105.0, 0.8),
            raw(200.0, 200.0, 250.0, 250.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].score - 0.9).abs() < 1e-6);
        assert!((result[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_disjoint() {
        let detections = vec![
            raw(0.0, 0.0, 10.0, 10.0, 0.9),
            raw(50.0, 50.0, 60.0, 60.0, 0.8),
        ];
        assert_eq!(nms(detections, 0.4).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_finalize_clamps_and_drops_degenerate() {
        let raw_dets = vec![
            raw(-10.0, -5.0, 50.0, 60.0, 0.6), // clips into bounds
            raw(700.0, 10.0, 900.0, 80.0, 0.9), // entirely right of a 640-wide frame
        ];
        let faces = finalize_detections(raw_dets, 640, 480);
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].location.left, 0);
        assert_eq!(faces[0].location.top, 0);
        assert_eq!(faces[0].location.right, 50);
        assert_eq!(faces[0].location.bottom, 60);
    }

    #[test]
    fn test_finalize_orders_by_confidence() {
        let raw_dets = vec![
            raw(0.0, 0.0, 10.0, 10.0, 0.3),
            raw(100.0, 100.0, 120.0, 120.0, 0.8),
        ];
        let faces = finalize_detections(raw_dets, 640, 480);
        assert!((faces[0].confidence - 0.8).abs() < 1e-6);
        assert!((faces[1].confidence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32", "kps_8", "kps_16",
            "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices[0], (0, 3, 6));
        assert_eq!(indices[1], (1, 4, 7));
        assert_eq!(indices[2], (2, 5, 8));
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices[0], (2, 0, 1));
        assert_eq!(indices[1], (5, 3, 4));
        assert_eq!(indices[2], (8, 6, 7));
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let width = 320.0f32;
        let height = 240.0f32;
        let scale = (640.0 / width).min(640.0 / height);
        let new_w = (width * scale).round();
        let new_h = (height * scale).round();
        let letterbox = LetterboxInfo {
            scale,
            pad_x: (640.0 - new_w) / 2.0,
            pad_y: (640.0 - new_h) / 2.0,
        };

        let orig = (100.0f32, 50.0f32);
        let mapped = (
            orig.0 * letterbox.scale + letterbox.pad_x,
            orig.1 * letterbox.scale + letterbox.pad_y,
        );
        let recovered = (
            (mapped.0 - letterbox.pad_x) / letterbox.scale,
            (mapped.1 - letterbox.pad_y) / letterbox.scale,
        );

        assert!((recovered.0 - orig.0).abs() < 0.1);
        assert!((recovered.1 - orig.1).abs() < 0.1);
    }

    #[test]
    fn test_decode_stride_skips_low_scores() {
        // One anchor row worth of data, all below threshold.
        let scores = vec![0.1f32; 8];
        let bboxes = vec![0.0f32; 32];
        let kps = vec![0.0f32; 80];
        let letterbox = LetterboxInfo {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let dets = decode_stride(&scores, &bboxes, &kps, 32, 64, 64, &letterbox, 0.5);
        assert!(dets.is_empty());
    }
}
