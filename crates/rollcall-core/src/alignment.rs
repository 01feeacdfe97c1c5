//! Canonical face crops for embedding extraction.
//!
//! Faces with five-point landmarks are aligned to the canonical 112x112
//! ArcFace position via a 4-DOF similarity transform (scale, rotation,
//! translation) estimated in closed form. Landmark-free detections fall back
//! to a plain crop-and-resize of the bounding box.

use crate::frame::Frame;
use crate::types::BoundingBox;

/// ArcFace reference landmark positions for a 112x112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Estimate the least-squares similarity transform from `src` to `dst`.
///
/// Returns [a, -b, tx, b, a, ty] representing:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
///
/// With both point sets centered, the optimum has the closed form
/// `a = sum(s·d) / sum(|s|^2)`, `b = sum(s×d) / sum(|s|^2)` (dot and cross
/// products of the centered pairs); the translation then maps the source
/// centroid onto the destination centroid.
fn estimate_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    let n = src.len() as f32;
    let src_mean = (
        src.iter().map(|p| p.0).sum::<f32>() / n,
        src.iter().map(|p| p.1).sum::<f32>() / n,
    );
    let dst_mean = (
        dst.iter().map(|p| p.0).sum::<f32>() / n,
        dst.iter().map(|p| p.1).sum::<f32>() / n,
    );

    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    let mut src_norm = 0.0f32;

    for (s, d) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (s.0 - src_mean.0, s.1 - src_mean.1);
        let (dx, dy) = (d.0 - dst_mean.0, d.1 - dst_mean.1);
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
        src_norm += sx * sx + sy * sy;
    }

    if src_norm < 1e-12 {
        // Collapsed landmarks; identity keeps the warp well-defined.
        return [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    }

    let a = dot / src_norm;
    let b = cross / src_norm;
    let tx = dst_mean.0 - a * src_mean.0 + b * src_mean.1;
    let ty = dst_mean.1 - b * src_mean.0 - a * src_mean.1;

    [a, -b, tx, b, a, ty]
}

/// Apply the inverse of a similarity transform to produce an aligned BGR
/// output crop, sampling the source bilinearly per channel. Out-of-frame
/// samples are black.
fn warp_similarity(frame: &Frame, matrix: &[f32; 6], out_size: usize) -> Vec<u8> {
    let a = matrix[0];
    let tx = matrix[2];
    let b = matrix[3];
    let ty = matrix[5];

    let mut output = vec![0u8; out_size * out_size * 3];

    // Invert the 2x2 rotation-scale part: det = a^2 + b^2.
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return output;
    }
    let ia = a / det;
    let ib = b / det;

    for oy in 0..out_size {
        for ox in 0..out_size {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let (bch, gch, rch) = sample_bilinear(frame, sx, sy);
            let base = (oy * out_size + ox) * 3;
            output[base] = bch;
            output[base + 1] = gch;
            output[base + 2] = rch;
        }
    }

    output
}

/// Bilinear BGR sample at a float position; out-of-bounds taps read as 0.
fn sample_bilinear(frame: &Frame, sx: f32, sy: f32) -> (u8, u8, u8) {
    let x0 = sx.floor() as i64;
    let y0 = sy.floor() as i64;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let tap = |x: i64, y: i64| -> (f32, f32, f32) {
        if x >= 0 && x < i64::from(frame.width()) && y >= 0 && y < i64::from(frame.height()) {
            let (b, g, r) = frame.bgr_at(x as u32, y as u32);
            (b as f32, g as f32, r as f32)
        } else {
            (0.0, 0.0, 0.0)
        }
    };

    let tl = tap(x0, y0);
    let tr = tap(x0 + 1, y0);
    let bl = tap(x0, y0 + 1);
    let br = tap(x0 + 1, y0 + 1);

    let mix = |tl: f32, tr: f32, bl: f32, br: f32| -> u8 {
        let v = tl * (1.0 - fx) * (1.0 - fy)
            + tr * fx * (1.0 - fy)
            + bl * (1.0 - fx) * fy
            + br * fx * fy;
        v.round().clamp(0.0, 255.0) as u8
    };

    (
        mix(tl.0, tr.0, bl.0, br.0),
        mix(tl.1, tr.1, bl.1, br.1),
        mix(tl.2, tr.2, bl.2, br.2),
    )
}

/// Align a detected face to the canonical 112x112 BGR crop using its
/// five-point landmarks.
pub fn align_face(frame: &Frame, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    let matrix = estimate_similarity(landmarks, &REFERENCE_LANDMARKS_112);
    warp_similarity(frame, &matrix, ALIGNED_SIZE)
}

/// Landmark-free fallback: crop the bounding box and resize it bilinearly to
/// the canonical 112x112 BGR crop.
pub fn crop_resize(frame: &Frame, location: &BoundingBox) -> Vec<u8> {
    let out = ALIGNED_SIZE;
    let scale_x = location.width() as f32 / out as f32;
    let scale_y = location.height() as f32 / out as f32;

    let mut output = vec![0u8; out * out * 3];
    for oy in 0..out {
        let sy = location.top as f32 + (oy as f32 + 0.5) * scale_y - 0.5;
        for ox in 0..out {
            let sx = location.left as f32 + (ox as f32 + 0.5) * scale_x - 0.5;
            let (b, g, r) = sample_bilinear(frame, sx, sy);
            let base = (oy * out + ox) * 3;
            output[base] = b;
            output[base + 1] = g;
            output[base + 2] = r;
        }
    }
    output
}
