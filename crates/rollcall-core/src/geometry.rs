//! Bounding-box clamping and cross-detector overlap testing.

use crate::types::BoundingBox;

/// Maximum per-coordinate delta, in pixels, for two boxes to count as the
/// same physical face. A cheap proxy for IoU that tolerates the jitter
/// between detection methods.
pub const OVERLAP_TOLERANCE_PX: u32 = 30;

/// Clip raw box coordinates to `[0, height]` / `[0, width]`.
///
/// Returns `None` when the clipped box is degenerate (`bottom <= top` or
/// `right <= left`); such boxes are dropped, never stored.
pub fn clamp_box(
    width: u32,
    height: u32,
    top: i64,
    right: i64,
    bottom: i64,
    left: i64,
) -> Option<BoundingBox> {
    let top = top.clamp(0, i64::from(height)) as u32;
    let bottom = bottom.clamp(0, i64::from(height)) as u32;
    let left = left.clamp(0, i64::from(width)) as u32;
    let right = right.clamp(0, i64::from(width)) as u32;

    if bottom <= top || right <= left {
        return None;
    }

    Some(BoundingBox {
        top,
        right,
        bottom,
        left,
    })
}

/// Two boxes are the same face when all four coordinate deltas are below
/// [`OVERLAP_TOLERANCE_PX`].
pub fn boxes_overlap(a: &BoundingBox, b: &BoundingBox) -> bool {
    a.top.abs_diff(b.top) < OVERLAP_TOLERANCE_PX
        && a.right.abs_diff(b.right) < OVERLAP_TOLERANCE_PX
        && a.bottom.abs_diff(b.bottom) < OVERLAP_TOLERANCE_PX
        && a.left.abs_diff(b.left) < OVERLAP_TOLERANCE_PX
}
