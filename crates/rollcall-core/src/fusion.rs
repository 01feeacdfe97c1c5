//! Detection fusion — one deduplicated face list from one or more methods.

use crate::detector::FaceDetector;
use crate::frame::Frame;
use crate::geometry;
use crate::types::{DetectedFace, DetectionMethod, DetectionReport};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("secondary detection requested but no cascade detector is configured")]
    SecondaryNotConfigured,
}

/// Runs the configured detector(s) and merges their outputs.
///
/// The primary detector is mandatory; the secondary (classical cascade) is
/// optional. Backend failures degrade to whatever the other method produced
/// — a crashing detector and a detector that found nothing both end as
/// "zero faces" for the caller, but are logged distinctly.
pub struct DetectionFusion {
    primary: Box<dyn FaceDetector>,
    secondary: Option<Box<dyn FaceDetector>>,
}

impl DetectionFusion {
    pub fn new(
        primary: Box<dyn FaceDetector>,
        secondary: Option<Box<dyn FaceDetector>>,
    ) -> Self {
        Self { primary, secondary }
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    /// Detect faces with the requested method, deduplicated across methods.
    ///
    /// Ordering is deterministic: primary detections first, then secondary,
    /// each in its detector's own (confidence-sorted) order. The dedup pass
    /// is linear over candidates: a box overlapping any already-accepted box
    /// (per [`geometry::boxes_overlap`]) is discarded. O(n^2) in faces per
    /// frame, fine for the handful of faces a frame actually holds.
    pub fn detect(
        &mut self,
        frame: &Frame,
        method: DetectionMethod,
    ) -> Result<Vec<DetectedFace>, FusionError> {
        if method == DetectionMethod::Secondary && self.secondary.is_none() {
            return Err(FusionError::SecondaryNotConfigured);
        }

        let mut reports: Vec<DetectionReport> = Vec::new();

        if matches!(method, DetectionMethod::Primary | DetectionMethod::Both) {
            match self.primary.detect(frame) {
                Ok(faces) => {
                    tracing::debug!(
                        source = self.primary.name(),
                        count = faces.len(),
                        "detector pass complete"
                    );
                    reports.push(DetectionReport {
                        faces,
                        source: self.primary.name(),
                    });
                }
                Err(err) => {
                    // A crash, not zero detections.
                    tracing::error!(
                        source = self.primary.name(),
                        error = %err,
                        "primary detector failed"
                    );
                    if method == DetectionMethod::Primary || self.secondary.is_none() {
                        return Ok(Vec::new());
                    }
                    tracing::warn!("continuing with secondary detections only");
                }
            }
        }

        if matches!(method, DetectionMethod::Secondary | DetectionMethod::Both) {
            if let Some(secondary) = self.secondary.as_mut() {
                match secondary.detect(frame) {
                    Ok(faces) => {
                        tracing::debug!(
                            source = secondary.name(),
                            count = faces.len(),
                            "detector pass complete"
                        );
                        reports.push(DetectionReport {
                            faces,
                            source: secondary.name(),
                        });
                    }
                    Err(err) => {
                        tracing::error!(
                            source = secondary.name(),
                            error = %err,
                            "secondary detector failed"
                        );
                        // Both: primary results stand. Secondary-only: a
                        // transient backend failure degrades to zero faces;
                        // only a missing cascade is the configuration error.
                    }
                }
            }
        }

        Ok(merge_reports(reports))
    }
}

/// Concatenate reports in method order, dropping candidates that overlap an
/// already-accepted box.
fn merge_reports(reports: Vec<DetectionReport>) -> Vec<DetectedFace> {
    let mut accepted: Vec<DetectedFace> = Vec::new();

    for report in reports {
        let source = report.source;
        for face in report.faces {
            let duplicate = accepted
                .iter()
                .any(|kept| geometry::boxes_overlap(&kept.location, &face.location));
            if duplicate {
                tracing::debug!(source, location = %face.location, "dropping duplicate detection");
            } else {
                accepted.push(face);
            }
        }
    }

    accepted
}
