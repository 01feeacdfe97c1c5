use serde::{Deserialize, Serialize};
use std::fmt;

/// Name reported for a face that matched no registered identity.
///
/// Results carrying this name together with confidence 0.0 are produced only
/// through [`MatchResult::unknown`]; a registered person is never given this
/// name by the engine.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Axis-aligned face region in image pixel space.
///
/// Coordinates are in (top, right, bottom, left) order. Boxes are created by
/// clamping raw detector output against the image bounds
/// ([`crate::geometry::clamp_box`]), which guarantees `bottom > top` and
/// `right > left` — degenerate boxes are dropped, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[top={} right={} bottom={} left={}]",
            self.top, self.right, self.bottom, self.left
        )
    }
}

/// Fixed-length face embedding vector.
///
/// The length is backend-defined; the first embedding observed in a process
/// fixes it for the remainder of the run, and every vector compared or stored
/// afterwards must have the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance to another embedding of the same length.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One detected face, before identity matching.
///
/// `landmarks` are the five-point facial landmarks
/// [left_eye, right_eye, nose, left_mouth, right_mouth] when the detector
/// provides them. `embedding` is filled only by joint detect-and-embed
/// backends; the pipeline then skips the separate embedding step for this
/// face.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub location: BoundingBox,
    pub confidence: f32,
    pub landmarks: Option<[(f32, f32); 5]>,
    pub embedding: Option<Embedding>,
}

/// Detections produced by one method during a fusion pass. Intermediate,
/// never persisted.
#[derive(Debug)]
pub struct DetectionReport {
    pub faces: Vec<DetectedFace>,
    pub source: &'static str,
}

/// Result of matching one detected face against the gallery.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub name: String,
    /// Monotonic display score in [0, 1]: 1.0 at distance zero, decaying
    /// linearly to 0.0 at the tolerance boundary. Not a probability.
    pub confidence: f32,
    pub location: BoundingBox,
}

impl MatchResult {
    /// The designated no-match sentinel.
    pub fn unknown(location: BoundingBox) -> Self {
        Self {
            name: UNKNOWN_NAME.to_string(),
            confidence: 0.0,
            location,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.name == UNKNOWN_NAME && self.confidence == 0.0
    }
}

/// Which detector(s) a detection pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    /// The backend-native detector only.
    Primary,
    /// The classical cascade only. Requires a configured cascade model.
    Secondary,
    /// Union of both, deduplicated.
    Both,
}

impl DetectionMethod {
    /// Parse a method selector leniently: unrecognized values fall back to
    /// the primary detector instead of failing startup.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "primary" => DetectionMethod::Primary,
            "secondary" => DetectionMethod::Secondary,
            "both" => DetectionMethod::Both,
            other => {
                tracing::warn!(
                    method = other,
                    "unrecognized detection method, falling back to primary"
                );
                DetectionMethod::Primary
            }
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DetectionMethod::Primary => "primary",
            DetectionMethod::Secondary => "secondary",
            DetectionMethod::Both => "both",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box() -> BoundingBox {
        BoundingBox {
            top: 10,
            right: 110,
            bottom: 120,
            left: 20,
        }
    }

    #[test]
    fn test_box_dimensions() {
        let b = make_box();
        assert_eq!(b.width(), 90);
        assert_eq!(b.height(), 110);
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![1.0, 2.0, 3.0]);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_pythagorean() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_sentinel() {
        let r = MatchResult::unknown(make_box());
        assert_eq!(r.name, UNKNOWN_NAME);
        assert_eq!(r.confidence, 0.0);
        assert!(r.is_unknown());
    }

    #[test]
    fn test_named_result_is_not_unknown() {
        let r = MatchResult {
            name: "alice".into(),
            confidence: 0.9,
            location: make_box(),
        };
        assert!(!r.is_unknown());
    }

    #[test]
    fn test_parse_lenient_known_methods() {
        assert_eq!(
            DetectionMethod::parse_lenient("primary"),
            DetectionMethod::Primary
        );
        assert_eq!(
            DetectionMethod::parse_lenient("Secondary"),
            DetectionMethod::Secondary
        );
        assert_eq!(
            DetectionMethod::parse_lenient(" both "),
            DetectionMethod::Both
        );
    }

    #[test]
    fn test_parse_lenient_falls_back_to_primary() {
        assert_eq!(
            DetectionMethod::parse_lenient("cnn"),
            DetectionMethod::Primary
        );
        assert_eq!(DetectionMethod::parse_lenient(""), DetectionMethod::Primary);
    }
}
