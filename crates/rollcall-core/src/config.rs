//! Engine configuration, loaded from the environment.

use crate::types::DetectionMethod;
use std::path::PathBuf;

/// Default Euclidean acceptance threshold, tuned for L2-normalized 512-d
/// embeddings. Smaller is stricter.
pub const DEFAULT_TOLERANCE: f32 = 1.10;

/// Configuration surface consumed by [`crate::engine::FaceEngine::new`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Which detector(s) identification runs.
    pub detection_method: DetectionMethod,
    /// Maximum embedding distance for a positive match.
    pub tolerance: f32,
    /// Embedding backend identifier (e.g. "arcface").
    pub backend: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Cascade model for the secondary detector; `None` disables it.
    pub cascade_model_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Load configuration from `ROLLCALL_*` environment variables.
    ///
    /// An unrecognized `ROLLCALL_DETECTION_METHOD` falls back to the primary
    /// detector with a warning; an unknown backend id is deferred to engine
    /// construction, where it fails fast.
    pub fn from_env() -> Self {
        let method = std::env::var("ROLLCALL_DETECTION_METHOD")
            .unwrap_or_else(|_| "both".to_string());

        Self {
            detection_method: DetectionMethod::parse_lenient(&method),
            tolerance: env_f32("ROLLCALL_TOLERANCE", DEFAULT_TOLERANCE),
            backend: std::env::var("ROLLCALL_BACKEND").unwrap_or_else(|_| "arcface".to_string()),
            model_dir: std::env::var("ROLLCALL_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models")),
            cascade_model_path: std::env::var("ROLLCALL_CASCADE_MODEL")
                .ok()
                .map(PathBuf::from),
        }
    }

    /// Path to the primary detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
