//! The identity matching engine: detection fusion → embedding → gallery
//! matching.
//!
//! The engine has no internal scheduling — every call is synchronous and
//! processes one image or frame. The gallery is the one shared resource:
//! it lives behind a `RwLock` so matches read names and encodings as a
//! single generation while `add`/`clear`/`load` serialize against them.

use crate::cascade::CascadeDetector;
use crate::config::EngineConfig;
use crate::detector::{DetectorError, FaceDetector, ScrfdDetector};
use crate::embedder::{ArcFaceEmbedder, EmbedderError, EmbeddingBackend};
use crate::frame::{Frame, FrameError};
use crate::fusion::{DetectionFusion, FusionError};
use crate::gallery::{BlobCompat, Gallery, GalleryError, LoadOutcome};
use crate::matcher;
use crate::types::{DetectedFace, DetectionMethod, Embedding, MatchResult};
use std::path::Path;
use std::sync::{OnceLock, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unknown embedding backend: {0}")]
    UnknownBackend(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Fusion(#[from] FusionError),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("no face found in {0}")]
    NoFaceFound(String),
    #[error("could not compute an embedding for the face in {0}")]
    NoEmbedding(String),
}

/// Face identification engine.
pub struct FaceEngine {
    fusion: DetectionFusion,
    embedder: Box<dyn EmbeddingBackend>,
    gallery: RwLock<Gallery>,
    method: DetectionMethod,
    tolerance: f32,
    /// Fixed by the first embedding observed (or the first loaded blob) for
    /// the remainder of the process.
    embedding_size: OnceLock<usize>,
}

impl FaceEngine {
    /// Construct the engine from configuration, loading the configured
    /// backends. Backend initialization failures surface here, before the
    /// engine accepts any calls.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let (primary, embedder): (Box<dyn FaceDetector>, Box<dyn EmbeddingBackend>) =
            match config.backend.as_str() {
                "arcface" | "insightface" => (
                    Box::new(ScrfdDetector::load(&config.detector_model_path())?),
                    Box::new(ArcFaceEmbedder::load(&config.embedder_model_path())?),
                ),
                other => return Err(EngineError::UnknownBackend(other.to_string())),
            };

        let secondary: Option<Box<dyn FaceDetector>> = match &config.cascade_model_path {
            Some(path) => Some(Box::new(CascadeDetector::load(&path.to_string_lossy())?)),
            None => None,
        };

        tracing::info!(
            backend = %config.backend,
            method = %config.detection_method,
            tolerance = config.tolerance,
            cascade = secondary.is_some(),
            "face engine initialized"
        );

        Ok(Self::from_parts(
            primary,
            secondary,
            embedder,
            config.detection_method,
            config.tolerance,
        ))
    }

    /// Wire an engine from caller-supplied backends.
    pub fn from_parts(
        primary: Box<dyn FaceDetector>,
        secondary: Option<Box<dyn FaceDetector>>,
        embedder: Box<dyn EmbeddingBackend>,
        method: DetectionMethod,
        tolerance: f32,
    ) -> Self {
        Self {
            fusion: DetectionFusion::new(primary, secondary),
            embedder,
            gallery: RwLock::new(Gallery::new()),
            method,
            tolerance,
            embedding_size: OnceLock::new(),
        }
    }

    pub fn method(&self) -> DetectionMethod {
        self.method
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Detect faces in an image file with an explicit method.
    pub fn detect_file(
        &mut self,
        path: &Path,
        method: DetectionMethod,
    ) -> Result<Vec<DetectedFace>, EngineError> {
        let frame = Frame::from_file(path)?;
        Ok(self.fusion.detect(&frame, method)?)
    }

    /// Detect faces in a raw BGR frame. A malformed buffer yields zero
    /// faces — a single bad frame must not abort a stream.
    pub fn detect_bgr(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
        method: DetectionMethod,
    ) -> Result<Vec<DetectedFace>, EngineError> {
        let frame = match Frame::from_bgr(data.to_vec(), width, height) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(error = %err, "rejecting malformed frame");
                return Ok(Vec::new());
            }
        };
        Ok(self.fusion.detect(&frame, method)?)
    }

    /// Identify every face in an image file. An unreadable or missing file
    /// is an explicit error.
    pub fn identify_file(&mut self, path: &Path) -> Result<Vec<MatchResult>, EngineError> {
        let frame = Frame::from_file(path)?;
        self.identify(&frame)
    }

    /// Identify every face in a raw BGR frame. A malformed buffer yields an
    /// empty result, never an error.
    pub fn identify_bgr(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<MatchResult>, EngineError> {
        let frame = match Frame::from_bgr(data.to_vec(), width, height) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(error = %err, "rejecting malformed frame");
                return Ok(Vec::new());
            }
        };
        self.identify(&frame)
    }

    fn identify(&mut self, frame: &Frame) -> Result<Vec<MatchResult>, EngineError> {
        let faces = self.fusion.detect(frame, self.method)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        let mut embeddings = Vec::with_capacity(faces.len());
        let mut locations = Vec::with_capacity(faces.len());
        for face in &faces {
            locations.push(face.location);
            embeddings.push(self.embed_face(frame, face));
        }

        let gallery = self.gallery.read().expect("gallery lock poisoned");
        Ok(matcher::match_faces(
            &embeddings,
            &locations,
            &gallery,
            self.tolerance,
        ))
    }

    /// Embed one face, degrading backend failure to "no embedding" so a
    /// single bad crop never aborts the batch.
    fn embed_face(&mut self, frame: &Frame, face: &DetectedFace) -> Option<Embedding> {
        let embedding = if let Some(joint) = &face.embedding {
            // Joint detect-and-embed backend already produced it.
            Some(joint.clone())
        } else {
            match self.embedder.embed(frame, face) {
                Ok(embedding) => embedding,
                Err(err) => {
                    tracing::error!(error = %err, "embedding backend failed for one face");
                    None
                }
            }
        };

        let embedding = embedding?;
        let expected = *self.embedding_size.get_or_init(|| embedding.len());
        if embedding.len() != expected {
            tracing::error!(
                expected,
                actual = embedding.len(),
                "embedding dimension drift; discarding"
            );
            return None;
        }
        Some(embedding)
    }

    /// Register an identity from a photo: embed its best face and append to
    /// the gallery. Registration always uses the native detector so the
    /// embedding benefits from landmarks.
    pub fn register_identity(&mut self, name: &str, path: &Path) -> Result<(), EngineError> {
        let frame = Frame::from_file(path)?;
        let faces = self.fusion.detect(&frame, DetectionMethod::Primary)?;

        let Some(face) = faces.first().cloned() else {
            return Err(EngineError::NoFaceFound(path.display().to_string()));
        };
        if faces.len() > 1 {
            tracing::warn!(
                count = faces.len(),
                path = %path.display(),
                "multiple faces in registration photo; using the highest-confidence one"
            );
        }

        let embedding = self
            .embed_face(&frame, &face)
            .ok_or_else(|| EngineError::NoEmbedding(path.display().to_string()))?;

        let mut gallery = self.gallery.write().expect("gallery lock poisoned");
        gallery.add(name, embedding)?;
        tracing::info!(name, total = gallery.len(), "registered identity");
        Ok(())
    }

    /// Persist the gallery to a single blob at `path`.
    pub fn save_gallery(&self, path: &Path) -> Result<(), EngineError> {
        let gallery = self.gallery.read().expect("gallery lock poisoned");
        gallery.save(path, self.embedder.model_id())?;
        Ok(())
    }

    /// Load the gallery blob at `path`, enforcing backend and dimension
    /// compatibility. On failure the in-memory gallery is unchanged.
    pub fn load_gallery(&self, path: &Path) -> Result<LoadOutcome, EngineError> {
        let mut gallery = self.gallery.write().expect("gallery lock poisoned");
        let outcome = gallery.load(
            path,
            BlobCompat {
                model_id: self.embedder.model_id(),
                embedding_size: self.embedding_size.get().copied(),
            },
        )?;

        if matches!(outcome, LoadOutcome::Loaded(_)) {
            if let Some(dim) = gallery.embedding_dim() {
                let _ = self.embedding_size.set(dim);
            }
        }
        Ok(outcome)
    }

    /// Drop every registered identity.
    pub fn clear_gallery(&self) {
        self.gallery.write().expect("gallery lock poisoned").clear();
    }

    pub fn gallery_len(&self) -> usize {
        self.gallery.read().expect("gallery lock poisoned").len()
    }

    pub fn gallery_names(&self) -> Vec<String> {
        self.gallery
            .read()
            .expect("gallery lock poisoned")
            .names()
            .to_vec()
    }
}
