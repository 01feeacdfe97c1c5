//! rollcall-core — face identity matching and detector-fusion engine.
//!
//! Detects faces with one or more interchangeable methods (SCRFD via ONNX
//! Runtime, classical funnel cascade), embeds each face with a pluggable
//! backend (ArcFace), and matches embeddings against a gallery of known
//! identities by nearest-neighbor Euclidean distance with a configurable
//! acceptance tolerance.

pub mod alignment;
pub mod cascade;
pub mod config;
pub mod detector;
pub mod embedder;
pub mod engine;
pub mod frame;
pub mod fusion;
pub mod gallery;
pub mod geometry;
pub mod matcher;
pub mod types;

pub use config::EngineConfig;
pub use engine::{EngineError, FaceEngine};
pub use frame::Frame;
pub use gallery::{Gallery, GalleryError, LoadOutcome};
pub use types::{
    BoundingBox, DetectedFace, DetectionMethod, Embedding, MatchResult, UNKNOWN_NAME,
};
