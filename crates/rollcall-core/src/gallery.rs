//! The known-identities store and its persisted blob.
//!
//! Names and encodings are held as a matched pair of parallel lists; readers
//! always see both from the same generation because every mutation happens
//! through one `&mut` method. Persistence is a single JSON blob that records
//! the producing embedding model and dimension, so loading data from a
//! different backend generation fails loudly instead of corrupting
//! recognition.

use crate::types::Embedding;
use ndarray::{aview1, Array2};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("gallery blob was produced by model {found}, active backend is {active}")]
    ModelMismatch { found: String, active: String },
    #[error("corrupt gallery blob: {0}")]
    Corrupt(String),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of a gallery load.
#[derive(Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Blob found and adopted; carries the entry count.
    Loaded(usize),
    /// No blob at the given path — first-run behavior, the empty gallery is
    /// valid.
    NotFound,
}

/// Compatibility inputs checked against a blob before it is adopted.
#[derive(Debug, Clone, Copy)]
pub struct BlobCompat<'a> {
    /// Identifier of the active embedding backend.
    pub model_id: &'a str,
    /// Embedding size already established in this process, if any.
    pub embedding_size: Option<usize>,
}

#[derive(Serialize, Deserialize)]
struct GalleryBlob {
    names: Vec<String>,
    encodings: Vec<Vec<f32>>,
    embedding_model_id: String,
    embedding_size: usize,
}

/// In-memory table of registered identities.
#[derive(Debug, Default)]
pub struct Gallery {
    names: Vec<String>,
    encodings: Vec<Embedding>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Dimension of the stored embeddings, once at least one entry exists.
    pub fn embedding_dim(&self) -> Option<usize> {
        self.encodings.first().map(Embedding::len)
    }

    pub fn name_at(&self, index: usize) -> &str {
        &self.names[index]
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Append one identity. A person may be registered several times (one
    /// embedding per photo); names are not unique.
    pub fn add(&mut self, name: impl Into<String>, embedding: Embedding) -> Result<(), GalleryError> {
        if embedding.is_empty() {
            return Err(GalleryError::Corrupt("empty embedding".into()));
        }
        if let Some(expected) = self.embedding_dim() {
            if embedding.len() != expected {
                return Err(GalleryError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }
        self.names.push(name.into());
        self.encodings.push(embedding);
        Ok(())
    }

    /// Drop every entry. Names and encodings empty together; no caller can
    /// observe one list cleared and the other not.
    pub fn clear(&mut self) {
        self.names.clear();
        self.encodings.clear();
        tracing::info!("cleared all registered identities");
    }

    /// Stored encodings as one `(entries x dim)` matrix for vectorized
    /// distance computation. Caller must check `is_empty()` first.
    pub fn encoding_matrix(&self) -> Array2<f32> {
        let dim = self.embedding_dim().unwrap_or(0);
        let mut matrix = Array2::<f32>::zeros((self.encodings.len(), dim));
        for (i, encoding) in self.encodings.iter().enumerate() {
            matrix.row_mut(i).assign(&aview1(&encoding.values));
        }
        matrix
    }

    /// Serialize the gallery to a single blob at `path`.
    pub fn save(&self, path: &Path, model_id: &str) -> Result<(), GalleryError> {
        let blob = GalleryBlob {
            names: self.names.clone(),
            encodings: self
                .encodings
                .iter()
                .map(|e| e.values.clone())
                .collect(),
            embedding_model_id: model_id.to_string(),
            embedding_size: self.embedding_dim().unwrap_or(0),
        };
        let bytes = serde_json::to_vec(&blob)
            .map_err(|e| GalleryError::Corrupt(format!("serialize: {e}")))?;
        std::fs::write(path, bytes)?;
        tracing::info!(count = self.len(), path = %path.display(), "saved gallery");
        Ok(())
    }

    /// Load the blob at `path`, replacing the in-memory table only when
    /// every compatibility check passes. On any error the gallery is left
    /// exactly as it was — incompatible data is never partially adopted.
    pub fn load(&mut self, path: &Path, compat: BlobCompat<'_>) -> Result<LoadOutcome, GalleryError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no gallery blob; starting empty");
                return Ok(LoadOutcome::NotFound);
            }
            Err(err) => return Err(err.into()),
        };

        let blob: GalleryBlob = serde_json::from_slice(&bytes)
            .map_err(|e| GalleryError::Corrupt(format!("deserialize: {e}")))?;

        if blob.names.len() != blob.encodings.len() {
            return Err(GalleryError::Corrupt(format!(
                "{} names vs {} encodings",
                blob.names.len(),
                blob.encodings.len()
            )));
        }
        if let Some(ragged) = blob.encodings.iter().find(|v| v.len() != blob.embedding_size) {
            return Err(GalleryError::Corrupt(format!(
                "encoding of length {} in a {}-dimensional blob",
                ragged.len(),
                blob.embedding_size
            )));
        }
        if blob.embedding_model_id != compat.model_id {
            return Err(GalleryError::ModelMismatch {
                found: blob.embedding_model_id,
                active: compat.model_id.to_string(),
            });
        }
        if let Some(established) = compat.embedding_size {
            if !blob.encodings.is_empty() && blob.embedding_size != established {
                return Err(GalleryError::DimensionMismatch {
                    expected: established,
                    actual: blob.embedding_size,
                });
            }
        }

        self.names = blob.names;
        self.encodings = blob
            .encodings
            .into_iter()
            .map(Embedding::new)
            .collect();

        tracing::info!(count = self.len(), path = %path.display(), "loaded gallery");
        Ok(LoadOutcome::Loaded(self.len()))
    }
}
