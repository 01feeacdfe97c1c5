//! Validated BGR pixel buffers — the engine's only image input type.

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("invalid BGR24 buffer: expected {expected} bytes for {width}x{height}, got {actual}")]
    InvalidLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("failed to read image {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// An 8-bit, 3-channel image in BGR channel order, row-major, interleaved.
///
/// Construction validates shape, so every `Frame` handed to a detector or
/// embedder is known to be a well-formed `height x width x 3` buffer.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    /// Wrap a raw BGR24 buffer, validating that it is non-empty and exactly
    /// `width * height * 3` bytes.
    pub fn from_bgr(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        if width == 0 || height == 0 || data.is_empty() {
            return Err(FrameError::Empty);
        }
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Decode an image file into a BGR frame.
    pub fn from_file(path: &Path) -> Result<Self, FrameError> {
        let decoded = image::open(path).map_err(|source| FrameError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut data = rgb.into_raw();
        for px in data.chunks_exact_mut(3) {
            px.swap(0, 2); // RGB -> BGR
        }
        Self::from_bgr(data, width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Interleaved BGR bytes, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The (b, g, r) triple at pixel (x, y). Callers must stay in bounds.
    pub fn bgr_at(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let base = (y as usize * self.width as usize + x as usize) * 3;
        (self.data[base], self.data[base + 1], self.data[base + 2])
    }

    /// Luma plane (BT.601 weights), for detectors that work on grayscale.
    pub fn to_luma(&self) -> Vec<u8> {
        self.data
            .chunks_exact(3)
            .map(|px| {
                let (b, g, r) = (px[0] as u32, px[1] as u32, px[2] as u32);
                ((299 * r + 587 * g + 114 * b + 500) / 1000) as u8
            })
            .collect()
    }
}
