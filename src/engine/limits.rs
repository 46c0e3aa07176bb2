// src/engine/limits.rs
//
// Per-input limits enforced before any decoding work is done.

use crate::engine::MAX_PIXELS;
use crate::error::{BulkMediaError, Result};

/// Per-image upload cap.
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputLimits {
    pub max_bytes: Option<u64>,
    pub max_pixels: Option<u64>,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_bytes: Some(DEFAULT_MAX_INPUT_BYTES),
            max_pixels: Some(MAX_PIXELS),
        }
    }
}

impl InputLimits {
    /// No byte or pixel cap beyond the hard decompression-bomb guard in the decoder.
    pub fn unlimited() -> Self {
        Self {
            max_bytes: None,
            max_pixels: None,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_max_pixels(mut self, max_pixels: Option<u64>) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    pub fn enforce_source_len(&self, len: usize) -> Result<()> {
        if let Some(limit) = self.max_bytes {
            let len_u64 = len as u64;
            if len_u64 > limit {
                return Err(BulkMediaError::input_too_large(len_u64, limit));
            }
        }
        Ok(())
    }

    pub fn enforce_pixels(&self, width: u32, height: u32) -> Result<()> {
        if let Some(limit) = self.max_pixels {
            let pixels = width as u64 * height as u64;
            if pixels > limit {
                return Err(BulkMediaError::pixel_count_exceeds_limit(pixels, limit));
            }
        }
        Ok(())
    }
}
