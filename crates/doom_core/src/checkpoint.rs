//! Checkpoints of the whole simulation memory.
//!
//! A checkpoint is persisted as `{"snapshot": "<base64>", "timestamp": <ms>}`.
//! The snapshot is the raw memory compressed with zlib-wrapped deflate and
//! then base64 encoded (standard alphabet, padded).

use std::io::Write;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Output growth step while inflating.
const INFLATE_CHUNK: usize = 64 * 1024;

/// A serialised snapshot of simulation memory plus the simulation clock at
/// the moment it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Encoded memory, see [`encode`].
    pub snapshot: String,
    /// Simulation clock in milliseconds.
    pub timestamp: f64,
}

impl Checkpoint {
    /// Capture `memory` at simulation time `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Deflate`] if compression fails.
    pub fn capture(memory: &[u8], timestamp: f64) -> Result<Self, CodecError> {
        Ok(Self {
            snapshot: encode(memory)?,
            timestamp,
        })
    }

    /// Decode the snapshot back into raw memory bytes.
    ///
    /// # Errors
    ///
    /// See [`decode`].
    pub fn memory(&self) -> Result<Vec<u8>, CodecError> {
        decode(&self.snapshot)
    }

    /// Serialise to the persisted JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if serialisation fails.
    pub fn to_json(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a persisted JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if the document is malformed.
    pub fn from_json(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compress `memory` and encode it as base64 text.
///
/// # Errors
///
/// Returns [`CodecError::Deflate`] if the compressor fails.
pub fn encode(memory: &[u8]) -> Result<String, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(memory.len() / 8), Compression::default());
    encoder.write_all(memory)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

/// Inverse of [`encode`].
///
/// # Errors
///
/// - [`CodecError::Base64`] if `code` is not valid base64.
/// - [`CodecError::Inflate`] if the compressed stream is corrupt.
/// - [`CodecError::Truncated`] if the stream ends before its end marker.
pub fn decode(code: &str) -> Result<Vec<u8>, CodecError> {
    let compressed = STANDARD.decode(code.trim())?;
    inflate(&compressed)
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut inflater = Decompress::new(true);
    let mut out = Vec::with_capacity(compressed.len().saturating_mul(4).max(INFLATE_CHUNK));

    loop {
        if out.len() == out.capacity() {
            out.reserve(INFLATE_CHUNK);
        }
        let before = (inflater.total_in(), inflater.total_out());
        let consumed = before.0 as usize;
        let status = inflater.decompress_vec(&compressed[consumed..], &mut out, FlushDecompress::None)?;
        if let Status::StreamEnd = status {
            return Ok(out);
        }
        let progressed = (inflater.total_in(), inflater.total_out()) != before;
        if !progressed && out.len() < out.capacity() {
            // All input consumed, room left, and no end marker.
            return Err(CodecError::Truncated(compressed.len()));
        }
    }
}
