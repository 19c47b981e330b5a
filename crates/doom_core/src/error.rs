//! Codec error types.

/// Errors raised while encoding or decoding checkpoints.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The snapshot text is not valid base64.
    #[error("snapshot is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The compressor failed while writing.
    #[error("failed to deflate snapshot: {0}")]
    Deflate(#[from] std::io::Error),

    /// The compressed stream is corrupt.
    #[error("failed to inflate snapshot: {0}")]
    Inflate(#[from] flate2::DecompressError),

    /// The compressed stream ended before its end marker.
    #[error("compressed snapshot is truncated after {0} bytes")]
    Truncated(usize),

    /// The persisted checkpoint document is not valid JSON.
    #[error("malformed checkpoint document: {0}")]
    Json(#[from] serde_json::Error),
}
