//! Network-layer error types.

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to encode or decode a JSON payload.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to encode a frame as PNG.
    #[error("PNG encoding error: {0}")]
    Png(#[from] png::EncodingError),

    /// NATS subscription error.
    #[error("NATS subscribe error: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),

    /// NATS publish error.
    #[error("NATS publish error: {0}")]
    Publish(#[from] async_nats::PublishError),

    /// Published messages could not be flushed to the server.
    #[error("NATS flush error: {0}")]
    Flush(String),

    /// NATS connection error.
    #[error("NATS connection error: {0}")]
    Connect(#[from] async_nats::ConnectError),
}
