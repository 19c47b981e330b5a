//! Polling-store transport seams.
//!
//! In a polling deployment the simulation writes each frame to an object
//! store under a fixed key and viewers fetch it from there; viewers push
//! input events onto a key queue that the simulation drains once per frame.

use std::future::Future;
use std::io;

use bytes::Bytes;
use tracing::debug;

use doom_core::{DoomKey, InputSink};

/// Errors raised by store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backing service rejected the operation.
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Keys are plain names: ASCII letters, digits, `.`, `_` and `-`.
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
}

/// Put and get opaque objects by key.
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`, replacing any previous object. Readers never
    /// observe a partially written object.
    fn put(&self, key: &str, data: Bytes) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Fetch the object under `key`, or `None` if there is none.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, StoreError>> + Send;
}

/// A queue of input events written by viewers and drained by the simulation.
pub trait KeyQueue: Send + Sync {
    fn push(&self, key: &DoomKey) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove and return every queued event, sorted by timestamp.
    ///
    /// Fails only if the queue cannot be opened at all. An entry that cannot
    /// be read or removed is logged and left queued; the others are still
    /// returned.
    fn drain(&self) -> impl Future<Output = Result<Vec<DoomKey>, StoreError>> + Send;
}

/// Drain `queue` once and deliver the events to `sink` in timestamp order.
/// Returns the number of events forwarded.
///
/// # Errors
///
/// Returns the queue's [`StoreError`]; nothing is forwarded in that case.
pub async fn forward_keys<Q, S>(queue: &Q, sink: &S) -> Result<usize, StoreError>
where
    Q: KeyQueue,
    S: InputSink + ?Sized,
{
    let keys = queue.drain().await?;
    for key in &keys {
        sink.send_key(*key);
    }
    if !keys.is_empty() {
        debug!(count = keys.len(), "forwarded queued input");
    }
    Ok(keys.len())
}

pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
