//! JSON codec helpers.
//!
//! Bus payloads are JSON so that browser viewers can produce and consume
//! them without a binary codec.

use serde::{Deserialize, Serialize};

use crate::error::NetError;

/// Encode a value to JSON bytes.
///
/// # Errors
///
/// Returns [`NetError::Json`] if serialisation fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, NetError> {
    serde_json::to_vec(value).map_err(NetError::Json)
}

/// Decode a value from JSON bytes.
///
/// # Errors
///
/// Returns [`NetError::Json`] if deserialisation fails.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, NetError> {
    serde_json::from_slice(bytes).map_err(NetError::Json)
}
