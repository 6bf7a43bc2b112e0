//! Payload encoding and decoding
//!
//! Queues and storages are generic over `Serialize + DeserializeOwned`
//! and go through serde_json on the wire. Codec failures carry the
//! original serde error, untouched.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encode a value into its wire representation
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    let raw = serde_json::to_vec(value)?;
    Ok(Bytes::from(raw))
}

/// Decode a wire payload back into a value
pub fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(raw)?)
}
