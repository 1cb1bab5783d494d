//! JSON encoding of stored records

use crate::error::PresenceError;
use kv_store::KeyValue;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Decode a stored record, keeping the key in the error
pub fn decode<T: DeserializeOwned>(kv: &KeyValue) -> Result<T, PresenceError> {
    serde_json::from_str(&kv.value).map_err(|source| PresenceError::Decode {
        key: kv.key.clone(),
        source,
    })
}

/// Encode a record for storage
pub fn encode<T: Serialize>(record: &T) -> Result<String, PresenceError> {
    Ok(serde_json::to_string(record)?)
}
