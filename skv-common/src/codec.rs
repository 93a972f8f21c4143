//! # JSON Value Shim
//!
//! Purpose: Store typed values as JSON text, both as plain string values and
//! as individual hash fields.
//!
//! ## Design Principles
//! 1. **Serde Everywhere**: Any `Serialize`/`DeserializeOwned` type can be stored.
//! 2. **Per-Field Encoding**: Hash fields hold one JSON document each, so a
//!    nested value round-trips while flat fields stay readable in the store.
//! 3. **Lenient Reads**: Text written by other tools can still be read as a
//!    `serde_json::Value`.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{SkvError, SkvResult};

/// Serializes a value to JSON text.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> SkvResult<String> {
    serde_json::to_string(value).map_err(SkvError::Encode)
}

/// Deserializes JSON text read from `key`.
pub fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> SkvResult<T> {
    serde_json::from_str(raw).map_err(|source| SkvError::Decode {
        key: key.to_string(),
        source,
    })
}

/// Deserializes a JSON payload given as raw bytes, such as a pub/sub message.
pub fn decode_slice<T: DeserializeOwned>(key: &str, raw: &[u8]) -> SkvResult<T> {
    serde_json::from_slice(raw).map_err(|source| SkvError::Decode {
        key: key.to_string(),
        source,
    })
}

/// Parses JSON text, falling back to a JSON string holding `raw` verbatim.
pub fn decode_lenient(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Encodes every field value of a hash write.
pub fn encode_fields<I, K, V>(fields: I) -> SkvResult<Vec<(String, String)>>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Serialize,
{
    fields
        .into_iter()
        .map(|(field, value)| Ok((field.into(), encode(&value)?)))
        .collect()
}

/// Splits a value that serializes to a JSON object into encoded hash fields.
pub fn encode_object<T: Serialize + ?Sized>(key: &str, value: &T) -> SkvResult<Vec<(String, String)>> {
    match serde_json::to_value(value).map_err(SkvError::Encode)? {
        Value::Object(map) => encode_fields(map),
        _ => Err(SkvError::NotAnObject(key.to_string())),
    }
}

/// Decodes every field of a hash read.
pub fn decode_fields<T: DeserializeOwned>(
    key: &str,
    fields: HashMap<String, String>,
) -> SkvResult<HashMap<String, T>> {
    fields
        .into_iter()
        .map(|(field, raw)| {
            let value = serde_json::from_str(&raw).map_err(|source| SkvError::Decode {
                key: format!("{}#{}", key, field),
                source,
            })?;
            Ok((field, value))
        })
        .collect()
}

/// Rebuilds a typed value from hash fields written by `encode_object`.
///
/// Fields that are not valid JSON are kept as strings.
pub fn decode_object<T: DeserializeOwned>(key: &str, fields: HashMap<String, String>) -> SkvResult<T> {
    let map: Map<String, Value> = fields
        .into_iter()
        .map(|(field, raw)| {
            let value = decode_lenient(&raw);
            (field, value)
        })
        .collect();
    serde_json::from_value(Value::Object(map)).map_err(|source| SkvError::Decode {
        key: key.to_string(),
        source,
    })
}
