//! # Error Types
//!
//! Errors raised before a command ever reaches the store: malformed keys,
//! JSON conversion failures and bad configuration.

use thiserror::Error;

/// Result type shared by the common crate.
pub type SkvResult<T> = Result<T, SkvError>;

/// Errors surfaced by key construction, the JSON shim and configuration.
#[derive(Error, Debug)]
pub enum SkvError {
    /// Key or key part was empty or otherwise unusable.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Value could not be serialized to JSON.
    #[error("json encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Stored text could not be decoded into the requested type.
    #[error("json decoding failed for `{key}`: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Hash helpers need values that serialize to a JSON object.
    #[error("value for hash `{0}` is not a JSON object")]
    NotAnObject(String),

    #[error("configuration error: {0}")]
    Config(String),
}
