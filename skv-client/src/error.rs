use std::time::Duration;

use skv_common::SkvError;
use thiserror::Error;

/// Result type for the async client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the async client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Error reported by the store or the underlying client library.
    #[error("store error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Key, JSON or configuration failure raised before talking to the store.
    #[error(transparent)]
    Common(#[from] SkvError),

    /// Connection could not be established within the configured timeout.
    #[error("connecting instance `{name}` timed out after {timeout:?}")]
    ConnectTimeout { name: String, timeout: Duration },

    /// Expirations are expressed in whole seconds.
    #[error("ttl must be at least one second")]
    InvalidTtl,

    /// The factory was shut down and hands out no more connections.
    #[error("store factory is shut down")]
    Closed,
}
