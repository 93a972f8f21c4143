// skv-common - Shared building blocks for ScopeKV
//
// Key namespacing, the JSON value shim, configuration and the common error type

pub mod codec;
pub mod config;
pub mod error;
pub mod key;

// Re-export for convenience
pub use config::*;
pub use error::*;
pub use key::*;
