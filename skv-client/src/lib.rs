//! # ScopeKV Async Client
//!
//! Purpose: Provide a namespaced, JSON-aware veneer over a Redis-compatible
//! store, with named connection instances cached by a factory.
//!
//! ## Design Principles
//! 1. **Delegation**: Protocol, multiplexing and pipelining belong to `redis`.
//! 2. **Instance Cache**: One multiplexed connection per configured name.
//! 3. **Namespaced by Default**: Every key and channel passes through `Namespace`.
//! 4. **Typed Values**: Values cross the wire as JSON via `skv_common::codec`.

mod error;
mod factory;
mod pubsub;
mod store;

pub use error::{ClientError, ClientResult};
pub use factory::StoreFactory;
pub use pubsub::{Message, Subscriber};
pub use store::{KeyTtl, Store, DEFAULT_QUIT_TIMEOUT};

pub use skv_common::{Config, Namespace, StoreConfig, StoreOverrides, DEFAULT_INSTANCE};
