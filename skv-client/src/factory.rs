//! # Store Factory
//!
//! Purpose: Hand out one cached `Store` per instance name so callers share
//! multiplexed connections instead of reconnecting.
//!
//! ## Design Principles
//! 1. **Object Cache Pattern**: Keep a map of named, reusable connections.
//! 2. **Single Flight**: The cache lock is held while connecting, so one name
//!    never yields two connections.
//! 3. **Dedicated Subscribers**: Pub/sub connections are never cached because
//!    a subscribed connection cannot run regular commands.
//! 4. **Graceful Shutdown**: `shutdown` closes every cached store once.

use std::collections::HashMap;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{info, warn};

use skv_common::{Config, DEFAULT_INSTANCE};

use crate::error::{ClientError, ClientResult};
use crate::pubsub::Subscriber;
use crate::store::Store;

struct FactoryState {
    stores: HashMap<String, Store>,
    closed: bool,
}

/// Factory and cache of named store instances.
pub struct StoreFactory {
    config: Config,
    state: Mutex<FactoryState>,
}

impl StoreFactory {
    /// Creates a factory after validating every instance configuration.
    pub fn new(config: Config) -> ClientResult<Self> {
        config.validate()?;
        Ok(StoreFactory {
            config,
            state: Mutex::new(FactoryState {
                stores: HashMap::new(),
                closed: false,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the cached store for `name`, connecting on first use.
    pub async fn store(&self, name: &str) -> ClientResult<Store> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ClientError::Closed);
        }
        if let Some(store) = state.stores.get(name) {
            return Ok(store.clone());
        }

        let store = Store::connect(name, &self.config.instance(name)).await?;
        state.stores.insert(name.to_string(), store.clone());
        info!(instance = name, cached = state.stores.len(), "store instance created");
        Ok(store)
    }

    /// Returns the store for the `default` instance.
    pub async fn default_store(&self) -> ClientResult<Store> {
        self.store(DEFAULT_INSTANCE).await
    }

    /// Opens a new dedicated pub/sub connection for `name`.
    pub async fn subscriber(&self, name: &str) -> ClientResult<Subscriber> {
        if self.state.lock().await.closed {
            return Err(ClientError::Closed);
        }
        Subscriber::connect(name, &self.config.instance(name)).await
    }

    /// Names of the currently cached instances, sorted.
    pub async fn instances(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.stores.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Quits every cached store and refuses further acquisitions.
    ///
    /// Returns the number of stores closed. Stores quit concurrently, each
    /// bounded by its `quit_timeout`. Failures and timeouts are logged and do
    /// not stop the remaining stores from closing.
    pub async fn shutdown(&self) -> ClientResult<usize> {
        let stores: Vec<Store> = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.stores.drain().map(|(_, store)| store).collect()
        };

        let total = stores.len();
        join_all(stores.iter().map(|store| async move {
            let timeout = store.quit_timeout();
            match tokio::time::timeout(timeout, store.quit()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(instance = store.name(), error = %err, "quit failed during shutdown"),
                Err(_) => warn!(instance = store.name(), ?timeout, "quit timed out during shutdown"),
            }
        }))
        .await;
        if total > 0 {
            info!(closed = total, "store factory shut down");
        }
        Ok(total)
    }
}
