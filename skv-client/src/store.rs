//! # Store API
//!
//! Purpose: Expose a compact async API for namespaced string, hash and bulk
//! pattern commands, with values stored as JSON.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Store` hides namespacing and JSON framing.
//! 2. **Cheap Clones**: A `Store` is a multiplexed connection plus shared
//!    settings, so cloning it shares one socket.
//! 3. **Cursor Scans**: Bulk operations walk `SCAN` instead of blocking the
//!    server with `KEYS`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use skv_common::codec;
use skv_common::{Namespace, StoreConfig};

use crate::error::{ClientError, ClientResult};

/// Bound on `QUIT` during shutdown when the instance sets no connect timeout.
pub const DEFAULT_QUIT_TIMEOUT: Duration = Duration::from_secs(5);

/// TTL state returned by the store, mirroring Redis semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

struct StoreInner {
    name: String,
    namespace: Namespace,
    scan_count: usize,
    delete_batch: usize,
    quit_timeout: Duration,
}

/// Namespaced handle over one multiplexed connection.
///
/// All key arguments are logical keys; the store applies the namespace.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
    conn: MultiplexedConnection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("namespace", &self.inner.namespace)
            .finish()
    }
}

impl Store {
    /// Opens a multiplexed connection for the instance `name`.
    pub async fn connect(name: &str, config: &StoreConfig) -> ClientResult<Self> {
        config.validate()?;
        let client = redis::Client::open(config.url.as_str())?;
        let conn = match config.connect_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
                .await
                .map_err(|_| ClientError::ConnectTimeout {
                    name: name.to_string(),
                    timeout,
                })??,
            None => client.get_multiplexed_async_connection().await?,
        };
        debug!(instance = name, url = %config.url, "store connected");

        Ok(Store {
            inner: Arc::new(StoreInner {
                name: name.to_string(),
                namespace: config.namespace(),
                scan_count: config.scan_count,
                delete_batch: config.delete_batch,
                quit_timeout: config.connect_timeout().unwrap_or(DEFAULT_QUIT_TIMEOUT),
            }),
            conn,
        })
    }

    /// Instance name this store was created for.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn namespace(&self) -> &Namespace {
        &self.inner.namespace
    }

    /// How long shutdown waits for this store to acknowledge `QUIT`.
    pub fn quit_timeout(&self) -> Duration {
        self.inner.quit_timeout
    }

    /// Joins key parts into a logical key.
    pub fn key<I, S>(&self, parts: I) -> ClientResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self.inner.namespace.key(parts)?)
    }

    /// Pings the server. Returns the reply text.
    pub async fn ping(&self) -> ClientResult<String> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(reply)
    }

    /// Stores a value as JSON without expiration.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> ClientResult<()> {
        let key = self.inner.namespace.qualify(key)?;
        let payload = codec::encode(value)?;
        let mut conn = self.conn.clone();
        let () = redis::cmd("SET").arg(&key).arg(payload).query_async(&mut conn).await?;
        Ok(())
    }

    /// Stores a value as JSON and attaches an expiration in whole seconds.
    pub async fn set_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> ClientResult<()> {
        let seconds = ttl_seconds(ttl)?;
        let key = self.inner.namespace.qualify(key)?;
        let payload = codec::encode(value)?;
        let mut conn = self.conn.clone();
        let () = redis::cmd("SET")
            .arg(&key)
            .arg(payload)
            .arg("EX")
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Fetches and decodes a value. Returns `Ok(None)` when the key is missing.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> ClientResult<Option<T>> {
        match self.get_raw(key).await? {
            Some(raw) => Ok(Some(codec::decode(key, &raw)?)),
            None => Ok(None),
        }
    }

    /// Fetches the stored text without decoding it.
    pub async fn get_raw(&self, key: &str) -> ClientResult<Option<String>> {
        let key = self.inner.namespace.qualify(key)?;
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
        Ok(raw)
    }

    /// Fetches a value as JSON, keeping non-JSON text as a string.
    pub async fn get_lenient(&self, key: &str) -> ClientResult<Option<Value>> {
        Ok(self.get_raw(key).await?.map(|raw| codec::decode_lenient(&raw)))
    }

    /// Deletes a key. Returns true when a key was removed.
    pub async fn delete(&self, key: &str) -> ClientResult<bool> {
        let key = self.inner.namespace.qualify(key)?;
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub async fn expire(&self, key: &str, ttl: Duration) -> ClientResult<bool> {
        let seconds = ttl_seconds(ttl)?;
        let key = self.inner.namespace.qualify(key)?;
        let mut conn = self.conn.clone();
        let applied: i64 = redis::cmd("EXPIRE").arg(&key).arg(seconds).query_async(&mut conn).await?;
        Ok(applied == 1)
    }

    /// Returns TTL status for a key.
    pub async fn ttl(&self, key: &str) -> ClientResult<KeyTtl> {
        let key = self.inner.namespace.qualify(key)?;
        let mut conn = self.conn.clone();
        let value: i64 = redis::cmd("TTL").arg(&key).query_async(&mut conn).await?;
        Ok(match value {
            -1 => KeyTtl::NoExpiry,
            v if v >= 0 => KeyTtl::ExpiresIn(Duration::from_secs(v as u64)),
            _ => KeyTtl::Missing,
        })
    }

    /// Writes hash fields, each value encoded as JSON.
    ///
    /// Returns the number of newly added fields. An empty input sends nothing.
    pub async fn hset<I, K, V>(&self, key: &str, fields: I) -> ClientResult<usize>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Serialize,
    {
        let fields = codec::encode_fields(fields)?;
        self.hset_encoded(key, fields).await
    }

    /// Writes every top-level field of a value that serializes to an object.
    pub async fn hset_object<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> ClientResult<usize> {
        let fields = codec::encode_object(key, value)?;
        self.hset_encoded(key, fields).await
    }

    async fn hset_encoded(&self, key: &str, fields: Vec<(String, String)>) -> ClientResult<usize> {
        let key = self.inner.namespace.qualify(key)?;
        if fields.is_empty() {
            return Ok(0);
        }

        let mut cmd = redis::cmd("HSET");
        cmd.arg(&key);
        for (field, value) in &fields {
            cmd.arg(field).arg(value);
        }
        let mut conn = self.conn.clone();
        let added: i64 = cmd.query_async(&mut conn).await?;
        Ok(added.max(0) as usize)
    }

    /// Reads all hash fields, decoding each value from JSON.
    pub async fn hgetall<T: DeserializeOwned>(&self, key: &str) -> ClientResult<HashMap<String, T>> {
        let raw = self.hgetall_raw(key).await?;
        Ok(codec::decode_fields(key, raw)?)
    }

    /// Rebuilds a value written with `hset_object`. Returns `Ok(None)` for a
    /// missing hash.
    pub async fn hgetall_object<T: DeserializeOwned>(&self, key: &str) -> ClientResult<Option<T>> {
        let raw = self.hgetall_raw(key).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(codec::decode_object(key, raw)?))
    }

    async fn hgetall_raw(&self, key: &str) -> ClientResult<HashMap<String, String>> {
        let key = self.inner.namespace.qualify(key)?;
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = redis::cmd("HGETALL").arg(&key).query_async(&mut conn).await?;
        Ok(raw)
    }

    /// Lists logical keys matching a glob pattern inside the namespace.
    ///
    /// Keys that are not valid UTF-8 are converted lossily, so a listed name
    /// may not round-trip. `count` and `clear` work on the raw bytes.
    pub async fn keys(&self, pattern: &str) -> ClientResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .scan(pattern)
            .await?
            .iter()
            .map(|key| {
                let text = String::from_utf8_lossy(key);
                self.inner.namespace.strip(&text).to_string()
            })
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    /// Counts keys matching a glob pattern inside the namespace.
    pub async fn count(&self, pattern: &str) -> ClientResult<usize> {
        let total = self.scan(pattern).await?.len();
        debug!(instance = %self.inner.name, pattern, total, "counted keys");
        Ok(total)
    }

    /// Deletes every key matching a glob pattern inside the namespace.
    ///
    /// Keys are removed with `DEL` in batches of `delete_batch`. Returns the
    /// number of keys the server reported as deleted.
    pub async fn clear(&self, pattern: &str) -> ClientResult<usize> {
        let keys = self.scan(pattern).await?;
        let mut conn = self.conn.clone();
        let mut deleted = 0usize;
        for batch in keys.chunks(self.inner.delete_batch) {
            let removed: i64 = redis::cmd("DEL").arg(batch).query_async(&mut conn).await?;
            deleted += removed.max(0) as usize;
        }
        debug!(instance = %self.inner.name, pattern, matched = keys.len(), deleted, "cleared keys");
        Ok(deleted)
    }

    /// Walks `SCAN` to completion and returns distinct qualified keys as
    /// raw bytes.
    async fn scan(&self, pattern: &str) -> ClientResult<Vec<Vec<u8>>> {
        let pattern = self.inner.namespace.qualify_pattern(pattern);
        let mut conn = self.conn.clone();
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut cursor = 0u64;

        loop {
            let (next, batch): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.inner.scan_count)
                .query_async(&mut conn)
                .await?;
            for key in batch {
                // SCAN may return a key more than once.
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    /// Publishes a JSON payload on a namespaced channel.
    ///
    /// Returns the number of subscribers that received it.
    pub async fn publish<T: Serialize + ?Sized>(&self, channel: &str, message: &T) -> ClientResult<usize> {
        let channel = self.inner.namespace.qualify(channel)?;
        let payload = codec::encode(message)?;
        let mut conn = self.conn.clone();
        let receivers: i64 = redis::cmd("PUBLISH").arg(&channel).arg(payload).query_async(&mut conn).await?;
        Ok(receivers.max(0) as usize)
    }

    /// Asks the server to close this connection.
    pub async fn quit(&self) -> ClientResult<()> {
        let mut conn = self.conn.clone();
        let () = redis::cmd("QUIT").query_async(&mut conn).await?;
        debug!(instance = %self.inner.name, "store closed");
        Ok(())
    }
}

fn ttl_seconds(ttl: Duration) -> ClientResult<u64> {
    match ttl.as_secs() {
        0 => Err(ClientError::InvalidTtl),
        seconds => Ok(seconds),
    }
}
