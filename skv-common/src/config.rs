//! Configuration for ScopeKV

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{SkvError, SkvResult};
use crate::key::{Namespace, DEFAULT_SEPARATOR};

/// Name used for the instance returned by `default_store`.
pub const DEFAULT_INSTANCE: &str = "default";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Settings every instance starts from
    pub store: StoreConfig,

    /// Per-instance overrides keyed by instance name
    pub instances: BTreeMap<String, StoreOverrides>,
}

/// Connection and keyspace settings for one store instance
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store URL, e.g. "redis://127.0.0.1:6379/0"
    pub url: String,

    /// Prefix applied to every key and channel (none when unset)
    pub namespace: Option<String>,

    /// Separator between key parts
    pub separator: String,

    /// COUNT hint passed to SCAN
    pub scan_count: usize,

    /// Maximum keys per DEL when clearing a pattern
    pub delete_batch: usize,

    /// Connect timeout in milliseconds (0 = no timeout)
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/".to_string(),
            namespace: None,
            separator: DEFAULT_SEPARATOR.to_string(),
            scan_count: 100,
            delete_batch: 500,
            connect_timeout_ms: 0,
        }
    }
}

impl StoreConfig {
    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.namespace.clone(), self.separator.clone())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    /// Checks values that would make bulk operations misbehave.
    pub fn validate(&self) -> SkvResult<()> {
        if self.url.is_empty() {
            return Err(SkvError::Config("url must not be empty".to_string()));
        }
        if self.separator.is_empty() {
            return Err(SkvError::Config("separator must not be empty".to_string()));
        }
        if self.scan_count == 0 {
            return Err(SkvError::Config("scan_count must be positive".to_string()));
        }
        if self.delete_batch == 0 {
            return Err(SkvError::Config("delete_batch must be positive".to_string()));
        }
        Ok(())
    }
}

/// Instance-level overrides; unset fields inherit from `[store]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreOverrides {
    pub url: Option<String>,
    pub namespace: Option<String>,
    pub separator: Option<String>,
    pub scan_count: Option<usize>,
    pub delete_batch: Option<usize>,
    pub connect_timeout_ms: Option<u64>,
}

impl StoreOverrides {
    fn apply(&self, base: &StoreConfig) -> StoreConfig {
        StoreConfig {
            url: self.url.clone().unwrap_or_else(|| base.url.clone()),
            namespace: self.namespace.clone().or_else(|| base.namespace.clone()),
            separator: self.separator.clone().unwrap_or_else(|| base.separator.clone()),
            scan_count: self.scan_count.unwrap_or(base.scan_count),
            delete_batch: self.delete_batch.unwrap_or(base.delete_batch),
            connect_timeout_ms: self.connect_timeout_ms.unwrap_or(base.connect_timeout_ms),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> SkvResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SkvError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> SkvResult<Self> {
        toml::from_str(contents).map_err(|e| SkvError::Config(format!("failed to parse config: {e}")))
    }

    /// Applies `SKV_*` variables on top of `[store]`.
    ///
    /// `var` looks up one variable by name; pass
    /// `|name| std::env::var(name).ok()` for the process environment.
    /// Unparsable numbers are ignored and an empty `SKV_NAMESPACE` clears
    /// the namespace.
    pub fn apply_env_with(&mut self, var: impl Fn(&str) -> Option<String>) {
        let store = &mut self.store;

        if let Some(url) = var("SKV_URL") {
            store.url = url;
        }

        if let Some(namespace) = var("SKV_NAMESPACE") {
            store.namespace = Some(namespace).filter(|ns| !ns.is_empty());
        }

        if let Some(separator) = var("SKV_SEPARATOR") {
            store.separator = separator;
        }

        if let Some(n) = var("SKV_SCAN_COUNT").and_then(|v| v.parse().ok()) {
            store.scan_count = n;
        }

        if let Some(n) = var("SKV_DELETE_BATCH").and_then(|v| v.parse().ok()) {
            store.delete_batch = n;
        }

        if let Some(ms) = var("SKV_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            store.connect_timeout_ms = ms;
        }
    }

    /// Resolved settings for a named instance
    pub fn instance(&self, name: &str) -> StoreConfig {
        match self.instances.get(name) {
            Some(overrides) => overrides.apply(&self.store),
            None => self.store.clone(),
        }
    }

    /// Validates the base settings and every instance
    pub fn validate(&self) -> SkvResult<()> {
        self.store.validate()?;
        for name in self.instances.keys() {
            self.instance(name)
                .validate()
                .map_err(|e| SkvError::Config(format!("instance `{name}`: {e}")))?;
        }
        Ok(())
    }
}
