//! # Key Namespacing
//!
//! Purpose: Build logical keys from parts and map them into a store-wide
//! namespace so several applications can share one keyspace.
//!
//! ## Design Principles
//! 1. **Single Source of Truth**: Every key and channel goes through `Namespace`.
//! 2. **Literal Prefixes**: Glob characters in a prefix never act as wildcards.
//! 3. **Fail Fast**: Empty keys and parts are rejected before any round trip.
//!
//! ## Layout
//!
//! ```text
//! prefix = "app", separator = ":"
//!
//! key(["user", "42"])     -> "user:42"
//! qualify("user:42")      -> "app:user:42"
//! qualify_pattern("u*")   -> "app:u*"
//! strip("app:user:42")    -> "user:42"
//! ```

use crate::error::{SkvError, SkvResult};

/// Default separator between key parts.
pub const DEFAULT_SEPARATOR: &str = ":";

/// Characters with special meaning in store glob patterns.
const GLOB_SPECIAL: [char; 5] = ['*', '?', '[', ']', '\\'];

/// Optional key prefix plus the separator used to join key parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: Option<String>,
    separator: String,
}

impl Default for Namespace {
    fn default() -> Self {
        Namespace {
            prefix: None,
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

impl Namespace {
    /// Creates a namespace. An empty prefix is treated as no prefix.
    pub fn new(prefix: Option<String>, separator: impl Into<String>) -> Self {
        Namespace {
            prefix: prefix.filter(|p| !p.is_empty()),
            separator: separator.into(),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Joins key parts with the separator.
    ///
    /// **Input**: one or more non-empty parts.
    /// **Output**: the logical key, without the namespace prefix.
    pub fn key<I, S>(&self, parts: I) -> SkvResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = String::new();
        let mut count = 0usize;
        for part in parts {
            let part = part.as_ref();
            if part.is_empty() {
                return Err(SkvError::InvalidKey(format!("empty part at index {}", count)));
            }
            if count > 0 {
                key.push_str(&self.separator);
            }
            key.push_str(part);
            count += 1;
        }
        if count == 0 {
            return Err(SkvError::InvalidKey("no key parts".to_string()));
        }
        Ok(key)
    }

    /// Maps a logical key into the namespace.
    pub fn qualify(&self, key: &str) -> SkvResult<String> {
        if key.is_empty() {
            return Err(SkvError::InvalidKey("empty key".to_string()));
        }
        Ok(match &self.prefix {
            Some(prefix) => {
                let mut full = String::with_capacity(prefix.len() + self.separator.len() + key.len());
                full.push_str(prefix);
                full.push_str(&self.separator);
                full.push_str(key);
                full
            }
            None => key.to_string(),
        })
    }

    /// Maps a glob pattern into the namespace.
    ///
    /// The prefix and separator are escaped so only `pattern` carries
    /// wildcards. An empty pattern matches everything in the namespace.
    pub fn qualify_pattern(&self, pattern: &str) -> String {
        let pattern = if pattern.is_empty() { "*" } else { pattern };
        match &self.prefix {
            Some(prefix) => {
                let mut full = escape_glob(prefix);
                full.push_str(&escape_glob(&self.separator));
                full.push_str(pattern);
                full
            }
            None => pattern.to_string(),
        }
    }

    /// Removes the namespace prefix from a key returned by the store.
    ///
    /// Keys outside the namespace are returned unchanged.
    pub fn strip<'a>(&self, qualified: &'a str) -> &'a str {
        let Some(prefix) = &self.prefix else {
            return qualified;
        };
        qualified
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_prefix(self.separator.as_str()))
            .unwrap_or(qualified)
    }
}

/// Escapes glob metacharacters with a backslash.
pub fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if GLOB_SPECIAL.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
