//! Namespaced cache key construction
//!
//! Keys take the form `prefix:namespace:key`. Namespaces are normalised to
//! lowercase with whitespace runs collapsed to `-`. Anything that still does
//! not look like a namespace afterwards becomes `default`.
//!
//! The entry part is not escaped. Callers that need collision-free keys must
//! keep `:` out of them.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CacheError, CacheResult};

/// Default global key prefix
pub const DEFAULT_PREFIX: &str = "freight";

/// Namespace used when the supplied one is empty or invalid
pub const DEFAULT_NAMESPACE: &str = "default";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static VALID_NAMESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").unwrap());

/// Builds fully qualified cache keys
#[derive(Debug, Clone)]
pub struct KeyCodec {
    prefix: String,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl KeyCodec {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim();
        Self {
            prefix: if prefix.is_empty() {
                DEFAULT_PREFIX.to_string()
            } else {
                prefix.to_string()
            },
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `prefix:normalised-namespace`
    pub fn namespace_key(&self, namespace: &str) -> String {
        format!("{}:{}", self.prefix, normalize_namespace(namespace))
    }

    /// `prefix:normalised-namespace:key`
    pub fn entry_key(&self, namespace: &str, key: &str) -> String {
        format!("{}:{}", self.namespace_key(namespace), key)
    }

    /// Pub/sub channel under the prefix
    pub fn channel(&self, channel: &str) -> String {
        format!("{}:{}", self.prefix, channel)
    }

    /// Scan pattern matching every entry in a namespace
    pub fn namespace_pattern(&self, namespace: &str) -> String {
        format!("{}:*", self.namespace_key(namespace))
    }
}

/// Lowercase, collapse whitespace to `-`, fall back to `default`
pub fn normalize_namespace(namespace: &str) -> String {
    let lowered = namespace.trim().to_lowercase();
    let hyphenated = WHITESPACE.replace_all(&lowered, "-");

    if VALID_NAMESPACE.is_match(&hyphenated) {
        hyphenated.into_owned()
    } else {
        DEFAULT_NAMESPACE.to_string()
    }
}

/// Strict check for callers that want to reject bad namespaces instead of
/// silently landing in `default`.
pub fn validate_namespace(namespace: &str) -> CacheResult<()> {
    let lowered = namespace.trim().to_lowercase();
    let hyphenated = WHITESPACE.replace_all(&lowered, "-");
    if VALID_NAMESPACE.is_match(&hyphenated) {
        Ok(())
    } else {
        Err(CacheError::InvalidArgument(format!(
            "invalid cache namespace: {:?}",
            namespace
        )))
    }
}

/// Entry keys must be non-empty
pub fn validate_key(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        Err(CacheError::InvalidArgument("cache key must not be empty".to_string()))
    } else {
        Ok(())
    }
}
