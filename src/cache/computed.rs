//! Registry of regeneration factories for computed cache entries
//!
//! A key is registered after `get_or_set` computes and stores its value on a
//! miss. The registry lives in process memory only: it is neither persisted
//! nor shared between instances, so registrations vanish on restart.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;

/// Type-erased regeneration function producing a JSON value
pub type Factory = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<serde_json::Value>> + Send + Sync>;

/// Entry key → factory map
#[derive(Default)]
pub struct ComputedCacheRegistry {
    factories: RwLock<HashMap<String, Factory>>,
}

impl ComputedCacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the factory for `key`
    pub fn register(&self, key: &str, factory: Factory) {
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), factory);
    }

    pub fn get(&self, key: &str) -> Option<Factory> {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Returns true when a factory was registered
    pub fn unregister(&self, key: &str) -> bool {
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.factories.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
