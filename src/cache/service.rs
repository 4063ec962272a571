//! Public cache API
//!
//! Combines key construction, TTL policy, value encoding and the computed
//! entry registry on top of [`CacheStore`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::cache::backend::{KvBackend, SortOrder};
use crate::cache::codec::ValueCodec;
use crate::cache::computed::{ComputedCacheRegistry, Factory};
use crate::cache::keys::{validate_key, KeyCodec};
use crate::cache::store::CacheStore;
use crate::cache::ttl::{CacheType, TtlPolicy};
use crate::config::CacheSettings;
use crate::error::{CacheError, CacheResult};

/// Outcome of [`CacheService::invalidate_computed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    /// The entry was deleted, regenerated and stored again
    Invalidated,
    /// No factory is registered for the key; nothing was written
    NoFactoryFound,
}

/// Sorted-set member, with its score when requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortedSetMember {
    pub member: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl SortedSetMember {
    pub fn scored(member: &str, score: f64) -> Self {
        Self {
            member: member.to_string(),
            score: Some(score),
        }
    }

    pub fn bare(member: &str) -> Self {
        Self {
            member: member.to_string(),
            score: None,
        }
    }
}

/// Namespaced cache service
pub struct CacheService {
    store: CacheStore,
    keys: KeyCodec,
    ttl: TtlPolicy,
    registry: ComputedCacheRegistry,
}

impl CacheService {
    pub fn new(store: CacheStore, keys: KeyCodec, ttl: TtlPolicy) -> Self {
        Self {
            store,
            keys,
            ttl,
            registry: ComputedCacheRegistry::new(),
        }
    }

    /// Build from cache settings on top of a backend
    pub fn from_settings(backend: Arc<dyn KvBackend>, settings: &CacheSettings) -> Self {
        Self::new(
            CacheStore::new(backend, ValueCodec::new(settings.compression)),
            KeyCodec::new(&settings.key_prefix),
            TtlPolicy::with_overrides(settings.default_ttl_seconds, settings.ttl_overrides.clone()),
        )
    }

    pub fn keys(&self) -> &KeyCodec {
        &self.keys
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn registry(&self) -> &ComputedCacheRegistry {
        &self.registry
    }

    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        if key.is_empty() {
            return None;
        }
        self.store.get(&self.keys.entry_key(namespace, key)).await
    }

    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        cache_type: Option<CacheType>,
        custom_ttl: Option<i64>,
    ) -> CacheResult<()> {
        validate_key(key)?;
        let ttl = self.ttl.resolve(cache_type, custom_ttl);
        self.store
            .set(&self.keys.entry_key(namespace, key), value, ttl)
            .await
    }

    /// Returns true when an entry was removed
    #[instrument(skip(self))]
    pub async fn delete(&self, namespace: &str, key: &str) -> CacheResult<bool> {
        validate_key(key)?;
        self.store.delete(&self.keys.entry_key(namespace, key)).await
    }

    pub async fn exists(&self, namespace: &str, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        self.store.exists(&self.keys.entry_key(namespace, key)).await
    }

    /// Return the cached value, or compute, store and register it.
    ///
    /// A hit leaves the registry untouched. On a miss the factory runs once,
    /// its result is stored, and only then is the factory registered for
    /// [`invalidate_computed`](Self::invalidate_computed). If storing fails
    /// the computed value is still returned, but nothing is registered.
    #[instrument(skip(self, factory))]
    pub async fn get_or_set<T, F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        factory: F,
        cache_type: Option<CacheType>,
        custom_ttl: Option<i64>,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        validate_key(key)?;
        let entry_key = self.keys.entry_key(namespace, key);

        if let Some(cached) = self.store.get::<T>(&entry_key).await {
            debug!(key = %entry_key, "Cache hit");
            return Ok(cached);
        }

        debug!(key = %entry_key, "Cache miss, regenerating");
        let value = factory().await.map_err(CacheError::Regeneration)?;

        let ttl = self.ttl.resolve(cache_type, custom_ttl);
        if let Err(e) = self.store.set(&entry_key, &value, ttl).await {
            warn!(key = %entry_key, error = %e, "Failed to store computed value");
            return Ok(value);
        }

        self.registry.register(&entry_key, erase(factory));
        Ok(value)
    }

    /// Delete, regenerate with the registered factory, and store again.
    ///
    /// Not atomic: between the delete and the store a concurrent reader sees
    /// a miss and may run its own `get_or_set`.
    #[instrument(skip(self))]
    pub async fn invalidate_computed(
        &self,
        namespace: &str,
        key: &str,
        cache_type: Option<CacheType>,
        custom_ttl: Option<i64>,
    ) -> CacheResult<Invalidation> {
        validate_key(key)?;
        let entry_key = self.keys.entry_key(namespace, key);

        let factory = match self.registry.get(&entry_key) {
            Some(factory) => factory,
            None => {
                debug!(key = %entry_key, "No factory registered");
                return Ok(Invalidation::NoFactoryFound);
            }
        };

        self.store.delete(&entry_key).await?;
        let value = factory().await.map_err(CacheError::Regeneration)?;
        let ttl = self.ttl.resolve(cache_type, custom_ttl);
        self.store.set(&entry_key, &value, ttl).await?;

        debug!(key = %entry_key, "Computed entry regenerated");
        Ok(Invalidation::Invalidated)
    }

    /// Invalidate with a factory supplied by the caller.
    ///
    /// Works whether or not the key was ever registered, and (re-)registers
    /// the factory. Same non-atomic delete/regenerate/store sequence as
    /// [`invalidate_computed`](Self::invalidate_computed).
    #[instrument(skip(self, factory))]
    pub async fn invalidate_with<T, F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        factory: F,
        cache_type: Option<CacheType>,
        custom_ttl: Option<i64>,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        validate_key(key)?;
        let entry_key = self.keys.entry_key(namespace, key);

        self.store.delete(&entry_key).await?;
        let value = factory().await.map_err(CacheError::Regeneration)?;
        let ttl = self.ttl.resolve(cache_type, custom_ttl);
        self.store.set(&entry_key, &value, ttl).await?;

        self.registry.register(&entry_key, erase(factory));
        Ok(value)
    }

    /// Forget the factory for a key. The cached value is left alone.
    pub fn unregister_computed(&self, namespace: &str, key: &str) -> bool {
        self.registry.unregister(&self.keys.entry_key(namespace, key))
    }

    /// Values in input order, `None` for misses
    #[instrument(skip(self))]
    pub async fn mget<T: DeserializeOwned>(&self, namespace: &str, keys: &[&str]) -> Vec<Option<T>> {
        let full: Vec<String> = keys
            .iter()
            .map(|k| self.keys.entry_key(namespace, k))
            .collect();
        self.store.mget(&full).await
    }

    /// Bulk write with a per-key TTL pass afterwards; see [`CacheStore::mset`]
    #[instrument(skip(self, entries))]
    pub async fn mset<T: Serialize>(
        &self,
        namespace: &str,
        entries: &[(&str, T)],
        cache_type: Option<CacheType>,
        custom_ttl: Option<i64>,
    ) -> CacheResult<()> {
        let mut full = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            validate_key(key)?;
            full.push((self.keys.entry_key(namespace, key), value));
        }
        let ttl = self.ttl.resolve(cache_type, custom_ttl);
        self.store.mset(&full, ttl).await
    }

    #[instrument(skip(self))]
    pub async fn increment(&self, namespace: &str, key: &str, amount: i64) -> CacheResult<i64> {
        validate_key(key)?;
        self.store
            .increment(&self.keys.entry_key(namespace, key), amount)
            .await
    }

    #[instrument(skip(self))]
    pub async fn decrement(&self, namespace: &str, key: &str, amount: i64) -> CacheResult<i64> {
        validate_key(key)?;
        self.store
            .decrement(&self.keys.entry_key(namespace, key), amount)
            .await
    }

    pub async fn get_counter(&self, namespace: &str, key: &str) -> Option<i64> {
        self.store
            .get_counter(&self.keys.entry_key(namespace, key))
            .await
    }

    pub async fn expire(&self, namespace: &str, key: &str, ttl_seconds: u64) -> CacheResult<bool> {
        validate_key(key)?;
        self.store
            .expire(&self.keys.entry_key(namespace, key), ttl_seconds)
            .await
    }

    pub async fn ttl(&self, namespace: &str, key: &str) -> Option<i64> {
        self.store.ttl(&self.keys.entry_key(namespace, key)).await
    }

    pub async fn hash_get<T: DeserializeOwned>(&self, namespace: &str, key: &str, field: &str) -> Option<T> {
        self.store
            .hash_get(&self.keys.entry_key(namespace, key), field)
            .await
    }

    #[instrument(skip(self, value))]
    pub async fn hash_set<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        key: &str,
        field: &str,
        value: &T,
    ) -> CacheResult<bool> {
        validate_key(key)?;
        self.store
            .hash_set(&self.keys.entry_key(namespace, key), field, value)
            .await
    }

    pub async fn hash_delete(&self, namespace: &str, key: &str, field: &str) -> CacheResult<bool> {
        validate_key(key)?;
        self.store
            .hash_delete(&self.keys.entry_key(namespace, key), field)
            .await
    }

    pub async fn hash_get_all<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Option<HashMap<String, T>> {
        self.store
            .hash_get_all(&self.keys.entry_key(namespace, key))
            .await
    }

    #[instrument(skip(self))]
    pub async fn sorted_set_add(&self, namespace: &str, key: &str, score: f64, member: &str) -> CacheResult<u64> {
        validate_key(key)?;
        self.store
            .sorted_set_add(&self.keys.entry_key(namespace, key), score, member)
            .await
    }

    /// Members by ascending score
    pub async fn sorted_set_range(
        &self,
        namespace: &str,
        key: &str,
        start: isize,
        stop: isize,
        with_scores: bool,
    ) -> Vec<SortedSetMember> {
        self.range(namespace, key, start, stop, with_scores, SortOrder::Ascending)
            .await
    }

    /// Members by descending score
    pub async fn sorted_set_range_desc(
        &self,
        namespace: &str,
        key: &str,
        start: isize,
        stop: isize,
        with_scores: bool,
    ) -> Vec<SortedSetMember> {
        self.range(namespace, key, start, stop, with_scores, SortOrder::Descending)
            .await
    }

    async fn range(
        &self,
        namespace: &str,
        key: &str,
        start: isize,
        stop: isize,
        with_scores: bool,
        order: SortOrder,
    ) -> Vec<SortedSetMember> {
        self.store
            .sorted_set_range(&self.keys.entry_key(namespace, key), start, stop, order)
            .await
            .into_iter()
            .map(|(member, score)| SortedSetMember {
                member,
                score: with_scores.then_some(score),
            })
            .collect()
    }

    #[instrument(skip(self))]
    pub async fn sorted_set_remove(&self, namespace: &str, key: &str, members: &[String]) -> CacheResult<u64> {
        validate_key(key)?;
        self.store
            .sorted_set_remove(&self.keys.entry_key(namespace, key), members)
            .await
    }

    /// Delete every entry in a namespace, returning how many were removed
    #[instrument(skip(self))]
    pub async fn flush_namespace(&self, namespace: &str) -> CacheResult<u64> {
        self.store
            .flush_pattern(&self.keys.namespace_pattern(namespace))
            .await
    }

    /// Publish on a channel under the key prefix
    pub async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64> {
        self.store
            .publish(&self.keys.channel(channel), message)
            .await
    }
}

/// Erase a typed factory into a JSON-producing one
fn erase<T, F, Fut>(factory: F) -> Factory
where
    T: Serialize + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move || {
        let fut = factory();
        async move {
            let value = fut.await?;
            Ok::<_, anyhow::Error>(serde_json::to_value(value)?)
        }
        .boxed()
    })
}
