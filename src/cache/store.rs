//! Cache operation surface over a key/value backend
//!
//! Every method takes a fully qualified key. Reads degrade to a miss when the
//! backend fails or a stored value cannot be decoded; writes propagate the
//! failure to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::cache::backend::{KvBackend, SortOrder};
use crate::cache::codec::ValueCodec;
use crate::error::{CacheError, CacheResult};
use crate::metrics::record_cache_operation;

/// Keys collected per SCAN page
pub const SCAN_PAGE_SIZE: usize = 250;

/// Keys removed per DEL during a namespace flush
pub const DELETE_BATCH_SIZE: usize = 500;

fn degrade<T>(operation: &'static str, key: &str, error: &CacheError, fallback: T) -> T {
    warn!(operation, key = %key, error = %error, "Cache read failed, treating as miss");
    record_cache_operation(operation, "error");
    fallback
}

/// Thin cache operation surface
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn KvBackend>,
    codec: ValueCodec,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn KvBackend>, codec: ValueCodec) -> Self {
        Self { backend, codec }
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    pub fn codec(&self) -> &ValueCodec {
        &self.codec
    }

    /// Decoded value, or `None` on absence or failure
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                record_cache_operation("get", "miss");
                return None;
            }
            Err(e) => return degrade("get", key, &e, None),
        };

        match self.codec.decode(&raw) {
            Ok(value) => {
                record_cache_operation("get", "hit");
                Some(value)
            }
            Err(e) => degrade("get", key, &e, None),
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_seconds: u64) -> CacheResult<()> {
        let encoded = self.codec.encode(value)?;
        self.backend.set(key, encoded, Some(ttl_seconds)).await?;
        record_cache_operation("set", "ok");
        Ok(())
    }

    /// Returns true when the key existed
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        let deleted = self.backend.del(&[key.to_string()]).await?;
        Ok(deleted > 0)
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.backend.exists(key).await {
            Ok(exists) => exists,
            Err(e) => degrade("exists", key, &e, false),
        }
    }

    /// Values in input order; undecodable entries become `None`
    pub async fn mget<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<T>> {
        let raws = match self.backend.mget(keys).await {
            Ok(raws) => raws,
            Err(e) => {
                let joined = keys.join(",");
                return degrade("mget", &joined, &e, keys.iter().map(|_| None).collect());
            }
        };

        raws.into_iter()
            .zip(keys)
            .map(|(raw, key)| {
                raw.and_then(|raw| match self.codec.decode(&raw) {
                    Ok(value) => Some(value),
                    Err(e) => degrade("mget", key, &e, None),
                })
            })
            .collect()
    }

    /// Bulk write, then attach the TTL key by key.
    ///
    /// Not atomic: if the second pass fails, values already written stay
    /// without an expiry and the error is returned.
    pub async fn mset<T: Serialize>(&self, entries: &[(String, T)], ttl_seconds: u64) -> CacheResult<()> {
        let encoded = entries
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.codec.encode(value)?)))
            .collect::<CacheResult<Vec<(String, String)>>>()?;

        self.backend.mset(&encoded).await?;

        if ttl_seconds > 0 {
            for (key, _) in &encoded {
                self.backend.expire(key, ttl_seconds).await?;
            }
        }

        record_cache_operation("mset", "ok");
        Ok(())
    }

    pub async fn increment(&self, key: &str, amount: i64) -> CacheResult<i64> {
        self.backend.incr_by(key, amount).await
    }

    pub async fn decrement(&self, key: &str, amount: i64) -> CacheResult<i64> {
        let delta = amount
            .checked_neg()
            .ok_or_else(|| CacheError::InvalidArgument(format!("cannot decrement by {}", amount)))?;
        self.backend.incr_by(key, delta).await
    }

    /// Raw integer counter value
    pub async fn get_counter(&self, key: &str) -> Option<i64> {
        match self.backend.get(key).await {
            Ok(raw) => raw.and_then(|r| r.parse().ok()),
            Err(e) => degrade("get_counter", key, &e, None),
        }
    }

    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> CacheResult<bool> {
        self.backend.expire(key, ttl_seconds).await
    }

    /// Remaining seconds; `Some(-1)` for no expiry, `None` when absent
    pub async fn ttl(&self, key: &str) -> Option<i64> {
        match self.backend.ttl(key).await {
            Ok(-2) => None,
            Ok(ttl) => Some(ttl),
            Err(e) => degrade("ttl", key, &e, None),
        }
    }

    pub async fn hash_get<T: DeserializeOwned>(&self, key: &str, field: &str) -> Option<T> {
        let raw = match self.backend.hget(key, field).await {
            Ok(raw) => raw?,
            Err(e) => return degrade("hash_get", key, &e, None),
        };
        match self.codec.decode(&raw) {
            Ok(value) => Some(value),
            Err(e) => degrade("hash_get", key, &e, None),
        }
    }

    /// Returns true when the field was newly created
    pub async fn hash_set<T: Serialize + ?Sized>(&self, key: &str, field: &str, value: &T) -> CacheResult<bool> {
        let encoded = self.codec.encode(value)?;
        self.backend.hset(key, field, encoded).await
    }

    pub async fn hash_delete(&self, key: &str, field: &str) -> CacheResult<bool> {
        self.backend.hdel(key, field).await
    }

    /// All decodable fields; an empty or missing hash is `None`
    pub async fn hash_get_all<T: DeserializeOwned>(&self, key: &str) -> Option<HashMap<String, T>> {
        let raw = match self.backend.hgetall(key).await {
            Ok(raw) => raw,
            Err(e) => return degrade("hash_get_all", key, &e, None),
        };
        if raw.is_empty() {
            return None;
        }

        let mut decoded = HashMap::with_capacity(raw.len());
        for (field, value) in raw {
            match self.codec.decode(&value) {
                Ok(value) => {
                    decoded.insert(field, value);
                }
                Err(e) => {
                    warn!(key = %key, field = %field, error = %e, "Skipping undecodable hash field");
                }
            }
        }
        (!decoded.is_empty()).then_some(decoded)
    }

    pub async fn sorted_set_add(&self, key: &str, score: f64, member: &str) -> CacheResult<u64> {
        self.backend.zadd(key, score, member).await
    }

    /// Members with scores in rank order; empty on failure
    pub async fn sorted_set_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: SortOrder,
    ) -> Vec<(String, f64)> {
        match self.backend.zrange(key, start, stop, order).await {
            Ok(members) => members,
            Err(e) => degrade("sorted_set_range", key, &e, Vec::new()),
        }
    }

    pub async fn sorted_set_remove(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        self.backend.zrem(key, members).await
    }

    /// Delete every key matching `pattern`.
    ///
    /// Walks the keyspace with a cursor scan, collecting matches, then deletes
    /// them in bounded batches.
    pub async fn flush_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let mut cursor = 0u64;
        let mut matched: Vec<String> = Vec::new();

        loop {
            let (next, keys) = self.backend.scan(cursor, pattern, SCAN_PAGE_SIZE).await?;
            matched.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may report a key more than once
        matched.sort();
        matched.dedup();

        let mut deleted = 0;
        for batch in matched.chunks(DELETE_BATCH_SIZE) {
            deleted += self.backend.del(batch).await?;
        }

        debug!(pattern = %pattern, matched = matched.len(), deleted, "Flushed keys");
        record_cache_operation("flush", "ok");
        Ok(deleted)
    }

    pub async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64> {
        self.backend.publish(channel, message).await
    }
}
