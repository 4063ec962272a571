//! Key/value backend abstraction
//!
//! The cache only talks to the backend through this trait. Keys are fully
//! qualified and values are opaque strings.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::CacheResult;

/// Range direction for sorted-set reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Operations the governance layer needs from a key/value store
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store a value, with an expiry when `ttl_seconds` is given
    async fn set(&self, key: &str, value: String, ttl_seconds: Option<u64>) -> CacheResult<()>;

    /// Delete keys, returning how many existed
    async fn del(&self, keys: &[String]) -> CacheResult<u64>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Returns false when the key does not exist
    async fn expire(&self, key: &str, ttl_seconds: u64) -> CacheResult<bool>;

    /// Seconds to live: `-2` when absent, `-1` when the key has no expiry
    async fn ttl(&self, key: &str) -> CacheResult<i64>;

    /// Same length and order as `keys`
    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>>;

    /// Bulk write without expiry
    async fn mset(&self, entries: &[(String, String)]) -> CacheResult<()>;

    /// Atomic add on an integer value, creating it at zero
    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64>;

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>>;

    /// Returns true when the field was newly created
    async fn hset(&self, key: &str, field: &str, value: String) -> CacheResult<bool>;

    async fn hdel(&self, key: &str, field: &str) -> CacheResult<bool>;

    /// Empty map when the hash does not exist
    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>>;

    /// Returns the number of newly added members
    async fn zadd(&self, key: &str, score: f64, member: &str) -> CacheResult<u64>;

    /// Inclusive rank range; negative indexes count from the end
    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: SortOrder,
    ) -> CacheResult<Vec<(String, f64)>>;

    async fn zrem(&self, key: &str, members: &[String]) -> CacheResult<u64>;

    /// One page of a cursor scan. A returned cursor of `0` ends the scan.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> CacheResult<(u64, Vec<String>)>;

    /// Returns the number of subscribers that received the message
    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64>;

    async fn ping(&self) -> CacheResult<()>;
}
