//! Fault-injecting cache backend
//!
//! Wraps the in-memory backend and fails chosen operations with a
//! connection error, so degraded paths can be exercised without taking a
//! real Redis down.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use freight_governor::cache::{InMemoryBackend, KvBackend, SortOrder};
use freight_governor::error::{CacheError, CacheResult};

/// Every operation name [`FlakyBackend`] can fail
pub const ALL_OPERATIONS: &[&str] = &[
    "get", "set", "del", "exists", "expire", "ttl", "mget", "mset", "incr_by", "hget", "hset",
    "hdel", "hgetall", "zadd", "zrange", "zrem", "scan", "publish", "ping",
];

pub struct FlakyBackend {
    inner: InMemoryBackend,
    failing: Mutex<HashSet<&'static str>>,
    writes: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(inner: InMemoryBackend) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Backend with every operation failing
    pub fn down() -> Self {
        let backend = Self::new(InMemoryBackend::new());
        for op in ALL_OPERATIONS {
            backend.fail_on(op);
        }
        backend
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Number of mutating calls that reached the inner backend
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryBackend {
        &self.inner
    }

    fn check(&self, operation: &'static str) -> CacheResult<()> {
        if self.failing.lock().unwrap().contains(operation) {
            return Err(CacheError::BackendUnavailable(format!(
                "injected failure on {}",
                operation
            )));
        }
        Ok(())
    }

    fn write(&self, operation: &'static str) -> CacheResult<()> {
        self.check(operation)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl KvBackend for FlakyBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check("get")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl_seconds: Option<u64>) -> CacheResult<()> {
        self.write("set")?;
        self.inner.set(key, value, ttl_seconds).await
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        self.write("del")?;
        self.inner.del(keys).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.check("exists")?;
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> CacheResult<bool> {
        self.write("expire")?;
        self.inner.expire(key, ttl_seconds).await
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        self.check("ttl")?;
        self.inner.ttl(key).await
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        self.check("mget")?;
        self.inner.mget(keys).await
    }

    async fn mset(&self, entries: &[(String, String)]) -> CacheResult<()> {
        self.write("mset")?;
        self.inner.mset(entries).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.write("incr_by")?;
        self.inner.incr_by(key, delta).await
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        self.check("hget")?;
        self.inner.hget(key, field).await
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> CacheResult<bool> {
        self.write("hset")?;
        self.inner.hset(key, field, value).await
    }

    async fn hdel(&self, key: &str, field: &str) -> CacheResult<bool> {
        self.write("hdel")?;
        self.inner.hdel(key, field).await
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        self.check("hgetall")?;
        self.inner.hgetall(key).await
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> CacheResult<u64> {
        self.write("zadd")?;
        self.inner.zadd(key, score, member).await
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: SortOrder,
    ) -> CacheResult<Vec<(String, f64)>> {
        self.check("zrange")?;
        self.inner.zrange(key, start, stop, order).await
    }

    async fn zrem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        self.write("zrem")?;
        self.inner.zrem(key, members).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> CacheResult<(u64, Vec<String>)> {
        self.check("scan")?;
        self.inner.scan(cursor, pattern, count).await
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64> {
        self.check("publish")?;
        self.inner.publish(channel, message).await
    }

    async fn ping(&self) -> CacheResult<()> {
        self.check("ping")?;
        self.inner.ping().await
    }
}
