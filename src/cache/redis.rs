//! Redis key/value backend
//!
//! Wraps a multiplexed `ConnectionManager`. Each call clones the manager,
//! which shares the underlying connection.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::cache::backend::{KvBackend, SortOrder};
use crate::error::CacheResult;

/// Redis-backed [`KvBackend`]
#[derive(Clone)]
pub struct RedisBackend {
    conn: redis::aio::ConnectionManager,
}

impl RedisBackend {
    /// Create a new Redis backend
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    /// Shared connection handle
    pub fn connection(&self) -> redis::aio::ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl_seconds: Option<u64>) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        match ttl_seconds {
            Some(ttl) if ttl > 0 => conn.set_ex::<_, _, ()>(key, value, ttl).await?,
            _ => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let deleted: u64 = conn.del(keys).await?;
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let applied: bool = conn.expire(key, ttl_seconds as i64).await?;
        Ok(applied)
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn.ttl(key).await?;
        Ok(ttl)
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        // Explicit MGET so a single key still yields a list
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn mset(&self, entries: &[(String, String)]) -> CacheResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("MSET");
        for (key, value) in entries {
            cmd.arg(key).arg(value);
        }
        let mut conn = self.conn.clone();
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let created: i64 = conn.hset(key, field, value).await?;
        Ok(created > 0)
    }

    async fn hdel(&self, key: &str, field: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.hdel(key, field).await?;
        Ok(removed > 0)
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(map)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        let added: u64 = conn.zadd(key, member, score).await?;
        Ok(added)
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: SortOrder,
    ) -> CacheResult<Vec<(String, f64)>> {
        let mut conn = self.conn.clone();
        let members: Vec<(String, f64)> = match order {
            SortOrder::Ascending => conn.zrange_withscores(key, start, stop).await?,
            SortOrder::Descending => conn.zrevrange_withscores(key, start, stop).await?,
        };
        Ok(members)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = conn.zrem(key, members).await?;
        Ok(removed)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> CacheResult<(u64, Vec<String>)> {
        let mut conn = self.conn.clone();
        let page: (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(page)
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        let receivers: u64 = conn.publish(channel, message).await?;
        Ok(receivers)
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}
