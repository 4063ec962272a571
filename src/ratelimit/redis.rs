//! Redis-backed token bucket limiter
//!
//! Buckets are plain integer counters with a millisecond expiry. Each consume
//! runs as one Lua script so the increment, window expiry and block extension
//! happen atomically on the server, and every instance sees the same counts.

use async_trait::async_trait;

use crate::error::LimiterError;
use crate::ratelimit::limiter::{BucketConfig, RateLimiterRes, TokenBucketLimiter};

/// KEYS[1] bucket, ARGV: points to take, limit, window ms, block ms.
/// Returns {consumed, pttl}.
const CONSUME_SCRIPT: &str = r#"
local key = KEYS[1]
local take = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local window_ms = tonumber(ARGV[3])
local block_ms = tonumber(ARGV[4])

local consumed = redis.call("INCRBY", key, take)
local ttl = redis.call("PTTL", key)
if ttl < 0 and window_ms > 0 then
  redis.call("PEXPIRE", key, window_ms)
  ttl = window_ms
end

if block_ms > 0 and consumed > limit and consumed - take <= limit then
  redis.call("PEXPIRE", key, block_ms)
  ttl = block_ms
end

return {consumed, ttl}
"#;

/// KEYS[1] bucket, ARGV: points to return, limit, block ms.
/// Returns the new count, or -1 for an unknown key. A blocked bucket is left as is.
const REWARD_SCRIPT: &str = r#"
local current = redis.call("GET", KEYS[1])
if not current then
  return -1
end
local consumed = tonumber(current)
if tonumber(ARGV[3]) > 0 and consumed > tonumber(ARGV[2]) then
  return consumed
end
local give = math.min(consumed, tonumber(ARGV[1]))
if give <= 0 then
  return consumed
end
return redis.call("DECRBY", KEYS[1], give)
"#;

/// Durable [`TokenBucketLimiter`] shared by every instance
pub struct RedisLimiter {
    config: BucketConfig,
    conn: redis::aio::ConnectionManager,
    consume_script: redis::Script,
    reward_script: redis::Script,
}

impl RedisLimiter {
    pub fn new(conn: redis::aio::ConnectionManager, config: BucketConfig) -> Result<Self, LimiterError> {
        config.validate()?;
        Ok(Self {
            config,
            conn,
            consume_script: redis::Script::new(CONSUME_SCRIPT),
            reward_script: redis::Script::new(REWARD_SCRIPT),
        })
    }
}

fn ms_from_pttl(pttl: i64) -> u64 {
    pttl.max(0) as u64
}

#[async_trait]
impl TokenBucketLimiter for RedisLimiter {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn config(&self) -> &BucketConfig {
        &self.config
    }

    async fn consume(&self, key: &str) -> Result<RateLimiterRes, LimiterError> {
        let mut conn = self.conn.clone();
        let (consumed, pttl): (i64, i64) = self
            .consume_script
            .key(self.config.bucket_key(key))
            .arg(1)
            .arg(self.config.points)
            .arg(self.config.duration_ms())
            .arg(self.config.block_ms())
            .invoke_async(&mut conn)
            .await?;

        Ok(self
            .config
            .result(consumed.max(0) as u64, ms_from_pttl(pttl)))
    }

    async fn reward(&self, key: &str) -> Result<(), LimiterError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .reward_script
            .key(self.config.bucket_key(key))
            .arg(1)
            .arg(self.config.points)
            .arg(self.config.block_ms())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimiterRes>, LimiterError> {
        let bucket_key = self.config.bucket_key(key);
        let mut conn = self.conn.clone();
        let (consumed, pttl): (Option<i64>, i64) = redis::pipe()
            .get(&bucket_key)
            .cmd("PTTL")
            .arg(&bucket_key)
            .query_async(&mut conn)
            .await?;

        Ok(consumed.map(|c| self.config.result(c.max(0) as u64, ms_from_pttl(pttl))))
    }

    async fn delete(&self, key: &str) -> Result<bool, LimiterError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::cmd("DEL")
            .arg(self.config.bucket_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }
}
