//! In-process token bucket limiter
//!
//! Buckets live in a local map, so admission is only consistent within this
//! process. Used as the hot standby for the durable limiter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::{SharedClock, SystemClock};
use crate::error::LimiterError;
use crate::ratelimit::limiter::{BucketConfig, RateLimiterRes, TokenBucketLimiter};

#[derive(Debug, Clone)]
struct Bucket {
    consumed: u64,
    /// `None` when the window never resets
    expires_at_ms: Option<u64>,
}

impl Bucket {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map(|exp| now_ms >= exp).unwrap_or(false)
    }

    fn ms_before_next(&self, now_ms: u64) -> u64 {
        self.expires_at_ms
            .map(|exp| exp.saturating_sub(now_ms))
            .unwrap_or(0)
    }
}

/// Process-local [`TokenBucketLimiter`]
pub struct MemoryLimiter {
    config: BucketConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
    clock: SharedClock,
}

impl MemoryLimiter {
    pub fn new(config: BucketConfig) -> Result<Self, LimiterError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: BucketConfig, clock: SharedClock) -> Result<Self, LimiterError> {
        config.validate()?;
        Ok(Self {
            config,
            buckets: Mutex::new(HashMap::new()),
            clock,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remove every expired bucket, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, b| !b.is_expired(now));
        before - buckets.len()
    }

    /// Number of tracked buckets, expired or not
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodically purge expired buckets
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let purged = limiter.purge_expired();
                if purged > 0 {
                    debug!(purged, "Purged expired rate limit buckets");
                }
            }
        })
    }
}

#[async_trait]
impl TokenBucketLimiter for MemoryLimiter {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn config(&self) -> &BucketConfig {
        &self.config
    }

    async fn consume(&self, key: &str) -> Result<RateLimiterRes, LimiterError> {
        let now = self.clock.now_ms();
        let bucket_key = self.config.bucket_key(key);
        let mut buckets = self.lock();

        let window_end = (self.config.duration_seconds > 0).then(|| now + self.config.duration_ms());
        let bucket = buckets.entry(bucket_key).or_insert(Bucket {
            consumed: 0,
            expires_at_ms: window_end,
        });

        if bucket.is_expired(now) {
            bucket.consumed = 0;
            bucket.expires_at_ms = window_end;
        }

        let before = bucket.consumed;
        bucket.consumed += 1;

        if self.config.block_duration_seconds > 0
            && self.config.crosses_limit(before, bucket.consumed)
        {
            bucket.expires_at_ms = Some(now + self.config.block_ms());
        }

        Ok(self
            .config
            .result(bucket.consumed, bucket.ms_before_next(now)))
    }

    async fn reward(&self, key: &str) -> Result<(), LimiterError> {
        let now = self.clock.now_ms();
        let mut buckets = self.lock();
        if let Some(bucket) = buckets.get_mut(&self.config.bucket_key(key)) {
            let blocked =
                self.config.block_duration_seconds > 0 && bucket.consumed > self.config.points;
            if !bucket.is_expired(now) && !blocked {
                bucket.consumed = bucket.consumed.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimiterRes>, LimiterError> {
        let now = self.clock.now_ms();
        let buckets = self.lock();
        Ok(buckets
            .get(&self.config.bucket_key(key))
            .filter(|b| !b.is_expired(now))
            .map(|b| self.config.result(b.consumed, b.ms_before_next(now))))
    }

    async fn delete(&self, key: &str) -> Result<bool, LimiterError> {
        Ok(self.lock().remove(&self.config.bucket_key(key)).is_some())
    }
}
