//! Token bucket contract shared by the durable and memory limiters
//!
//! Each key gets `points` per `duration` window. Every consume adds one point
//! to the window counter; once the counter passes `points` the key is
//! rejected until the window ends. With a block duration configured, the
//! first rejection pins the key for the whole block instead.

use async_trait::async_trait;
use serde::Serialize;

use crate::config::RateLimitSettings;
use crate::error::LimiterError;

/// Result of a consume, or the current state of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterRes {
    pub allowed: bool,
    pub remaining_points: u64,
    pub consumed_points: u64,
    /// Milliseconds until the window or block ends
    pub ms_before_next: u64,
}

/// Bucket parameters
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub points: u64,
    pub duration_seconds: u64,
    pub block_duration_seconds: u64,
    pub key_prefix: String,
}

impl BucketConfig {
    pub fn new(points: u64, duration_seconds: u64, block_duration_seconds: u64, key_prefix: &str) -> Self {
        Self {
            points,
            duration_seconds,
            block_duration_seconds,
            key_prefix: key_prefix.to_string(),
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            settings.points,
            settings.duration_seconds,
            settings.block_duration_seconds,
            &settings.key_prefix,
        )
    }

    pub fn validate(&self) -> Result<(), LimiterError> {
        if self.points == 0 {
            return Err(LimiterError::InvalidConfig(
                "points must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Storage key for a limiter key
    pub fn bucket_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_seconds * 1000
    }

    pub fn block_ms(&self) -> u64 {
        self.block_duration_seconds * 1000
    }

    /// Whether this consume is the one that first crossed the limit
    pub fn crosses_limit(&self, consumed_before: u64, consumed_after: u64) -> bool {
        consumed_after > self.points && consumed_before <= self.points
    }

    pub fn result(&self, consumed: u64, ms_before_next: u64) -> RateLimiterRes {
        RateLimiterRes {
            allowed: consumed <= self.points,
            remaining_points: self.points.saturating_sub(consumed),
            consumed_points: consumed,
            ms_before_next,
        }
    }
}

/// Token bucket admission control
#[async_trait]
pub trait TokenBucketLimiter: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    fn config(&self) -> &BucketConfig;

    /// Take one point from the key's bucket
    async fn consume(&self, key: &str) -> Result<RateLimiterRes, LimiterError>;

    /// Give one point back. Never pushes remaining points above the limit.
    async fn reward(&self, key: &str) -> Result<(), LimiterError>;

    /// Current bucket state without consuming
    async fn get(&self, key: &str) -> Result<Option<RateLimiterRes>, LimiterError>;

    /// Drop the bucket entirely. Returns true when it existed.
    async fn delete(&self, key: &str) -> Result<bool, LimiterError>;
}
