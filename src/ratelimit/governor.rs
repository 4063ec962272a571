//! Admission control over the durable and memory limiters
//!
//! The durable limiter is tried first. When it fails for an infrastructure
//! reason the same consume is answered by the memory limiter instead, and
//! the durable limiter is left alone for a back-off period before it is
//! probed again. Each request is counted by exactly one limiter.

use std::sync::{Arc, Mutex, MutexGuard};

use axum::http::{header, HeaderName, HeaderValue, Method};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::config::RateLimitSettings;
use crate::error::LimiterError;
use crate::metrics::{record_rate_limit_decision, record_rate_limit_fallback};
use crate::ratelimit::key::{KeyGenerator, RequestMeta};
use crate::ratelimit::limiter::{BucketConfig, RateLimiterRes, TokenBucketLimiter};
use crate::ratelimit::memory::MemoryLimiter;
use crate::ratelimit::redis::RedisLimiter;

/// Back-off after the first durable failure
pub const INITIAL_BACKOFF_MS: u64 = 5_000;
/// Upper bound for the doubling back-off
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Which limiter answered a consume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterKind {
    Durable,
    Memory,
}

impl LimiterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterKind::Durable => "durable",
            LimiterKind::Memory => "memory",
        }
    }
}

/// Limit state reported to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    pub consumed: u64,
    pub ms_before_next: u64,
    /// Unix seconds at which the window or block ends
    pub reset_at: u64,
    pub limiter: LimiterKind,
}

impl RateLimitInfo {
    fn from_res(res: &RateLimiterRes, limit: u64, now_ms: u64, limiter: LimiterKind) -> Self {
        Self {
            limit,
            remaining: res.remaining_points,
            consumed: res.consumed_points,
            ms_before_next: res.ms_before_next,
            reset_at: (now_ms + res.ms_before_next).div_ceil(1000),
            limiter,
        }
    }

    /// Whole seconds until retrying makes sense, never less than one
    pub fn retry_after_secs(&self) -> u64 {
        self.ms_before_next.div_ceil(1000).max(1)
    }

    /// `X-RateLimit-*` headers, plus `Retry-After` when rejected
    pub fn headers(&self, rejected: bool) -> Vec<(HeaderName, HeaderValue)> {
        let mut headers = vec![
            (
                HeaderName::from_static("x-ratelimit-limit"),
                HeaderValue::from(self.limit),
            ),
            (
                HeaderName::from_static("x-ratelimit-remaining"),
                HeaderValue::from(self.remaining),
            ),
            (
                HeaderName::from_static("x-ratelimit-reset"),
                HeaderValue::from(self.reset_at),
            ),
        ];

        if rejected {
            headers.push((header::RETRY_AFTER, HeaderValue::from(self.retry_after_secs())));
        }

        headers
    }
}

/// Proof of an admitted request
///
/// Handed back to [`RateLimiterGovernor::record_outcome`] by value, so a
/// request can be refunded at most once and a rejected request never.
#[derive(Debug)]
pub struct Permit {
    key: String,
    info: RateLimitInfo,
}

impl Permit {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn info(&self) -> &RateLimitInfo {
        &self.info
    }
}

#[derive(Debug)]
pub enum Decision {
    /// Not counted (CORS preflight, or no limiter could answer)
    Bypassed,
    Allowed(Permit),
    Rejected(RateLimitInfo),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Rejected(_))
    }
}

/// Which response statuses get their point refunded
#[derive(Debug, Clone, Copy, Default)]
pub struct OutcomePolicy {
    pub skip_failed_requests: bool,
    pub skip_successful_requests: bool,
}

impl OutcomePolicy {
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self {
            skip_failed_requests: settings.skip_failed_requests,
            skip_successful_requests: settings.skip_successful_requests,
        }
    }

    pub fn should_reward(&self, status: u16) -> bool {
        if status >= 400 {
            self.skip_failed_requests
        } else {
            self.skip_successful_requests
        }
    }
}

/// Durable backend health with exponential back-off
#[derive(Debug)]
struct BackendHealth {
    consecutive_failures: u32,
    retry_at_ms: Option<u64>,
    backoff_ms: u64,
}

impl Default for BackendHealth {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            retry_at_ms: None,
            backoff_ms: INITIAL_BACKOFF_MS,
        }
    }
}

impl BackendHealth {
    fn is_available(&self, now_ms: u64) -> bool {
        self.retry_at_ms.map(|at| now_ms >= at).unwrap_or(true)
    }

    fn record_failure(&mut self, now_ms: u64) -> u64 {
        let wait = if self.consecutive_failures == 0 {
            INITIAL_BACKOFF_MS
        } else {
            (self.backoff_ms * 2).min(MAX_BACKOFF_MS)
        };
        self.consecutive_failures += 1;
        self.backoff_ms = wait;
        self.retry_at_ms = Some(now_ms + wait);
        wait
    }

    /// Returns true when this success ends an outage
    fn record_success(&mut self) -> bool {
        let recovered = self.consecutive_failures > 0;
        *self = Self::default();
        recovered
    }
}

/// Picks the limiter for each request and reports the decision
pub struct RateLimiterGovernor {
    durable: Option<Arc<dyn TokenBucketLimiter>>,
    memory: Arc<MemoryLimiter>,
    keys: KeyGenerator,
    policy: OutcomePolicy,
    health: Mutex<BackendHealth>,
    clock: SharedClock,
}

impl RateLimiterGovernor {
    pub fn new(
        durable: Option<Arc<dyn TokenBucketLimiter>>,
        memory: Arc<MemoryLimiter>,
        keys: KeyGenerator,
        policy: OutcomePolicy,
        clock: SharedClock,
    ) -> Self {
        Self {
            durable,
            memory,
            keys,
            policy,
            health: Mutex::new(BackendHealth::default()),
            clock,
        }
    }

    /// Build both limiters from settings. Without a Redis connection the
    /// governor runs memory-only.
    pub fn from_settings(
        settings: &RateLimitSettings,
        redis: Option<redis::aio::ConnectionManager>,
    ) -> Result<Self, LimiterError> {
        let config = BucketConfig::from_settings(settings);
        let memory = Arc::new(MemoryLimiter::new(config.clone())?);

        let durable = match redis {
            Some(conn) => {
                let limiter: Arc<dyn TokenBucketLimiter> = Arc::new(RedisLimiter::new(conn, config)?);
                Some(limiter)
            }
            None => {
                warn!("No Redis connection, rate limiting is per-instance only");
                None
            }
        };

        Ok(Self::new(
            durable,
            memory,
            KeyGenerator::from_settings(settings),
            OutcomePolicy::from_settings(settings),
            Arc::new(SystemClock),
        ))
    }

    fn health(&self) -> MutexGuard<'_, BackendHealth> {
        self.health.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Limiter that the next request would go to
    pub fn mode(&self) -> LimiterKind {
        match self.durable {
            Some(_) if self.health().is_available(self.clock.now_ms()) => LimiterKind::Durable,
            _ => LimiterKind::Memory,
        }
    }

    pub fn has_durable(&self) -> bool {
        self.durable.is_some()
    }

    pub fn memory(&self) -> &Arc<MemoryLimiter> {
        &self.memory
    }

    pub fn keys(&self) -> &KeyGenerator {
        &self.keys
    }

    fn limiter(&self, kind: LimiterKind) -> &dyn TokenBucketLimiter {
        match (kind, &self.durable) {
            (LimiterKind::Durable, Some(durable)) => durable.as_ref(),
            _ => self.memory.as_ref(),
        }
    }

    /// Decide whether a request may proceed
    pub async fn admit(&self, req: &RequestMeta) -> Decision {
        if req.method == Method::OPTIONS {
            record_rate_limit_decision("none", "bypassed");
            return Decision::Bypassed;
        }

        let key = self.keys.generate(req);
        self.admit_key(&key).await
    }

    /// Decide for an already computed key
    pub async fn admit_key(&self, key: &str) -> Decision {
        let Some((res, kind)) = self.consume(key).await else {
            record_rate_limit_decision("none", "bypassed");
            return Decision::Bypassed;
        };

        let limit = self.limiter(kind).config().points;
        let info = RateLimitInfo::from_res(&res, limit, self.clock.now_ms(), kind);

        if res.allowed {
            record_rate_limit_decision(kind.as_str(), "allowed");
            Decision::Allowed(Permit {
                key: key.to_string(),
                info,
            })
        } else {
            debug!(key = %key, limiter = kind.as_str(), ms_before_next = res.ms_before_next, "Rate limit exceeded");
            record_rate_limit_decision(kind.as_str(), "rejected");
            Decision::Rejected(info)
        }
    }

    /// Durable first, memory otherwise. An unreachable backend starts the
    /// back-off. A command error only sends this request to memory, since the
    /// server itself still answers.
    async fn consume(&self, key: &str) -> Option<(RateLimiterRes, LimiterKind)> {
        if let Some(durable) = &self.durable {
            let now = self.clock.now_ms();
            if self.health().is_available(now) {
                match durable.consume(key).await {
                    Ok(res) => {
                        if self.health().record_success() {
                            info!(limiter = durable.name(), "Durable rate limiter recovered");
                        }
                        return Some((res, LimiterKind::Durable));
                    }
                    Err(e @ LimiterError::BackendUnavailable(_)) => {
                        let backoff_ms = self.health().record_failure(self.clock.now_ms());
                        record_rate_limit_fallback();
                        warn!(
                            error = %e,
                            backoff_ms,
                            "Durable rate limiter unreachable, falling back to memory"
                        );
                    }
                    Err(e) => {
                        record_rate_limit_fallback();
                        error!(
                            error = %e,
                            key = %key,
                            "Durable rate limiter rejected the command, using memory for this request"
                        );
                    }
                }
            }
        }

        match self.memory.consume(key).await {
            Ok(res) => Some((res, LimiterKind::Memory)),
            Err(e) => {
                error!(error = %e, key = %key, "Memory rate limiter failed, admitting request");
                None
            }
        }
    }

    /// Settle an admitted request once its response status is known.
    /// Refunds the point to the limiter that admitted it when the policy
    /// says this status class is not counted.
    pub async fn record_outcome(&self, permit: Permit, status: u16) {
        if !self.policy.should_reward(status) {
            return;
        }

        let limiter = self.limiter(permit.info.limiter);
        if let Err(e) = limiter.reward(&permit.key).await {
            warn!(error = %e, key = %permit.key, limiter = limiter.name(), "Failed to refund rate limit point");
        }
    }

    /// Drop a key's bucket from every limiter
    pub async fn reset(&self, key: &str) -> Result<bool, LimiterError> {
        let mut existed = self.memory.delete(key).await?;
        if let Some(durable) = &self.durable {
            existed |= durable.delete(key).await?;
        }
        Ok(existed)
    }
}
