//! Freight Governor - request governance for the freight platform
//!
//! This library provides a namespaced distributed cache with computed-value
//! regeneration and a token-bucket rate limiter that keeps admitting
//! traffic from process memory when Redis is unreachable.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod ratelimit;
pub mod routes;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, warn};

pub use crate::cache::{CacheService, CacheType, InMemoryBackend, KvBackend, RedisBackend, Subscriber};
pub use crate::config::Config;
pub use crate::ratelimit::{Decision, RateLimiterGovernor};

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    /// `None` when Redis was unreachable at start-up
    pub redis: Option<redis::aio::ConnectionManager>,
    pub cache: Arc<CacheService>,
    pub limiter: Arc<RateLimiterGovernor>,
    /// Pub/sub on its own connection
    pub subscriber: Option<Subscriber>,
    pub start_time: Instant,
}

/// Open a managed Redis connection, giving up after `timeout`
pub async fn connect_redis(
    url: &str,
    timeout: Duration,
) -> Result<(redis::Client, redis::aio::ConnectionManager)> {
    let client = redis::Client::open(url)?;
    let conn = tokio::time::timeout(timeout, redis::aio::ConnectionManager::new(client.clone()))
        .await
        .map_err(|_| anyhow::anyhow!("Timed out connecting to Redis after {:?}", timeout))??;
    Ok((client, conn))
}

impl AppState {
    /// Create a new application state
    ///
    /// An unreachable Redis is not fatal: the cache falls back to process
    /// memory and the limiter runs memory-only.
    pub async fn new(config: Config) -> Result<Self> {
        let timeout = Duration::from_millis(config.redis_connect_timeout_ms);
        let connection = match connect_redis(&config.redis_url, timeout).await {
            Ok(pair) => {
                info!("Connected to Redis");
                Some(pair)
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, running in degraded mode");
                None
            }
        };

        let (backend, redis, client): (Arc<dyn KvBackend>, _, _) = match connection {
            Some((client, conn)) => (
                Arc::new(RedisBackend::new(conn.clone())),
                Some(conn),
                Some(client),
            ),
            None => (Arc::new(InMemoryBackend::new()), None, None),
        };

        let cache = Arc::new(CacheService::from_settings(backend, &config.cache));
        let subscriber = client.map(|client| Subscriber::new(client, cache.keys().prefix()));
        let limiter = Arc::new(RateLimiterGovernor::from_settings(
            &config.rate_limit,
            redis.clone(),
        )?);
        limiter
            .memory()
            .spawn_sweeper(Duration::from_secs(config.rate_limit.duration_seconds.max(1)));

        Ok(Self {
            config,
            redis,
            cache,
            limiter,
            subscriber,
            start_time: Instant::now(),
        })
    }

    /// Create an application state from prepared parts, without Redis
    pub fn new_for_testing(
        config: Config,
        cache: Arc<CacheService>,
        limiter: Arc<RateLimiterGovernor>,
    ) -> Self {
        Self {
            config,
            redis: None,
            cache,
            limiter,
            subscriber: None,
            start_time: Instant::now(),
        }
    }
}
