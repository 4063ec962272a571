//! Common test utilities
//!
//! Builders for configs, cache services, governors and test servers that
//! run entirely in process on a manual clock.

#![allow(dead_code)]

use std::sync::Arc;

use axum_test::TestServer;
use freight_governor::cache::{CacheService, InMemoryBackend, KvBackend};
use freight_governor::clock::ManualClock;
use freight_governor::config::{CacheSettings, Config, RateLimitSettings};
use freight_governor::ratelimit::{
    BucketConfig, KeyGenerator, MemoryLimiter, OutcomePolicy, RateLimiterGovernor,
    TokenBucketLimiter,
};
use freight_governor::routes::create_router;
use freight_governor::AppState;

/// Test configuration constants
pub mod constants {
    /// Manual clock start, 2023-11-14T22:13:20Z
    pub const TEST_START_MS: u64 = 1_700_000_000_000;
    /// Key prefix used by test caches
    pub const TEST_CACHE_PREFIX: &str = "freight-test";
    /// Key prefix used by test limiters
    pub const TEST_LIMIT_PREFIX: &str = "freight-test:rl";
}

pub fn test_clock() -> ManualClock {
    ManualClock::new(constants::TEST_START_MS)
}

pub fn cache_settings(compression: bool) -> CacheSettings {
    CacheSettings {
        key_prefix: constants::TEST_CACHE_PREFIX.to_string(),
        compression,
        ..CacheSettings::default()
    }
}

pub fn rate_limit_settings(points: u64, duration_seconds: u64) -> RateLimitSettings {
    RateLimitSettings {
        points,
        duration_seconds,
        key_prefix: constants::TEST_LIMIT_PREFIX.to_string(),
        ..RateLimitSettings::default()
    }
}

pub fn test_config(rate_limit: RateLimitSettings) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        redis_url: "redis://127.0.0.1:6379".to_string(),
        redis_connect_timeout_ms: 200,
        cache: cache_settings(false),
        rate_limit,
    }
}

/// Cache service over any backend
pub fn cache_over(backend: Arc<dyn KvBackend>, compression: bool) -> Arc<CacheService> {
    Arc::new(CacheService::from_settings(backend, &cache_settings(compression)))
}

/// Cache service on an in-memory backend driven by `clock`.
/// The returned backend shares storage with the service.
pub fn memory_cache(clock: &ManualClock, compression: bool) -> (Arc<CacheService>, InMemoryBackend) {
    let backend = InMemoryBackend::with_clock(Arc::new(clock.clone()));
    (cache_over(Arc::new(backend.clone()), compression), backend)
}

/// Governor with an optional durable limiter, the memory one on `clock`
pub fn governor(
    settings: &RateLimitSettings,
    durable: Option<Arc<dyn TokenBucketLimiter>>,
    clock: &ManualClock,
) -> Arc<RateLimiterGovernor> {
    let memory = MemoryLimiter::with_clock(
        BucketConfig::from_settings(settings),
        Arc::new(clock.clone()),
    )
    .unwrap();

    Arc::new(RateLimiterGovernor::new(
        durable,
        Arc::new(memory),
        KeyGenerator::from_settings(settings),
        OutcomePolicy::from_settings(settings),
        Arc::new(clock.clone()),
    ))
}

/// App state without Redis
pub fn test_state(settings: RateLimitSettings, clock: &ManualClock) -> Arc<AppState> {
    let limiter = governor(&settings, None, clock);
    let (cache, _) = memory_cache(clock, false);
    Arc::new(AppState::new_for_testing(test_config(settings), cache, limiter))
}

pub fn create_test_server(state: Arc<AppState>) -> TestServer {
    TestServer::new(create_router(state)).unwrap()
}
