//! Redis test helpers
//!
//! Tests that need a real Redis connect through [`TestRedis`], which returns
//! `None` when no server is reachable so the test can skip itself. Each
//! instance gets a unique key prefix and removes everything under it on
//! [`TestRedis::cleanup`].
//!
//! ```rust,ignore
//! let redis = skip_if_no_redis!();
//! let backend = RedisBackend::new(redis.conn());
//! // ... keys under redis.prefix() ...
//! redis.cleanup().await;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::AsyncCommands;

/// Default Redis URL for testing
pub const TEST_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Root prefix for every key a test writes
pub const TEST_KEY_PREFIX: &str = "freight-test";

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Connection plus a per-instance key prefix
pub struct TestRedis {
    client: redis::Client,
    conn: redis::aio::ConnectionManager,
    prefix: String,
}

impl TestRedis {
    /// Try to connect to Redis for testing
    pub async fn connect() -> Option<Self> {
        Self::connect_with_url(TEST_REDIS_URL).await
    }

    pub async fn connect_with_url(url: &str) -> Option<Self> {
        let client = redis::Client::open(url).ok()?;
        let conn = tokio::time::timeout(
            Duration::from_millis(500),
            redis::aio::ConnectionManager::new(client.clone()),
        )
        .await
        .ok()?
        .ok()?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis();
        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);

        Some(Self {
            client,
            conn,
            prefix: format!("{}-{}-{}", TEST_KEY_PREFIX, timestamp, counter),
        })
    }

    pub fn conn(&self) -> redis::aio::ConnectionManager {
        self.conn.clone()
    }

    pub fn client(&self) -> redis::Client {
        self.client.clone()
    }

    /// Unique prefix for this instance's keys
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Remove every key under this instance's prefix
    pub async fn cleanup(&self) {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.prefix);
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await
            .unwrap_or_default();

        for key in keys {
            let _: redis::RedisResult<()> = conn.del(&key).await;
        }
    }
}

/// Connect to the test Redis or return from the calling test
#[macro_export]
macro_rules! skip_if_no_redis {
    () => {
        match $crate::mocks::redis::TestRedis::connect().await {
            Some(r) => r,
            None => {
                eprintln!(
                    "Skipping test: Redis not available at {}",
                    $crate::mocks::redis::TEST_REDIS_URL
                );
                return;
            }
        }
    };
}
