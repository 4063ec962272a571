//! Configuration management
//!
//! Configuration is loaded from environment variables.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::cache::keys::DEFAULT_PREFIX;
use crate::cache::ttl::{CacheType, DEFAULT_TTL_SECONDS};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Global key prefix
    pub key_prefix: String,
    /// TTL used when a cache type has no entry
    pub default_ttl_seconds: u64,
    /// Deflate + base64 stored values
    pub compression: bool,
    /// Per-type TTLs replacing the built-in ones
    pub ttl_overrides: HashMap<CacheType, u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_PREFIX.to_string(),
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            compression: false,
            ttl_overrides: HashMap::new(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Points available per window
    pub points: u64,
    /// Window length in seconds
    pub duration_seconds: u64,
    /// Block length once the points are used up (0 = no block)
    pub block_duration_seconds: u64,
    /// Key prefix for limiter buckets
    pub key_prefix: String,
    /// Header holding the client address chain
    pub trusted_ip_header: Option<String>,
    /// Dotted path into the request identity for the user id
    pub user_id_path: Option<String>,
    /// Header carrying an API key
    pub api_key_header: Option<String>,
    pub include_path: bool,
    pub include_method: bool,
    /// Refund the point when the response status is >= 400
    pub skip_failed_requests: bool,
    /// Refund the point when the response status is < 400
    pub skip_successful_requests: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            points: 100,
            duration_seconds: 60,
            block_duration_seconds: 0,
            key_prefix: "freight:ratelimit".to_string(),
            trusted_ip_header: Some("x-forwarded-for".to_string()),
            user_id_path: None,
            api_key_header: None,
            include_path: false,
            include_method: false,
            skip_failed_requests: false,
            skip_successful_requests: false,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Redis connection URL
    pub redis_url: String,
    /// How long to wait for the initial Redis connection
    pub redis_connect_timeout_ms: u64,

    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(v) => v.trim().parse().with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

fn flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut ttl_overrides = HashMap::new();
        for cache_type in CacheType::ALL {
            let name = format!("CACHE_TTL_{}", cache_type.as_str());
            if let Ok(v) = env::var(&name) {
                let ttl: u64 = v.trim().parse().with_context(|| format!("Invalid {}", name))?;
                ttl_overrides.insert(cache_type, ttl);
            }
        }

        let rate_defaults = RateLimitSettings::default();

        Ok(Self {
            host: env::var("FREIGHT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("FREIGHT_PORT", 8080)?,

            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            redis_connect_timeout_ms: parse_var("REDIS_CONNECT_TIMEOUT_MS", 2000)?,

            cache: CacheSettings {
                key_prefix: env::var("CACHE_KEY_PREFIX")
                    .unwrap_or_else(|_| DEFAULT_PREFIX.to_string()),
                default_ttl_seconds: parse_var("CACHE_DEFAULT_TTL_SECONDS", DEFAULT_TTL_SECONDS)?,
                compression: flag("CACHE_COMPRESSION"),
                ttl_overrides,
            },

            rate_limit: RateLimitSettings {
                points: parse_var("RATE_LIMIT_POINTS", rate_defaults.points)?,
                duration_seconds: parse_var(
                    "RATE_LIMIT_DURATION_SECONDS",
                    rate_defaults.duration_seconds,
                )?,
                block_duration_seconds: parse_var(
                    "RATE_LIMIT_BLOCK_DURATION_SECONDS",
                    rate_defaults.block_duration_seconds,
                )?,
                key_prefix: env::var("RATE_LIMIT_KEY_PREFIX")
                    .unwrap_or(rate_defaults.key_prefix),
                trusted_ip_header: optional("RATE_LIMIT_TRUSTED_HEADER")
                    .or(rate_defaults.trusted_ip_header),
                user_id_path: optional("RATE_LIMIT_USER_ID_PATH"),
                api_key_header: optional("RATE_LIMIT_API_KEY_HEADER"),
                include_path: flag("RATE_LIMIT_INCLUDE_PATH"),
                include_method: flag("RATE_LIMIT_INCLUDE_METHOD"),
                skip_failed_requests: flag("RATE_LIMIT_SKIP_FAILED"),
                skip_successful_requests: flag("RATE_LIMIT_SKIP_SUCCESSFUL"),
            },
        })
    }
}
