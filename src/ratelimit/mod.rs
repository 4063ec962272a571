//! Request rate limiting
//!
//! Token buckets keyed by client identity, held in Redis when available and
//! in process memory otherwise.

pub mod governor;
pub mod key;
pub mod limiter;
pub mod memory;
pub mod redis;

pub use governor::{Decision, LimiterKind, OutcomePolicy, Permit, RateLimitInfo, RateLimiterGovernor};
pub use key::{KeyGenerator, RequestMeta};
pub use limiter::{BucketConfig, RateLimiterRes, TokenBucketLimiter};
pub use memory::MemoryLimiter;
pub use self::redis::RedisLimiter;
