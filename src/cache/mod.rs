//! Cache module
//!
//! Namespaced, TTL-governed caching over a key/value backend (Redis in
//! production, in-memory for tests and degraded mode).

pub mod backend;
pub mod codec;
pub mod computed;
pub mod in_memory;
pub mod keys;
pub mod pubsub;
pub mod redis;
pub mod service;
pub mod store;
pub mod ttl;

pub use self::backend::{KvBackend, SortOrder};
pub use self::codec::ValueCodec;
pub use self::computed::ComputedCacheRegistry;
pub use self::in_memory::InMemoryBackend;
pub use self::keys::KeyCodec;
pub use self::pubsub::Subscriber;
pub use self::redis::RedisBackend;
pub use self::service::{CacheService, Invalidation, SortedSetMember};
pub use self::store::CacheStore;
pub use self::ttl::{CacheType, TtlPolicy};
