//! In-memory key/value backend
//!
//! A process-local [`KvBackend`] with the same observable semantics as the
//! Redis one: TTL expiry, integer counters, hashes, sorted sets, and cursor
//! scans. It backs the test suites and is the degraded-mode backend when
//! Redis cannot be reached at start-up.
//!
//! # Thread Safety
//!
//! Uses an RwLock around a single map. Operations are atomic with respect to
//! each other, which is stronger than what callers may assume.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::cache::backend::{KvBackend, SortOrder};
use crate::clock::{SharedClock, SystemClock};
use crate::error::{CacheError, CacheResult};

#[derive(Debug, Clone)]
enum StoredValue {
    Str(String),
    Hash(HashMap<String, String>),
    ZSet(Vec<(String, f64)>),
}

/// Entry in the in-memory store with expiration
#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    expires_at_ms: Option<u64>,
}

impl StoredEntry {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map(|exp| now_ms >= exp).unwrap_or(false)
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::Backend(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {}",
        key
    ))
}

/// Glob match supporting `*` and `?`
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Resolve a Redis-style inclusive rank range against a length
fn rank_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

/// Process-local [`KvBackend`]
#[derive(Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<BTreeMap<String, StoredEntry>>>,
    clock: SharedClock,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Create an empty store on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store driven by the given clock
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            clock,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, StoredEntry>> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, StoredEntry>> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }

    fn live<'a>(
        data: &'a BTreeMap<String, StoredEntry>,
        key: &str,
        now: u64,
    ) -> Option<&'a StoredEntry> {
        data.get(key).filter(|e| !e.is_expired(now))
    }

    fn purge_if_expired(data: &mut BTreeMap<String, StoredEntry>, key: &str, now: u64) {
        if data.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            data.remove(key);
        }
    }

    /// Drop the entry if it has expired, then hand back a mutable slot
    fn live_mut<'a>(
        data: &'a mut BTreeMap<String, StoredEntry>,
        key: &str,
        now: u64,
    ) -> Option<&'a mut StoredEntry> {
        Self::purge_if_expired(data, key, now);
        data.get_mut(key)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.read().values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all entries (useful for test isolation)
    pub fn clear(&self) {
        self.write().clear();
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = self.clock.now_ms();
        let data = self.read();
        match Self::live(&data, key, now).map(|e| &e.value) {
            Some(StoredValue::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl_seconds: Option<u64>) -> CacheResult<()> {
        let now = self.clock.now_ms();
        let expires_at_ms = ttl_seconds.filter(|t| *t > 0).map(|t| now + t * 1000);
        self.write().insert(
            key.to_string(),
            StoredEntry {
                value: StoredValue::Str(value),
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        let now = self.clock.now_ms();
        let mut data = self.write();
        let mut deleted = 0;
        for key in keys {
            if let Some(entry) = data.remove(key) {
                if !entry.is_expired(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let now = self.clock.now_ms();
        Ok(Self::live(&self.read(), key, now).is_some())
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> CacheResult<bool> {
        let now = self.clock.now_ms();
        let mut data = self.write();
        match Self::live_mut(&mut data, key, now) {
            Some(entry) => {
                entry.expires_at_ms = Some(now + ttl_seconds * 1000);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        let now = self.clock.now_ms();
        let data = self.read();
        Ok(match Self::live(&data, key, now) {
            None => -2,
            Some(StoredEntry {
                expires_at_ms: None,
                ..
            }) => -1,
            Some(StoredEntry {
                expires_at_ms: Some(exp),
                ..
            }) => ((exp - now + 500) / 1000) as i64,
        })
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        let now = self.clock.now_ms();
        let data = self.read();
        Ok(keys
            .iter()
            .map(|k| match Self::live(&data, k, now).map(|e| &e.value) {
                Some(StoredValue::Str(s)) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    async fn mset(&self, entries: &[(String, String)]) -> CacheResult<()> {
        let mut data = self.write();
        for (key, value) in entries {
            data.insert(
                key.clone(),
                StoredEntry {
                    value: StoredValue::Str(value.clone()),
                    expires_at_ms: None,
                },
            );
        }
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let now = self.clock.now_ms();
        let mut data = self.write();

        let (current, expires_at_ms) = match Self::live_mut(&mut data, key, now) {
            Some(StoredEntry {
                value: StoredValue::Str(s),
                expires_at_ms,
            }) => {
                let current: i64 = s.parse().map_err(|_| {
                    CacheError::Backend("value is not an integer or out of range".to_string())
                })?;
                (current, *expires_at_ms)
            }
            Some(_) => return Err(wrong_type(key)),
            None => (0, None),
        };

        let new_value = current
            .checked_add(delta)
            .ok_or_else(|| CacheError::Backend("increment or decrement would overflow".to_string()))?;
        data.insert(
            key.to_string(),
            StoredEntry {
                value: StoredValue::Str(new_value.to_string()),
                expires_at_ms,
            },
        );

        Ok(new_value)
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        let now = self.clock.now_ms();
        let data = self.read();
        match Self::live(&data, key, now).map(|e| &e.value) {
            Some(StoredValue::Hash(h)) => Ok(h.get(field).cloned()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> CacheResult<bool> {
        let now = self.clock.now_ms();
        let mut data = self.write();
        Self::purge_if_expired(&mut data, key, now);
        let entry = data.entry(key.to_string()).or_insert_with(|| StoredEntry {
            value: StoredValue::Hash(HashMap::new()),
            expires_at_ms: None,
        });
        match &mut entry.value {
            StoredValue::Hash(h) => Ok(h.insert(field.to_string(), value).is_none()),
            _ => Err(wrong_type(key)),
        }
    }

    async fn hdel(&self, key: &str, field: &str) -> CacheResult<bool> {
        let now = self.clock.now_ms();
        let mut data = self.write();
        let (removed, now_empty) = match Self::live_mut(&mut data, key, now) {
            Some(StoredEntry {
                value: StoredValue::Hash(h),
                ..
            }) => (h.remove(field).is_some(), h.is_empty()),
            Some(_) => return Err(wrong_type(key)),
            None => (false, false),
        };
        if now_empty {
            data.remove(key);
        }
        Ok(removed)
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let now = self.clock.now_ms();
        let data = self.read();
        match Self::live(&data, key, now).map(|e| &e.value) {
            Some(StoredValue::Hash(h)) => Ok(h.clone()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(HashMap::new()),
        }
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> CacheResult<u64> {
        let now = self.clock.now_ms();
        let mut data = self.write();
        Self::purge_if_expired(&mut data, key, now);
        let entry = data.entry(key.to_string()).or_insert_with(|| StoredEntry {
            value: StoredValue::ZSet(Vec::new()),
            expires_at_ms: None,
        });
        let set = match &mut entry.value {
            StoredValue::ZSet(set) => set,
            _ => return Err(wrong_type(key)),
        };

        let added = match set.iter_mut().find(|(m, _)| m == member) {
            Some(existing) => {
                existing.1 = score;
                0
            }
            None => {
                set.push((member.to_string(), score));
                1
            }
        };
        set.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(added)
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: SortOrder,
    ) -> CacheResult<Vec<(String, f64)>> {
        let now = self.clock.now_ms();
        let data = self.read();
        let set = match Self::live(&data, key, now).map(|e| &e.value) {
            Some(StoredValue::ZSet(set)) => set,
            Some(_) => return Err(wrong_type(key)),
            None => return Ok(Vec::new()),
        };

        let ordered: Vec<&(String, f64)> = match order {
            SortOrder::Ascending => set.iter().collect(),
            SortOrder::Descending => set.iter().rev().collect(),
        };

        Ok(match rank_bounds(ordered.len(), start, stop) {
            Some((from, to)) => ordered[from..=to].iter().map(|e| (*e).clone()).collect(),
            None => Vec::new(),
        })
    }

    async fn zrem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        let now = self.clock.now_ms();
        let mut data = self.write();
        let (removed, now_empty) = match Self::live_mut(&mut data, key, now) {
            Some(StoredEntry {
                value: StoredValue::ZSet(set),
                ..
            }) => {
                let before = set.len();
                set.retain(|(m, _)| !members.contains(m));
                ((before - set.len()) as u64, set.is_empty())
            }
            Some(_) => return Err(wrong_type(key)),
            None => (0, false),
        };
        if now_empty {
            data.remove(key);
        }
        Ok(removed)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> CacheResult<(u64, Vec<String>)> {
        let now = self.clock.now_ms();
        let data = self.read();
        let count = count.max(1);

        let keys: Vec<&String> = data
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k)
            .collect();

        let start = cursor as usize;
        let end = (start + count).min(keys.len());
        let page = if start < keys.len() {
            keys[start..end]
                .iter()
                .filter(|k| glob_match(pattern, k))
                .map(|k| (*k).clone())
                .collect()
        } else {
            Vec::new()
        };

        let next = if end >= keys.len() { 0 } else { end as u64 };
        Ok((next, page))
    }

    async fn publish(&self, _channel: &str, _message: &str) -> CacheResult<u64> {
        // No subscribers exist inside a single process store
        Ok(0)
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}
