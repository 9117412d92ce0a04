use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Counters reported by [LruCache::stats].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub hit_rate: f64,
}

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
    /// Monotonic access stamp; the entry with the smallest stamp is the
    /// least recently used.
    last_access: u64,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    counter: u64,
    hits: u64,
    misses: u64,
}

/// A bounded async cache with least-recently-used eviction and per-entry
/// time-to-live.
///
/// Reads refresh recency, so eviction order follows access, not insertion.
/// Expiry is lazy: an expired entry is dropped when a read finds it (or by
/// an explicit [LruCache::cleanup_expired] sweep); no background task runs.
/// A single mutex guards the map, the recency counter, and the hit/miss
/// counters, which keeps interleaved evaluations from corrupting any of
/// them.
pub struct LruCache<V> {
    inner: Mutex<Inner<V>>,
    max_size: usize,
    default_ttl: Option<Duration>,
}

impl<V: Clone> LruCache<V> {
    /// `default_ttl` of `None` stores non-expiring entries unless a `set`
    /// supplies its own TTL.
    pub fn new(max_size: usize, default_ttl: Option<Duration>) -> Self {
        LruCache {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                counter: 0,
                hits: 0,
                misses: 0,
            }),
            max_size,
            default_ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let expired = inner
            .entries
            .get(key)
            .map(|entry| entry.expires_at.is_some_and(|at| at <= now));
        match expired {
            None => {
                inner.misses += 1;
                None
            }
            Some(true) => {
                inner.entries.remove(key);
                inner.misses += 1;
                None
            }
            Some(false) => {
                inner.counter += 1;
                inner.hits += 1;
                let stamp = inner.counter;
                inner.entries.get_mut(key).map(|entry| {
                    entry.last_access = stamp;
                    entry.value.clone()
                })
            }
        }
    }

    /// Inserts or replaces an entry. `ttl` of `None` falls back to the
    /// cache-wide default; a zero TTL expires immediately. Inserting into a
    /// full cache evicts the least recently accessed entry first; a
    /// zero-capacity cache stores nothing.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        if self.max_size == 0 {
            return;
        }
        let key = key.into();
        let mut inner = self.inner.lock().await;
        let expires_at = ttl
            .or(self.default_ttl)
            .map(|ttl| Instant::now() + ttl);

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_size {
            if let Some(lru) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&lru);
            }
        }

        inner.counter += 1;
        let last_access = inner.counter;
        inner.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                last_access,
            },
        );
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.inner.lock().await.entries.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.inner.lock().await.entries.clear();
    }

    /// Removes every expired entry and returns how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| !entry.expires_at.is_some_and(|at| at <= now));
        before - inner.entries.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        let lookups = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.entries.len(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }
}
