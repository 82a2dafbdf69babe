//! Generic LRU+TTL cache core (spec.md §4.2).
//!
//! Built on the teacher's `lru` crate dependency, following the TTL-wrapper
//! idiom from `crates/bridge/src/profiles.rs::ProfileCache` (an
//! `LruCache<K, V>` behind a lock, values wrapped with an expiry instant,
//! lazy eviction on access, hit/miss counters) but generalized to arbitrary
//! `K`/`V` and exposing `CleanupExpired`/`Stats` as first-class operations
//! rather than leaving expired entries to accumulate until next access (the
//! teacher's own comment in `seen_events.rs` notes it "can't easily iterate"
//! — `lru::LruCache::iter` makes a real sweep straightforward).

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evicted: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry<V> {
    value: V,
    /// `None` means "never expires".
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(t) if now >= t)
    }
}

struct Inner<K: Hash + Eq, V> {
    cache: LruCache<K, Entry<V>>,
    hits: u64,
    misses: u64,
    evicted: u64,
}

/// O(1) get/set/delete LRU cache with per-entry absolute expiry.
///
/// Safe for concurrent callers: mutations take the exclusive lock, and
/// `stats()` (the only read-only operation) takes the same lock briefly
/// since `lru::LruCache::len`/`cap` require `&self` but our stats counters
/// live alongside the cache under one lock for simplicity — read contention
/// on a snapshot call is cheap relative to the win of a single lock type.
pub struct LruTtlCache<K: Hash + Eq + Clone, V: Clone> {
    inner: RwLock<Inner<K, V>>,
    default_ttl: Option<Duration>,
}

impl<K: Hash + Eq + Clone, V: Clone> LruTtlCache<K, V> {
    pub fn new(capacity: usize, default_ttl: Option<Duration>) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity must be nonzero");
        Self {
            inner: RwLock::new(Inner {
                cache: LruCache::new(cap),
                hits: 0,
                misses: 0,
                evicted: 0,
            }),
            default_ttl,
        }
    }

    /// Misses include both "absent" and "present but expired"; an expired
    /// hit is evicted on access.
    pub async fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let expired = match inner.cache.peek(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                inner.misses += 1;
                return None;
            }
        };
        if expired {
            inner.cache.pop(key);
            inner.misses += 1;
            return None;
        }
        inner.hits += 1;
        inner.cache.get(key).map(|e| e.value.clone())
    }

    pub async fn set(&self, key: K, value: V) {
        self.set_with_ttl_opt(key, value, self.default_ttl).await;
    }

    pub async fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.set_with_ttl_opt(key, value, Some(ttl)).await;
    }

    async fn set_with_ttl_opt(&self, key: K, value: V, ttl: Option<Duration>) {
        let mut inner = self.inner.write().await;
        let expires_at = ttl.map(|d| Instant::now() + d);
        let was_full = inner.cache.len() >= inner.cache.cap().get() && !inner.cache.contains(&key);
        inner.cache.put(key, Entry { value, expires_at });
        if was_full {
            inner.evicted += 1;
        }
    }

    pub async fn delete(&self, key: &K) -> bool {
        self.inner.write().await.cache.pop(key).is_some()
    }

    /// Sweep all expired entries. Safe to call periodically.
    pub async fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let expired_keys: Vec<K> = inner
            .cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        let count = expired_keys.len();
        for key in &expired_keys {
            inner.cache.pop(key);
        }
        count
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.cache.clear();
        inner.hits = 0;
        inner.misses = 0;
        inner.evicted = 0;
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        CacheStats {
            size: inner.cache.len(),
            max_size: inner.cache.cap().get(),
            hits: inner.hits,
            misses: inner.misses,
            evicted: inner.evicted,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_hits() {
        let cache: LruTtlCache<&str, i32> = LruTtlCache::new(2, None);
        cache.set("a", 1).await;
        assert_eq!(cache.get(&"a").await, Some(1));
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn miss_is_counted() {
        let cache: LruTtlCache<&str, i32> = LruTtlCache::new(2, None);
        assert_eq!(cache.get(&"missing").await, None);
        assert_eq!(cache.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn delete_then_get_misses() {
        let cache: LruTtlCache<&str, i32> = LruTtlCache::new(2, None);
        cache.set("a", 1).await;
        assert!(cache.delete(&"a").await);
        assert_eq!(cache.get(&"a").await, None);
    }

    #[tokio::test]
    async fn overflow_evicts_least_recently_used() {
        let cache: LruTtlCache<&str, i32> = LruTtlCache::new(2, None);
        cache.set("a", 1).await;
        cache.set("b", 2).await;
        // touch "a" so "b" becomes least-recently-used
        let _ = cache.get(&"a").await;
        cache.set("c", 3).await;
        assert_eq!(cache.get(&"b").await, None);
        assert_eq!(cache.get(&"a").await, Some(1));
        assert_eq!(cache.get(&"c").await, Some(3));
        assert!(cache.stats().await.size <= 2);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_is_removed() {
        let cache: LruTtlCache<&str, i32> = LruTtlCache::new(10, None);
        cache.set_with_ttl("a", 1, Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get(&"a").await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn cleanup_expired_sweeps_without_access() {
        let cache: LruTtlCache<&str, i32> = LruTtlCache::new(10, None);
        cache.set_with_ttl("a", 1, Duration::from_millis(1)).await;
        cache.set("b", 2).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let removed = cache.cleanup_expired().await;
        assert_eq!(removed, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn size_never_exceeds_max() {
        let cache: LruTtlCache<i32, i32> = LruTtlCache::new(3, None);
        for i in 0..10 {
            cache.set(i, i).await;
            assert!(cache.stats().await.size <= 3);
        }
    }
}
