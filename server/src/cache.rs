//! Bounded in-memory cache with per-entry TTL and LRU eviction.
//!
//! Expired entries are dropped lazily, when a lookup finds them. Capacity is
//! enforced on insert by evicting the least recently used entry, where both a
//! hit and an insert count as a use. The cache synchronizes internally, so a
//! shared reference is enough for concurrent callers; no operation awaits.

use std::{
    hash::Hash,
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard, PoisonError},
};

use lru::LruCache;
use tokio::time::{Duration, Instant};
use tracing::debug;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

pub struct ExpiringCache<K: Hash + Eq, V> {
    name: &'static str,
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> ExpiringCache<K, V> {
    /// `capacity` of zero is treated as one.
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        entries.pop(key);
        debug!(cache = self.name, "Cache entry expired, removing");
        None
    }

    /// Insert or replace `key`, restarting its TTL.
    pub fn put(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        let mut entries = self.lock();
        let evicting = entries.len() == entries.cap().get() && !entries.contains(&key);
        entries.put(key, entry);
        if evicting {
            debug!(cache = self.name, "Evicted least recently used entry");
        }
    }

    /// Number of stored entries, including expired ones not yet looked up.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    // A panic while holding the lock cannot leave the LRU list half-updated
    // from our side, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, LruCache<K, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_value_until_ttl() {
        let cache = ExpiringCache::new("test", 4, TTL);
        cache.put("a", 1);

        assert_eq!(cache.get(&"a"), Some(1));
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&"a"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty(), "expired entry should be removed on lookup");
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_after_expiry_succeeds() {
        let cache = ExpiringCache::new("test", 4, TTL);
        cache.put("a", 1);
        tokio::time::advance(TTL * 2).await;
        assert_eq!(cache.get(&"a"), None);

        cache.put("a", 2);
        assert_eq!(cache.get(&"a"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_resets_ttl() {
        let cache = ExpiringCache::new("test", 4, TTL);
        cache.put("a", 1);
        tokio::time::advance(Duration::from_secs(50)).await;
        cache.put("a", 2);
        tokio::time::advance(Duration::from_secs(50)).await;

        assert_eq!(cache.get(&"a"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = ExpiringCache::new("test", 2, TTL);
        cache.put("a", 1);
        cache.put("b", 2);
        // touching "a" makes "b" the eviction candidate
        assert_eq!(cache.get(&"a"), Some(1));
        cache.put("c", 3);

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let cache = ExpiringCache::new("test", 3, TTL);
        for i in 0..10 {
            cache.put(i, i);
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
        // exactly the three most recent inserts survive
        assert_eq!(cache.get(&6), None);
        for i in 7..10 {
            assert_eq!(cache.get(&i), Some(i));
        }
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let cache = ExpiringCache::new("test", 2, TTL);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);

        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache: ExpiringCache<&str, i32> = ExpiringCache::new("test", 0, TTL);
        assert_eq!(cache.capacity(), 1);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn test_composite_keys_compare_structurally() {
        let cache = ExpiringCache::new("test", 4, TTL);
        cache.put(("Hello".to_string(), "voice".to_string()), 1);
        let key = (String::from("Hel") + "lo", "voice".to_string());
        assert_eq!(cache.get(&key), Some(1));
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(ExpiringCache::new("test", 64, TTL));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.put((t, i % 8), i);
                        let _ = cache.get(&(t, i % 8));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 64);
    }
}
