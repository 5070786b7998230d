//! Generic in-memory cache with per-entry expiry and a hard capacity.
//!
//! Backed by a sharded [`DashMap`], so readers and writers of different keys
//! never contend on one lock. Expired entries are treated as misses and
//! removed on access; when a new key would exceed capacity, expired entries
//! are purged first and the single oldest entry is evicted only if that was
//! not enough.
//!
//! Clock reads go through [`tokio::time::Instant`], so paused-time tests can
//! drive expiry with `tokio::time::advance`.

use dashmap::DashMap;
use serde::Serialize;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Point-in-time counters for a [`TimedCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Live lookups
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    /// Entries removed to respect capacity
    pub evictions: u64,
    /// Current entry count (may include not-yet-swept expired entries)
    pub size: usize,
    /// Configured capacity
    pub capacity: usize,
}

impl CacheStats {
    /// Total lookups performed
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups that hit, 0.0 when nothing was looked up
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            n => self.hits as f64 / n as f64,
        }
    }
}

/// Key/value store with a default TTL, optional per-entry TTL and a size bound.
#[derive(Debug)]
pub struct TimedCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> TimedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache. A capacity of zero is bumped to one.
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            entries: DashMap::with_capacity(max_size.min(1024)),
            ttl,
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Default TTL applied by [`insert`](Self::insert)
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Look up a live value. An expired entry counts as a miss and is removed.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        // The read guard is gone; re-check expiry under the shard write lock
        // so a concurrent refresh is not thrown away.
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Whether a live entry exists. Does not touch hit/miss counters.
    pub fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Insert with the default TTL
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.ttl);
    }

    /// Insert with an explicit TTL, evicting as needed to stay within capacity.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            self.purge_expired_at(now);
        }
        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
        while self.entries.len() > self.max_size {
            if !self.evict_oldest(&key) {
                break;
            }
        }
    }

    /// Remove an entry, returning its value if it was still live
    pub fn remove(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.entries
            .remove(key)
            .and_then(|(_, entry)| (!entry.is_expired(now)).then_some(entry.value))
    }

    /// Keep only the entries for which `keep` returns true
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.entries.retain(|key, entry| keep(key, &entry.value));
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Evict the oldest entry other than `keep`. Returns false if nothing could be evicted.
    fn evict_oldest(&self, keep: &K) -> bool {
        let oldest = self
            .entries
            .iter()
            .filter(|item| item.key() != keep)
            .min_by_key(|item| item.value().inserted_at)
            .map(|item| item.key().clone());

        match oldest {
            Some(key) => {
                if self.entries.remove(&key).is_some() {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }

    /// Remove everything and reset nothing else
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Current entry count
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.entries.len(),
            capacity: self.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_value_live_before_ttl_and_missing_after() {
        let cache = TimedCache::new(Duration::from_secs(30), 10);
        cache.insert("greeting", "hello".to_string());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get(&"greeting"), Some("hello".to_string()));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&"greeting"), None);
        assert!(cache.is_empty(), "expired entry is evicted on access");
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_entry_ttl_overrides_default() {
        let cache = TimedCache::new(Duration::from_secs(60), 10);
        cache.insert_with_ttl(1, "short", Duration::from_secs(5));
        cache.insert(2, "long");

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some("long"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_never_exceeded() {
        let cache = TimedCache::new(Duration::from_secs(60), 8);
        for i in 0..100 {
            cache.insert(i, i * 2);
            tokio::time::advance(Duration::from_millis(1)).await;
            assert!(cache.len() <= 8);
        }
        assert_eq!(cache.len(), 8);
        // the newest keys survive
        assert_eq!(cache.get(&99), Some(198));
        assert_eq!(cache.get(&0), None);
        assert_eq!(cache.stats().evictions, 92);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_go_before_live_ones() {
        let cache = TimedCache::new(Duration::from_secs(60), 3);
        cache.insert_with_ttl("old", 0, Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert("a", 1);
        cache.insert("b", 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.insert("c", 3);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.stats().evictions, 0, "purge is not an eviction");
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = TimedCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(3));
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[tokio::test]
    async fn test_stats_and_retain() {
        let cache = TimedCache::new(Duration::from_secs(60), 10);
        cache.insert(1, "one");
        cache.insert(2, "two");
        cache.get(&1);
        cache.get(&3);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.lookups(), 2);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);

        cache.retain(|key, _| *key != 1);
        assert!(!cache.contains(&1));
        assert_eq!(cache.remove(&2), Some("two"));
        assert!(cache.is_empty());
    }
}
