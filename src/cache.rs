//! Bounded in-memory cache with per-entry TTL and least-recently-used eviction
//!
//! Recency is tracked with a global monotonically increasing access counter
//! rather than a linked list. Eviction scans all counters, which is fine for
//! the tens-to-hundreds of entries this cache is sized for and only happens
//! when inserting a new key into a full cache.
//!
//! The cache is a best-effort accelerator: a miss always means "fetch again",
//! never an error.

use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use crate::constants::FAR_FUTURE_SECS;
use std::time::Duration;
use tokio::time::Instant;

/// A cached value with its storage and expiry timestamps
///
/// Readers always receive a copy; the cache keeps the only stored instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub stored_at: Instant,
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    /// A TTL too large to represent as an instant never expires in practice
    fn new(data: T, ttl: Duration) -> Self {
        let stored_at = Instant::now();
        let expires_at = stored_at
            .checked_add(ttl)
            .unwrap_or_else(|| stored_at + Duration::from_secs(FAR_FUTURE_SECS));
        Self {
            data,
            stored_at,
            expires_at,
        }
    }

    /// True once `now` is strictly past the expiry instant
    pub fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }

    /// How long ago the value was stored
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.stored_at)
    }

    /// Time left before expiry, `None` once expired
    pub fn time_to_live(&self) -> Option<Duration> {
        let now = Instant::now();
        (now <= self.expires_at).then(|| self.expires_at - now)
    }
}

/// Hit/miss/eviction counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
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

struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    access_order: HashMap<K, u64>,
    counter: u64,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V> CacheInner<K, V> {
    fn touch(&mut self, key: &K) {
        self.counter += 1;
        self.access_order.insert(key.clone(), self.counter);
    }

    fn remove(&mut self, key: &K) -> Option<CacheEntry<V>> {
        self.access_order.remove(key);
        self.entries.remove(key)
    }

    fn evict_lru(&mut self) -> Option<K> {
        let victim = self
            .access_order
            .iter()
            .min_by_key(|(_, counter)| **counter)
            .map(|(key, _)| key.clone())?;
        self.remove(&victim);
        self.stats.evictions += 1;
        Some(victim)
    }
}

/// Thread-safe TTL + LRU cache
///
/// All mutation is serialized behind one mutex, so callers can share the
/// cache through an `Arc` without their own locking.
pub struct TtlCache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
    capacity: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(capacity),
                access_order: HashMap::with_capacity(capacity),
                counter: 0,
                stats: CacheStats::default(),
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<K, V>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores `value` under `key`, expiring `ttl` from now
    ///
    /// Inserting a new key into a full cache first evicts the least recently
    /// accessed entry. Overwriting an existing key never evicts.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let mut inner = self.lock();
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            inner.evict_lru();
        }
        inner.entries.insert(key.clone(), CacheEntry::new(value, ttl));
        inner.touch(&key);
    }

    /// Returns a copy of the value, or `None` on miss or expiry
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_entry(key).map(|entry| entry.data)
    }

    /// Returns a copy of the whole entry, including its timestamps
    ///
    /// Expired entries are deleted on read.
    pub fn get_entry(&self, key: &K) -> Option<CacheEntry<V>> {
        let mut inner = self.lock();
        match inner.entries.get(key).map(CacheEntry::is_expired) {
            None => {
                inner.stats.misses += 1;
                None
            }
            Some(true) => {
                inner.remove(key);
                inner.stats.expirations += 1;
                inner.stats.misses += 1;
                None
            }
            Some(false) => {
                inner.touch(key);
                inner.stats.hits += 1;
                inner.entries.get(key).cloned()
            }
        }
    }

    /// Removes an entry, returning its value if present
    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().remove(key).map(|entry| entry.data)
    }

    /// Drops every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.lock();
        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        inner.stats.expirations += expired.len() as u64;
        expired.len()
    }

    /// Empties the cache
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.access_order.clear();
    }

    /// Number of stored entries, expired ones included until they are read
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}
