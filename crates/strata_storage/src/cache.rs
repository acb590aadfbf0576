//! Bounded LRU cache fronting backend reads.
//!
//! Every backend owns a [`RecordCache`] and consults it before touching
//! disk or the wire. The cache is purely an optimization: backend storage
//! is always the source of truth, and clearing the cache at any point must
//! never affect correctness. Backends clear it on transaction rollback and
//! on whole-store imports so subsequent reads reflect the authoritative
//! state.

use crate::record::Record;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// A bounded in-memory cache of recently used records.
///
/// Least-recently-used entries are evicted on overflow. Hit and miss
/// counters are tracked atomically so `stats()` can be read while the
/// owning backend is in use.
///
/// A capacity of zero disables caching entirely: every `get` is a miss and
/// `put` is a no-op.
pub struct RecordCache {
    /// `None` when the configured capacity is zero.
    entries: Option<Mutex<LruCache<String, Record>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RecordCache {
    /// Creates a cache holding at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let entries = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        Self {
            entries,
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Inserts or updates a record, marking it most-recently-used.
    pub fn put(&self, key: &str, value: Record) {
        if let Some(entries) = &self.entries {
            entries.lock().put(key.to_string(), value);
        }
    }

    /// Returns a clone of the cached record, or `None` on a miss.
    ///
    /// A hit refreshes the entry's recency.
    pub fn get(&self, key: &str) -> Option<Record> {
        let Some(entries) = &self.entries else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match entries.lock().get(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Removes a record if present.
    pub fn remove(&self, key: &str) {
        if let Some(entries) = &self.entries {
            entries.lock().pop(key);
        }
    }

    /// Empties the cache and resets the hit/miss counters.
    pub fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().clear();
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Drops every entry but keeps the counters.
    ///
    /// Used on transaction rollback, where the statistics should survive
    /// but all cached values are suspect.
    pub fn invalidate(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().clear();
        }
    }

    /// Number of records currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.lock().len())
    }

    /// Whether the cache holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a point-in-time snapshot of the cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        CacheStats {
            capacity: self.capacity,
            len: self.len(),
            hits,
            misses,
            hit_rate,
        }
    }
}

impl std::fmt::Debug for RecordCache {
    // LruCache has no Debug impl; summarize instead of listing entries.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Maximum number of records the cache can hold.
    pub capacity: usize,
    /// Number of records currently cached.
    pub len: usize,
    /// Total lookups that found a cached record.
    pub hits: u64,
    /// Total lookups that missed.
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0.0 before any lookup.
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: i64) -> Record {
        let mut map = Record::new();
        map.insert("value".to_string(), json!(value));
        map
    }

    #[test]
    fn put_then_get_hits() {
        let cache = RecordCache::new(4);
        cache.put("a", record(1));

        assert_eq!(cache.get("a"), Some(record(1)));
        assert_eq!(cache.get("b"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = RecordCache::new(2);
        cache.put("a", record(1));
        cache.put("b", record(2));

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.put("c", record(3));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn remove_drops_entry() {
        let cache = RecordCache::new(2);
        cache.put("a", record(1));
        cache.remove("a");
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn clear_resets_stats() {
        let cache = RecordCache::new(2);
        cache.put("a", record(1));
        cache.get("a");
        cache.get("missing");

        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.len, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn invalidate_keeps_counters() {
        let cache = RecordCache::new(2);
        cache.put("a", record(1));
        cache.get("a");

        cache.invalidate();

        assert!(cache.get("a").is_none());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.len, 0);
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let cache = RecordCache::new(0);
        cache.put("a", record(1));

        assert!(cache.get("a").is_none());
        assert_eq!(cache.stats().capacity, 0);
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn update_refreshes_value() {
        let cache = RecordCache::new(2);
        cache.put("a", record(1));
        cache.put("a", record(2));
        assert_eq!(cache.get("a"), Some(record(2)));
        assert_eq!(cache.len(), 1);
    }
}
