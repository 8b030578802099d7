//! Bounded Cache Module
//!
//! Main cache engine combining a HashMap index with an arena-backed recency
//! list, a byte budget, an item budget and per-entry TTL expiration.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::cache::{CacheEntry, CacheStats, Eviction, EvictionReason, NodeId, RecencyList};
use crate::config::CacheConfig;
use crate::error::CacheError;

// == Bounded Cache ==
/// Key-value cache bounded by total size and item count.
///
/// Invariants after every public call:
/// - the sum of entry sizes is at most `max_size`
/// - the entry count is at most `max_items`
/// - each key maps to exactly one node, and list order is access order
#[derive(Debug)]
pub struct BoundedCache<V> {
    /// Key to recency-list node
    index: HashMap<String, NodeId>,
    /// Entries ordered from most to least recently used
    recency: RecencyList<CacheEntry<V>>,
    /// Hit/miss/eviction counters
    counters: CacheStats,
    /// Sum of entry sizes
    size: usize,
    max_size: usize,
    max_items: usize,
    /// TTL applied by `set`
    default_ttl: Option<Duration>,
    /// Lower bound on the earliest expiry among entries; purges are skipped
    /// while it lies in the future
    next_expiry: Option<Instant>,
}

impl<V> BoundedCache<V> {
    // == Constructor ==
    /// Creates a new cache with the given byte budget, item budget and
    /// default TTL.
    pub fn new(max_size: usize, max_items: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            index: HashMap::new(),
            recency: RecencyList::new(),
            counters: CacheStats::new(),
            size: 0,
            max_size,
            max_items,
            default_ttl,
            next_expiry: None,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size, config.max_items, config.ttl)
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// A hit moves the entry to the front of the recency list. An entry
    /// whose TTL has elapsed is evicted here and counted as a miss.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let Some(&id) = self.index.get(key) else {
            self.counters.record_miss();
            return None;
        };

        let now = Instant::now();
        let expired = self
            .recency
            .get(id)
            .map_or(true, |entry| entry.is_expired_at(now));
        if expired {
            self.remove_node(id);
            self.counters.record_expiration();
            self.counters.record_miss();
            return None;
        }

        self.counters.record_hit();
        self.recency.move_to_front(id);
        let entry = self.recency.get_mut(id)?;
        entry.touch();
        Some(&entry.value)
    }

    // == Set ==
    /// Stores a value with the cache's default TTL.
    ///
    /// See [`BoundedCache::set_with_ttl`].
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: V,
        size: usize,
    ) -> Result<Vec<Eviction>, CacheError> {
        let ttl = self.default_ttl;
        self.set_with_ttl(key, value, size, ttl)
    }

    /// Stores a value with an explicit TTL (None = never expires).
    ///
    /// An item larger than `max_size` is rejected without touching the
    /// cache. Otherwise the entry is inserted or replaced, expired entries
    /// are purged, and least recently used entries are evicted until both
    /// budgets hold again. Returns every entry that left the cache.
    pub fn set_with_ttl(
        &mut self,
        key: impl Into<String>,
        value: V,
        size: usize,
        ttl: Option<Duration>,
    ) -> Result<Vec<Eviction>, CacheError> {
        let key = key.into();
        if size > self.max_size {
            return Err(CacheError::CapacityExceeded {
                key,
                size,
                max_size: self.max_size,
            });
        }

        match self.index.get(&key).copied() {
            Some(id) => {
                if let Some(entry) = self.recency.get_mut(id) {
                    self.size = self.size - entry.size + size;
                    entry.replace(value, size, ttl);
                }
                self.recency.move_to_front(id);
            }
            None => {
                let entry = CacheEntry::new(key.clone(), value, size, ttl);
                let id = self.recency.push_front(entry);
                self.index.insert(key, id);
                self.size += size;
            }
        }

        if let Some(ttl) = ttl {
            let expires = Instant::now() + ttl;
            self.next_expiry = Some(self.next_expiry.map_or(expires, |t| t.min(expires)));
        }

        let mut evictions = self.purge_expired();
        evictions.extend(self.evict_to_fit());
        Ok(evictions)
    }

    // == Has ==
    /// Returns true if the key is present and unexpired.
    ///
    /// Does not affect recency order or hit/miss counters, but evicts the
    /// entry if it has expired.
    pub fn has(&mut self, key: &str) -> bool {
        let Some(&id) = self.index.get(key) else {
            return false;
        };
        let expired = self.recency.get(id).map_or(true, CacheEntry::is_expired);
        if expired {
            self.remove_node(id);
            self.counters.record_expiration();
            return false;
        }
        true
    }

    // == Delete ==
    /// Removes an entry by key, returning whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        match self.index.get(key).copied() {
            Some(id) => self.remove_node(id).is_some(),
            None => false,
        }
    }

    // == Clear ==
    /// Drops every entry. Counters are cumulative and survive a clear.
    pub fn clear(&mut self) {
        self.index.clear();
        self.recency.clear();
        self.size = 0;
        self.next_expiry = None;
    }

    // == Resize ==
    /// Applies new budgets and evicts until they hold.
    pub fn resize(&mut self, max_size: usize, max_items: usize) -> Vec<Eviction> {
        self.max_size = max_size;
        self.max_items = max_items;
        let mut evictions = self.purge_expired();
        evictions.extend(self.evict_to_fit());
        evictions
    }

    // == Purge Expired ==
    /// Removes all expired entries regardless of capacity pressure.
    pub fn purge_expired(&mut self) -> Vec<Eviction> {
        let now = Instant::now();
        match self.next_expiry {
            Some(earliest) if now >= earliest => {}
            _ => return Vec::new(),
        }

        let expired: Vec<NodeId> = self
            .recency
            .ids()
            .filter(|&id| {
                self.recency
                    .get(id)
                    .map_or(false, |entry| entry.is_expired_at(now))
            })
            .collect();

        let mut evictions = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(entry) = self.remove_node(id) {
                self.counters.record_expiration();
                evictions.push(Eviction {
                    key: entry.key,
                    size: entry.size,
                    reason: EvictionReason::Expired,
                });
            }
        }

        self.next_expiry = self.recency.iter().filter_map(CacheEntry::expires_at).min();
        evictions
    }

    // == Stats ==
    /// Returns a snapshot of counters and live occupancy.
    ///
    /// Entries whose TTL has elapsed but which have not been purged yet are
    /// excluded from `size` and `item_count`.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let (size, item_count) = match self.next_expiry {
            Some(earliest) if now >= earliest => self
                .recency
                .iter()
                .filter(|entry| !entry.is_expired_at(now))
                .fold((0, 0), |(size, count), entry| (size + entry.size, count + 1)),
            _ => (self.size, self.recency.len()),
        };

        let mut stats = self.counters.clone();
        stats.size = size;
        stats.item_count = item_count;
        stats.max_size = self.max_size;
        stats.max_items = self.max_items;
        stats.hit_rate = stats.compute_hit_rate();
        stats
    }

    // == Accessors ==
    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.recency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recency.is_empty()
    }

    /// Sum of stored entry sizes, including expired ones not yet purged.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        self.recency.iter().map(|entry| entry.key.clone()).collect()
    }

    // == Internal ==
    fn remove_node(&mut self, id: NodeId) -> Option<CacheEntry<V>> {
        let entry = self.recency.remove(id)?;
        self.index.remove(&entry.key);
        self.size -= entry.size;
        Some(entry)
    }

    /// Evicts from the tail until both budgets hold.
    fn evict_to_fit(&mut self) -> Vec<Eviction> {
        let mut evictions = Vec::new();
        while self.size > self.max_size || self.recency.len() > self.max_items {
            let Some(entry) = self.recency.pop_back() else {
                break;
            };
            self.index.remove(&entry.key);
            self.size -= entry.size;
            self.counters.record_eviction();
            evictions.push(Eviction {
                key: entry.key,
                size: entry.size,
                reason: EvictionReason::Capacity,
            });
        }
        evictions
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn cache(max_size: usize, max_items: usize) -> BoundedCache<&'static str> {
        BoundedCache::new(max_size, max_items, None)
    }

    #[test]
    fn test_cache_new() {
        let store = cache(100, 10);
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_set_and_get() {
        let mut store = cache(100, 10);

        store.set("key1", "value1", 6).unwrap();

        assert_eq!(store.get("key1"), Some(&"value1"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.size(), 6);
    }

    #[test]
    fn test_get_nonexistent() {
        let mut store = cache(100, 10);
        assert_eq!(store.get("nonexistent"), None);
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn test_delete() {
        let mut store = cache(100, 10);

        store.set("key1", "value1", 6).unwrap();
        assert!(store.delete("key1"));

        assert!(store.is_empty());
        assert_eq!(store.size(), 0);
        assert_eq!(store.get("key1"), None);
        assert!(!store.delete("key1"));
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let mut store = cache(100, 10);

        store.set("key1", "value1", 6).unwrap();
        store.set("key1", "value2", 9).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.size(), 9);
        assert_eq!(store.get("key1"), Some(&"value2"));
        assert_eq!(store.keys(), vec!["key1".to_string()]);
    }

    #[test]
    fn test_item_budget_evicts_lru() {
        let mut store = cache(100, 2);

        store.set("a", "1", 1).unwrap();
        store.set("b", "2", 1).unwrap();
        let evicted = store.set("c", "3", 1).unwrap();

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key, "a");
        assert_eq!(evicted[0].reason, EvictionReason::Capacity);
        assert_eq!(store.keys(), vec!["c".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_get_reorders_recency() {
        let mut store = cache(100, 2);

        store.set("a", "1", 1).unwrap();
        store.set("b", "2", 1).unwrap();
        store.get("a").unwrap();
        store.set("c", "3", 1).unwrap();

        assert!(store.has("a"));
        assert!(!store.has("b"));
        assert!(store.has("c"));
    }

    #[test]
    fn test_byte_budget_evicts_until_fit() {
        let mut store = cache(10, 100);

        store.set("a", "1", 4).unwrap();
        store.set("b", "2", 4).unwrap();
        let evicted = store.set("c", "3", 8).unwrap();

        let keys: Vec<&str> = evicted.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(store.size(), 8);
        assert_eq!(store.keys(), vec!["c".to_string()]);
    }

    #[test]
    fn test_oversized_item_rejected_without_eviction() {
        let mut store = cache(10, 100);
        store.set("a", "1", 5).unwrap();

        let result = store.set("huge", "x", 11);

        assert!(matches!(
            result,
            Err(CacheError::CapacityExceeded { size: 11, max_size: 10, .. })
        ));
        assert_eq!(store.keys(), vec!["a".to_string()]);
        assert_eq!(store.size(), 5);
    }

    #[test]
    fn test_ttl_expiration_counts_miss() {
        let mut store: BoundedCache<u32> = BoundedCache::new(100, 10, None);

        store
            .set_with_ttl("key1", 1, 1, Some(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(store.get("key1"), Some(&1));

        sleep(Duration::from_millis(51));

        assert_eq!(store.get("key1"), None);
        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.item_count, 0);
    }

    #[test]
    fn test_expired_entry_excluded_from_stats_without_writes() {
        let mut store: BoundedCache<u32> =
            BoundedCache::new(100, 10, Some(Duration::from_millis(50)));
        store.set("short", 1, 10).unwrap();
        store.set_with_ttl("forever", 2, 5, None).unwrap();

        sleep(Duration::from_millis(51));

        let stats = store.stats();
        assert_eq!(stats.item_count, 1);
        assert_eq!(stats.size, 5);
    }

    #[test]
    fn test_set_purges_expired_first() {
        let mut store: BoundedCache<u32> = BoundedCache::new(100, 2, None);
        store
            .set_with_ttl("old", 1, 1, Some(Duration::from_millis(20)))
            .unwrap();
        store.set("keep", 2, 1).unwrap();

        sleep(Duration::from_millis(30));

        // "old" is expired, so it goes instead of the LRU "keep"
        let evicted = store.set("new", 3, 1).unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key, "old");
        assert_eq!(evicted[0].reason, EvictionReason::Expired);
        assert!(store.has("keep"));
        assert!(store.has("new"));
    }

    #[test]
    fn test_has_evicts_expired() {
        let mut store: BoundedCache<u32> = BoundedCache::new(100, 10, None);
        store
            .set_with_ttl("k", 1, 3, Some(Duration::from_millis(10)))
            .unwrap();
        sleep(Duration::from_millis(20));

        assert!(!store.has("k"));
        assert_eq!(store.len(), 0);
        assert_eq!(store.size(), 0);
        // has() never counts hits or misses
        assert_eq!(store.stats().misses, 0);
    }

    #[test]
    fn test_resize_evicts_to_new_limits() {
        let mut store = cache(100, 10);
        for (key, size) in [("a", 10), ("b", 10), ("c", 10), ("d", 10)] {
            store.set(key, "v", size).unwrap();
        }

        let evicted = store.resize(25, 10);

        assert_eq!(evicted.len(), 2);
        assert_eq!(store.size(), 20);
        assert_eq!(store.keys(), vec!["d".to_string(), "c".to_string()]);

        let evicted = store.resize(25, 1);
        assert_eq!(evicted[0].key, "c");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clear_keeps_counters() {
        let mut store = cache(100, 10);
        store.set("a", "1", 1).unwrap();
        store.get("a");
        store.clear();

        assert!(store.is_empty());
        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.size, 0);
        assert_eq!(stats.item_count, 0);
    }

    #[test]
    fn test_purge_expired_explicit() {
        let mut store: BoundedCache<u32> = BoundedCache::new(100, 10, None);
        store
            .set_with_ttl("k1", 1, 1, Some(Duration::from_millis(10)))
            .unwrap();
        store
            .set_with_ttl("k2", 2, 1, Some(Duration::from_secs(10)))
            .unwrap();

        sleep(Duration::from_millis(20));

        let removed = store.purge_expired();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].key, "k1");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k2"), Some(&2));
    }

    #[test]
    fn test_stats_hit_rate() {
        let mut store = cache(100, 10);

        store.set("key1", "value1", 1).unwrap();
        store.get("key1"); // hit
        store.get("nonexistent"); // miss

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.item_count, 1);
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.max_items, 10);
    }
}
