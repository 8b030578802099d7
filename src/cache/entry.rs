//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with size accounting
//! and TTL support, plus the record produced when an entry is evicted.

use std::time::{Duration, Instant};

use serde::Serialize;

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The key this entry is indexed under
    pub key: String,
    /// The stored value
    pub value: V,
    /// Accounted size in bytes
    pub size: usize,
    /// When the entry was inserted or last replaced
    pub created_at: Instant,
    /// When the entry was last read through `get`
    pub last_access_at: Instant,
    /// Time-to-live measured from `created_at`, None = no expiration
    pub ttl: Option<Duration>,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry with optional TTL.
    pub fn new(key: String, value: V, size: usize, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            size,
            created_at: now,
            last_access_at: now,
            ttl,
        }
    }

    // == Replace ==
    /// Swaps in a new value and size and restarts the entry's lifetime.
    pub fn replace(&mut self, value: V, size: usize, ttl: Option<Duration>) {
        let now = Instant::now();
        self.value = value;
        self.size = size;
        self.ttl = ttl;
        self.created_at = now;
        self.last_access_at = now;
    }

    // == Touch ==
    /// Records a read access.
    pub fn touch(&mut self) {
        self.last_access_at = Instant::now();
    }

    // == Expiry ==
    /// Instant at which the entry expires, or None if it never does.
    pub fn expires_at(&self) -> Option<Instant> {
        self.ttl.map(|ttl| self.created_at + ttl)
    }

    /// Checks if the entry has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Checks expiry against a given instant.
    ///
    /// An entry is expired once the full TTL has elapsed, so the boundary
    /// instant itself already counts as expired.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.expires_at() {
            Some(expires) => now >= expires,
            None => false,
        }
    }
}

// == Eviction ==
/// Why an entry left the cache without being deleted explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Its TTL elapsed
    Expired,
    /// It was the least recently used entry while the cache was over budget
    Capacity,
}

/// Record of an evicted entry, returned to the caller for notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub key: String,
    pub size: usize,
    pub reason: EvictionReason,
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_entry_creation_no_ttl() {
        let entry = CacheEntry::new("k".to_string(), "test_value", 10, None);

        assert_eq!(entry.value, "test_value");
        assert_eq!(entry.size, 10);
        assert!(entry.expires_at().is_none());
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::new("k".to_string(), 1u8, 1, Some(Duration::from_millis(50)));

        assert!(!entry.is_expired());

        sleep(Duration::from_millis(51));

        assert!(entry.is_expired());
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let entry = CacheEntry::new("k".to_string(), (), 0, Some(Duration::from_millis(50)));
        let boundary = entry.created_at + Duration::from_millis(50);

        assert!(!entry.is_expired_at(boundary - Duration::from_millis(1)));
        assert!(entry.is_expired_at(boundary), "Entry should be expired at boundary");
    }

    #[test]
    fn test_replace_restarts_lifetime() {
        let mut entry = CacheEntry::new("k".to_string(), 1, 4, Some(Duration::from_millis(30)));
        let first_created = entry.created_at;

        sleep(Duration::from_millis(40));
        assert!(entry.is_expired());

        entry.replace(2, 8, Some(Duration::from_secs(60)));
        assert!(entry.created_at > first_created);
        assert_eq!(entry.value, 2);
        assert_eq!(entry.size, 8);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_touch_updates_last_access() {
        let mut entry = CacheEntry::new("k".to_string(), (), 0, None);
        let before = entry.last_access_at;
        sleep(Duration::from_millis(2));
        entry.touch();
        assert!(entry.last_access_at > before);
        assert_eq!(entry.created_at, before);
    }
}
