//! Cache Module
//!
//! Provides a size- and count-bounded in-memory cache with combined LRU
//! eviction and TTL expiration.

mod entry;
mod lru;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::{CacheEntry, Eviction, EvictionReason};
pub use lru::{NodeId, RecencyList};
pub use stats::CacheStats;
pub use store::BoundedCache;
