//! Duplicate suppression for flooded packets
//!
//! In a flood network every node hears the same packet from several
//! neighbours. The first copy is processed; later copies with the same
//! `(source, sequence)` pair are dropped until the entry ages out.
//!
//! Timestamps are unix seconds from the protocol's clock, so the cache can
//! be driven by a manual clock in tests.

use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::{debug, trace};

/// Dedup cache key: `(source, sequence)`
pub type DedupKey = (u32, u32);

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct DedupStats {
    /// Total lookups
    pub total_checks: u64,
    /// Lookups that hit a live entry
    pub duplicates_blocked: u64,
    /// Lookups that recorded a new entry
    pub new_messages: u64,
    /// Entries removed by TTL
    pub ttl_expirations: u64,
    /// Entries displaced by capacity
    pub lru_evictions: u64,
}

impl DedupStats {
    /// Get the duplicate rate (0.0 to 1.0)
    pub fn duplicate_rate(&self) -> f64 {
        if self.total_checks == 0 {
            0.0
        } else {
            self.duplicates_blocked as f64 / self.total_checks as f64
        }
    }
}

/// LRU-bounded dedup cache with TTL expiry
///
/// Owned by exactly one protocol instance; not shared.
#[derive(Debug)]
pub struct DedupCache {
    cache: LruCache<DedupKey, u32>,
    ttl_secs: u32,
    stats: DedupStats,
}

impl DedupCache {
    /// Create with capacity and TTL in seconds
    pub fn new(capacity: usize, ttl_secs: u32) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(cap),
            ttl_secs,
            stats: DedupStats::default(),
        }
    }

    /// Check and record a key
    ///
    /// Returns `true` if the key was seen within the TTL. A new or stale
    /// key is recorded with `now` and `false` is returned.
    pub fn check_and_insert(&mut self, key: DedupKey, now: u32) -> bool {
        self.stats.total_checks += 1;

        if let Some(last_seen) = self.cache.get_mut(&key) {
            if now.saturating_sub(*last_seen) <= self.ttl_secs {
                self.stats.duplicates_blocked += 1;
                debug!(
                    source = format_args!("0x{:08x}", key.0),
                    seq = key.1,
                    "Duplicate packet"
                );
                return true;
            }
            trace!(source = key.0, seq = key.1, "Stale entry, treating as new");
            *last_seen = now;
            self.stats.ttl_expirations += 1;
            self.stats.new_messages += 1;
            return false;
        }

        self.insert(key, now);
        self.stats.new_messages += 1;
        false
    }

    /// Record a key without counting a check
    pub fn mark_seen(&mut self, key: DedupKey, now: u32) {
        self.insert(key, now);
    }

    fn insert(&mut self, key: DedupKey, now: u32) {
        if self.cache.push(key, now).is_some_and(|(old, _)| old != key) {
            self.stats.lru_evictions += 1;
        }
    }

    /// Whether a key is present and live
    pub fn contains(&self, key: &DedupKey, now: u32) -> bool {
        self.cache
            .peek(key)
            .is_some_and(|seen| now.saturating_sub(*seen) <= self.ttl_secs)
    }

    /// Remove entries older than the TTL; returns how many were removed
    pub fn expire(&mut self, now: u32) -> usize {
        let stale: Vec<DedupKey> = self
            .cache
            .iter()
            .filter(|(_, seen)| now.saturating_sub(**seen) > self.ttl_secs)
            .map(|(key, _)| *key)
            .collect();

        for key in &stale {
            self.cache.pop(key);
        }
        self.stats.ttl_expirations += stale.len() as u64;
        stale.len()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Cache statistics
    pub fn stats(&self) -> &DedupStats {
        &self.stats
    }

    /// Configured TTL in seconds
    pub fn ttl_secs(&self) -> u32 {
        self.ttl_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sighting_is_new() {
        let mut cache = DedupCache::new(16, 300);
        assert!(!cache.check_and_insert((0x1001, 1), 1000));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().new_messages, 1);
    }

    #[test]
    fn test_duplicate_detection() {
        let mut cache = DedupCache::new(16, 300);
        assert!(!cache.check_and_insert((0x1001, 1), 1000));
        assert!(cache.check_and_insert((0x1001, 1), 1001));
        assert!(cache.check_and_insert((0x1001, 1), 1299));

        let stats = cache.stats();
        assert_eq!(stats.total_checks, 3);
        assert_eq!(stats.duplicates_blocked, 2);
        assert!((stats.duplicate_rate() - 2.0 / 3.0).abs() < 0.01);
    }

    #[test]
    fn test_key_includes_source() {
        let mut cache = DedupCache::new(16, 300);
        assert!(!cache.check_and_insert((0x1001, 1), 1000));
        assert!(!cache.check_and_insert((0x1002, 1), 1000));
        assert!(!cache.check_and_insert((0x1001, 2), 1000));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_stale_entry_is_new_again() {
        let mut cache = DedupCache::new(16, 300);
        assert!(!cache.check_and_insert((1, 1), 1000));
        assert!(!cache.check_and_insert((1, 1), 1301));
        assert!(cache.check_and_insert((1, 1), 1302));
    }

    #[test]
    fn test_expire_sweeps_old_entries() {
        let mut cache = DedupCache::new(16, 300);
        cache.mark_seen((1, 1), 1000);
        cache.mark_seen((1, 2), 1200);
        cache.mark_seen((1, 3), 1400);

        assert_eq!(cache.expire(1350), 1);
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&(1, 1), 1350));
        assert!(cache.contains(&(1, 2), 1350));
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = DedupCache::new(2, 300);
        cache.check_and_insert((1, 1), 1000);
        cache.check_and_insert((1, 2), 1000);
        cache.check_and_insert((1, 3), 1000);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().lru_evictions, 1);
        assert!(!cache.check_and_insert((1, 1), 1000));
    }

    #[test]
    fn test_mark_seen_then_duplicate() {
        let mut cache = DedupCache::new(16, 300);
        cache.mark_seen((7, 9), 500);
        assert!(cache.check_and_insert((7, 9), 501));
    }
}
