// Route cache for the path finder.
// Keyed by (token_in, token_out, amount bucket); entries expire by age.

use crate::router::Path;
use dashmap::DashMap;
use ethers::prelude::{Address, U256};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Rounds `amount` down to its two most significant decimal digits (`123_456 -> 120_000`).
pub fn amount_bucket(amount: U256) -> U256 {
    let ten = U256::from(10u64);
    let mut scale = U256::one();
    let mut head = amount;
    while head >= U256::from(100u64) {
        head /= ten;
        scale *= ten;
    }
    head * scale
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub token_in: Address,
    pub token_out: Address,
    pub bucket: U256,
}

impl RouteKey {
    pub fn new(token_in: Address, token_out: Address, amount_in: U256) -> Self {
        Self {
            token_in,
            token_out,
            bucket: amount_bucket(amount_in),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CachedRoute {
    pub path: Path,
    pub inserted_at: u64,
}

pub struct RouteCache {
    entries: DashMap<RouteKey, CachedRoute>,
    metrics: CacheMetrics,
}

#[derive(Default, Debug)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_evictions: AtomicU64,
    inserts: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_evictions: u64,
    pub inserts: u64,
    pub size: usize,
}

impl RouteCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            metrics: CacheMetrics::default(),
        }
    }

    /// Returns the entry if it is younger than `ttl_secs`. Expired entries are evicted.
    pub fn get(&self, key: &RouteKey, now: u64, ttl_secs: u64) -> Option<CachedRoute> {
        let cached = self.entries.get(key).map(|e| e.clone());
        match cached {
            Some(entry) if now.saturating_sub(entry.inserted_at) <= ttl_secs => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(_) => {
                self.entries.remove(key);
                self.metrics.stale_evictions.fetch_add(1, Ordering::Relaxed);
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                crate::metrics::increment_route_cache_miss();
                None
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                crate::metrics::increment_route_cache_miss();
                None
            }
        }
    }

    /// Last writer wins.
    pub fn insert(&self, key: RouteKey, path: Path, now: u64) {
        self.entries.insert(
            key,
            CachedRoute {
                path,
                inserted_at: now,
            },
        );
        self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
        crate::metrics::set_route_cache_size(self.entries.len());
    }

    pub fn clear(&self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        crate::metrics::set_route_cache_size(0);
        removed
    }

    pub fn invalidate_stale(&self, now: u64, ttl_secs: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.inserted_at) <= ttl_secs);
        let removed = before.saturating_sub(self.entries.len());
        self.metrics
            .stale_evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            stale_evictions: self.metrics.stale_evictions.load(Ordering::Relaxed),
            inserts: self.metrics.inserts.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }
}

impl Default for RouteCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_keep_two_significant_digits() {
        assert_eq!(amount_bucket(U256::from(123_456u64)), U256::from(120_000u64));
        assert_eq!(amount_bucket(U256::from(99u64)), U256::from(99u64));
        assert_eq!(amount_bucket(U256::from(100u64)), U256::from(100u64));
        assert_eq!(amount_bucket(U256::from(129_999u64)), U256::from(120_000u64));
        assert_eq!(amount_bucket(U256::zero()), U256::zero());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = RouteCache::new();
        let key = RouteKey::new(Address::from_low_u64_be(1), Address::from_low_u64_be(2), U256::from(5u64));
        let path = Path::identity(Address::from_low_u64_be(1), U256::from(5u64));
        cache.insert(key, path, 1_000);

        assert!(cache.get(&key, 1_300, 300).is_some());
        assert!(cache.get(&key, 1_301, 300).is_none());
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.stale_evictions, 1);
    }
}
