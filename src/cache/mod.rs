//! Process-local memoization of derived balances.
//!
//! The ledger is the source of truth; a cached balance is advisory only. A
//! miss always falls back to recomputing from the movement history, and an
//! entry expires after its TTL even without explicit invalidation, since
//! other processes sharing the storage backend cannot invalidate this map.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Configuration for the balance cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceCacheConfig {
    /// Maximum age of an entry before it is treated as absent.
    pub ttl_secs: u64,
}

impl Default for BalanceCacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    balance: i64,
    computed_at: Instant,
}

/// Concurrent map of item id to `(computed_at, balance)` with time-boxed
/// entries. Expired entries are removed lazily on the `get` that observes
/// them.
#[derive(Debug)]
pub struct BalanceCache {
    entries: DashMap<i64, CacheEntry>,
    ttl: Duration,
}

impl BalanceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn from_config(config: &BalanceCacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs))
    }

    /// Returns the cached balance if present and not expired.
    pub fn get(&self, item_id: i64) -> Option<i64> {
        let entry = self.entries.get(&item_id).map(|e| *e);
        match entry {
            Some(e) if e.computed_at.elapsed() < self.ttl => Some(e.balance),
            Some(_) => {
                self.entries.remove(&item_id);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, item_id: i64, balance: i64) {
        self.entries.insert(
            item_id,
            CacheEntry {
                balance,
                computed_at: Instant::now(),
            },
        );
    }

    /// Drops the entry for one item. Paired with every committed movement
    /// against that item.
    pub fn invalidate(&self, item_id: i64) {
        self.entries.remove(&item_id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for BalanceCache {
    fn default() -> Self {
        Self::from_config(&BalanceCacheConfig::default())
    }
}
