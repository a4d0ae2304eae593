//! Multi-tier result cache.
//!
//! # Read Path
//! ```text
//! get(key):
//!     tier[0] (highest priority) → hit? return
//!     tier[1] → hit? copy into tier[0], return
//!     ...
//!     all missed → None
//! ```
//!
//! Writes go to every tier and are best-effort: a write only fails when
//! every tier rejected it. Reads never fail; a tier error reads as a miss.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::memory::MemoryTier;
use crate::cache::tier::{hit_rate, CacheError, CacheTier, TierStats};
use crate::config::CacheConfig;
use crate::observability::metrics;

/// Aggregated view over all tiers.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub tiers: Vec<TierStats>,
    /// Sums across tiers.
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Blended hit rate across tier lookups.
    pub hit_rate: f64,
    /// Whole-cache lookups that found a value in some tier.
    pub lookups: u64,
    pub lookup_hits: u64,
    pub promotions: u64,
}

/// Cache composed of ordered tiers.
pub struct TieredCache<V> {
    tiers: Vec<Arc<dyn CacheTier<V>>>,
    lookups: AtomicU64,
    lookup_hits: AtomicU64,
    promotions: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> std::fmt::Debug for TieredCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("tiers", &self.tiers.iter().map(|t| t.name().to_string()).collect::<Vec<_>>())
            .finish()
    }
}

impl<V> TieredCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Build from arbitrary tiers; they are ordered by descending priority.
    pub fn new(mut tiers: Vec<Arc<dyn CacheTier<V>>>) -> Self {
        tiers.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self {
            tiers,
            lookups: AtomicU64::new(0),
            lookup_hits: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
        }
    }

    /// One `MemoryTier` per configured tier.
    pub fn from_config(config: &CacheConfig) -> Self {
        let tiers = config
            .tiers
            .iter()
            .map(|tier| Arc::new(MemoryTier::from_config(tier)) as Arc<dyn CacheTier<V>>)
            .collect();
        Self::new(tiers)
    }

    pub fn tier_names(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        for (index, tier) in self.tiers.iter().enumerate() {
            let value = match tier.get(key).await {
                Ok(Some(value)) => value,
                Ok(None) => {
                    metrics::record_cache_lookup(tier.name(), false);
                    continue;
                }
                Err(e) => {
                    tracing::warn!(tier = %tier.name(), key, error = %e, "Cache tier read failed");
                    continue;
                }
            };

            metrics::record_cache_lookup(tier.name(), true);
            self.lookup_hits.fetch_add(1, Ordering::Relaxed);
            self.promote(key, &value, index).await;
            return Some(value);
        }

        None
    }

    /// Copy a value found in `tiers[found_at]` into every higher tier.
    async fn promote(&self, key: &str, value: &V, found_at: usize) {
        for tier in &self.tiers[..found_at] {
            match tier.set(key, value.clone(), None).await {
                Ok(()) => {
                    self.promotions.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(tier = %tier.name(), key, "Promoted cache entry");
                }
                Err(e) => {
                    tracing::warn!(tier = %tier.name(), key, error = %e, "Cache promotion failed");
                }
            }
        }
    }

    /// Write to every tier. Fails only if all tiers fail.
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut errors = Vec::new();
        for tier in &self.tiers {
            if let Err(e) = tier.set(key, value.clone(), ttl).await {
                tracing::warn!(tier = %tier.name(), key, error = %e, "Cache tier write failed");
                errors.push(e.to_string());
            }
        }

        if !self.tiers.is_empty() && errors.len() == self.tiers.len() {
            return Err(CacheError::AllTiersFailed {
                key: key.to_string(),
                tiers: self.tiers.len(),
                errors: errors.join("; "),
            });
        }
        Ok(())
    }

    /// Remove from every tier; `true` if any tier held the key.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut removed = false;
        let mut failures = Vec::new();
        for tier in &self.tiers {
            match tier.delete(key).await {
                Ok(hit) => removed |= hit,
                Err(e) => failures.push(e.to_string()),
            }
        }

        if !self.tiers.is_empty() && failures.len() == self.tiers.len() {
            return Err(CacheError::AllTiersFailed {
                key: key.to_string(),
                tiers: self.tiers.len(),
                errors: failures.join("; "),
            });
        }
        Ok(removed)
    }

    pub async fn mget(&self, keys: &[&str]) -> Vec<Option<V>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await);
        }
        values
    }

    /// Write several entries; the first total failure is returned after all
    /// entries were attempted.
    pub async fn mset(&self, entries: Vec<(String, V)>, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut first_error = None;
        for (key, value) in entries {
            if let Err(e) = self.set(&key, value, ttl).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub async fn clear(&self) {
        for tier in &self.tiers {
            if let Err(e) = tier.clear().await {
                tracing::warn!(tier = %tier.name(), error = %e, "Cache tier clear failed");
            }
        }
    }

    pub async fn purge_expired(&self) -> usize {
        let mut purged = 0;
        for tier in &self.tiers {
            purged += tier.purge_expired().await;
        }
        purged
    }

    pub fn stats(&self) -> CacheStats {
        let tiers: Vec<TierStats> = self.tiers.iter().map(|t| t.stats()).collect();
        let hits = tiers.iter().map(|t| t.hits).sum();
        let misses = tiers.iter().map(|t| t.misses).sum();
        let evictions = tiers.iter().map(|t| t.evictions).sum();

        CacheStats {
            tiers,
            hits,
            misses,
            evictions,
            hit_rate: hit_rate(hits, misses),
            lookups: self.lookups.load(Ordering::Relaxed),
            lookup_hits: self.lookup_hits.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
        }
    }
}
