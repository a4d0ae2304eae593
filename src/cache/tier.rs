//! Cache tier capability.
//!
//! `TieredCache` only talks to tiers through this trait, so a networked
//! tier can stand in for `MemoryTier` without touching the tiered logic.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by cache tiers and the tiered cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache tier '{tier}' unavailable: {reason}")]
    TierUnavailable { tier: String, reason: String },

    #[error("write of '{key}' failed in all {tiers} tiers: {errors}")]
    AllTiersFailed {
        key: String,
        tiers: usize,
        errors: String,
    },
}

/// Per-tier counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TierStats {
    pub name: String,
    pub priority: u32,
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
}

/// One storage layer of a [`TieredCache`](super::TieredCache).
#[async_trait]
pub trait CacheTier<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str;

    /// Read order; higher is consulted first.
    fn priority(&self) -> u32;

    /// TTL used when a write does not specify one (including promotions).
    fn default_ttl(&self) -> Duration;

    /// Live value for `key`; expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<V>, CacheError>;

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Returns whether a value was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    /// Physically drop expired entries; returns how many went.
    async fn purge_expired(&self) -> usize {
        0
    }

    fn stats(&self) -> TierStats;
}

pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
