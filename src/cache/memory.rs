//! In-process cache tier with lazy expiry and LRU eviction.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::tier::{hit_rate, CacheError, CacheTier, TierStats};
use crate::config::CacheTierConfig;
use crate::observability::metrics;

/// A stored value.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub ttl: Duration,
    pub hits: u64,
    access_order: u64,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }
}

#[derive(Debug)]
struct TierState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> TierState<V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before - self.entries.len();
        self.expirations += purged as u64;
        purged
    }
}

/// Bounded in-memory tier.
#[derive(Debug)]
pub struct MemoryTier<V> {
    name: String,
    priority: u32,
    default_ttl: Duration,
    max_size: usize,
    state: Mutex<TierState<V>>,
}

impl<V> MemoryTier<V> {
    pub fn new(name: impl Into<String>, priority: u32, default_ttl: Duration, max_size: usize) -> Self {
        Self {
            name: name.into(),
            priority,
            default_ttl,
            max_size: max_size.max(1),
            state: Mutex::new(TierState {
                entries: HashMap::new(),
                clock: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
        }
    }

    pub fn from_config(config: &CacheTierConfig) -> Self {
        Self::new(config.name.clone(), config.priority, config.ttl(), config.max_size)
    }

    /// Number of physically stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, TierState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<V> CacheTier<V> for MemoryTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn get(&self, key: &str) -> Result<Option<V>, CacheError> {
        let now = Instant::now();
        let mut state = self.lock();

        let expired = match state.entries.get(key) {
            None => {
                state.misses += 1;
                return Ok(None);
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            state.entries.remove(key);
            state.expirations += 1;
            state.misses += 1;
            return Ok(None);
        }

        let order = state.tick();
        state.hits += 1;
        let value = state.entries.get_mut(key).map(|entry| {
            entry.hits += 1;
            entry.access_order = order;
            entry.value.clone()
        });
        Ok(value)
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<(), CacheError> {
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut evicted = None;
        {
            let mut state = self.lock();
            if !state.entries.contains_key(key) && state.entries.len() >= self.max_size {
                state.purge_expired(now);
                if state.entries.len() >= self.max_size {
                    let lru = state
                        .entries
                        .iter()
                        .min_by_key(|(_, entry)| entry.access_order)
                        .map(|(k, _)| k.clone());
                    if let Some(lru) = lru {
                        state.entries.remove(&lru);
                        state.evictions += 1;
                        evicted = Some(lru);
                    }
                }
            }

            let order = state.tick();
            state.entries.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    inserted_at: now,
                    ttl,
                    hits: 0,
                    access_order: order,
                },
            );
        }

        if let Some(lru) = evicted {
            metrics::record_cache_eviction(&self.name);
            tracing::trace!(tier = %self.name, key = %lru, "Evicted least recently used entry");
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lock().entries.remove(key).is_some())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.lock().entries.clear();
        Ok(())
    }

    async fn purge_expired(&self) -> usize {
        self.lock().purge_expired(Instant::now())
    }

    fn stats(&self) -> TierStats {
        let state = self.lock();
        TierStats {
            name: self.name.clone(),
            priority: self.priority,
            size: state.entries.len(),
            max_size: self.max_size,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
            hit_rate: hit_rate(state.hits, state.misses),
        }
    }
}
