//! In-memory dead-letter queue.
//!
//! # Reprocessing
//! ```text
//! process(processor, batch):
//!     retryable_entries() → oldest first, up to batch
//!     for each entry:
//!         still queued and retryable? claim it, else skip
//!         processor(entry).await
//!             Ok  → remove
//!             Err → attempt_count += 1, next_retry_at = now + retry_delay
//! ```
//!
//! Entries are never retried once `attempt_count == max_attempts`; they stay
//! visible in statistics until `clear_expired` drops them.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

use crate::config::DlqConfig;
use crate::dlq::types::{DlqEntry, DlqError, DlqStats, ProcessReport};
use crate::observability::metrics;

pub struct DeadLetterQueue<T> {
    name: String,
    config: DlqConfig,
    entries: DashMap<String, DlqEntry<T>>,
    successes: AtomicU64,
    failures: AtomicU64,
    expired_total: AtomicU64,
}

impl<T> fmt::Debug for DeadLetterQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadLetterQueue")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<T: Clone> DeadLetterQueue<T> {
    pub fn new(name: impl Into<String>, config: DlqConfig) -> Self {
        Self {
            name: name.into(),
            config,
            entries: DashMap::new(),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            expired_total: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DlqConfig {
        &self.config
    }

    /// Insert a prepared entry.
    pub fn add(&self, entry: DlqEntry<T>) -> Result<String, DlqError> {
        if entry.attempt_count > entry.max_attempts {
            return Err(DlqError::AttemptsExceeded {
                id: entry.id,
                attempt_count: entry.attempt_count,
                max_attempts: entry.max_attempts,
            });
        }

        let id = entry.id.clone();
        match self.entries.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(DlqError::Duplicate(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
        metrics::record_dlq_size(&self.name, self.entries.len());
        Ok(id)
    }

    /// Wrap a failed payload in a fresh entry owned by this queue.
    pub fn enqueue(&self, payload: T, error: impl Into<String>, metadata: BTreeMap<String, String>) -> String {
        let entry = DlqEntry::new(payload, error, self.name.clone(), self.config.max_retries, metadata);
        let id = entry.id.clone();
        tracing::warn!(
            queue = %self.name,
            entry_id = %id,
            stage = entry.stage().unwrap_or("unknown"),
            error = %entry.error,
            "Dead-lettered record"
        );
        self.entries.insert(id.clone(), entry);
        metrics::record_dlq_size(&self.name, self.entries.len());
        id
    }

    pub fn get(&self, id: &str) -> Option<DlqEntry<T>> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<DlqEntry<T>> {
        let removed = self.entries.remove(id).map(|(_, entry)| entry);
        if removed.is_some() {
            metrics::record_dlq_size(&self.name, self.entries.len());
        }
        removed
    }

    /// Entries eligible for reprocessing now, oldest first.
    pub fn retryable_entries(&self) -> Vec<DlqEntry<T>> {
        let now = Instant::now();
        let ttl = self.config.ttl();
        let mut ready: Vec<DlqEntry<T>> = self
            .entries
            .iter()
            .filter(|entry| entry.is_retryable(now, ttl))
            .map(|entry| entry.value().clone())
            .collect();
        ready.sort_by_key(|entry| entry.enqueued_at);
        ready
    }

    /// Run `processor` over up to `batch_size` retryable entries
    /// (`dlq.batch_size` when `None`).
    pub async fn process<F, Fut, E>(&self, mut processor: F, batch_size: Option<usize>) -> ProcessReport
    where
        F: FnMut(DlqEntry<T>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let limit = batch_size.unwrap_or(self.config.batch_size).max(1);
        let batch: Vec<DlqEntry<T>> = self.retryable_entries().into_iter().take(limit).collect();
        let ttl = self.config.ttl();
        let mut report = ProcessReport::default();

        for entry in batch {
            let id = entry.id.clone();
            // Earlier iterations suspended; the entry may have been removed,
            // rescheduled or claimed by another pass since the batch was taken.
            if !self.claim(&id, ttl) {
                report.skipped += 1;
                continue;
            }

            report.attempted += 1;
            match processor(entry).await {
                Ok(()) => {
                    self.entries.remove(&id);
                    self.successes.fetch_add(1, Ordering::Relaxed);
                    report.succeeded += 1;
                    metrics::record_dlq_reprocessed(&self.name, true);
                    tracing::info!(queue = %self.name, entry_id = %id, "Reprocessed dead letter");
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    report.failed += 1;
                    metrics::record_dlq_reprocessed(&self.name, false);
                    self.record_failed_attempt(&id, e.to_string());
                }
            }
        }

        metrics::record_dlq_size(&self.name, self.entries.len());
        report
    }

    /// Push `next_retry_at` out by one retry delay while the entry is being
    /// processed. Returns false if the entry is gone or not retryable.
    fn claim(&self, id: &str, ttl: std::time::Duration) -> bool {
        let Some(mut entry) = self.entries.get_mut(id) else {
            return false;
        };
        let now = Instant::now();
        if !entry.is_retryable(now, ttl) {
            return false;
        }
        entry.next_retry_at = Some(now + self.config.retry_delay());
        true
    }

    fn record_failed_attempt(&self, id: &str, error: String) {
        let Some(mut entry) = self.entries.get_mut(id) else {
            return;
        };
        entry.attempt_count = (entry.attempt_count + 1).min(entry.max_attempts);
        entry.next_retry_at = Some(Instant::now() + self.config.retry_delay());
        tracing::debug!(
            queue = %self.name,
            entry_id = %id,
            attempts = entry.attempt_count,
            max_attempts = entry.max_attempts,
            error = %error,
            "Dead letter reprocessing failed"
        );
        if entry.is_exhausted() {
            tracing::warn!(queue = %self.name, entry_id = %id, "Dead letter exhausted its attempts");
        }
        entry.last_error = Some(error);
    }

    /// Drop entries older than the TTL, whatever their attempt count.
    pub fn clear_expired(&self) -> Vec<DlqEntry<T>> {
        let now = Instant::now();
        let ttl = self.config.ttl();
        let expired_ids: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired(now, ttl))
            .map(|entry| entry.key().clone())
            .collect();

        let removed: Vec<DlqEntry<T>> = expired_ids
            .iter()
            .filter_map(|id| self.entries.remove(id).map(|(_, entry)| entry))
            .collect();

        if !removed.is_empty() {
            self.expired_total.fetch_add(removed.len() as u64, Ordering::Relaxed);
            metrics::record_dlq_size(&self.name, self.entries.len());
            tracing::info!(queue = %self.name, count = removed.len(), "Cleared expired dead letters");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<DlqEntry<T>> {
        let mut all: Vec<DlqEntry<T>> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|entry| entry.enqueued_at);
        all
    }

    pub fn clear(&self) {
        self.entries.clear();
        metrics::record_dlq_size(&self.name, 0);
    }

    pub fn stats(&self) -> DlqStats {
        let now = Instant::now();
        let ttl = self.config.ttl();
        let mut stats = DlqStats {
            name: self.name.clone(),
            ..DlqStats::default()
        };

        for entry in self.entries.iter() {
            stats.total += 1;
            if entry.is_expired(now, ttl) {
                stats.expired += 1;
            } else if entry.is_exhausted() {
                stats.exhausted += 1;
            } else if entry.is_retryable(now, ttl) {
                stats.retryable += 1;
            }
            *stats.by_origin.entry(entry.origin.clone()).or_default() += 1;
            let stage = entry.stage().unwrap_or("unknown").to_string();
            *stats.by_stage.entry(stage).or_default() += 1;
            if stats.oldest_recorded_at.map_or(true, |oldest| entry.recorded_at < oldest) {
                stats.oldest_recorded_at = Some(entry.recorded_at);
            }
        }

        stats.processed_successes = self.successes.load(Ordering::Relaxed);
        stats.processed_failures = self.failures.load(Ordering::Relaxed);
        let attempts = stats.processed_successes + stats.processed_failures;
        stats.success_rate = if attempts == 0 {
            0.0
        } else {
            stats.processed_successes as f64 / attempts as f64
        };
        stats.expired_total = self.expired_total.load(Ordering::Relaxed);
        stats
    }
}
