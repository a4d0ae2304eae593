//! Dead-letter entry and statistics types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

/// A unit of work that failed terminally.
#[derive(Debug, Clone)]
pub struct DlqEntry<T> {
    pub id: String,
    pub payload: T,
    /// Error that put the payload here.
    pub error: String,
    /// Name of the queue that accepted the entry.
    pub origin: String,
    pub enqueued_at: Instant,
    /// Wall-clock time of enqueue, for display.
    pub recorded_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<Instant>,
    /// Most recent reprocessing error.
    pub last_error: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl<T> DlqEntry<T> {
    pub fn new(
        payload: T,
        error: impl Into<String>,
        origin: impl Into<String>,
        max_attempts: u32,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            error: error.into(),
            origin: origin.into(),
            enqueued_at: Instant::now(),
            recorded_at: Utc::now(),
            attempt_count: 0,
            max_attempts,
            next_retry_at: None,
            last_error: None,
            metadata,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }

    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        self.age(now) > ttl
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// Eligible for reprocessing at `now`.
    pub fn is_retryable(&self, now: Instant, ttl: Duration) -> bool {
        !self.is_expired(now, ttl)
            && !self.is_exhausted()
            && self.next_retry_at.map_or(true, |at| at <= now)
    }

    pub fn stage(&self) -> Option<&str> {
        self.metadata.get("stage").map(String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum DlqError {
    #[error("entry '{id}' has {attempt_count} attempts, above its limit of {max_attempts}")]
    AttemptsExceeded {
        id: String,
        attempt_count: u32,
        max_attempts: u32,
    },

    #[error("entry '{0}' is already queued")]
    Duplicate(String),
}

/// Outcome of one `process` batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Entries that left the queue or became ineligible while the batch ran.
    pub skipped: usize,
}

/// Point-in-time view of a queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DlqStats {
    pub name: String,
    pub total: usize,
    pub retryable: usize,
    pub expired: usize,
    pub exhausted: usize,
    pub by_origin: BTreeMap<String, usize>,
    pub by_stage: BTreeMap<String, usize>,
    pub processed_successes: u64,
    pub processed_failures: u64,
    /// Successes over all reprocessing attempts so far.
    pub success_rate: f64,
    /// Entries dropped by `clear_expired` over the queue's lifetime.
    pub expired_total: u64,
    /// Wall-clock enqueue time of the oldest queued entry.
    pub oldest_recorded_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> DlqEntry<&'static str> {
        DlqEntry::new("payload", "boom", "q", 2, BTreeMap::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_rules() {
        let ttl = Duration::from_secs(60);
        let mut e = entry();
        let now = Instant::now();
        assert!(e.is_retryable(now, ttl));

        e.next_retry_at = Some(now + Duration::from_secs(5));
        assert!(!e.is_retryable(now, ttl));
        assert!(e.is_retryable(now + Duration::from_secs(5), ttl));

        e.next_retry_at = None;
        e.attempt_count = 2;
        assert!(e.is_exhausted());
        assert!(!e.is_retryable(now, ttl));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_strictly_greater_than_ttl() {
        let e = entry();
        let ttl = Duration::from_secs(10);
        assert!(!e.is_expired(e.enqueued_at + ttl, ttl));
        assert!(e.is_expired(e.enqueued_at + ttl + Duration::from_millis(1), ttl));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(entry().id, entry().id);
    }
}
