//! Running processor statistics.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Latency samples kept for the percentile estimate.
const LATENCY_WINDOW: usize = 1024;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessorSummary {
    pub name: String,
    /// Records emitted downstream, cache hits included.
    pub processed: u64,
    /// Records routed to the dead-letter queue.
    pub failed: u64,
    pub cache_hits: u64,
    pub retries: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub backpressure_waits: usize,
    pub elapsed_ms: u64,
    pub throughput_per_sec: f64,
    pub avg_latency_ms: f64,
    pub p99_latency_ms: f64,
}

#[derive(Debug, Default)]
struct Latencies {
    started_at: Option<Instant>,
    samples: VecDeque<Duration>,
    total: Duration,
    count: u64,
}

#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    processed: AtomicU64,
    failed: AtomicU64,
    cache_hits: AtomicU64,
    retries: AtomicU64,
    latencies: Mutex<Latencies>,
}

impl ProcessorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the throughput clock if it is not running yet.
    pub fn mark_started(&self) {
        self.lock().started_at.get_or_insert_with(Instant::now);
    }

    pub fn record_success(&self, latency: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub fn record_failure(&self, latency: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency: Duration) {
        let mut lat = self.lock();
        if lat.samples.len() == LATENCY_WINDOW {
            lat.samples.pop_front();
        }
        lat.samples.push_back(latency);
        lat.total += latency;
        lat.count += 1;
    }

    /// Snapshot; gate-owned figures are filled in by the processor.
    pub fn summary(&self, name: &str) -> ProcessorSummary {
        let processed = self.processed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let lat = self.lock();

        let elapsed = lat
            .started_at
            .map(|at| Instant::now().saturating_duration_since(at))
            .unwrap_or_default();
        let secs = elapsed.as_secs_f64();
        let throughput_per_sec = if secs > 0.0 {
            (processed + failed) as f64 / secs
        } else {
            0.0
        };
        let avg_latency_ms = if lat.count == 0 {
            0.0
        } else {
            lat.total.as_secs_f64() * 1000.0 / lat.count as f64
        };

        ProcessorSummary {
            name: name.to_string(),
            processed,
            failed,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            elapsed_ms: elapsed.as_millis() as u64,
            throughput_per_sec,
            avg_latency_ms,
            p99_latency_ms: percentile(&lat.samples, 0.99).as_secs_f64() * 1000.0,
            ..ProcessorSummary::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Latencies> {
        self.latencies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Nearest-rank percentile.
fn percentile(samples: &VecDeque<Duration>, q: f64) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    let mut sorted: Vec<Duration> = samples.iter().copied().collect();
    sorted.sort_unstable();
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
