//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_records_total` (counter): records by outcome (converted, cached, dead_lettered)
//! - `bridge_record_duration_seconds` (histogram): per-record latency
//! - `bridge_in_flight` (gauge): admitted but unfinished records
//! - `bridge_backpressure_waits_total` (counter): ingestion pauses
//! - `bridge_retries_total` (counter): retry attempts by policy
//! - `bridge_circuit_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `bridge_circuit_rejections_total` (counter): calls refused while open
//! - `bridge_cache_lookups_total` (counter): lookups by tier and result
//! - `bridge_cache_evictions_total` (counter): LRU evictions by tier
//! - `bridge_dlq_entries` (gauge): entries held per queue
//! - `bridge_dlq_reprocessed_total` (counter): reprocessing outcomes
//!
//! Recording goes through the `metrics` facade and is a no-op until an
//! exporter is installed.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus exporter with an HTTP scrape listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_outcome(processor: &str, outcome: &'static str) {
    counter!("bridge_records_total", "processor" => processor.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn record_latency(processor: &str, elapsed: Duration) {
    histogram!("bridge_record_duration_seconds", "processor" => processor.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_in_flight(processor: &str, count: usize) {
    gauge!("bridge_in_flight", "processor" => processor.to_string()).set(count as f64);
}

pub fn record_backpressure_wait(processor: &str) {
    counter!("bridge_backpressure_waits_total", "processor" => processor.to_string()).increment(1);
}

pub fn record_retry(policy: &str) {
    counter!("bridge_retries_total", "policy" => policy.to_string()).increment(1);
}

pub fn record_circuit_state(breaker: &str, state_code: u8) {
    gauge!("bridge_circuit_state", "breaker" => breaker.to_string()).set(f64::from(state_code));
}

pub fn record_circuit_rejection(breaker: &str) {
    counter!("bridge_circuit_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_cache_lookup(tier: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("bridge_cache_lookups_total", "tier" => tier.to_string(), "result" => result)
        .increment(1);
}

pub fn record_cache_eviction(tier: &str) {
    counter!("bridge_cache_evictions_total", "tier" => tier.to_string()).increment(1);
}

pub fn record_dlq_size(queue: &str, size: usize) {
    gauge!("bridge_dlq_entries", "queue" => queue.to_string()).set(size as f64);
}

pub fn record_dlq_reprocessed(queue: &str, success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("bridge_dlq_reprocessed_total", "queue" => queue.to_string(), "result" => result)
        .increment(1);
}
