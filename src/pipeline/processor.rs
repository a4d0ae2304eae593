//! Backpressure-aware stream processor.
//!
//! # Record Journey
//! ```text
//! source ──► gate.admit() ──► task channel ──► worker pool
//!                                               │
//!                 cache hit ◄── cache.get(key) ─┤
//!                                               │ miss
//!            retry.execute_until(
//!                breaker.execute(
//!                    with_deadline(converter.convert)))
//!                                               │
//!                        Ok ──► cache.set ──► output
//!                        Err ─► dead-letter queue (stage metadata)
//! ```
//!
//! Ingestion blocks while in-flight records sit at the backpressure
//! threshold. `stop()` ends ingestion, closes the gate and cancels pending
//! retries; records already admitted are drained through the workers.

use futures_util::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::cache::TieredCache;
use crate::config::{BridgeConfig, ProcessorConfig};
use crate::convert::{ConvertError, Converter};
use crate::dlq::{DeadLetterQueue, ProcessReport};
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::observability::metrics;
use crate::pipeline::backpressure::{BackpressureGate, InFlight};
use crate::pipeline::metrics::{ProcessorMetrics, ProcessorSummary};
use crate::pipeline::Record;
use crate::registry::Registry;
use crate::resilience::timeouts::with_deadline;
use crate::resilience::{CircuitBreaker, CircuitError, RetryError, RetryPolicy};

type ConversionError = RetryError<CircuitError<ConvertError>>;

/// Stage metadata values attached to dead-lettered records.
pub mod stage {
    pub const NON_RETRYABLE: &str = "non_retryable";
    pub const RETRIES_EXHAUSTED: &str = "retries_exhausted";
    pub const CIRCUIT_OPEN: &str = "circuit_open";
    pub const CANCELLED: &str = "cancelled";
    pub const EMIT: &str = "emit";
}

struct Job {
    record: Record,
    admitted_at: Instant,
    _slot: InFlight,
}

struct Shared {
    config: ProcessorConfig,
    converter: Arc<dyn Converter>,
    breaker: Arc<CircuitBreaker>,
    retry: Arc<RetryPolicy>,
    dlq: Arc<DeadLetterQueue<Record>>,
    cache: Arc<TieredCache<Record>>,
    gate: BackpressureGate,
    metrics: ProcessorMetrics,
    shutdown: Shutdown,
}

/// Runs records through cache, breaker, retry and converter.
#[derive(Clone)]
pub struct StreamProcessor {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for StreamProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProcessor")
            .field("name", &self.shared.config.name)
            .field("converter", &self.shared.converter.name())
            .field("breaker", &self.shared.breaker.name())
            .field("retry", &self.shared.retry.name())
            .field("dlq", &self.shared.dlq.name())
            .finish()
    }
}

impl StreamProcessor {
    pub fn new(
        config: ProcessorConfig,
        converter: Arc<dyn Converter>,
        breaker: Arc<CircuitBreaker>,
        retry: Arc<RetryPolicy>,
        dlq: Arc<DeadLetterQueue<Record>>,
        cache: Arc<TieredCache<Record>>,
    ) -> Self {
        let threshold = config.backpressure_threshold.min(config.max_queue_size);
        Self {
            shared: Arc::new(Shared {
                gate: BackpressureGate::new(threshold),
                metrics: ProcessorMetrics::new(),
                shutdown: Shutdown::new(),
                config,
                converter,
                breaker,
                retry,
                dlq,
                cache,
            }),
        }
    }

    /// Wire a processor from named registry components.
    ///
    /// The breaker is keyed by the converter's name; the retry policy and
    /// dead-letter queue by the processor's name.
    pub fn from_registry(config: &BridgeConfig, registry: &Registry, converter: Arc<dyn Converter>) -> Self {
        let name = config.processor.name.clone();
        let breaker = registry.breaker(converter.name());
        let retry = registry.retry_policy(&name);
        let dlq = registry.dead_letter_queue(&name);
        let cache = Arc::new(TieredCache::from_config(&config.cache));
        Self::new(config.processor.clone(), converter, breaker, retry, dlq, cache)
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.shared.breaker
    }

    pub fn retry_policy(&self) -> &Arc<RetryPolicy> {
        &self.shared.retry
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue<Record>> {
        &self.shared.dlq
    }

    pub fn cache(&self) -> &Arc<TieredCache<Record>> {
        &self.shared.cache
    }

    /// Consume `source` until it ends or the processor is stopped.
    ///
    /// Converted records go to `output`; failures go to the dead-letter
    /// queue. Returns once every admitted record has finished.
    pub async fn run<S>(&self, source: S, output: mpsc::Sender<Record>) -> ProcessorSummary
    where
        S: Stream<Item = Record>,
    {
        let shared = &self.shared;
        shared.metrics.mark_started();

        let (tx, rx) = mpsc::channel::<Job>(shared.config.max_queue_size.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = JoinSet::new();
        for worker_id in 0..shared.config.workers.max(1) {
            let shared = self.shared.clone();
            let rx = rx.clone();
            let output = output.clone();
            workers.spawn(async move { worker_loop(worker_id, shared, rx, output).await });
        }
        drop(output);

        tracing::info!(
            processor = %shared.config.name,
            workers = shared.config.workers.max(1),
            max_queue_size = shared.config.max_queue_size,
            backpressure_threshold = shared.gate.threshold(),
            "Stream processor starting"
        );

        let mut stop = shared.shutdown.subscribe();
        let mut source = std::pin::pin!(source);
        loop {
            // Slot first, then the source: every pulled record is admitted.
            if shared.gate.in_flight() >= shared.gate.threshold() {
                metrics::record_backpressure_wait(&shared.config.name);
            }
            let slot = tokio::select! {
                biased;
                _ = stop.recv() => None,
                slot = shared.gate.admit() => slot,
            };
            let Some(slot) = slot else {
                tracing::info!(processor = %shared.config.name, "Stop requested, ending ingestion");
                break;
            };

            let record = tokio::select! {
                biased;
                _ = stop.recv() => {
                    tracing::info!(processor = %shared.config.name, "Stop requested, ending ingestion");
                    break;
                }
                next = source.next() => match next {
                    Some(record) => record,
                    None => break,
                },
            };
            metrics::record_in_flight(&shared.config.name, shared.gate.in_flight());

            let job = Job {
                record,
                admitted_at: Instant::now(),
                _slot: slot,
            };
            if tx.send(job).await.is_err() {
                tracing::error!(processor = %shared.config.name, "Worker pool gone, ending ingestion");
                break;
            }
        }

        drop(tx);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(processor = %shared.config.name, error = %e, "Worker task failed");
            }
        }

        let summary = self.metrics();
        tracing::info!(
            processor = %summary.name,
            processed = summary.processed,
            failed = summary.failed,
            cache_hits = summary.cache_hits,
            peak_in_flight = summary.peak_in_flight,
            "Stream processor finished"
        );
        summary
    }

    /// Stop ingestion and cancel pending retries.
    pub fn stop(&self) {
        self.shared.shutdown.trigger();
        self.shared.gate.close();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.shutdown.is_triggered()
    }

    pub fn metrics(&self) -> ProcessorSummary {
        let shared = &self.shared;
        let mut summary = shared.metrics.summary(&shared.config.name);
        summary.in_flight = shared.gate.in_flight();
        summary.peak_in_flight = shared.gate.peak();
        summary.backpressure_waits = shared.gate.waits();
        summary
    }

    /// Retry one batch of dead letters through the breaker and converter.
    ///
    /// Recovered records are cached and sent to `output`.
    pub async fn reprocess_dead_letters(&self, output: &mpsc::Sender<Record>) -> ProcessReport {
        let shared = &self.shared;
        let report = shared
            .dlq
            .process(
                |entry| async move {
                    let converted = shared.call_converter(&entry.payload).await.map_err(|e| e.to_string())?;
                    shared.store(&entry.payload.cache_key(), &converted).await;
                    output
                        .send(converted)
                        .await
                        .map_err(|_| "output channel closed".to_string())
                },
                None,
            )
            .await;

        tracing::info!(
            processor = %shared.config.name,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            "Dead letter reprocessing pass"
        );
        report
    }

    /// Periodically purge expired cache and dead-letter entries until
    /// `shutdown` fires.
    pub fn spawn_maintenance(&self, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let period = shared.config.maintenance_interval().max(Duration::from_secs(1));
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = shared.cache.purge_expired().await;
                        let expired = shared.dlq.clear_expired().len();
                        tracing::debug!(processor = %shared.config.name, purged, expired, "Maintenance pass");
                    }
                    _ = shutdown.recv() => {
                        tracing::info!(processor = %shared.config.name, "Maintenance received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<Shared>,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    output: mpsc::Sender<Record>,
) {
    let stop = shared.shutdown.subscribe();
    loop {
        let job = jobs.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };
        shared.handle(job, &output, &stop).await;
        metrics::record_in_flight(&shared.config.name, shared.gate.in_flight());
    }
    tracing::trace!(processor = %shared.config.name, worker_id, "Worker exiting");
}

impl Shared {
    async fn handle(&self, job: Job, output: &mpsc::Sender<Record>, stop: &ShutdownSignal) {
        let Job { record, admitted_at, _slot } = job;
        let key = record.cache_key();

        if let Some(cached) = self.cache.get(&key).await {
            self.metrics.record_cache_hit();
            self.emit(record, cached, admitted_at, output, "cached").await;
            return;
        }

        let outcome = self
            .retry
            .execute_until(
                || self.call_converter(&record),
                |attempt| {
                    self.metrics.record_retry();
                    tracing::debug!(
                        processor = %self.config.name,
                        record_id = %record.id,
                        attempt = attempt.attempt,
                        delay_ms = attempt.delay.as_millis() as u64,
                        error = %attempt.error,
                        "Conversion attempt failed"
                    );
                },
                stop,
            )
            .await;

        match outcome {
            Ok(converted) => {
                self.store(&key, &converted).await;
                self.emit(record, converted, admitted_at, output, "converted").await;
            }
            Err(e) => {
                let stage = failure_stage(&e);
                let attempts = e.attempts();
                self.dead_letter(record, e.to_string(), stage, attempts, admitted_at);
            }
        }
    }

    async fn call_converter(&self, record: &Record) -> Result<Record, CircuitError<ConvertError>> {
        let deadline = self.config.converter_timeout();
        self.breaker
            .execute(|| with_deadline(deadline, self.converter.convert(record)))
            .await
    }

    async fn store(&self, key: &str, converted: &Record) {
        if let Err(e) = self.cache.set(key, converted.clone(), None).await {
            tracing::warn!(processor = %self.config.name, key, error = %e, "Failed to cache conversion");
        }
    }

    async fn emit(
        &self,
        original: Record,
        converted: Record,
        admitted_at: Instant,
        output: &mpsc::Sender<Record>,
        outcome: &'static str,
    ) {
        if output.send(converted).await.is_err() {
            self.dead_letter(original, "output channel closed".to_string(), stage::EMIT, 0, admitted_at);
            return;
        }
        let latency = admitted_at.elapsed();
        self.metrics.record_success(latency);
        metrics::record_outcome(&self.config.name, outcome);
        metrics::record_latency(&self.config.name, latency);
    }

    fn dead_letter(&self, record: Record, error: String, stage: &str, attempts: u32, admitted_at: Instant) {
        let metadata = BTreeMap::from([
            ("stage".to_string(), stage.to_string()),
            ("attempts".to_string(), attempts.to_string()),
            ("processor".to_string(), self.config.name.clone()),
            ("converter".to_string(), self.converter.name().to_string()),
            ("record_kind".to_string(), record.kind.clone()),
        ]);
        self.dlq.enqueue(record, error, metadata);

        let latency = admitted_at.elapsed();
        self.metrics.record_failure(latency);
        metrics::record_outcome(&self.config.name, "dead_lettered");
        metrics::record_latency(&self.config.name, latency);
    }
}

fn failure_stage(error: &ConversionError) -> &'static str {
    match error {
        RetryError::Cancelled { .. } => stage::CANCELLED,
        RetryError::NonRetryable { cause, .. } if cause.is_open() => stage::CIRCUIT_OPEN,
        RetryError::NonRetryable { .. } => stage::NON_RETRYABLE,
        RetryError::Exhausted { .. } => stage::RETRIES_EXHAUSTED,
    }
}
