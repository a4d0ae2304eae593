//! Failure injection tests for the conversion pipeline.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, StreamExt};
use tokio::sync::mpsc;

use locale_bridge::config::{CircuitBreakerConfig, RetryConfig};
use locale_bridge::convert::ConvertError;
use locale_bridge::pipeline::stage;
use locale_bridge::resilience::CircuitState;
use locale_bridge::Record;

mod common;

use common::ScriptedConverter;

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recover() {
    let converter = Arc::new(ScriptedConverter::new("flaky", Duration::ZERO, |call: u32, _: &Record| {
        if call < 2 {
            Err(ConvertError::Unavailable("503 from rate service".into()))
        } else {
            Ok(())
        }
    }));
    let (_, processor) = common::build(&common::test_config(), converter.clone());
    let (tx, mut rx) = mpsc::channel(16);

    let summary = processor.run(stream::iter(common::records(1)), tx).await;

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.retries, 2);
    assert_eq!(converter.calls(), 3);
    let out = rx.recv().await.unwrap();
    assert_eq!(out.payload["converted"], true);
    assert!(processor.dead_letters().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_permanent_errors_skip_retries() {
    let converter = Arc::new(ScriptedConverter::new("strict", Duration::ZERO, |_: u32, record: &Record| {
        if record.kind == "unknown" {
            Err(ConvertError::UnsupportedKind(record.kind.clone()))
        } else {
            Ok(())
        }
    }));
    let (_, processor) = common::build(&common::test_config(), converter.clone());
    let (tx, _rx) = mpsc::channel(16);

    let input = vec![Record::new("bad", "unknown", serde_json::json!({}))];
    let summary = processor.run(stream::iter(input), tx).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retries, 0);
    assert_eq!(converter.calls(), 1);

    let entries = processor.dead_letters().entries();
    assert_eq!(entries[0].stage(), Some(stage::NON_RETRYABLE));
    assert!(entries[0].error.contains("unsupported record kind"));
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_short_circuits_remaining_records() {
    let converter = common::down_converter();
    let mut config = common::test_config();
    config.processor.workers = 1;
    let (registry, processor) = common::build(&config, converter.clone());
    let (tx, _rx) = mpsc::channel(16);

    let summary = processor.run(stream::iter(common::records(5)), tx).await;

    assert_eq!(summary.failed, 5);
    // Only the first record reached the dependency; its third failure
    // tripped the breaker.
    assert_eq!(converter.calls(), 3);
    assert_eq!(processor.breaker().state(), CircuitState::Open);

    let stats = processor.dead_letters().stats();
    assert_eq!(stats.by_stage[stage::RETRIES_EXHAUSTED], 1);
    assert_eq!(stats.by_stage[stage::CIRCUIT_OPEN], 4);

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.breakers[0].name, "down");
    assert_eq!(snapshot.breakers[0].rejected_calls, 4);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_after_timeout() {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    let converter = Arc::new(ScriptedConverter::new("rates", Duration::ZERO, move |_: u32, _: &Record| {
        if flag.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConvertError::Unavailable("connection refused".into()))
        }
    }));
    let mut config = common::test_config();
    config.processor.workers = 1;
    config.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 1,
        volume_threshold: 3,
        timeout_ms: 500,
        ..CircuitBreakerConfig::default()
    };
    let (_, processor) = common::build(&config, converter);
    let (tx, _rx) = mpsc::channel(16);

    processor.run(stream::iter(common::records(2)), tx.clone()).await;
    assert_eq!(processor.breaker().state(), CircuitState::Open);

    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let fresh = vec![Record::new("late", "order", serde_json::json!({"price": 1}))];
    let summary = processor.run(stream::iter(fresh), tx).await;
    assert_eq!(processor.breaker().state(), CircuitState::Closed);
    assert_eq!(summary.processed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reprocess_dead_letters_after_recovery() {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    let converter = Arc::new(ScriptedConverter::new("rates", Duration::ZERO, move |_: u32, _: &Record| {
        if flag.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConvertError::Unavailable("connection refused".into()))
        }
    }));
    let mut config = common::test_config();
    config.retry = RetryConfig {
        max_attempts: 1,
        ..RetryConfig::default()
    };
    config.circuit_breaker.volume_threshold = 100;
    let (_, processor) = common::build(&config, converter);
    let (tx, mut rx) = mpsc::channel(16);

    let summary = processor.run(stream::iter(common::records(5)), tx.clone()).await;
    assert_eq!(summary.failed, 5);
    assert_eq!(processor.dead_letters().len(), 5);

    // Still down: every entry gets its attempt count bumped.
    let report = processor.reprocess_dead_letters(&tx).await;
    assert_eq!(report.failed, 5);
    assert!(processor
        .dead_letters()
        .entries()
        .iter()
        .all(|e| e.attempt_count == 1 && e.last_error.is_some()));

    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(config.dlq.retry_delay()).await;

    let report = processor.reprocess_dead_letters(&tx).await;
    assert_eq!(report.succeeded, 5);
    assert!(processor.dead_letters().is_empty());

    drop(tx);
    let mut recovered = 0;
    while rx.recv().await.is_some() {
        recovered += 1;
    }
    assert_eq!(recovered, 5);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_retry() {
    let converter = common::down_converter();
    let mut config = common::test_config();
    config.retry = RetryConfig {
        max_attempts: 5,
        initial_delay_ms: 1_000,
        jitter_range: 0.0,
        ..RetryConfig::default()
    };
    let (_, processor) = common::build(&config, converter.clone());
    let (tx, _rx) = mpsc::channel(16);

    let handle = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.run(stream::iter(common::records(1)), tx).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    processor.stop();
    let summary = handle.await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(converter.calls(), 1);
    let entries = processor.dead_letters().entries();
    assert_eq!(entries[0].stage(), Some(stage::CANCELLED));
}

#[tokio::test(start_paused = true)]
async fn test_stop_at_threshold_leaves_no_record_behind() {
    let converter = common::slow_converter(Duration::from_secs(1));
    let mut config = common::test_config();
    config.processor.workers = 1;
    config.processor.max_queue_size = 10;
    config.processor.backpressure_threshold = 1;
    let (_, processor) = common::build(&config, converter.clone());
    let (tx, mut rx) = mpsc::channel(16);

    let pulled = Arc::new(AtomicUsize::new(0));
    let source = {
        let pulled = pulled.clone();
        stream::iter(common::records(5)).inspect(move |_| {
            pulled.fetch_add(1, Ordering::SeqCst);
        })
    };
    let handle = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.run(source, tx).await })
    };

    // The first record holds the only slot; ingestion is blocked.
    tokio::time::sleep(Duration::from_millis(100)).await;
    processor.stop();
    let summary = handle.await.unwrap();

    let mut emitted = 0;
    while rx.recv().await.is_some() {
        emitted += 1;
    }
    let pulled = pulled.load(Ordering::SeqCst);
    assert_eq!(pulled, 1);
    assert_eq!(emitted, 1);
    assert_eq!(summary.processed as usize + processor.dead_letters().len(), pulled);
    assert_eq!(converter.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_converter_timeout_is_retried_then_dead_lettered() {
    let converter = common::slow_converter(Duration::from_secs(10));
    let mut config = common::test_config();
    config.processor.converter_timeout_ms = 100;
    config.retry.max_attempts = 2;
    config.circuit_breaker.volume_threshold = 100;
    let (_, processor) = common::build(&config, converter.clone());
    let (tx, _rx) = mpsc::channel(16);

    let summary = processor.run(stream::iter(common::records(1)), tx).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(converter.calls(), 2);
    let entry = &processor.dead_letters().entries()[0];
    assert_eq!(entry.stage(), Some(stage::RETRIES_EXHAUSTED));
    assert!(entry.error.contains("timed out"));
}
