//! Shared utilities for integration and load testing.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use locale_bridge::config::{BridgeConfig, CircuitBreakerConfig, ProcessorConfig, RetryConfig};
use locale_bridge::{ConvertError, Converter, Record, Registry, StreamProcessor};

/// Converter whose behaviour is driven by a closure over the call number.
pub struct ScriptedConverter<F> {
    name: &'static str,
    delay: Duration,
    calls: AtomicU32,
    script: F,
}

impl<F> ScriptedConverter<F>
where
    F: Fn(u32, &Record) -> Result<(), ConvertError> + Send + Sync,
{
    pub fn new(name: &'static str, delay: Duration, script: F) -> Self {
        Self {
            name,
            delay,
            calls: AtomicU32::new(0),
            script,
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> Converter for ScriptedConverter<F>
where
    F: Fn(u32, &Record) -> Result<(), ConvertError> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    async fn convert(&self, record: &Record) -> Result<Record, ConvertError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.script)(call, record)?;
        let mut converted = record.clone();
        converted.payload["converted"] = json!(true);
        Ok(converted)
    }
}

/// Always succeeds after `delay`.
#[allow(dead_code)]
pub fn slow_converter(delay: Duration) -> Arc<ScriptedConverter<impl Fn(u32, &Record) -> Result<(), ConvertError> + Send + Sync>> {
    Arc::new(ScriptedConverter::new("slow", delay, |_: u32, _: &Record| Ok(())))
}

/// Always fails with a transient error.
#[allow(dead_code)]
pub fn down_converter() -> Arc<ScriptedConverter<impl Fn(u32, &Record) -> Result<(), ConvertError> + Send + Sync>> {
    Arc::new(ScriptedConverter::new("down", Duration::ZERO, |_: u32, _: &Record| {
        Err(ConvertError::Unavailable("rate service down".into()))
    }))
}

pub fn records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| Record::new(format!("r{i}"), "order", json!({ "price": i, "date": "01/02/2024" })))
        .collect()
}

/// Config with fast, deterministic retries.
pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        processor: ProcessorConfig {
            workers: 4,
            ..ProcessorConfig::default()
        },
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 10,
            jitter_range: 0.0,
            ..RetryConfig::default()
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            volume_threshold: 3,
            error_threshold_percentage: 50.0,
            timeout_ms: 1_000,
            ..CircuitBreakerConfig::default()
        },
        ..BridgeConfig::default()
    }
}

pub fn build(config: &BridgeConfig, converter: Arc<dyn Converter>) -> (Registry, StreamProcessor) {
    let registry = Registry::from_config(config);
    let processor = StreamProcessor::from_registry(config, &registry, converter);
    (registry, processor)
}
