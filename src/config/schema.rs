//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resilience::backoff::BackoffStrategy;

/// Root configuration for the conversion service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Stream processor settings (queue bounds, workers).
    pub processor: ProcessorConfig,

    /// Circuit breaker guarding the converter.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry policy around each conversion.
    pub retry: RetryConfig,

    /// Dead-letter queue settings.
    pub dlq: DlqConfig,

    /// Result cache tiers.
    pub cache: CacheConfig,

    /// Reference converter rules.
    pub conversion: ConversionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Stream processor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Processor identifier for logging/metrics and DLQ origin.
    pub name: String,

    /// Hard bound on in-flight records.
    pub max_queue_size: usize,

    /// In-flight count at which ingestion pauses.
    pub backpressure_threshold: usize,

    /// Number of worker tasks pulling from the task queue.
    pub workers: usize,

    /// Deadline for a single converter call in milliseconds.
    pub converter_timeout_ms: u64,

    /// Interval of the cache/DLQ expiry sweep in seconds.
    pub maintenance_interval_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            name: "regional-conversion".to_string(),
            max_queue_size: 1000,
            backpressure_threshold: 800,
            workers: 4,
            converter_timeout_ms: 5000,
            maintenance_interval_secs: 30,
        }
    }
}

impl ProcessorConfig {
    pub fn converter_timeout(&self) -> Duration {
        Duration::from_millis(self.converter_timeout_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Minimum failures inside the window before the breaker may open.
    pub failure_threshold: u32,

    /// Consecutive half-open successes required to close.
    pub success_threshold: u32,

    /// Time spent open before a trial call is allowed, in milliseconds.
    pub timeout_ms: u64,

    /// Rolling window used for the failure rate, in milliseconds.
    pub monitoring_period_ms: u64,

    /// Minimum calls inside the window before the rate is evaluated.
    pub volume_threshold: u32,

    /// Failure percentage (0-100) that opens the breaker.
    pub error_threshold_percentage: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
            monitoring_period_ms: 60_000,
            volume_threshold: 10,
            error_threshold_percentage: 50.0,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first call.
    pub max_attempts: u32,

    /// Base delay in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor for the exponential strategy.
    pub backoff_multiplier: f64,

    /// Symmetric jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_range: f64,

    /// Delay strategy.
    pub strategy: BackoffStrategy,

    /// If non-empty, only errors containing one of these are retried.
    pub retryable_errors: Vec<String>,

    /// Errors containing one of these are never retried.
    pub non_retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_range: 0.1,
            strategy: BackoffStrategy::Exponential,
            retryable_errors: Vec::new(),
            non_retryable_errors: Vec::new(),
        }
    }
}

/// Dead-letter queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DlqConfig {
    /// Reprocessing attempts allowed per entry.
    pub max_retries: u32,

    /// Fixed delay before a failed entry is eligible again, in milliseconds.
    pub retry_delay_ms: u64,

    /// Entries handled per `process` call.
    pub batch_size: usize,

    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 60_000,
            batch_size: 10,
            ttl_secs: 24 * 60 * 60,
        }
    }
}

impl DlqConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Cache configuration: an ordered list of tiers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub tiers: Vec<CacheTierConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                CacheTierConfig {
                    name: "l1".to_string(),
                    ttl_ms: 60_000,
                    max_size: 1_000,
                    priority: 100,
                },
                CacheTierConfig {
                    name: "l2".to_string(),
                    ttl_ms: 3_600_000,
                    max_size: 10_000,
                    priority: 50,
                },
            ],
        }
    }
}

/// A single cache tier.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheTierConfig {
    /// Tier identifier for logging/metrics.
    pub name: String,

    /// Default entry lifetime in milliseconds.
    pub ttl_ms: u64,

    /// Maximum live entries before LRU eviction.
    pub max_size: usize,

    /// Read order (higher = consulted first).
    pub priority: u32,
}

impl CacheTierConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Rules for the reference regional converter.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Multiplier applied to currency fields.
    pub currency_rate: f64,

    /// Multiplier applied to unit fields.
    pub unit_factor: f64,

    pub currency_fields: Vec<String>,
    pub unit_fields: Vec<String>,

    /// Fields holding `AA/BB/YYYY` dates whose first two parts are swapped.
    pub date_fields: Vec<String>,

    /// Fields whose decimal and grouping separators are exchanged.
    pub number_fields: Vec<String>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            currency_rate: 1.0,
            unit_factor: 1.0,
            currency_fields: vec!["price".to_string(), "amount".to_string()],
            unit_fields: vec!["weight".to_string(), "distance".to_string()],
            date_fields: vec!["date".to_string()],
            number_fields: Vec::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format ("pretty" or "json").
    pub log_format: String,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
