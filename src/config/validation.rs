//! Configuration validation.
//!
//! Serde handles the syntactic side; this checks value ranges and
//! cross-field constraints. All errors are collected, not just the first.

use std::collections::HashSet;
use thiserror::Error;

use crate::config::schema::BridgeConfig;
use crate::resilience::backoff::BackoffStrategy;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("processor.backpressure_threshold ({threshold}) must be below max_queue_size ({max})")]
    ThresholdAboveQueue { threshold: usize, max: usize },

    #[error("circuit_breaker.error_threshold_percentage must be within (0, 100], got {0}")]
    ErrorPercentage(f64),

    #[error("retry.jitter_range must be within [0, 1], got {0}")]
    JitterRange(f64),

    #[error("retry.backoff_multiplier must be >= 1 for exponential backoff, got {0}")]
    Multiplier(f64),

    #[error("retry.max_delay_ms ({max}) is below initial_delay_ms ({initial})")]
    DelayBounds { initial: u64, max: u64 },

    #[error("retry.strategy \"custom\" requires a delay function and cannot be set from a file")]
    CustomStrategy,

    #[error("cache.tiers must not be empty")]
    NoCacheTiers,

    #[error("duplicate cache tier name '{0}'")]
    DuplicateTier(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let processor = &config.processor;
    if processor.max_queue_size == 0 {
        errors.push(ValidationError::Zero { field: "processor.max_queue_size" });
    }
    if processor.backpressure_threshold == 0 {
        errors.push(ValidationError::Zero { field: "processor.backpressure_threshold" });
    }
    if processor.backpressure_threshold >= processor.max_queue_size {
        errors.push(ValidationError::ThresholdAboveQueue {
            threshold: processor.backpressure_threshold,
            max: processor.max_queue_size,
        });
    }
    if processor.workers == 0 {
        errors.push(ValidationError::Zero { field: "processor.workers" });
    }
    if processor.converter_timeout_ms == 0 {
        errors.push(ValidationError::Zero { field: "processor.converter_timeout_ms" });
    }
    if processor.maintenance_interval_secs == 0 {
        errors.push(ValidationError::Zero { field: "processor.maintenance_interval_secs" });
    }

    let breaker = &config.circuit_breaker;
    if breaker.success_threshold == 0 {
        errors.push(ValidationError::Zero { field: "circuit_breaker.success_threshold" });
    }
    if breaker.monitoring_period_ms == 0 {
        errors.push(ValidationError::Zero { field: "circuit_breaker.monitoring_period_ms" });
    }
    if !(breaker.error_threshold_percentage > 0.0 && breaker.error_threshold_percentage <= 100.0) {
        errors.push(ValidationError::ErrorPercentage(breaker.error_threshold_percentage));
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        errors.push(ValidationError::Zero { field: "retry.max_attempts" });
    }
    if !(0.0..=1.0).contains(&retry.jitter_range) {
        errors.push(ValidationError::JitterRange(retry.jitter_range));
    }
    if retry.strategy == BackoffStrategy::Exponential && retry.backoff_multiplier < 1.0 {
        errors.push(ValidationError::Multiplier(retry.backoff_multiplier));
    }
    if retry.max_delay_ms < retry.initial_delay_ms {
        errors.push(ValidationError::DelayBounds {
            initial: retry.initial_delay_ms,
            max: retry.max_delay_ms,
        });
    }
    if retry.strategy == BackoffStrategy::Custom {
        errors.push(ValidationError::CustomStrategy);
    }

    if config.dlq.max_retries == 0 {
        errors.push(ValidationError::Zero { field: "dlq.max_retries" });
    }
    if config.dlq.batch_size == 0 {
        errors.push(ValidationError::Zero { field: "dlq.batch_size" });
    }

    if config.cache.tiers.is_empty() {
        errors.push(ValidationError::NoCacheTiers);
    }
    let mut seen = HashSet::new();
    for tier in &config.cache.tiers {
        if !seen.insert(tier.name.as_str()) {
            errors.push(ValidationError::DuplicateTier(tier.name.clone()));
        }
        if tier.max_size == 0 {
            errors.push(ValidationError::Zero { field: "cache.tiers.max_size" });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
