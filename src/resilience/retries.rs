//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether an error is worth another attempt
//! - Compute the delay before each retry (fixed, linear, exponential, custom)
//! - Stop early on permanent errors or a shutdown signal
//!
//! # Retry Eligibility
//! ```text
//! error.is_permanent()              → never retried
//! matches non_retryable_errors      → never retried (checked first)
//! retryable_errors configured       → retried only when one matches
//! otherwise                         → retried
//! ```
//! Patterns are case-sensitive substrings of the error's display text.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::RetryConfig;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::resilience::backoff::{apply_jitter, base_delay_ms, BackoffStrategy};

/// Errors that can opt out of retrying regardless of configured patterns.
pub trait RetryableError: fmt::Display {
    /// `true` ends the retry sequence immediately.
    fn is_permanent(&self) -> bool {
        false
    }
}

impl RetryableError for String {}
impl RetryableError for &str {}

/// Caller-supplied delay: (attempt, error message) → delay.
pub type CustomDelay = Arc<dyn Fn(u32, &str) -> Duration + Send + Sync>;

/// One scheduled retry, handed to `on_retry` observers.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// The attempt that just failed (1-based).
    pub attempt: u32,
    /// Delay before the next attempt.
    pub delay: Duration,
    pub error: String,
    pub at: Instant,
}

/// Terminal outcome of a retry sequence.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("retry policy '{policy}': non-retryable error: {cause}")]
    NonRetryable { policy: String, cause: E },

    #[error("retry policy '{policy}' exhausted after {attempts} attempts: {cause}")]
    Exhausted { policy: String, attempts: u32, cause: E },

    #[error("retry policy '{policy}' stopped after {attempts} attempts: {cause}")]
    Cancelled { policy: String, attempts: u32, cause: E },
}

impl<E> RetryError<E> {
    pub fn cause(&self) -> &E {
        match self {
            RetryError::NonRetryable { cause, .. }
            | RetryError::Exhausted { cause, .. }
            | RetryError::Cancelled { cause, .. } => cause,
        }
    }

    pub fn into_cause(self) -> E {
        match self {
            RetryError::NonRetryable { cause, .. }
            | RetryError::Exhausted { cause, .. }
            | RetryError::Cancelled { cause, .. } => cause,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::NonRetryable { .. } => 1,
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Running counters for one policy.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryStats {
    pub name: String,
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub non_retryable: u64,
    pub cancelled: u64,
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    non_retryable: AtomicU64,
    cancelled: AtomicU64,
}

/// Configurable retry/backoff policy.
pub struct RetryPolicy {
    name: String,
    config: RetryConfig,
    custom_delay: Option<CustomDelay>,
    counters: Counters,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("custom_delay", &self.custom_delay.is_some())
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            name: name.into(),
            config,
            custom_delay: None,
            counters: Counters::default(),
        }
    }

    /// Switch to the `custom` strategy with the given delay function.
    pub fn with_custom_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(u32, &str) -> Duration + Send + Sync + 'static,
    {
        self.config.strategy = BackoffStrategy::Custom;
        self.custom_delay = Some(Arc::new(delay));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether an error with this message passes the configured patterns.
    pub fn should_retry(&self, message: &str) -> bool {
        if self
            .config
            .non_retryable_errors
            .iter()
            .any(|p| message.contains(p.as_str()))
        {
            return false;
        }
        if self.config.retryable_errors.is_empty() {
            return true;
        }
        self.config
            .retryable_errors
            .iter()
            .any(|p| message.contains(p.as_str()))
    }

    /// Delay before the retry that follows failed `attempt`.
    pub fn compute_delay(&self, attempt: u32, error: &str) -> Duration {
        let base = match (&self.config.strategy, &self.custom_delay) {
            (BackoffStrategy::Custom, Some(custom)) => custom(attempt, error).as_nanos() as f64 / 1_000_000.0,
            (strategy, _) => base_delay_ms(
                *strategy,
                attempt,
                self.config.initial_delay_ms as f64,
                self.config.backoff_multiplier,
            ),
        };
        apply_jitter(
            base,
            self.config.max_delay_ms as f64,
            self.config.jitter_range,
            &mut rand::thread_rng(),
        )
    }

    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        E: RetryableError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_until(operation, |_| {}, &ShutdownSignal::never()).await
    }

    pub async fn execute_with<T, E, F, Fut, R>(
        &self,
        operation: F,
        on_retry: R,
    ) -> Result<T, RetryError<E>>
    where
        E: RetryableError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(&RetryAttempt),
    {
        self.execute_until(operation, on_retry, &ShutdownSignal::never()).await
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of
    /// attempts, or `stop` fires before a retry.
    ///
    /// `on_retry` runs synchronously before each delay.
    pub async fn execute_until<T, E, F, Fut, R>(
        &self,
        mut operation: F,
        mut on_retry: R,
        stop: &ShutdownSignal,
    ) -> Result<T, RetryError<E>>
    where
        E: RetryableError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(&RetryAttempt),
    {
        let max_attempts = self.config.max_attempts.max(1);
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        let mut attempt = 1;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    self.counters.successes.fetch_add(1, Ordering::Relaxed);
                    if attempt > 1 {
                        tracing::debug!(policy = %self.name, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let message = err.to_string();
            if err.is_permanent() || !self.should_retry(&message) {
                self.counters.non_retryable.fetch_add(1, Ordering::Relaxed);
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(policy = %self.name, attempt, error = %message, "Not retrying");
                return Err(RetryError::NonRetryable {
                    policy: self.name.clone(),
                    cause: err,
                });
            }

            if attempt >= max_attempts {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(policy = %self.name, attempts = attempt, error = %message, "Retries exhausted");
                return Err(RetryError::Exhausted {
                    policy: self.name.clone(),
                    attempts: attempt,
                    cause: err,
                });
            }

            let delay = self.compute_delay(attempt, &message);
            on_retry(&RetryAttempt {
                attempt,
                delay,
                error: message,
                at: Instant::now(),
            });
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            metrics::record_retry(&self.name);
            tracing::debug!(policy = %self.name, attempt, delay_ms = delay.as_millis() as u64, "Retrying");

            tokio::time::sleep(delay).await;

            if stop.is_triggered() {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                return Err(RetryError::Cancelled {
                    policy: self.name.clone(),
                    attempts: attempt,
                    cause: err,
                });
            }
            attempt += 1;
        }
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            name: self.name.clone(),
            calls: self.counters.calls.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            non_retryable: self.counters.non_retryable.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use std::sync::atomic::AtomicU32;

    fn config(strategy: BackoffStrategy, initial: u64) -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: initial,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_range: 0.0,
            strategy,
            retryable_errors: Vec::new(),
            non_retryable_errors: Vec::new(),
        }
    }

    #[test]
    fn test_exponential_delays_and_cap() {
        let policy = RetryPolicy::new("p", config(BackoffStrategy::Exponential, 100));
        assert_eq!(policy.compute_delay(1, ""), Duration::from_millis(100));
        assert_eq!(policy.compute_delay(2, ""), Duration::from_millis(200));
        assert_eq!(policy.compute_delay(3, ""), Duration::from_millis(400));

        let mut capped = config(BackoffStrategy::Exponential, 100);
        capped.max_delay_ms = 150;
        let policy = RetryPolicy::new("p", capped);
        assert_eq!(policy.compute_delay(3, ""), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let policy = RetryPolicy::new("p", config(BackoffStrategy::Fixed, 10));
        let calls = AtomicU32::new(0);
        let mut observed = Vec::new();
        let start = Instant::now();

        let result = policy
            .execute_with(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err("transient".to_string())
                        } else {
                            Ok(n)
                        }
                    }
                },
                |attempt| observed.push(attempt.attempt),
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(observed, vec![1, 2]);
        assert_eq!(policy.stats().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_names_policy() {
        let policy = RetryPolicy::new("convert", config(BackoffStrategy::Linear, 5));
        let calls = AtomicU32::new(0);

        let err = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("upstream 503".to_string()) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts(), 3);
        let text = err.to_string();
        assert!(text.contains("'convert'") && text.contains("upstream 503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_pattern_wins() {
        let mut cfg = config(BackoffStrategy::Fixed, 5);
        cfg.retryable_errors = vec!["invalid".into()];
        cfg.non_retryable_errors = vec!["invalid currency".into()];
        let policy = RetryPolicy::new("p", cfg);
        let calls = AtomicU32::new(0);

        let err = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("invalid currency code") }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::NonRetryable { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retryable_allow_list() {
        let mut cfg = config(BackoffStrategy::Fixed, 5);
        cfg.retryable_errors = vec!["timeout".into(), "503".into()];
        let policy = RetryPolicy::new("p", cfg);

        assert!(policy.should_retry("request timeout"));
        assert!(policy.should_retry("status 503"));
        assert!(!policy.should_retry("bad request"));
    }

    #[derive(Debug)]
    struct Fatal;

    impl fmt::Display for Fatal {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fatal")
        }
    }

    impl RetryableError for Fatal {
        fn is_permanent(&self) -> bool {
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let policy = RetryPolicy::new("p", config(BackoffStrategy::Fixed, 5));
        let err = policy
            .execute(|| async { Err::<(), _>(Fatal) })
            .await
            .unwrap_err();
        assert!(matches!(err, RetryError::NonRetryable { .. }));
        assert_eq!(policy.stats().non_retryable, 1);
    }

    #[test]
    fn test_custom_delay() {
        let policy = RetryPolicy::new("p", config(BackoffStrategy::Fixed, 5))
            .with_custom_delay(|attempt, error| {
                if error.contains("rate") {
                    Duration::from_millis(1_000)
                } else {
                    Duration::from_millis(u64::from(attempt) * 7)
                }
            });

        assert_eq!(policy.compute_delay(3, "boom"), Duration::from_millis(21));
        assert_eq!(policy.compute_delay(1, "rate limited"), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_cancels_before_next_attempt() {
        let policy = RetryPolicy::new("p", config(BackoffStrategy::Fixed, 50));
        let shutdown = Shutdown::new();
        let stop = shutdown.subscribe();
        let calls = AtomicU32::new(0);

        let err = policy
            .execute_until(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("transient".to_string()) }
                },
                |_| shutdown.trigger(),
                &stop,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::Cancelled { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
