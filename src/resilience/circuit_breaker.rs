//! Circuit breaker for converter protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: testing whether the dependency recovered, with at most
//!   `success_threshold` trial calls in flight
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure rate >= threshold over the rolling window (with enough volume)
//! Open → Half-Open: first call at or after next_attempt_at
//! Half-Open → Closed: success_threshold consecutive successes
//! Half-Open → Open: any failure
//! ```
//!
//! The lock is never held across the wrapped operation; outcomes are
//! recorded after it resolves.

use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::retries::RetryableError;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn metric_code(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Errors surfaced by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Call refused without invoking the operation.
    #[error("circuit breaker '{name}' is open; next attempt in {retry_in:?}")]
    Open { name: String, retry_in: Duration },

    /// The wrapped operation failed.
    #[error("circuit breaker '{name}': {cause}")]
    Operation { name: String, cause: E },

    /// The fallback failed after the primary path did.
    #[error("circuit breaker '{name}': {primary}; fallback failed: {fallback}")]
    FallbackFailed { name: String, primary: String, fallback: E },
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }

    /// The underlying operation (or fallback) error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Open { .. } => None,
            CircuitError::Operation { cause, .. } => Some(cause),
            CircuitError::FallbackFailed { fallback, .. } => Some(fallback),
        }
    }
}

impl<E: RetryableError> RetryableError for CircuitError<E> {
    fn is_permanent(&self) -> bool {
        match self {
            // Never reached the dependency.
            CircuitError::Open { .. } => true,
            CircuitError::Operation { cause, .. } => cause.is_permanent(),
            CircuitError::FallbackFailed { fallback, .. } => fallback.is_permanent(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CallRecord {
    at: Instant,
    success: bool,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    total_calls: u64,
    rejected_calls: u64,
    history: VecDeque<CallRecord>,
    state_changed_at: Instant,
    next_attempt_at: Option<Instant>,
    trials_in_flight: u32,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub window_calls: usize,
    pub window_failures: usize,
    pub window_failure_rate: f64,
    pub ms_in_state: u64,
    pub ms_until_next_attempt: Option<u64>,
}

/// Per-dependency circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

enum Admission<'a> {
    Allowed(Option<Trial<'a>>),
    Rejected(Duration),
}

/// A half-open call slot, released on drop.
struct Trial<'a> {
    breaker: &'a CircuitBreaker,
}

impl Drop for Trial<'_> {
    fn drop(&mut self) {
        let mut inner = self.breaker.lock();
        inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        metrics::record_circuit_state(&name, CircuitState::Closed.metric_code());
        Self {
            name,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                total_calls: 0,
                rejected_calls: 0,
                history: VecDeque::new(),
                state_changed_at: Instant::now(),
                next_attempt_at: None,
                trials_in_flight: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state as last recorded.
    ///
    /// An open breaker whose timeout elapsed still reports `Open` until the
    /// next call moves it to `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Run `operation` through the breaker.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _trial = match self.admit() {
            Admission::Allowed(trial) => trial,
            Admission::Rejected(retry_in) => {
                return Err(CircuitError::Open {
                    name: self.name.clone(),
                    retry_in,
                })
            }
        };

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(cause) => {
                self.on_failure();
                Err(CircuitError::Operation {
                    name: self.name.clone(),
                    cause,
                })
            }
        }
    }

    /// Run `operation`, resolving rejections and failures through `fallback`.
    pub async fn execute_with_fallback<T, E, F, Fut, FB, FbFut>(
        &self,
        operation: F,
        fallback: FB,
    ) -> Result<T, CircuitError<E>>
    where
        E: std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
    {
        let primary = match self.execute(operation).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        tracing::debug!(breaker = %self.name, error = %primary, "Using fallback");
        fallback().await.map_err(|fallback| CircuitError::FallbackFailed {
            name: self.name.clone(),
            primary: primary.to_string(),
            fallback,
        })
    }

    /// Force the breaker closed and clear its history.
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed, Instant::now());
        inner.history.clear();
    }

    /// Force the breaker open for one `timeout`.
    pub fn trip(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Open, Instant::now());
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let now = Instant::now();
        let inner = self.lock();
        let (window_calls, window_failures) = self.window_counts(&inner, now);
        let window_failure_rate = if window_calls == 0 {
            0.0
        } else {
            window_failures as f64 / window_calls as f64
        };

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            window_calls,
            window_failures,
            window_failure_rate,
            ms_in_state: millis(now.saturating_duration_since(inner.state_changed_at)),
            ms_until_next_attempt: inner
                .next_attempt_at
                .filter(|_| inner.state == CircuitState::Open)
                .map(|at| millis(at.saturating_duration_since(now))),
        }
    }

    fn admit(&self) -> Admission<'_> {
        let now = Instant::now();
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            match inner.next_attempt_at {
                Some(at) if now < at => {
                    inner.rejected_calls += 1;
                    drop(inner);
                    metrics::record_circuit_rejection(&self.name);
                    return Admission::Rejected(at - now);
                }
                _ => self.transition(&mut inner, CircuitState::HalfOpen, now),
            }
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.trials_in_flight >= self.config.success_threshold.max(1) {
                inner.rejected_calls += 1;
                drop(inner);
                metrics::record_circuit_rejection(&self.name);
                return Admission::Rejected(Duration::ZERO);
            }
            inner.trials_in_flight += 1;
            inner.total_calls += 1;
            return Admission::Allowed(Some(Trial { breaker: self }));
        }

        inner.total_calls += 1;
        Admission::Allowed(None)
    }

    fn on_success(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        self.push_history(&mut inner, now, true);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed, now);
                    inner.history.clear();
                }
            }
            CircuitState::Closed => {
                inner.success_count += 1;
                inner.failure_count = 0;
            }
            // A call admitted before a concurrent trip; the outcome is history only.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        self.push_history(&mut inner, now, false);

        match inner.state {
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.success_count = 0;
                if self.should_trip(&inner, now) {
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn should_trip(&self, inner: &BreakerState, now: Instant) -> bool {
        let (calls, failures) = self.window_counts(inner, now);
        if calls == 0 || calls < self.config.volume_threshold as usize {
            return false;
        }
        if failures < self.config.failure_threshold as usize {
            return false;
        }
        let percentage = failures as f64 * 100.0 / calls as f64;
        percentage >= self.config.error_threshold_percentage
    }

    fn window_counts(&self, inner: &BreakerState, now: Instant) -> (usize, usize) {
        let period = self.config.monitoring_period();
        inner
            .history
            .iter()
            .filter(|call| now.saturating_duration_since(call.at) <= period)
            .fold((0, 0), |(calls, failures), call| {
                (calls + 1, failures + usize::from(!call.success))
            })
    }

    fn push_history(&self, inner: &mut BreakerState, now: Instant, success: bool) {
        inner.history.push_back(CallRecord { at: now, success });
        let horizon = self.config.monitoring_period() * 2;
        while let Some(front) = inner.history.front() {
            if now.saturating_duration_since(front.at) > horizon {
                inner.history.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.state_changed_at = now;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.next_attempt_at = match to {
            CircuitState::Open => Some(now + self.config.timeout()),
            _ => None,
        };

        metrics::record_circuit_state(&self.name, to.metric_code());
        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                from = %from,
                timeout_ms = self.config.timeout_ms,
                "Circuit opened"
            ),
            _ => tracing::info!(breaker = %self.name, from = %from, to = %to, "Circuit state changed"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout_ms: 1_000,
            monitoring_period_ms: 10_000,
            volume_threshold: 4,
            error_threshold_percentage: 50.0,
        }
    }

    async fn call(breaker: &CircuitBreaker, ok: bool) -> Result<u32, CircuitError<String>> {
        breaker
            .execute(|| async move { if ok { Ok(1) } else { Err("boom".to_string()) } })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_closed_below_threshold() {
        let breaker = CircuitBreaker::new("conv", config());

        // 1 failure in 3 calls stays at 33%, below 50%.
        for _ in 0..10 {
            let _ = call(&breaker, false).await;
            let _ = call(&breaker, true).await;
            let _ = call(&breaker, true).await;
        }

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().total_calls, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_and_rejects_until_timeout() {
        let breaker = CircuitBreaker::new("conv", config());

        let _ = call(&breaker, true).await;
        for _ in 0..3 {
            let _ = call(&breaker, false).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = call(&breaker, true).await.unwrap_err();
        assert!(err.is_open());
        assert!(err.to_string().contains("'conv'"));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(call(&breaker, true).await.unwrap_err().is_open());
        assert_eq!(breaker.stats().rejected_calls, 2);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(call(&breaker, true).await.unwrap(), 1);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("conv", config());
        breaker.trip();

        tokio::time::advance(Duration::from_millis(1_000)).await;
        let _ = call(&breaker, true).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let err = call(&breaker, false).await.unwrap_err();
        assert!(matches!(err, CircuitError::Operation { .. }));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.stats().ms_until_next_attempt.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_successes_close() {
        let breaker = CircuitBreaker::new("conv", config());
        breaker.trip();
        tokio::time::advance(Duration::from_millis(1_000)).await;

        let _ = call(&breaker, true).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let _ = call(&breaker, true).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().window_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_concurrent_trials() {
        let breaker = CircuitBreaker::new("conv", config());
        breaker.trip();
        tokio::time::advance(Duration::from_millis(1_000)).await;

        let slow_call = || {
            breaker.execute(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<u32, String>(1)
            })
        };
        let (a, b, c) = tokio::join!(slow_call(), slow_call(), slow_call());

        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 1);
        assert!(c.unwrap_err().is_open());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_slot_freed_after_call() {
        let breaker = CircuitBreaker::new("conv", CircuitBreakerConfig {
            success_threshold: 1,
            ..config()
        });
        breaker.trip();
        tokio::time::advance(Duration::from_millis(1_000)).await;

        // A failed trial call reopens; the next one after the timeout is admitted.
        assert!(matches!(call(&breaker, false).await, Err(CircuitError::Operation { .. })));
        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert_eq!(call(&breaker, true).await.unwrap(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_failures_leave_window() {
        let breaker = CircuitBreaker::new("conv", config());

        let _ = call(&breaker, false).await;
        let _ = call(&breaker, false).await;
        tokio::time::advance(Duration::from_millis(10_001)).await;

        let _ = call(&breaker, false).await;
        let _ = call(&breaker, true).await;
        let _ = call(&breaker, true).await;
        let _ = call(&breaker, true).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().window_calls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_used_when_open() {
        let breaker = CircuitBreaker::new("conv", config());
        breaker.trip();

        let value = breaker
            .execute_with_fallback(
                || async { Ok::<_, String>(1) },
                || async { Ok::<_, String>(99) },
            )
            .await
            .unwrap();
        assert_eq!(value, 99);

        let err = breaker
            .execute_with_fallback(
                || async { Ok::<u32, String>(1) },
                || async { Err::<u32, _>("no cache".to_string()) },
            )
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("is open") && text.contains("no cache"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes() {
        let breaker = CircuitBreaker::new("conv", config());
        breaker.trip();
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(call(&breaker, true).await.unwrap(), 1);
    }
}
