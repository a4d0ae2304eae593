//! Backoff delay strategies with jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the base delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Constant `initial_delay`.
    Fixed,
    /// `initial_delay * attempt`.
    Linear,
    /// `initial_delay * multiplier^(attempt - 1)`.
    #[default]
    Exponential,
    /// Caller-supplied function of (attempt, error).
    Custom,
}

/// Uncapped, unjittered delay for `attempt` (1-based).
///
/// `Custom` has no formula of its own and falls back to `initial_ms`; the
/// retry policy substitutes the caller's function before reaching here.
pub fn base_delay_ms(strategy: BackoffStrategy, attempt: u32, initial_ms: f64, multiplier: f64) -> f64 {
    let attempt = attempt.max(1);
    match strategy {
        BackoffStrategy::Fixed | BackoffStrategy::Custom => initial_ms,
        BackoffStrategy::Linear => initial_ms * f64::from(attempt),
        BackoffStrategy::Exponential => {
            let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
            initial_ms * multiplier.powi(exponent)
        }
    }
}

/// Cap at `max_ms`, perturb by `±delay * jitter_range`, floor at zero.
pub fn apply_jitter<R: Rng + ?Sized>(delay_ms: f64, max_ms: f64, jitter_range: f64, rng: &mut R) -> Duration {
    let capped = if delay_ms.is_finite() { delay_ms.min(max_ms) } else { max_ms };

    let jittered = if jitter_range > 0.0 && capped > 0.0 {
        let spread = capped * jitter_range;
        capped + rng.gen_range(-spread..=spread)
    } else {
        capped
    };

    Duration::from_nanos((jittered.max(0.0) * 1_000_000.0).round() as u64)
}

/// Calculate a jittered delay with the thread-local RNG.
pub fn calculate_backoff(
    strategy: BackoffStrategy,
    attempt: u32,
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
    jitter_range: f64,
) -> Duration {
    let base = base_delay_ms(strategy, attempt, initial_ms as f64, multiplier);
    apply_jitter(base, max_ms as f64, jitter_range, &mut rand::thread_rng())
}
