//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Conversion of one record:
//!     → retries.rs (retry loop with backoff.rs delays)
//!         → circuit_breaker.rs (guards each individual attempt)
//!             → timeouts.rs (deadline on the converter call)
//! ```
//!
//! # Design Decisions
//! - The breaker sits inside the retry loop so every attempt is counted
//! - Open-circuit rejections end the retry sequence instead of sleeping
//! - All components take plain config structs and keep their own counters

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::BackoffStrategy;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitError, CircuitState};
pub use retries::{RetryAttempt, RetryError, RetryPolicy, RetryStats, RetryableError};
