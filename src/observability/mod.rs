//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! breaker / retry / cache / dlq / processor produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stderr (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! Plain-data snapshots (`stats()` on every component) are the third
//! channel and are serialized by callers.

pub mod logging;
pub mod metrics;
