//! Regional format conversion with a resilience control plane.
//!
//! Every conversion call runs behind a tiered result cache, a retry policy
//! and a per-dependency circuit breaker. Records that fail terminally land
//! in a dead-letter queue; ingestion is throttled by in-flight backpressure.

pub mod cache;
pub mod config;
pub mod convert;
pub mod dlq;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod resilience;

pub use config::BridgeConfig;
pub use convert::{ConvertError, Converter};
pub use lifecycle::Shutdown;
pub use pipeline::{Record, StreamProcessor};
pub use registry::Registry;
