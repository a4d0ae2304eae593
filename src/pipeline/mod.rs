//! Streaming conversion pipeline.
//!
//! # Data Flow
//! ```text
//! Stream<Record>
//!     → processor.rs (ingestion loop, worker pool, resilience chain)
//!         → backpressure.rs (admission gate)
//!         → metrics.rs (running summary)
//!     → mpsc::Sender<Record> | DeadLetterQueue<Record>
//! ```

pub mod backpressure;
pub mod metrics;
pub mod processor;
pub mod record;

pub use backpressure::BackpressureGate;
pub use metrics::{ProcessorMetrics, ProcessorSummary};
pub use processor::{stage, StreamProcessor};
pub use record::Record;
