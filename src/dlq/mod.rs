//! Dead-letter queue for records that failed terminally.

pub mod queue;
pub mod types;

pub use queue::DeadLetterQueue;
pub use types::{DlqEntry, DlqError, DlqStats, ProcessReport};
