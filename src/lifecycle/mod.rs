//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → processor stops admitting records
//!             → retry sequences stop before their next attempt
//!             → maintenance loop exits
//! ```
//!
//! # Design Decisions
//! - Stop is cooperative: in-flight delays are not cut short
//! - Admitted records always drain to output or DLQ

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
