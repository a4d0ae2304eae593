//! Converter boundary.
//!
//! The control plane only sees `Converter::convert` succeed or fail; what a
//! conversion means is up to the implementation. `regional` holds the
//! reference field converter used by the binary.

pub mod regional;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::pipeline::Record;
use crate::resilience::RetryableError;

pub use regional::RegionalConverter;

/// Errors a converter may return.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvertError {
    /// The conversion dependency (rate source, remote service) is unavailable.
    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    #[error("converter timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("unsupported record kind '{0}'")]
    UnsupportedKind(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl RetryableError for ConvertError {
    fn is_permanent(&self) -> bool {
        matches!(
            self,
            ConvertError::InvalidField { .. }
                | ConvertError::UnsupportedKind(_)
                | ConvertError::Unauthorized(_)
        )
    }
}

/// A field-by-field record converter.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Name used for the converter's circuit breaker and logs.
    fn name(&self) -> &str;

    async fn convert(&self, record: &Record) -> Result<Record, ConvertError>;
}
