//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BridgeConfig (validated, immutable)
//!     → per-component sections handed to breaker, retry, DLQ, cache, processor
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::BridgeConfig;
pub use schema::CacheConfig;
pub use schema::CacheTierConfig;
pub use schema::CircuitBreakerConfig;
pub use schema::ConversionConfig;
pub use schema::DlqConfig;
pub use schema::ObservabilityConfig;
pub use schema::ProcessorConfig;
pub use schema::RetryConfig;
