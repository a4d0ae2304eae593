//! Result caching subsystem.
//!
//! # Data Flow
//! ```text
//! processor lookup
//!     → tiered.rs (priority-ordered scan, promotion on lower-tier hit)
//!         → tier.rs (CacheTier capability: get/set/delete/clear/stats)
//!             → memory.rs (in-process tier: lazy TTL expiry + LRU)
//! ```

pub mod memory;
pub mod tier;
pub mod tiered;

pub use memory::{CacheEntry, MemoryTier};
pub use tier::{CacheError, CacheTier, TierStats};
pub use tiered::{CacheStats, TieredCache};
