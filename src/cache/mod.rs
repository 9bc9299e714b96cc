//! Generic two-tier cache: a fast in-process tier in front of a durable
//! SQLite tier, with shared expiry, LRU eviction, and tag invalidation.
//!
//! Domain-agnostic - the odds layer is just one consumer. Values are
//! serialized JSON in both tiers so the same representation feeds the
//! size estimate, the durable rows, and promotion between tiers.

mod entry;
mod memory;
mod store;
mod tiered;

pub use entry::{CacheEntry, CacheHealth, CacheStats, StoreError, WriteOutcome};
pub use store::{NoopTier, PersistentEntry, PersistentTier, SqliteTier};
pub use tiered::{CacheConfig, SweeperHandle, TieredCache};
