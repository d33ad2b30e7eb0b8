//! Cache Module
//!
//! Provides memoizing function wrappers with TTL and hit-budget expiration.

mod async_memo;
mod bound;
mod builder;
mod entry;
mod key;
mod memo;
mod policy;
mod shared;
mod stats;


// Re-export public types
pub use async_memo::AsyncMemo;
pub use bound::{Bound, Memoized};
pub use builder::MemoBuilder;
pub use entry::{CacheEntry, EntrySnapshot};
pub use key::{ByAddress, CacheKey, Unhashable};
pub use memo::Memo;
pub use policy::{ExpiryPolicy, Freshness, Staleness};
pub use shared::SharedMemo;
pub use stats::CacheStats;

// == Public Constants ==
/// Default entry time-to-live in seconds
pub const DEFAULT_TTL_SECS: u64 = 60;

/// Default number of cached reads per entry
pub const DEFAULT_MAX_LIFECYCLE_HITS: u32 = 10;

/// Log label used when a wrapper is not given a name
pub const DEFAULT_NAME: &str = "memo";
