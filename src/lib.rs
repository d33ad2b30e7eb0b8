//! Memo Cache - An in-process memoizing call cache
//!
//! Wraps a function and caches its results keyed by the call arguments, with
//! expiration by elapsed time and by number of cached reads.

pub mod cache;
pub mod config;
pub mod error;
pub mod workloads;

pub use cache::{AsyncMemo, CacheKey, CacheStats, Memo, MemoBuilder, SharedMemo};
pub use config::MemoConfig;
pub use error::{MemoError, Result};
