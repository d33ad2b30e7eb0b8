//! Cache Entry Module
//!
//! Defines the stored result of one call together with its age and hit count.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::cache::{ExpiryPolicy, Freshness};

// == Cache Entry ==
/// Represents the cached result of one argument tuple.
#[derive(Debug, Clone)]
pub struct CacheEntry<R> {
    /// The stored return value
    pub result: R,
    /// Monotonic creation instant, used for TTL checks
    pub created: Instant,
    /// Wall-clock creation time, used for introspection
    pub created_at: DateTime<Utc>,
    /// Times this entry has been served since creation
    pub hits: u32,
}

impl<R> CacheEntry<R> {
    // == Constructor ==
    /// Creates a fresh entry stamped with the current time and zero hits.
    pub fn new(result: R) -> Self {
        Self {
            result,
            created: Instant::now(),
            created_at: Utc::now(),
            hits: 0,
        }
    }

    // == Age ==
    /// Returns the time elapsed between creation and `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created)
    }

    // == Record Hit ==
    /// Counts one cached read and returns the new total.
    pub fn record_hit(&mut self) -> u32 {
        self.hits = self.hits.saturating_add(1);
        self.hits
    }

    // == Snapshot ==
    /// Describes the entry without touching its hit counter.
    pub fn snapshot(&self, policy: &ExpiryPolicy, now: Instant) -> EntrySnapshot {
        let remaining = policy.ttl.saturating_sub(self.age(now));
        EntrySnapshot {
            created_at: self.created_at,
            age_ms: duration_ms(self.age(now)),
            ttl_remaining_ms: duration_ms(remaining),
            hits: self.hits,
            hits_remaining: policy.max_lifecycle_hits.saturating_sub(self.hits),
            valid: policy.check(self, now) == Freshness::Fresh,
        }
    }
}

// == Entry Snapshot ==
/// Point-in-time view of an entry for debugging and statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
    /// When the entry was computed
    pub created_at: DateTime<Utc>,
    /// Milliseconds since creation
    pub age_ms: u64,
    /// Milliseconds until the TTL elapses, 0 once it has
    pub ttl_remaining_ms: u64,
    /// Cached reads served so far
    pub hits: u32,
    /// Cached reads left in the budget
    pub hits_remaining: u32,
    /// Whether the next access would be served from cache
    pub valid: bool,
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
