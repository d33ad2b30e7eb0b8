//! Expiry Policy Module
//!
//! Decides whether a cached entry may still be served.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::{CacheEntry, DEFAULT_MAX_LIFECYCLE_HITS, DEFAULT_TTL_SECS};
use crate::error::{MemoError, Result};

// == Freshness ==
/// Outcome of checking an entry against the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Entry may be served
    Fresh,
    /// Entry must be recomputed
    Stale(Staleness),
}

/// Why an entry stopped being servable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// The time-to-live elapsed
    Aged,
    /// The hit budget was spent
    Exhausted,
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::Aged => f.write_str("ttl elapsed"),
            Staleness::Exhausted => f.write_str("hit budget spent"),
        }
    }
}

// == Expiry Policy ==
/// Time and hit-count limits applied to every entry of one wrapper.
///
/// An entry is valid while BOTH limits hold: its age is below `ttl` and it
/// has been served fewer than `max_lifecycle_hits` times. The creation call
/// does not count as a hit, so an entry is served from cache exactly
/// `max_lifecycle_hits` times before being recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    /// Age at which an entry is stale regardless of hits
    pub ttl: Duration,
    /// Cached reads after which an entry is stale regardless of age
    pub max_lifecycle_hits: u32,
}

impl ExpiryPolicy {
    /// Creates a policy from its two limits.
    pub fn new(ttl: Duration, max_lifecycle_hits: u32) -> Self {
        Self {
            ttl,
            max_lifecycle_hits,
        }
    }

    /// Rejects limits under which an entry could never be served.
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(MemoError::InvalidConfig(
                "ttl must be greater than zero".to_string(),
            ));
        }
        if self.max_lifecycle_hits == 0 {
            return Err(MemoError::InvalidConfig(
                "max_lifecycle_hits must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    // == Check ==
    /// Checks an entry at the given instant.
    ///
    /// Age is tested first, so an entry that is both old and exhausted
    /// reports `Aged`.
    pub fn check<R>(&self, entry: &CacheEntry<R>, now: Instant) -> Freshness {
        if entry.age(now) >= self.ttl {
            Freshness::Stale(Staleness::Aged)
        } else if entry.hits >= self.max_lifecycle_hits {
            Freshness::Stale(Staleness::Exhausted)
        } else {
            Freshness::Fresh
        }
    }

    /// Returns true if the entry may be served at `now`.
    pub fn is_valid<R>(&self, entry: &CacheEntry<R>, now: Instant) -> bool {
        self.check(entry, now) == Freshness::Fresh
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_TTL_SECS),
            DEFAULT_MAX_LIFECYCLE_HITS,
        )
    }
}
