//! Cache Statistics Module
//!
//! Tracks call outcomes: hits, misses, expirations, bypasses and failures.

use serde::Serialize;

// == Cache Stats ==
/// Tracks memo cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Total invocations handled, whatever their outcome
    pub calls: u64,
    /// Invocations answered from a valid entry
    pub hits: u64,
    /// Invocations that ran the wrapped callable with a keyable argument
    pub misses: u64,
    /// Misses caused by a stale entry (a subset of `misses`)
    pub expirations: u64,
    /// Invocations whose arguments could not be keyed
    pub bypasses: u64,
    /// Misses where the wrapped callable returned an error
    pub failures: u64,
    /// Current number of stored entries, valid or stale
    pub total_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if nothing was cacheable yet.
    /// Bypassed calls are not part of the ratio.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    // == Record Call ==
    /// Records one handled invocation.
    pub fn record_call(&mut self) {
        self.calls += 1;
    }

    // == Record Hit ==
    /// Records a cache hit.
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    // == Record Miss ==
    /// Records a cache miss.
    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    // == Record Expiration ==
    /// Records a miss caused by a stale entry.
    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    // == Record Bypass ==
    /// Records a call whose arguments had no key.
    pub fn record_bypass(&mut self) {
        self.bypasses += 1;
    }

    // == Record Failure ==
    /// Records a miss where the callable failed.
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    // == Update Entry Count ==
    /// Updates the total entries count.
    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}
