//! Configuration Module
//!
//! Handles loading and validating the default expiry policy from environment variables.

use std::env;
use std::time::Duration;

use crate::cache::{ExpiryPolicy, DEFAULT_MAX_LIFECYCLE_HITS, DEFAULT_TTL_SECS};
use crate::error::{MemoError, Result};

/// Memo cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoConfig {
    /// Seconds after which an entry is stale regardless of hits
    pub ttl_secs: u64,
    /// Number of cached reads after which an entry is stale regardless of age
    pub max_lifecycle_hits: u32,
}

impl MemoConfig {
    /// Creates a new MemoConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MEMO_TTL_SECS` - Entry time-to-live in seconds (default: 60)
    /// - `MEMO_MAX_LIFECYCLE_HITS` - Cached reads per entry (default: 10)
    pub fn from_env() -> Self {
        Self {
            ttl_secs: env::var("MEMO_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TTL_SECS),
            max_lifecycle_hits: env::var("MEMO_MAX_LIFECYCLE_HITS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_LIFECYCLE_HITS),
        }
    }

    /// Rejects policies under which no entry could ever be served.
    pub fn validate(&self) -> Result<()> {
        self.policy().validate()
    }

    /// Converts the configuration into the policy applied to entries.
    pub fn policy(&self) -> ExpiryPolicy {
        ExpiryPolicy::new(Duration::from_secs(self.ttl_secs), self.max_lifecycle_hits)
    }
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            max_lifecycle_hits: DEFAULT_MAX_LIFECYCLE_HITS,
        }
    }
}

impl TryFrom<&MemoConfig> for ExpiryPolicy {
    type Error = MemoError;

    fn try_from(config: &MemoConfig) -> Result<Self> {
        let policy = config.policy();
        policy.validate()?;
        Ok(policy)
    }
}
