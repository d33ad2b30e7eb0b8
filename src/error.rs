//! Error types for the memo cache
//!
//! Provides unified error handling using thiserror.
//!
//! Failures of a wrapped callable are never converted into this type: they are
//! handed back to the caller unchanged.

use thiserror::Error;

// == Memo Error Enum ==
/// Errors produced by the cache itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoError {
    /// Rejected expiry policy or configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// == Result Type Alias ==
/// Convenience Result type for cache construction.
pub type Result<T> = std::result::Result<T, MemoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MemoError::InvalidConfig("ttl must be greater than zero".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: ttl must be greater than zero"
        );
    }
}
