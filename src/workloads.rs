//! Demonstration Workloads
//!
//! Small functions wrapped by the memo cache, used by the demo binary and the
//! integration tests.
//!
//! # Workloads
//! - Sum: adds two integers
//! - Fibonacci: naive recursion, memoized through its own wrapper
//! - Slow square: async function that sleeps before answering

use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::cache::{AsyncMemo, Memo, MemoBuilder};
use crate::error::Result;

// == Workload Error ==
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkloadError {
    /// Result does not fit in the output type
    #[error("Arithmetic overflow computing {0}")]
    Overflow(String),
}

// == Evaluations ==
/// Counts how many times a wrapped function body actually ran.
#[derive(Debug, Clone, Default)]
pub struct Evaluations(Arc<AtomicU64>);

impl Evaluations {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

// == Sum ==
/// Wraps `a + b`.
pub fn sum(builder: MemoBuilder) -> Result<(Memo<(i64, i64), i64, WorkloadError>, Evaluations)> {
    let evaluations = Evaluations::default();
    let memo = builder.build({
        let evaluations = evaluations.clone();
        move |(a, b): (i64, i64)| {
            evaluations.record();
            debug!(a, b, "evaluating sum");
            a.checked_add(b)
                .ok_or_else(|| WorkloadError::Overflow(format!("{a} + {b}")))
        }
    })?;
    Ok((memo, evaluations))
}

// == Fibonacci ==
/// Wraps the naive recursive Fibonacci; sub-calls go through the cache.
pub fn fibonacci(builder: MemoBuilder) -> Result<(Memo<u64, u64, WorkloadError>, Evaluations)> {
    let evaluations = Evaluations::default();
    let memo = builder.build_recursive({
        let evaluations = evaluations.clone();
        move |memo: &Memo<u64, u64, WorkloadError>, n: u64| {
            evaluations.record();
            if n > 1 {
                let a = memo.invoke(n - 1)?;
                let b = memo.invoke(n - 2)?;
                a.checked_add(b)
                    .ok_or_else(|| WorkloadError::Overflow(format!("fibonacci({n})")))
            } else {
                Ok(n)
            }
        }
    })?;
    Ok((memo, evaluations))
}

// == Slow Square ==
/// Wraps an async square that takes `delay` to answer.
pub fn slow_square(
    builder: MemoBuilder,
    delay: Duration,
) -> Result<(AsyncMemo<u64, u64, WorkloadError>, Evaluations)> {
    let evaluations = Evaluations::default();
    let memo = builder.build_async({
        let evaluations = evaluations.clone();
        move |n: u64| {
            evaluations.record();
            async move {
                tokio::time::sleep(delay).await;
                n.checked_mul(n)
                    .ok_or_else(|| WorkloadError::Overflow(format!("{n} squared")))
            }
        }
    })?;
    Ok((memo, evaluations))
}

// == Demo Settings ==
/// Parameters of the demo binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoSettings {
    /// Repeated `sum(5, 5)` calls
    pub rounds: u32,
    /// Fibonacci index to compute
    pub fibonacci_n: u64,
    /// Concurrent tasks asking for the same slow square
    pub tasks: usize,
}

impl DemoSettings {
    /// Loads settings from environment variables.
    ///
    /// # Environment Variables
    /// - `MEMO_DEMO_ROUNDS` - Repeated sum calls (default: 12)
    /// - `MEMO_DEMO_FIB` - Fibonacci index (default: 10)
    /// - `MEMO_DEMO_TASKS` - Concurrent async callers (default: 4)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rounds: env::var("MEMO_DEMO_ROUNDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.rounds),
            fibonacci_n: env::var("MEMO_DEMO_FIB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.fibonacci_n),
            tasks: env::var("MEMO_DEMO_TASKS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.tasks),
        }
    }
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            rounds: 12,
            fibonacci_n: 10,
            tasks: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_counts_evaluations() {
        let (memo, evaluations) = sum(MemoBuilder::new()).unwrap();

        assert_eq!(memo.invoke((5, 5)), Ok(10));
        assert_eq!(memo.invoke((5, 5)), Ok(10));
        assert_eq!(evaluations.get(), 1);
    }

    #[test]
    fn test_sum_overflow_is_not_cached() {
        let (memo, evaluations) = sum(MemoBuilder::new()).unwrap();

        assert!(matches!(
            memo.invoke((i64::MAX, 1)),
            Err(WorkloadError::Overflow(_))
        ));
        assert!(memo.invoke((i64::MAX, 1)).is_err());
        assert_eq!(evaluations.get(), 2);
        assert!(memo.is_empty());
    }

    #[test]
    fn test_fibonacci_overflow_propagates() {
        let (memo, _) = fibonacci(MemoBuilder::new()).unwrap();

        assert_eq!(memo.invoke(93), Ok(12_200_160_415_121_876_738));
        assert_eq!(
            memo.invoke(94),
            Err(WorkloadError::Overflow("fibonacci(94)".to_string()))
        );
        assert!(memo.contains(&93));
        assert!(!memo.contains(&94));
    }

    #[test]
    fn test_demo_settings_default() {
        let settings = DemoSettings::default();
        assert_eq!(settings.rounds, 12);
        assert_eq!(settings.fibonacci_n, 10);
        assert_eq!(settings.tasks, 4);
    }
}
