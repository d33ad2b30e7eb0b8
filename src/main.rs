//! Memo Cache - demo runner
//!
//! Runs the demonstration workloads through the memo cache and prints the
//! resulting statistics as JSON.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memo_cache::cache::MemoBuilder;
use memo_cache::workloads::{self, DemoSettings};
use memo_cache::MemoConfig;

/// Main entry point for the demo.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load the expiry policy and demo settings from environment variables
/// 3. Call the memoized sum repeatedly with the same arguments
/// 4. Compute Fibonacci through the recursive memo
/// 5. Race concurrent tasks on one slow async computation
/// 6. Print statistics of all three wrappers
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memo_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MemoConfig::from_env();
    config.validate().context("invalid memo configuration")?;
    let settings = DemoSettings::from_env();
    info!(
        "Configuration loaded: ttl={}s, max_lifecycle_hits={}, rounds={}, fibonacci_n={}, tasks={}",
        config.ttl_secs,
        config.max_lifecycle_hits,
        settings.rounds,
        settings.fibonacci_n,
        settings.tasks
    );

    // Sum: the hit budget runs out before the TTL does
    let (sum, sum_evaluations) = workloads::sum(MemoBuilder::from_config(&config).name("sum"))?;
    for round in 1..=settings.rounds {
        let result = sum.invoke((5, 5))?;
        info!(
            round,
            result,
            evaluations = sum_evaluations.get(),
            "sum(5, 5)"
        );
    }

    // Fibonacci: every index computed once
    let (fib, fib_evaluations) =
        workloads::fibonacci(MemoBuilder::from_config(&config).name("fibonacci"))?;
    let result = fib
        .invoke(settings.fibonacci_n)
        .with_context(|| format!("fibonacci({}) failed", settings.fibonacci_n))?;
    info!(
        n = settings.fibonacci_n,
        result,
        evaluations = fib_evaluations.get(),
        "fibonacci"
    );

    // Slow square: concurrent callers converge on one evaluation
    let (square, square_evaluations) = workloads::slow_square(
        MemoBuilder::from_config(&config).name("slow_square"),
        Duration::from_millis(100),
    )?;
    let square = Arc::new(square);
    let handles: Vec<_> = (0..settings.tasks)
        .map(|_| {
            let square = Arc::clone(&square);
            tokio::spawn(async move { square.invoke(12).await })
        })
        .collect();
    for handle in handles {
        let result = handle.await.context("slow_square task panicked")??;
        info!(result, "slow_square(12)");
    }
    info!(evaluations = square_evaluations.get(), "slow_square done");

    let report = json!({
        "sum": sum.stats(),
        "fibonacci": fib.stats(),
        "slow_square": square.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
