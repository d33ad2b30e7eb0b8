//! Memo Builder Module
//!
//! Configures an expiry policy and a log label, then wraps a function in one
//! of the three memo flavours.

use std::future::Future;
use std::time::Duration;

use crate::cache::async_memo::BoxFuture;
use crate::cache::{AsyncMemo, CacheKey, ExpiryPolicy, Memo, SharedMemo, DEFAULT_NAME};
use crate::config::MemoConfig;
use crate::error::Result;

// == Memo Builder ==
/// Factory for memo wrappers.
///
/// # Example
/// ```
/// use memo_cache::cache::MemoBuilder;
/// use std::convert::Infallible;
/// use std::time::Duration;
///
/// let sum = MemoBuilder::new()
///     .name("sum")
///     .ttl(Duration::from_secs(300))
///     .max_lifecycle_hits(11)
///     .build(|(a, b): (i64, i64)| Ok::<_, Infallible>(a + b))
///     .unwrap();
///
/// assert_eq!(sum.invoke((5, 5)), Ok(10));
/// ```
#[derive(Debug, Clone)]
pub struct MemoBuilder {
    policy: ExpiryPolicy,
    name: String,
}

impl MemoBuilder {
    /// Starts from the default policy (60 s, 10 hits).
    pub fn new() -> Self {
        Self {
            policy: ExpiryPolicy::default(),
            name: DEFAULT_NAME.to_string(),
        }
    }

    /// Starts from a loaded configuration.
    pub fn from_config(config: &MemoConfig) -> Self {
        Self {
            policy: config.policy(),
            name: DEFAULT_NAME.to_string(),
        }
    }

    // == Setters ==
    /// Sets how long an entry stays valid after it is computed.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.policy.ttl = ttl;
        self
    }

    /// Sets how many times an entry is served before it is recomputed.
    pub fn max_lifecycle_hits(mut self, hits: u32) -> Self {
        self.policy.max_lifecycle_hits = hits;
        self
    }

    /// Label attached to every log event of the built wrapper.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the policy the built wrapper will use.
    pub fn policy(&self) -> &ExpiryPolicy {
        &self.policy
    }

    // == Build ==
    /// Builds a single-threaded [`Memo`].
    pub fn build<A, R, E, F>(self, func: F) -> Result<Memo<A, R, E>>
    where
        A: CacheKey,
        R: Clone,
        F: Fn(A) -> std::result::Result<R, E> + 'static,
    {
        self.policy.validate()?;
        Ok(Memo::from_parts(
            Box::new(move |_: &Memo<A, R, E>, args: A| func(args)),
            self.policy,
            self.name,
        ))
    }

    /// Builds a [`Memo`] whose function recurses through the wrapper.
    pub fn build_recursive<A, R, E, F>(self, func: F) -> Result<Memo<A, R, E>>
    where
        A: CacheKey,
        R: Clone,
        F: Fn(&Memo<A, R, E>, A) -> std::result::Result<R, E> + 'static,
    {
        self.policy.validate()?;
        Ok(Memo::from_parts(Box::new(func), self.policy, self.name))
    }

    /// Builds a thread-safe [`SharedMemo`].
    pub fn build_shared<A, R, E, F>(self, func: F) -> Result<SharedMemo<A, R, E>>
    where
        A: CacheKey,
        R: Clone,
        F: Fn(A) -> std::result::Result<R, E> + Send + Sync + 'static,
    {
        self.policy.validate()?;
        Ok(SharedMemo::from_parts(
            Box::new(move |_: &SharedMemo<A, R, E>, args: A| func(args)),
            self.policy,
            self.name,
        ))
    }

    /// Builds a [`SharedMemo`] whose function recurses through the wrapper.
    pub fn build_shared_recursive<A, R, E, F>(self, func: F) -> Result<SharedMemo<A, R, E>>
    where
        A: CacheKey,
        R: Clone,
        F: Fn(&SharedMemo<A, R, E>, A) -> std::result::Result<R, E> + Send + Sync + 'static,
    {
        self.policy.validate()?;
        Ok(SharedMemo::from_parts(Box::new(func), self.policy, self.name))
    }

    /// Builds an [`AsyncMemo`] around an async function.
    pub fn build_async<A, R, E, F, Fut>(self, func: F) -> Result<AsyncMemo<A, R, E>>
    where
        A: CacheKey,
        R: Clone,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        self.policy.validate()?;
        Ok(AsyncMemo::from_parts(
            Box::new(move |args: A| -> BoxFuture<std::result::Result<R, E>> {
                Box::pin(func(args))
            }),
            self.policy,
            self.name,
        ))
    }
}

impl Default for MemoBuilder {
    fn default() -> Self {
        Self::new()
    }
}
