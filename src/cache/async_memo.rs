//! Async Memo Module
//!
//! Memoizing wrapper for async functions running on tokio.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::MutexGuard;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::cache::{CacheEntry, CacheKey, CacheStats, ExpiryPolicy, Freshness, DEFAULT_NAME};

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type AsyncFn<A, R, E> = dyn Fn(A) -> BoxFuture<Result<R, E>> + Send + Sync;

/// Storage for one key; the async lock may be held across the computation.
struct Slot<R> {
    entry: tokio::sync::Mutex<Option<CacheEntry<R>>>,
    filled: AtomicBool,
    /// Set when the slot was invalidated while its lock was held
    discard: AtomicBool,
    users: AtomicUsize,
}

impl<R> Default for Slot<R> {
    fn default() -> Self {
        Self {
            entry: tokio::sync::Mutex::new(None),
            filled: AtomicBool::new(false),
            discard: AtomicBool::new(false),
            users: AtomicUsize::new(0),
        }
    }
}

impl<R> Slot<R> {
    async fn lock(&self) -> MutexGuard<'_, Option<CacheEntry<R>>> {
        let mut entry = self.entry.lock().await;
        self.apply_discard(&mut entry);
        entry
    }

    fn apply_discard(&self, entry: &mut Option<CacheEntry<R>>) -> bool {
        let pending = self.discard.swap(false, Ordering::AcqRel);
        if pending {
            *entry = None;
            self.filled.store(false, Ordering::Release);
        }
        pending
    }

    fn store(&self, entry: &mut Option<CacheEntry<R>>, value: CacheEntry<R>) {
        *entry = Some(value);
        self.filled.store(true, Ordering::Release);
    }

    /// Empties the slot, or leaves that to the task holding its lock.
    fn invalidate(&self) -> bool {
        match self.entry.try_lock() {
            Ok(mut entry) => {
                let pending = self.discard.swap(false, Ordering::AcqRel);
                self.filled.store(false, Ordering::Release);
                entry.take().is_some() && !pending
            }
            Err(_) => {
                self.discard.store(true, Ordering::Release);
                self.filled.load(Ordering::Acquire)
            }
        }
    }
}

// == Slot Lease ==
/// Held by one `invoke` call. Dropping it, including when the `invoke` future
/// is dropped mid-compute, removes the slot if it is empty and unused.
struct SlotLease<'a, A: CacheKey, R, E> {
    memo: &'a AsyncMemo<A, R, E>,
    key: A::Key,
    slot: Arc<Slot<R>>,
}

impl<A: CacheKey, R, E> Drop for SlotLease<'_, A, R, E> {
    fn drop(&mut self) {
        self.memo.release(&self.key, &self.slot);
    }
}

// == Async Memo ==
/// Caches the results of an async function for concurrent tasks.
///
/// Tasks racing on one key await the first computation instead of starting
/// their own. If an `invoke` future is dropped while computing, nothing is
/// stored and the next caller computes again. The wrapped function does not
/// get access to the wrapper, so recursion through the cache is not
/// supported here; use [`SharedMemo`](crate::cache::SharedMemo) for that.
pub struct AsyncMemo<A: CacheKey, R, E> {
    func: Box<AsyncFn<A, R, E>>,
    slots: Mutex<HashMap<A::Key, Arc<Slot<R>>>>,
    stats: Mutex<CacheStats>,
    policy: ExpiryPolicy,
    name: String,
}

impl<A: CacheKey, R: Clone, E> AsyncMemo<A, R, E> {
    // == Constructor ==
    /// Wraps `func` with the default policy.
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        Self::from_parts(
            Box::new(move |args: A| -> BoxFuture<Result<R, E>> { Box::pin(func(args)) }),
            ExpiryPolicy::default(),
            DEFAULT_NAME.to_string(),
        )
    }

    pub(crate) fn from_parts(func: Box<AsyncFn<A, R, E>>, policy: ExpiryPolicy, name: String) -> Self {
        Self {
            func,
            slots: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::new()),
            policy,
            name,
        }
    }

    // == Invoke ==
    /// Returns the result for `args`, awaiting the wrapped function only when
    /// no valid entry exists.
    pub async fn invoke(&self, args: A) -> Result<R, E> {
        self.stats.lock().record_call();

        let Some(key) = args.cache_key() else {
            debug!(memo = %self.name, "arguments have no cache key, calling through");
            self.stats.lock().record_bypass();
            return (self.func)(args).await;
        };

        let lease = self.lease(key);
        let slot = &lease.slot;
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_mut() {
            match self.policy.check(cached, Instant::now()) {
                Freshness::Fresh => {
                    let hits = cached.record_hit();
                    trace!(memo = %self.name, hits, "cache hit");
                    self.stats.lock().record_hit();
                    return Ok(cached.result.clone());
                }
                Freshness::Stale(reason) => {
                    debug!(memo = %self.name, %reason, hits = cached.hits, "cache entry expired");
                    self.stats.lock().record_expiration();
                }
            }
        }

        debug!(memo = %self.name, "cache miss, computing");
        self.stats.lock().record_miss();
        match (self.func)(args).await {
            Ok(result) => {
                if slot.apply_discard(&mut entry) {
                    debug!(memo = %self.name, "invalidated while computing, result not kept");
                } else {
                    slot.store(&mut entry, CacheEntry::new(result.clone()));
                }
                Ok(result)
            }
            Err(err) => {
                slot.apply_discard(&mut entry);
                debug!(memo = %self.name, "wrapped function failed, nothing cached");
                self.stats.lock().record_failure();
                Err(err)
            }
        }
    }
}

impl<A: CacheKey, R, E> AsyncMemo<A, R, E> {
    fn lease(&self, key: A::Key) -> SlotLease<'_, A, R, E> {
        let slot = {
            let mut slots = self.slots.lock();
            let slot = Arc::clone(slots.entry(key.clone()).or_default());
            slot.users.fetch_add(1, Ordering::AcqRel);
            slot
        };
        SlotLease {
            memo: self,
            key,
            slot,
        }
    }

    /// Ends a lease, removing the slot if it is empty and unused.
    fn release(&self, key: &A::Key, slot: &Arc<Slot<R>>) {
        if slot.users.fetch_sub(1, Ordering::AcqRel) > 1 || slot.filled.load(Ordering::Acquire) {
            return;
        }
        let mut slots = self.slots.lock();
        let idle = slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
            && slot.users.load(Ordering::Acquire) == 0
            && !slot.filled.load(Ordering::Acquire);
        if idle {
            slots.remove(key);
        }
    }

    // == Contains ==
    /// Returns true if the next call with `args` would be a cache hit.
    ///
    /// Waits for a computation in progress for `args`.
    pub async fn contains(&self, args: &A) -> bool {
        let Some(key) = args.cache_key() else {
            return false;
        };
        let slot = self.slots.lock().get(&key).cloned();
        let Some(slot) = slot else {
            return false;
        };
        let entry = slot.lock().await;
        entry
            .as_ref()
            .is_some_and(|entry| self.policy.is_valid(entry, Instant::now()))
    }

    // == Invalidate ==
    /// Drops the entry for `args`; the next call recomputes it.
    ///
    /// A computation already running for `args` finishes without storing its
    /// result, and tasks waiting on it still compute one at a time.
    pub fn invalidate(&self, args: &A) -> bool {
        let Some(key) = args.cache_key() else {
            return false;
        };
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get(&key).cloned() else {
            return false;
        };
        let removed = slot.invalidate();
        if slot.users.load(Ordering::Acquire) == 0 {
            slots.remove(&key);
        }
        if removed {
            debug!(memo = %self.name, "cache entry invalidated");
        }
        removed
    }

    // == Clear ==
    /// Drops every entry. Statistics are kept.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        let mut removed = 0usize;
        slots.retain(|_, slot| {
            if slot.invalidate() {
                removed += 1;
            }
            slot.users.load(Ordering::Acquire) > 0
        });
        debug!(memo = %self.name, removed, "cache cleared");
    }

    // == Call Count ==
    /// Returns the number of invocations handled, including hits and bypasses.
    pub fn call_count(&self) -> u64 {
        self.stats.lock().calls
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.lock().clone();
        stats.set_total_entries(self.len());
        stats
    }

    // == Length ==
    /// Returns the number of stored entries, valid or stale.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.filled.load(Ordering::Acquire))
            .count()
    }

    // == Is Empty ==
    /// Returns true if no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // == Policy ==
    /// Returns the expiry limits applied to every entry.
    pub fn policy(&self) -> &ExpiryPolicy {
        &self.policy
    }

    // == Name ==
    /// Returns the label used in log events.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<A: CacheKey, R, E> fmt::Debug for AsyncMemo<A, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMemo")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoBuilder;
    use std::convert::Infallible;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn slow_double(calls: Arc<AtomicUsize>) -> AsyncMemo<u64, u64, Infallible> {
        AsyncMemo::new(move |n: u64| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(n * 2)
            }
        })
    }

    #[tokio::test]
    async fn test_second_call_is_a_hit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = slow_double(calls.clone());

        assert_eq!(memo.invoke(21).await, Ok(42));
        assert_eq!(memo.invoke(21).await, Ok(42));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(memo.contains(&21).await);
        assert_eq!(memo.call_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_tasks_share_one_computation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = Arc::new(slow_double(calls.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let memo = memo.clone();
                tokio::spawn(async move { memo.invoke(5).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(10));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(memo.stats().misses, 1);
        assert_eq!(memo.stats().hits, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_forces_recompute() {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = MemoBuilder::new()
            .ttl(Duration::from_secs(5))
            .build_async({
                let calls = calls.clone();
                move |n: u64| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, Infallible>(n) }
                }
            })
            .unwrap();

        memo.invoke(1).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!memo.contains(&1).await);
        memo.invoke(1).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(memo.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let memo = AsyncMemo::new({
            let attempts = attempts.clone();
            move |n: u32| {
                let first = attempts.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        Err(format!("lookup {n} failed"))
                    } else {
                        Ok(n)
                    }
                }
            }
        });

        assert!(memo.invoke(3).await.is_err());
        assert!(memo.is_empty());
        assert_eq!(memo.invoke(3).await, Ok(3));
        assert_eq!(memo.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_dropped_invoke_stores_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = slow_double(calls.clone());

        let timed_out = tokio::time::timeout(Duration::from_millis(5), memo.invoke(4)).await;
        assert!(timed_out.is_err());
        assert!(memo.is_empty());

        assert_eq!(memo.invoke(4).await, Ok(8));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = slow_double(calls.clone());

        memo.invoke(1).await.unwrap();
        memo.invoke(2).await.unwrap();
        assert!(memo.invalidate(&1));
        assert_eq!(memo.len(), 1);

        memo.clear();
        assert!(memo.is_empty());
        memo.invoke(2).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_calls_leave_no_slots() {
        let memo = AsyncMemo::new(|n: u64| async move { Err::<u64, _>(format!("no value for {n}")) });

        for n in 0..1000 {
            assert!(memo.invoke(n).await.is_err());
        }

        assert!(memo.slots.lock().is_empty());
        assert_eq!(memo.stats().failures, 1000);
    }

    #[tokio::test]
    async fn test_cancelled_invoke_releases_slot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = slow_double(calls.clone());

        for n in 0..10 {
            let timed_out = tokio::time::timeout(Duration::from_millis(1), memo.invoke(n)).await;
            assert!(timed_out.is_err());
        }

        assert!(memo.slots.lock().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_failures_leave_no_slots() {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = Arc::new(AsyncMemo::new({
            let calls = calls.clone();
            move |n: u64| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Err::<u64, _>(format!("no value for {n}"))
                }
            }
        }));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let memo = memo.clone();
                tokio::spawn(async move { memo.invoke(3).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert!(memo.slots.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_during_computation_keeps_single_flight() {
        let calls = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let memo = Arc::new(AsyncMemo::new({
            let (calls, running, peak) = (calls.clone(), running.clone(), peak.clone());
            move |n: u64| {
                let (calls, running, peak) = (calls.clone(), running.clone(), peak.clone());
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(n + 1)
                }
            }
        }));

        let first = tokio::spawn({
            let memo = memo.clone();
            async move { memo.invoke(7).await }
        });
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert!(!memo.invalidate(&7));
        let second = tokio::spawn({
            let memo = memo.clone();
            async move { memo.invoke(7).await }
        });

        assert_eq!(first.await.unwrap(), Ok(8));
        assert_eq!(second.await.unwrap(), Ok(8));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(memo.len(), 1);
    }
}
