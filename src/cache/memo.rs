//! Memo Module
//!
//! Single-threaded memoizing wrapper around a function.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::cache::{
    Bound, CacheEntry, CacheKey, CacheStats, EntrySnapshot, ExpiryPolicy, Freshness, Memoized,
    DEFAULT_NAME,
};

type MemoFn<A, R, E> = dyn Fn(&Memo<A, R, E>, A) -> Result<R, E>;

// == Memo ==
/// Caches the results of a function, keyed by its arguments.
///
/// Entries expire when their TTL elapses or once they have been served
/// `max_lifecycle_hits` times, whichever comes first. Expired entries are
/// recomputed on the next access; nothing is swept in the background.
///
/// A `Memo` is not `Sync`. It is reentrant: the wrapped function may call
/// [`Memo::invoke`] on the same wrapper with other arguments, which is how
/// recursive functions (see [`Memo::recursive`]) share one cache.
pub struct Memo<A: CacheKey, R, E> {
    /// Wrapped function, given access to the wrapper for recursion
    func: Box<MemoFn<A, R, E>>,
    /// Stored results
    entries: RefCell<HashMap<A::Key, CacheEntry<R>>>,
    /// Call outcome counters
    stats: RefCell<CacheStats>,
    /// Expiry limits applied to every entry
    policy: ExpiryPolicy,
    /// Label used in log events
    name: String,
}

impl<A: CacheKey, R: Clone, E> Memo<A, R, E> {
    // == Constructors ==
    /// Wraps `func` with the default policy.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(A) -> Result<R, E> + 'static,
    {
        Self::from_parts(
            Box::new(move |_: &Memo<A, R, E>, args: A| func(args)),
            ExpiryPolicy::default(),
            DEFAULT_NAME.to_string(),
        )
    }

    /// Wraps a function that recurses through its own wrapper.
    ///
    /// # Example
    /// ```
    /// use memo_cache::cache::Memo;
    /// use std::convert::Infallible;
    ///
    /// let fib = Memo::recursive(|memo: &Memo<u64, u64, Infallible>, n: u64| {
    ///     if n > 1 {
    ///         Ok(memo.invoke(n - 1)? + memo.invoke(n - 2)?)
    ///     } else {
    ///         Ok(n)
    ///     }
    /// });
    /// assert_eq!(fib.invoke(10), Ok(55));
    /// ```
    pub fn recursive<F>(func: F) -> Self
    where
        F: Fn(&Memo<A, R, E>, A) -> Result<R, E> + 'static,
    {
        Self::from_parts(Box::new(func), ExpiryPolicy::default(), DEFAULT_NAME.to_string())
    }

    pub(crate) fn from_parts(func: Box<MemoFn<A, R, E>>, policy: ExpiryPolicy, name: String) -> Self {
        Self {
            func,
            entries: RefCell::new(HashMap::new()),
            stats: RefCell::new(CacheStats::new()),
            policy,
            name,
        }
    }

    // == Invoke ==
    /// Returns the result for `args`, calling the wrapped function only when
    /// no valid entry exists.
    ///
    /// Arguments without a key bypass the cache. Errors from the wrapped
    /// function are returned unchanged and never cached.
    pub fn invoke(&self, args: A) -> Result<R, E> {
        self.stats.borrow_mut().record_call();

        let Some(key) = args.cache_key() else {
            debug!(memo = %self.name, "arguments have no cache key, calling through");
            self.stats.borrow_mut().record_bypass();
            return (self.func)(self, args);
        };

        let now = Instant::now();
        if let Some(entry) = self.entries.borrow_mut().get_mut(&key) {
            match self.policy.check(entry, now) {
                Freshness::Fresh => {
                    let hits = entry.record_hit();
                    trace!(memo = %self.name, hits, "cache hit");
                    self.stats.borrow_mut().record_hit();
                    return Ok(entry.result.clone());
                }
                Freshness::Stale(reason) => {
                    debug!(memo = %self.name, %reason, hits = entry.hits, "cache entry expired");
                    self.stats.borrow_mut().record_expiration();
                }
            }
        }

        // No borrow is held here: the function may re-enter invoke.
        debug!(memo = %self.name, "cache miss, computing");
        self.stats.borrow_mut().record_miss();
        match (self.func)(self, args) {
            Ok(result) => {
                self.entries
                    .borrow_mut()
                    .insert(key, CacheEntry::new(result.clone()));
                Ok(result)
            }
            Err(err) => {
                debug!(memo = %self.name, "wrapped function failed, nothing cached");
                self.stats.borrow_mut().record_failure();
                Err(err)
            }
        }
    }

    // == Prime ==
    /// Stores `result` for `args` as if the function had produced it.
    ///
    /// Returns false, storing nothing, when `args` has no key.
    pub fn prime(&self, args: A, result: R) -> bool {
        match args.cache_key() {
            Some(key) => {
                self.entries.borrow_mut().insert(key, CacheEntry::new(result));
                true
            }
            None => false,
        }
    }
}

impl<Recv, Args, R, E> Memo<(Recv, Args), R, E>
where
    Recv: CacheKey + Clone,
    Args: CacheKey,
    R: Clone,
{
    // == Bind ==
    /// Fixes the receiver of a memoized method.
    pub fn bind(&self, receiver: Recv) -> Bound<'_, Self, Recv> {
        Bound::new(self, receiver)
    }
}

impl<A: CacheKey, R, E> Memo<A, R, E> {
    // == Contains ==
    /// Returns true if the next call with `args` would be a cache hit.
    pub fn contains(&self, args: &A) -> bool {
        let Some(key) = args.cache_key() else {
            return false;
        };
        self.entries
            .borrow()
            .get(&key)
            .is_some_and(|entry| self.policy.is_valid(entry, Instant::now()))
    }

    // == Inspect ==
    /// Describes the entry for `args` without counting a hit.
    pub fn inspect(&self, args: &A) -> Option<EntrySnapshot> {
        let key = args.cache_key()?;
        self.entries
            .borrow()
            .get(&key)
            .map(|entry| entry.snapshot(&self.policy, Instant::now()))
    }

    // == Invalidate ==
    /// Drops the entry for `args`; the next call recomputes it.
    pub fn invalidate(&self, args: &A) -> bool {
        let Some(key) = args.cache_key() else {
            return false;
        };
        let removed = self.entries.borrow_mut().remove(&key).is_some();
        if removed {
            debug!(memo = %self.name, "cache entry invalidated");
        }
        removed
    }

    // == Clear ==
    /// Drops every entry. Statistics are kept.
    pub fn clear(&self) {
        let mut entries = self.entries.borrow_mut();
        debug!(memo = %self.name, removed = entries.len(), "cache cleared");
        entries.clear();
    }

    // == Call Count ==
    /// Returns the number of invocations handled, including hits and bypasses.
    pub fn call_count(&self) -> u64 {
        self.stats.borrow().calls
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.borrow().clone();
        stats.set_total_entries(self.len());
        stats
    }

    // == Length ==
    /// Returns the number of stored entries, valid or stale.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    // == Is Empty ==
    /// Returns true if no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
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

impl<A: CacheKey, R: Clone, E> Memoized<A> for Memo<A, R, E> {
    type Output = R;
    type Error = E;

    fn invoke(&self, args: A) -> Result<R, E> {
        Memo::invoke(self, args)
    }
}

impl<A: CacheKey, R, E> fmt::Debug for Memo<A, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
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
    use crate::cache::{ByAddress, MemoBuilder, Unhashable};
    use std::cell::Cell;
    use std::convert::Infallible;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_sum(counter: Rc<Cell<u32>>) -> Memo<(i64, i64), i64, Infallible> {
        Memo::new(move |(a, b): (i64, i64)| {
            counter.set(counter.get() + 1);
            Ok(a + b)
        })
    }

    #[test]
    fn test_second_call_is_a_hit() {
        let calls = Rc::new(Cell::new(0));
        let sum = counting_sum(calls.clone());

        assert_eq!(sum.invoke((5, 5)), Ok(10));
        assert_eq!(sum.invoke((5, 5)), Ok(10));

        assert_eq!(calls.get(), 1);
        assert_eq!(sum.call_count(), 2);
        let stats = sum.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_argument_order_keeps_entries_apart() {
        let calls = Rc::new(Cell::new(0));
        let diff = Memo::new({
            let calls = calls.clone();
            move |(a, b): (i64, i64)| {
                calls.set(calls.get() + 1);
                Ok::<_, Infallible>(a - b)
            }
        });

        assert_eq!(diff.invoke((1, 2)), Ok(-1));
        assert_eq!(diff.invoke((2, 1)), Ok(1));
        assert_eq!(diff.invoke((1, 2)), Ok(-1));

        assert_eq!(calls.get(), 2);
        assert_eq!(diff.len(), 2);
    }

    #[test]
    fn test_hit_budget_forces_recompute() {
        let calls = Rc::new(Cell::new(0));
        let memo = MemoBuilder::new()
            .max_lifecycle_hits(3)
            .build({
                let calls = calls.clone();
                move |n: u32| {
                    calls.set(calls.get() + 1);
                    Ok::<_, Infallible>(n * 2)
                }
            })
            .unwrap();

        // Creation call plus three cached reads
        for _ in 0..4 {
            assert_eq!(memo.invoke(4), Ok(8));
        }
        assert_eq!(calls.get(), 1);

        // Budget spent: recompute, then the fresh entry serves again
        assert_eq!(memo.invoke(4), Ok(8));
        assert_eq!(calls.get(), 2);
        assert_eq!(memo.invoke(4), Ok(8));
        assert_eq!(calls.get(), 2);
        assert_eq!(memo.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_forces_recompute() {
        let calls = Rc::new(Cell::new(0));
        let memo = MemoBuilder::new()
            .ttl(Duration::from_secs(60))
            .build({
                let calls = calls.clone();
                move |n: u32| {
                    calls.set(calls.get() + 1);
                    Ok::<_, Infallible>(n)
                }
            })
            .unwrap();

        memo.invoke(1).unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        memo.invoke(1).unwrap();
        assert_eq!(calls.get(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        memo.invoke(1).unwrap();
        assert_eq!(calls.get(), 2);

        // Entry age was reset by the recompute
        tokio::time::advance(Duration::from_secs(30)).await;
        memo.invoke(1).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let attempts = Rc::new(Cell::new(0));
        let flaky = Memo::new({
            let attempts = attempts.clone();
            move |n: u32| {
                attempts.set(attempts.get() + 1);
                if attempts.get() == 1 {
                    Err(format!("transient failure for {n}"))
                } else {
                    Ok(n + 1)
                }
            }
        });

        assert_eq!(flaky.invoke(1), Err("transient failure for 1".to_string()));
        assert!(flaky.is_empty());

        assert_eq!(flaky.invoke(1), Ok(2));
        assert_eq!(attempts.get(), 2);
        assert_eq!(flaky.stats().failures, 1);
    }

    #[test]
    fn test_failure_keeps_stale_entry_untouched() {
        let fail = Rc::new(Cell::new(false));
        let memo = MemoBuilder::new()
            .max_lifecycle_hits(1)
            .build({
                let fail = fail.clone();
                move |n: u32| if fail.get() { Err(()) } else { Ok(n) }
            })
            .unwrap();

        memo.invoke(3).unwrap();
        memo.invoke(3).unwrap();
        fail.set(true);

        assert_eq!(memo.invoke(3), Err(()));
        assert_eq!(memo.len(), 1);
        assert_eq!(memo.inspect(&3).map(|s| s.valid), Some(false));
    }

    #[test]
    fn test_unhashable_arguments_bypass() {
        let calls = Rc::new(Cell::new(0));
        let total = Memo::new({
            let calls = calls.clone();
            move |items: Unhashable<Vec<i32>>| {
                calls.set(calls.get() + 1);
                Ok::<_, Infallible>(items.iter().sum::<i32>())
            }
        });

        assert_eq!(total.invoke(Unhashable(vec![1, 2, 3])), Ok(6));
        assert_eq!(total.invoke(Unhashable(vec![1, 2, 3])), Ok(6));

        assert_eq!(calls.get(), 2);
        assert!(total.is_empty());
        assert_eq!(total.stats().bypasses, 2);
        assert_eq!(total.call_count(), 2);
    }

    #[test]
    fn test_nan_argument_bypasses() {
        let calls = Rc::new(Cell::new(0));
        let half = Memo::new({
            let calls = calls.clone();
            move |x: f64| {
                calls.set(calls.get() + 1);
                Ok::<_, Infallible>(x / 2.0)
            }
        });

        assert!(half.invoke(f64::NAN).unwrap().is_nan());
        assert!(half.invoke(f64::NAN).unwrap().is_nan());
        assert_eq!(half.invoke(4.0), Ok(2.0));
        assert_eq!(half.invoke(4.0), Ok(2.0));

        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_recursive_fibonacci() {
        let calls = Rc::new(Cell::new(0));
        let fib = Memo::recursive({
            let calls = calls.clone();
            move |memo: &Memo<u64, u64, Infallible>, n: u64| {
                calls.set(calls.get() + 1);
                if n > 1 {
                    Ok(memo.invoke(n - 1)? + memo.invoke(n - 2)?)
                } else {
                    Ok(n)
                }
            }
        });

        assert_eq!(fib.invoke(10), Ok(55));
        assert_eq!(fib.len(), 11);
        assert_eq!(calls.get(), 11);
        assert!((0..=10).all(|n| fib.contains(&n)));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let calls = Rc::new(Cell::new(0));
        let sum = counting_sum(calls.clone());

        sum.invoke((1, 1)).unwrap();
        sum.invoke((2, 2)).unwrap();
        assert!(sum.invalidate(&(1, 1)));
        assert!(!sum.invalidate(&(1, 1)));

        sum.invoke((1, 1)).unwrap();
        assert_eq!(calls.get(), 3);

        sum.clear();
        assert!(sum.is_empty());
        assert_eq!(sum.stats().misses, 3);
    }

    #[test]
    fn test_prime_serves_value() {
        let calls = Rc::new(Cell::new(0));
        let sum = counting_sum(calls.clone());

        assert!(sum.prime((2, 2), 5));
        assert_eq!(sum.invoke((2, 2)), Ok(5));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_inspect_does_not_spend_budget() {
        let sum = counting_sum(Rc::new(Cell::new(0)));
        sum.invoke((1, 2)).unwrap();
        sum.invoke((1, 2)).unwrap();

        let snapshot = sum.inspect(&(1, 2)).unwrap();
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.hits_remaining, 9);
        assert!(snapshot.valid);
        assert_eq!(sum.inspect(&(1, 2)).unwrap().hits, 1);
        assert!(sum.inspect(&(9, 9)).is_none());
    }

    #[test]
    fn test_bound_receivers_share_cache_with_separate_keys() {
        struct Account {
            rate: i64,
        }

        let calls = Rc::new(Cell::new(0));
        let interest = Memo::new({
            let calls = calls.clone();
            move |(account, amount): (ByAddress<Account>, i64)| {
                calls.set(calls.get() + 1);
                Ok::<_, Infallible>(amount * account.rate / 100)
            }
        });

        let first = Arc::new(Account { rate: 5 });
        let second = Arc::new(Account { rate: 5 });
        let bound_first = interest.bind(ByAddress(first.clone()));
        let bound_second = interest.bind(ByAddress(second));

        assert_eq!(bound_first.invoke(1000), Ok(50));
        assert_eq!(bound_first.invoke(1000), Ok(50));
        assert_eq!(bound_second.invoke(1000), Ok(50));
        assert_eq!(interest.invoke((ByAddress(first), 1000)), Ok(50));

        assert_eq!(calls.get(), 2);
        assert_eq!(interest.len(), 2);
    }

    #[test]
    fn test_debug_output() {
        let sum = counting_sum(Rc::new(Cell::new(0)));
        let output = format!("{:?}", sum);
        assert!(output.contains("Memo"));
        assert!(output.contains("entries: 0"));
    }
}
