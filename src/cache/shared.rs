//! Shared Memo Module
//!
//! Thread-safe memoizing wrapper with per-key single flight.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::cache::{
    Bound, CacheEntry, CacheKey, CacheStats, EntrySnapshot, ExpiryPolicy, Freshness, Memoized,
    DEFAULT_NAME,
};

type SharedFn<A, R, E> = dyn Fn(&SharedMemo<A, R, E>, A) -> Result<R, E> + Send + Sync;

// == Slot ==
/// Storage for one key. Its lock is held for the whole lookup-compute-store
/// sequence, so callers racing on the same key wait for the first one.
struct Slot<R> {
    entry: Mutex<Option<CacheEntry<R>>>,
    /// Mirrors `entry.is_some()` so counting never waits on a computation
    filled: AtomicBool,
    /// Set when the slot was invalidated while its lock was held
    discard: AtomicBool,
    /// Callers currently holding a lease on this slot
    users: AtomicUsize,
}

impl<R> Default for Slot<R> {
    fn default() -> Self {
        Self {
            entry: Mutex::new(None),
            filled: AtomicBool::new(false),
            discard: AtomicBool::new(false),
            users: AtomicUsize::new(0),
        }
    }
}

impl<R> Slot<R> {
    /// Locks the entry, applying any invalidation that arrived meanwhile.
    fn lock(&self) -> MutexGuard<'_, Option<CacheEntry<R>>> {
        let mut entry = self.entry.lock();
        self.apply_discard(&mut entry);
        entry
    }

    /// Empties the entry if an invalidation is pending. Returns true if one was.
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

    /// Empties the slot now, or marks it for the caller holding its lock.
    /// Returns whether an entry was stored.
    fn invalidate(&self) -> bool {
        match self.entry.try_lock() {
            Some(mut entry) => {
                let pending = self.discard.swap(false, Ordering::AcqRel);
                self.filled.store(false, Ordering::Release);
                entry.take().is_some() && !pending
            }
            None => {
                self.discard.store(true, Ordering::Release);
                self.filled.load(Ordering::Acquire)
            }
        }
    }
}

// == Slot Lease ==
/// One caller's hold on a slot. Dropping it removes the slot from the map
/// when the slot is empty and no other caller holds it.
struct SlotLease<'a, A: CacheKey, R, E> {
    memo: &'a SharedMemo<A, R, E>,
    key: A::Key,
    slot: Arc<Slot<R>>,
}

impl<A: CacheKey, R, E> Drop for SlotLease<'_, A, R, E> {
    fn drop(&mut self) {
        self.memo.release(&self.key, &self.slot);
    }
}

// == Shared Memo ==
/// Caches the results of a function for concurrent callers.
///
/// Same expiry rules as [`Memo`](crate::cache::Memo). Callers with different
/// keys run in parallel; callers with the same key are serialized so the
/// function runs once and every caller observes that result. The wrapped
/// function may recurse into other keys, but must not recurse into the key it
/// is computing or call [`SharedMemo::contains`] / [`SharedMemo::inspect`] /
/// [`SharedMemo::prime`] on it: that would wait on itself.
pub struct SharedMemo<A: CacheKey, R, E> {
    func: Box<SharedFn<A, R, E>>,
    slots: Mutex<HashMap<A::Key, Arc<Slot<R>>>>,
    stats: Mutex<CacheStats>,
    policy: ExpiryPolicy,
    name: String,
}

impl<A: CacheKey, R: Clone, E> SharedMemo<A, R, E> {
    // == Constructors ==
    /// Wraps `func` with the default policy.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(A) -> Result<R, E> + Send + Sync + 'static,
    {
        Self::from_parts(
            Box::new(move |_: &SharedMemo<A, R, E>, args: A| func(args)),
            ExpiryPolicy::default(),
            DEFAULT_NAME.to_string(),
        )
    }

    /// Wraps a function that recurses through its own wrapper.
    pub fn recursive<F>(func: F) -> Self
    where
        F: Fn(&SharedMemo<A, R, E>, A) -> Result<R, E> + Send + Sync + 'static,
    {
        Self::from_parts(Box::new(func), ExpiryPolicy::default(), DEFAULT_NAME.to_string())
    }

    pub(crate) fn from_parts(
        func: Box<SharedFn<A, R, E>>,
        policy: ExpiryPolicy,
        name: String,
    ) -> Self {
        Self {
            func,
            slots: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::new()),
            policy,
            name,
        }
    }

    // == Invoke ==
    /// Returns the result for `args`, calling the wrapped function only when
    /// no valid entry exists.
    pub fn invoke(&self, args: A) -> Result<R, E> {
        self.stats.lock().record_call();

        let Some(key) = args.cache_key() else {
            debug!(memo = %self.name, "arguments have no cache key, calling through");
            self.stats.lock().record_bypass();
            return (self.func)(self, args);
        };

        let lease = self.lease(key);
        let slot = &lease.slot;
        let mut entry = slot.lock();

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
        match (self.func)(self, args) {
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

    // == Prime ==
    /// Stores `result` for `args` as if the function had produced it.
    pub fn prime(&self, args: A, result: R) -> bool {
        let Some(key) = args.cache_key() else {
            return false;
        };
        let lease = self.lease(key);
        let mut entry = lease.slot.lock();
        lease.slot.store(&mut entry, CacheEntry::new(result));
        true
    }
}

impl<Recv, Args, R, E> SharedMemo<(Recv, Args), R, E>
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

impl<A: CacheKey, R, E> SharedMemo<A, R, E> {
    /// Finds or creates the slot for `key`. The map lock is released on return.
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
        // Leases are only taken under the map lock, so this check is stable
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

    fn existing_slot(&self, args: &A) -> Option<Arc<Slot<R>>> {
        let key = args.cache_key()?;
        self.slots.lock().get(&key).cloned()
    }

    // == Contains ==
    /// Returns true if the next call with `args` would be a cache hit.
    pub fn contains(&self, args: &A) -> bool {
        let Some(slot) = self.existing_slot(args) else {
            return false;
        };
        let entry = slot.lock();
        entry
            .as_ref()
            .is_some_and(|entry| self.policy.is_valid(entry, Instant::now()))
    }

    // == Inspect ==
    /// Describes the entry for `args` without counting a hit.
    pub fn inspect(&self, args: &A) -> Option<EntrySnapshot> {
        let slot = self.existing_slot(args)?;
        let entry = slot.lock();
        entry
            .as_ref()
            .map(|entry| entry.snapshot(&self.policy, Instant::now()))
    }

    // == Invalidate ==
    /// Drops the entry for `args`; the next call recomputes it.
    ///
    /// A computation already running for `args` finishes, but its result is
    /// not kept. Callers waiting on it then compute one at a time.
    pub fn invalidate(&self, args: &A) -> bool {
        let Some(key) = args.cache_key() else {
            return false;
        };
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get(&key).cloned() else {
            return false;
        };
        let removed = slot.invalidate();
        // Busy slots stay mapped so later callers queue behind the running one
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

impl<A: CacheKey, R: Clone, E> Memoized<A> for SharedMemo<A, R, E> {
    type Output = R;
    type Error = E;

    fn invoke(&self, args: A) -> Result<R, E> {
        SharedMemo::invoke(self, args)
    }
}

impl<A: CacheKey, R, E> fmt::Debug for SharedMemo<A, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemo")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}
