//! `CompileCache` — Process-wide compile-once cache with sliding expiry
//!
//! Compiling parameter expressions and regex conditions is far more expensive
//! than evaluating them, and the same source text is seen on every call to an
//! instrumented method. The cache keys compiled artifacts by their source text.
//!
//! # Concurrency contract
//!
//! - **Hits** take the index read lock only, then read the slot through a
//!   `OnceLock` and refresh an atomic access stamp. No exclusive lock.
//! - **Misses** insert (or reuse) a per-key slot under the index write lock and
//!   compile inside that slot's init mutex. Concurrent misses on the same key
//!   share the slot, so exactly one compile runs and the value is written once.
//! - **Failed compiles** are not cached: the slot is dropped and the error is
//!   returned to every caller that was waiting on it in turn.
//!
//! # Expiry
//!
//! An entry expires when it has not been *accessed* for `ttl` (reads reset the
//! clock, writes do not extend it beyond the last read). When the cache is at
//! capacity, expired entries are purged first, then the least recently accessed
//! entry is evicted.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

/// Default time-to-idle for cached entries: 60 minutes.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Default maximum number of cached entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

// ═══════════════════════════════════════════════════════════════════════════════
// Clock
// ═══════════════════════════════════════════════════════════════════════════════

/// Source of monotonic time for expiry decisions.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic expiry tests.
///
/// ```
/// use std::time::Duration;
/// use saboteur::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(clock.now() - start, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache
// ═══════════════════════════════════════════════════════════════════════════════

struct Slot<V> {
    value: OnceLock<V>,
    init: Mutex<()>,
    /// Nanoseconds since the cache origin.
    last_access: AtomicU64,
}

impl<V> Slot<V> {
    fn new(stamp: u64) -> Self {
        Self {
            value: OnceLock::new(),
            init: Mutex::new(()),
            last_access: AtomicU64::new(stamp),
        }
    }

    fn touch(&self, stamp: u64) {
        self.last_access.fetch_max(stamp, Ordering::Relaxed);
    }

    fn idle_for(&self, stamp: u64) -> Duration {
        Duration::from_nanos(stamp.saturating_sub(self.last_access.load(Ordering::Relaxed)))
    }
}

/// Bounded, time-to-idle cache of compiled artifacts keyed by source text.
///
/// `V` is typically an `Arc` of the compiled form so hits are cheap clones.
///
/// # Example
///
/// ```
/// use saboteur::CompileCache;
///
/// let cache: CompileCache<usize> = CompileCache::new();
/// let len = cache.get_or_try_compile("arg0 > 10", |src| Ok::<_, ()>(src.len())).unwrap();
/// assert_eq!(len, 9);
/// assert_eq!(cache.len(), 1);
/// ```
pub struct CompileCache<V> {
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    origin: Instant,
    slots: RwLock<HashMap<String, Arc<Slot<V>>>>,
}

impl<V: Clone> CompileCache<V> {
    /// Create a cache with the default TTL, capacity and the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_CACHE_TTL, DEFAULT_CACHE_CAPACITY, Arc::new(SystemClock))
    }

    /// Create a cache with explicit settings.
    ///
    /// A `max_entries` of zero is treated as one.
    #[must_use]
    pub fn with_settings(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        let origin = clock.now();
        Self {
            ttl,
            max_entries: max_entries.max(1),
            clock,
            origin,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Time-to-idle of entries.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    fn stamp(&self) -> u64 {
        u64::try_from(
            self.clock
                .now()
                .saturating_duration_since(self.origin)
                .as_nanos(),
        )
        .unwrap_or(u64::MAX)
    }

    fn is_expired(&self, slot: &Slot<V>, stamp: u64) -> bool {
        slot.value.get().is_some() && slot.idle_for(stamp) > self.ttl
    }

    /// Returns the cached value for `key`, refreshing its expiry, or `None`
    /// if absent or expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let stamp = self.stamp();
        let slots = self.slots.read();
        let slot = slots.get(key)?;
        if self.is_expired(slot, stamp) {
            return None;
        }
        let value = slot.value.get()?.clone();
        slot.touch(stamp);
        Some(value)
    }

    /// Returns the cached value for `key`, compiling it with `compile` on a miss.
    ///
    /// At most one `compile` runs per key at a time; concurrent callers for the
    /// same key wait for it and observe its result.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `compile`. Errors are not cached.
    pub fn get_or_try_compile<E, F>(&self, key: &str, compile: F) -> Result<V, E>
    where
        F: FnOnce(&str) -> Result<V, E>,
    {
        let stamp = self.stamp();

        // Fast path: read lock only.
        {
            let slots = self.slots.read();
            if let Some(slot) = slots.get(key) {
                if !self.is_expired(slot, stamp) {
                    if let Some(value) = slot.value.get() {
                        slot.touch(stamp);
                        return Ok(value.clone());
                    }
                }
            }
        }

        let slot = self.claim_slot(key, stamp);

        let _init = slot.init.lock();
        if let Some(value) = slot.value.get() {
            slot.touch(stamp);
            return Ok(value.clone());
        }

        match compile(key) {
            Ok(value) => {
                // Cannot already be set: every writer holds `init`.
                let _ = slot.value.set(value.clone());
                slot.touch(self.stamp());
                debug!(key, "compiled and cached");
                Ok(value)
            }
            Err(e) => {
                let mut slots = self.slots.write();
                if slots.get(key).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                    slots.remove(key);
                }
                Err(e)
            }
        }
    }

    /// Finds the live slot for `key` or installs a fresh one.
    fn claim_slot(&self, key: &str, stamp: u64) -> Arc<Slot<V>> {
        let mut slots = self.slots.write();
        if let Some(existing) = slots.get(key) {
            if !self.is_expired(existing, stamp) {
                return Arc::clone(existing);
            }
            trace!(key, "replacing expired entry");
            slots.remove(key);
        }

        if slots.len() >= self.max_entries {
            self.evict(&mut slots, stamp);
        }

        let slot = Arc::new(Slot::new(stamp));
        slots.insert(key.to_owned(), Arc::clone(&slot));
        slot
    }

    fn evict(&self, slots: &mut HashMap<String, Arc<Slot<V>>>, stamp: u64) {
        slots.retain(|_, slot| !self.is_expired(slot, stamp));
        if slots.len() < self.max_entries {
            return;
        }
        let oldest = slots
            .iter()
            .filter(|(_, slot)| slot.value.get().is_some())
            .min_by_key(|(_, slot)| slot.last_access.load(Ordering::Relaxed))
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            trace!(key = %key, "evicting least recently accessed entry");
            slots.remove(&key);
        }
    }

    /// Removes every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let stamp = self.stamp();
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, slot| !self.is_expired(slot, stamp));
        before - slots.len()
    }

    /// Returns `true` if a live (compiled, unexpired) entry exists for `key`.
    ///
    /// Does not refresh the entry's expiry.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let stamp = self.stamp();
        self.slots
            .read()
            .get(key)
            .is_some_and(|slot| slot.value.get().is_some() && !self.is_expired(slot, stamp))
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let stamp = self.stamp();
        self.slots
            .read()
            .values()
            .filter(|slot| slot.value.get().is_some() && !self.is_expired(slot, stamp))
            .count()
    }

    /// Returns `true` if there are no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.slots.write().clear();
    }
}

impl<V: Clone> Default for CompileCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for CompileCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileCache")
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .field("slots", &self.slots.read().len())
            .finish_non_exhaustive()
    }
}
