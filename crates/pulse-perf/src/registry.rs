//! Name-to-aggregator tables with stable fast-path indices.

use crate::aggregate::{Counter, Histogram, Timer};
use crate::error::PerfError;
use crate::event::{MetricKey, MetricName};
use crate::prime::next_prime;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// One metric kind's table: a name index over an append-only slot vector.
///
/// The slot position is the stable fast-path handle; slots are never removed
/// before the registry itself is dropped, so a handle stays valid until
/// subsystem shutdown.
pub(crate) struct MetricMap<A> {
    index: HashMap<MetricName, usize>,
    slots: Vec<Arc<A>>,
}

impl<A> MetricMap<A> {
    fn with_expected(expected: usize) -> Self {
        // Capacity hints are prime-sized.
        let capacity = next_prime(expected.max(2));
        Self {
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn lookup(&self, name: MetricName) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(crate) fn get(&self, idx: usize) -> Option<&Arc<A>> {
        self.slots.get(idx)
    }

    pub(crate) fn by_name(&self, name: MetricName) -> Option<&Arc<A>> {
        self.lookup(name).and_then(|idx| self.get(idx))
    }

    /// Append a new aggregator. Fails with `Exists` when the name is taken.
    fn insert(&mut self, name: MetricName, aggregator: A) -> Result<usize, PerfError> {
        if self.index.contains_key(name) {
            return Err(PerfError::Exists(name));
        }
        let idx = self.slots.len();
        self.slots.push(Arc::new(aggregator));
        self.index.insert(name, idx);
        Ok(idx)
    }

    fn get_or_insert_with(&mut self, name: MetricName, make: impl FnOnce() -> A) -> Arc<A> {
        if let Some(existing) = self.by_name(name) {
            return Arc::clone(existing);
        }
        let idx = self.slots.len();
        self.slots.push(Arc::new(make()));
        self.index.insert(name, idx);
        Arc::clone(&self.slots[idx])
    }

    /// Aggregators in creation order.
    pub(crate) fn slots(&self) -> &[Arc<A>] {
        &self.slots
    }
}

/// The three metric tables plus the fast-path epoch stamp.
pub(crate) struct Registry {
    counters: RwLock<MetricMap<Counter>>,
    timers: RwLock<MetricMap<Timer>>,
    histograms: RwLock<MetricMap<Histogram>>,
}

impl Registry {
    pub(crate) fn with_expected(counters: usize, timers: usize, histograms: usize) -> Self {
        Self {
            counters: RwLock::new(MetricMap::with_expected(counters)),
            timers: RwLock::new(MetricMap::with_expected(timers)),
            histograms: RwLock::new(MetricMap::with_expected(histograms)),
        }
    }

    // ---------------------------------------------------------------------
    // Eager creation (caller thread, synchronous)
    // ---------------------------------------------------------------------

    /// Eagerly allocate a timer. Creating a timer that already exists is a
    /// no-op.
    pub(crate) fn create_timer(&self, name: MetricName) {
        write_lock(&self.timers).get_or_insert_with(name, || Timer::new(name));
    }

    /// Eagerly allocate a histogram with the given thresholds.
    pub(crate) fn create_histogram(
        &self,
        name: MetricName,
        thresholds: &[u64],
    ) -> Result<(), PerfError> {
        let histogram = Histogram::new(name, thresholds)?;
        write_lock(&self.histograms).insert(name, histogram)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Dispatch resolution (worker thread)
    // ---------------------------------------------------------------------

    /// Resolve a counter for dispatch, creating it lazily for name keys.
    pub(crate) fn counter_for_dispatch(&self, key: MetricKey) -> Option<Arc<Counter>> {
        match key {
            MetricKey::Index(idx) => read_lock(&self.counters).get(idx).cloned(),
            MetricKey::Name(name) => {
                if let Some(counter) = read_lock(&self.counters).by_name(name) {
                    return Some(Arc::clone(counter));
                }
                tracing::debug!(name, "creating counter");
                Some(write_lock(&self.counters).get_or_insert_with(name, || Counter::new(name)))
            }
        }
    }

    /// Resolve a timer for dispatch, creating it lazily for name keys.
    pub(crate) fn timer_for_dispatch(&self, key: MetricKey) -> Option<Arc<Timer>> {
        match key {
            MetricKey::Index(idx) => read_lock(&self.timers).get(idx).cloned(),
            MetricKey::Name(name) => {
                if let Some(timer) = read_lock(&self.timers).by_name(name) {
                    return Some(Arc::clone(timer));
                }
                tracing::debug!(name, "creating timer");
                Some(write_lock(&self.timers).get_or_insert_with(name, || Timer::new(name)))
            }
        }
    }

    /// Resolve a histogram for dispatch. Histograms are never created
    /// lazily, since the thresholds do not travel on the wire.
    pub(crate) fn histogram_for_dispatch(&self, key: MetricKey) -> Option<Arc<Histogram>> {
        let histograms = read_lock(&self.histograms);
        match key {
            MetricKey::Index(idx) => histograms.get(idx).cloned(),
            MetricKey::Name(name) => histograms.by_name(name).map(Arc::clone),
        }
    }

    // ---------------------------------------------------------------------
    // Lookup and traversal (any thread)
    // ---------------------------------------------------------------------

    pub(crate) fn counter_lookup(&self, name: MetricName) -> Option<usize> {
        read_lock(&self.counters).lookup(name)
    }

    pub(crate) fn timer_lookup(&self, name: MetricName) -> Option<usize> {
        read_lock(&self.timers).lookup(name)
    }

    pub(crate) fn histogram_lookup(&self, name: MetricName) -> Option<usize> {
        read_lock(&self.histograms).lookup(name)
    }

    pub(crate) fn counters(&self) -> RwLockReadGuard<'_, MetricMap<Counter>> {
        read_lock(&self.counters)
    }

    pub(crate) fn timers(&self) -> RwLockReadGuard<'_, MetricMap<Timer>> {
        read_lock(&self.timers)
    }

    pub(crate) fn histograms(&self) -> RwLockReadGuard<'_, MetricMap<Histogram>> {
        read_lock(&self.histograms)
    }
}

/// Monotonic stamp bumped on every global `init`, so thread-local fast-path
/// caches can tell when their memoised indices died with a previous
/// subsystem instance.
pub(crate) static INIT_GENERATION: AtomicU64 = AtomicU64::new(0);

pub(crate) fn bump_generation() -> u64 {
    INIT_GENERATION.fetch_add(1, Ordering::Relaxed) + 1
}

pub(crate) fn current_generation() -> u64 {
    INIT_GENERATION.load(Ordering::Relaxed)
}
