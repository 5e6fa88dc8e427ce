//! pulse-perf - Low-Overhead In-Process Performance Instrumentation
//!
//! Named counters, stopwatch timers and bucketed histograms with a wait-free
//! producer path. Producer threads write fixed-size event records into a
//! huge-page-backed pool and enqueue slot indices on a lock-free ring; a
//! single background worker drains batches, resolves names to aggregators
//! and updates them with atomics. [`report`] renders a textual snapshot at
//! any time.
//!
//! Measurements are best-effort: when the pool or queue is saturated the
//! event is dropped rather than ever blocking the instrumented code.
//!
//! # Example
//!
//! ```
//! use std::io;
//!
//! pulse_perf::init(4, 2, 2).unwrap();
//!
//! pulse_perf::counter_create("requests").unwrap();
//! pulse_perf::counter_inc("requests");
//! pulse_perf::counter_add("requests", 3);
//!
//! pulse_perf::histogram_create("latency_us", &[50, 500, 5_000]).unwrap();
//! pulse_perf::histogram_record("latency_us", 120).unwrap();
//!
//! pulse_perf::flush().unwrap();
//! pulse_perf::report(&mut io::sink()).unwrap();
//! pulse_perf::shutdown(None).unwrap();
//! ```
//!
//! The module-level functions keep one subsystem instance in a process-wide
//! cell; [`Perf`] is the same API as an explicit handle.

mod aggregate;
mod core;
mod error;
mod event;
mod prime;
mod registry;
mod worker;

pub use crate::core::Perf;
pub use error::PerfError;
pub use event::MetricName;

use registry::{bump_generation, current_generation};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{PoisonError, RwLock};

static GLOBAL: RwLock<Option<Perf>> = RwLock::new(None);

fn with_global<R>(f: impl FnOnce(&Perf) -> R) -> Result<R, PerfError> {
    let guard = GLOBAL.read().unwrap_or_else(PoisonError::into_inner);
    match guard.as_ref() {
        Some(perf) => Ok(f(perf)),
        None => Err(PerfError::NotInitialised),
    }
}

/// Initialise the process-wide subsystem. Fails with
/// [`PerfError::AlreadyInitialised`] while an instance is running; after
/// [`shutdown`] it may be called again.
pub fn init(
    expected_counters: usize,
    expected_timers: usize,
    expected_histograms: usize,
) -> Result<(), PerfError> {
    let mut guard = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    if guard.is_some() {
        return Err(PerfError::AlreadyInitialised);
    }
    let perf = Perf::init(expected_counters, expected_timers, expected_histograms)?;
    bump_generation();
    *guard = Some(perf);
    Ok(())
}

/// Stop the worker, optionally render a final report, release everything.
/// A call on an uninitialised subsystem is a no-op.
pub fn shutdown(stream: Option<&mut dyn Write>) -> Result<(), PerfError> {
    let taken = GLOBAL
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match taken {
        Some(perf) => perf.shutdown(stream),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------
// Producer API - name-based
// ---------------------------------------------------------------------

/// Announce a counter (created on the worker once the queue drains).
pub fn counter_create(name: MetricName) -> Result<(), PerfError> {
    with_global(|perf| perf.counter_create(name))?
}

/// Add 1 to a counter. Best-effort: drops silently when uninitialised or
/// saturated.
pub fn counter_inc(name: MetricName) {
    let _ = with_global(|perf| perf.counter_inc(name));
}

/// Add `delta` to a counter. Best-effort.
pub fn counter_add(name: MetricName, delta: u64) {
    let _ = with_global(|perf| perf.counter_add(name, delta));
}

/// Eagerly allocate a timer. Idempotent.
pub fn timer_create(name: MetricName) -> Result<(), PerfError> {
    with_global(|perf| perf.timer_create(name))?
}

pub fn timer_start(name: MetricName) -> Result<(), PerfError> {
    with_global(|perf| perf.timer_start(name))?
}

pub fn timer_stop(name: MetricName) -> Result<(), PerfError> {
    with_global(|perf| perf.timer_stop(name))?
}

/// Eagerly allocate a histogram. Fails with [`PerfError::Exists`] on a
/// duplicate name.
pub fn histogram_create(name: MetricName, thresholds: &[u64]) -> Result<(), PerfError> {
    with_global(|perf| perf.histogram_create(name, thresholds))?
}

/// Record a sample. Samples for a histogram that was never created are
/// dropped at dispatch.
pub fn histogram_record(name: MetricName, sample: u64) -> Result<(), PerfError> {
    with_global(|perf| perf.histogram_record(name, sample))?
}

// ---------------------------------------------------------------------
// Fast-path index API
// ---------------------------------------------------------------------
//
// Lookups memoise per thread, keyed by the name literal's address. This is
// sound because `MetricName` is `'static`: address equality implies value
// equality for the same literal. Entries are stamped with the init
// generation so indices from a shut-down instance are never replayed.
// ---------------------------------------------------------------------

#[derive(Default)]
struct LookupCache {
    generation: u64,
    counters: HashMap<usize, usize>,
    timers: HashMap<usize, usize>,
    histograms: HashMap<usize, usize>,
}

impl LookupCache {
    fn refresh(&mut self, generation: u64) {
        if self.generation != generation {
            self.counters.clear();
            self.timers.clear();
            self.histograms.clear();
            self.generation = generation;
        }
    }

    fn table(&mut self, kind: MetricKind) -> &mut HashMap<usize, usize> {
        match kind {
            MetricKind::Counter => &mut self.counters,
            MetricKind::Timer => &mut self.timers,
            MetricKind::Histogram => &mut self.histograms,
        }
    }
}

#[derive(Clone, Copy)]
enum MetricKind {
    Counter,
    Timer,
    Histogram,
}

thread_local! {
    static LOOKUP_CACHE: RefCell<LookupCache> = RefCell::new(LookupCache::default());
}

fn cached_lookup(name: MetricName, kind: MetricKind) -> Option<usize> {
    LOOKUP_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        cache.refresh(current_generation());

        let key = name.as_ptr() as usize;
        if let Some(&idx) = cache.table(kind).get(&key) {
            return Some(idx);
        }
        let idx = with_global(|perf| match kind {
            MetricKind::Counter => perf.counter_lookup(name),
            MetricKind::Timer => perf.timer_lookup(name),
            MetricKind::Histogram => perf.histogram_lookup(name),
        })
        .ok()
        .flatten()?;
        cache.table(kind).insert(key, idx);
        Some(idx)
    })
}

/// Resolve a counter name to its stable index. `None` until the worker has
/// created the aggregator (see [`counter_create`]).
pub fn counter_lookup(name: MetricName) -> Option<usize> {
    cached_lookup(name, MetricKind::Counter)
}

pub fn timer_lookup(name: MetricName) -> Option<usize> {
    cached_lookup(name, MetricKind::Timer)
}

/// Resolve a histogram name. Only histograms that were explicitly created
/// have indices.
pub fn histogram_lookup(name: MetricName) -> Option<usize> {
    cached_lookup(name, MetricKind::Histogram)
}

/// Add 1 to a counter by index, skipping name hashing. Best-effort.
pub fn counter_inc_by_idx(idx: usize) {
    let _ = with_global(|perf| perf.counter_inc_by_idx(idx));
}

pub fn counter_add_by_idx(idx: usize, delta: u64) {
    let _ = with_global(|perf| perf.counter_add_by_idx(idx, delta));
}

pub fn timer_start_by_idx(idx: usize) {
    let _ = with_global(|perf| perf.timer_start_by_idx(idx));
}

pub fn timer_stop_by_idx(idx: usize) {
    let _ = with_global(|perf| perf.timer_stop_by_idx(idx));
}

pub fn histogram_record_by_idx(idx: usize, sample: u64) {
    let _ = with_global(|perf| perf.histogram_record_by_idx(idx, sample));
}

// ---------------------------------------------------------------------
// Reporting and synchronisation
// ---------------------------------------------------------------------

/// Write the three-section text report to `out`.
pub fn report(out: &mut dyn Write) -> Result<(), PerfError> {
    with_global(|perf| perf.report(out))?
}

/// Wait until every event enqueued before this call has been dispatched.
pub fn flush() -> Result<(), PerfError> {
    with_global(Perf::flush)?
}
