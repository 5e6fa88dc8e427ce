//! The perf subsystem handle: lifecycle, producer API, reporting.

use crate::error::PerfError;
use crate::event::{Event, MetricKey, MetricName};
use crate::registry::Registry;
use crate::worker;
use pulse_ring::{Backoff, Batcher, Ring, ZcPool};
use std::io::Write;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Items drained per worker wake.
const WORKER_BATCH: usize = 64;
/// Event slots in the pool (one stays resident in the free ring).
const POOL_EVENTS: usize = 256;
/// Floor for the event ring so tiny expected-count hints stay usable.
const MIN_RING_CAPACITY: usize = 8;

const FLUSH_INITIAL_DELAY: Duration = Duration::from_micros(50);
const FLUSH_MAX_DELAY: Duration = Duration::from_millis(2);
/// Consecutive idle observations required before `flush` reports success.
const FLUSH_IDLE_THRESHOLD: u32 = 3;
/// Poll budget before `flush` gives up.
const FLUSH_MAX_POLLS: u32 = 512;

/// Shared state between producers and the worker thread.
///
/// Field order is teardown order: the batcher (and the ring it owns) go
/// first, then the pool, then the registry.
pub(crate) struct PerfInner {
    pub(crate) batcher: Batcher<u32>,
    pub(crate) pool: ZcPool,
    pub(crate) registry: Registry,
    epoch: Instant,
}

impl PerfInner {
    /// Monotonic nanoseconds since this subsystem instance was initialised.
    #[inline]
    pub(crate) fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Producer hot path: one pool acquire, one slot store, one ring
    /// enqueue, one wake signal. Never blocks; failure means the event is
    /// dropped.
    pub(crate) fn post(&self, event: Event) -> Result<(), PerfError> {
        let slot = self
            .pool
            .acquire()
            .ok_or(PerfError::TemporarilyUnavailable)?;

        // Safety: the slot is exclusively ours until released and sized for
        // one Event (checked at init).
        unsafe { slot.as_ptr().as_ptr().cast::<Event>().write(event) };

        match self.batcher.enqueue(slot.index()) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.pool.release(slot.as_ptr().as_ptr());
                Err(err.into())
            }
        }
    }
}

/// Handle to a running perf subsystem.
///
/// Producer operations are safe from any thread. Dropping the handle stops
/// the worker; [`shutdown`](Perf::shutdown) additionally renders a final
/// report. Most callers go through the module-level functions, which keep
/// one `Perf` in a process-wide cell.
pub struct Perf {
    inner: Arc<PerfInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Perf {
    /// Start a subsystem instance sized for the expected metric counts.
    pub fn init(
        expected_counters: usize,
        expected_timers: usize,
        expected_histograms: usize,
    ) -> Result<Self, PerfError> {
        let hint = expected_counters + expected_timers + expected_histograms;
        let capacity = hint
            .saturating_mul(2)
            .next_power_of_two()
            .max(MIN_RING_CAPACITY);

        let ring = Arc::new(Ring::new(capacity)?);
        let pool = ZcPool::new(POOL_EVENTS, mem::size_of::<Event>())?;
        let batcher = Batcher::new(ring, WORKER_BATCH)?;

        let inner = Arc::new(PerfInner {
            batcher,
            pool,
            registry: Registry::with_expected(
                expected_counters,
                expected_timers,
                expected_histograms,
            ),
            epoch: Instant::now(),
        });

        let worker = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name("pulse-perf".into())
                .spawn(move || worker::run(&inner))
                .map_err(PerfError::Io)?
        };

        tracing::debug!(capacity, pool_slots = POOL_EVENTS, "perf subsystem initialised");
        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    // ---------------------------------------------------------------------
    // Producer API - name-based (slow path)
    // ---------------------------------------------------------------------

    /// Announce a counter. Creation happens on the worker, so it becomes
    /// observable (and look-up-able) only after the queue drains.
    pub fn counter_create(&self, name: MetricName) -> Result<(), PerfError> {
        self.inner.post(Event::CounterAdd {
            key: MetricKey::Name(name),
            delta: 0,
        })
    }

    pub fn counter_add(&self, name: MetricName, delta: u64) -> Result<(), PerfError> {
        self.inner.post(Event::CounterAdd {
            key: MetricKey::Name(name),
            delta,
        })
    }

    pub fn counter_inc(&self, name: MetricName) -> Result<(), PerfError> {
        self.counter_add(name, 1)
    }

    /// Eagerly allocate a timer. Idempotent.
    pub fn timer_create(&self, name: MetricName) -> Result<(), PerfError> {
        self.inner.registry.create_timer(name);
        Ok(())
    }

    pub fn timer_start(&self, name: MetricName) -> Result<(), PerfError> {
        self.inner.post(Event::TimerStart {
            key: MetricKey::Name(name),
        })
    }

    pub fn timer_stop(&self, name: MetricName) -> Result<(), PerfError> {
        self.inner.post(Event::TimerStop {
            key: MetricKey::Name(name),
        })
    }

    /// Eagerly allocate a histogram. Fails with [`PerfError::Exists`] on a
    /// duplicate name.
    pub fn histogram_create(&self, name: MetricName, thresholds: &[u64]) -> Result<(), PerfError> {
        self.inner.registry.create_histogram(name, thresholds)
    }

    /// Record a sample. Samples for a histogram that was never created are
    /// dropped at dispatch.
    pub fn histogram_record(&self, name: MetricName, sample: u64) -> Result<(), PerfError> {
        self.inner.post(Event::HistogramRecord {
            key: MetricKey::Name(name),
            sample,
        })
    }

    // ---------------------------------------------------------------------
    // Fast-path index API
    // ---------------------------------------------------------------------

    /// Resolve a counter name to its stable index. `None` until the worker
    /// has created the aggregator.
    pub fn counter_lookup(&self, name: MetricName) -> Option<usize> {
        self.inner.registry.counter_lookup(name)
    }

    pub fn timer_lookup(&self, name: MetricName) -> Option<usize> {
        self.inner.registry.timer_lookup(name)
    }

    pub fn histogram_lookup(&self, name: MetricName) -> Option<usize> {
        self.inner.registry.histogram_lookup(name)
    }

    pub fn counter_add_by_idx(&self, idx: usize, delta: u64) -> Result<(), PerfError> {
        self.inner.post(Event::CounterAdd {
            key: MetricKey::Index(idx),
            delta,
        })
    }

    pub fn counter_inc_by_idx(&self, idx: usize) -> Result<(), PerfError> {
        self.counter_add_by_idx(idx, 1)
    }

    pub fn timer_start_by_idx(&self, idx: usize) -> Result<(), PerfError> {
        self.inner.post(Event::TimerStart {
            key: MetricKey::Index(idx),
        })
    }

    pub fn timer_stop_by_idx(&self, idx: usize) -> Result<(), PerfError> {
        self.inner.post(Event::TimerStop {
            key: MetricKey::Index(idx),
        })
    }

    pub fn histogram_record_by_idx(&self, idx: usize, sample: u64) -> Result<(), PerfError> {
        self.inner.post(Event::HistogramRecord {
            key: MetricKey::Index(idx),
            sample,
        })
    }

    // ---------------------------------------------------------------------
    // Reporting and synchronisation
    // ---------------------------------------------------------------------

    /// Write the three-section text report. Safe to call at any time; values
    /// may trail events still sitting in the queue.
    pub fn report(&self, out: &mut dyn Write) -> Result<(), PerfError> {
        writeln!(out, "=== Performance Report ===")?;

        writeln!(out, "-- Counters --")?;
        for counter in self.inner.registry.counters().slots() {
            writeln!(out, "{}: {}", counter.name(), counter.value())?;
        }

        writeln!(out, "-- Timers (ns) --")?;
        for timer in self.inner.registry.timers().slots() {
            writeln!(out, "{}: {}", timer.name(), timer.total_ns())?;
        }

        writeln!(out, "-- Histograms --")?;
        for histogram in self.inner.registry.histograms().slots() {
            writeln!(out, "{}:", histogram.name())?;
            for (bound, count) in histogram.buckets() {
                writeln!(out, "  <= {}: {}", bound, count)?;
            }
        }
        Ok(())
    }

    /// Wait until every event enqueued before this call has been dispatched
    /// and its slot released. Polls with a 50 us delay doubling to 2 ms and
    /// requires several consecutive idle observations; fails once the poll
    /// budget runs out (e.g. under sustained concurrent load).
    pub fn flush(&self) -> Result<(), PerfError> {
        let mut delay = FLUSH_INITIAL_DELAY;
        let mut idle = 0u32;

        for _ in 0..FLUSH_MAX_POLLS {
            let drained = self.inner.batcher.is_empty()
                && self.inner.pool.freecount() == self.inner.pool.usable();
            if drained {
                idle += 1;
                if idle >= FLUSH_IDLE_THRESHOLD {
                    return Ok(());
                }
            } else {
                idle = 0;
            }
            thread::sleep(delay);
            delay = (delay * 2).min(FLUSH_MAX_DELAY);
        }
        Err(PerfError::TemporarilyUnavailable)
    }

    /// Stop the worker, optionally render a final report, release
    /// everything. The worker is joined before the report so the report
    /// reflects every dispatched event.
    pub fn shutdown(self, stream: Option<&mut dyn Write>) -> Result<(), PerfError> {
        self.join_worker();
        if let Some(out) = stream {
            self.report(out)?;
        }
        Ok(())
    }

    fn join_worker(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else { return };

        // The sentinel must land even while the queue is saturated; the
        // worker is draining, so retrying makes progress.
        let mut backoff = Backoff::new();
        while self.inner.post(Event::Shutdown).is_err() {
            if backoff.is_exhausted() {
                backoff.reset();
            }
            backoff.snooze();
        }

        if handle.join().is_err() {
            tracing::warn!("perf worker panicked before join");
        }
    }
}

impl Drop for Perf {
    fn drop(&mut self) {
        self.join_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(perf: &Perf) -> String {
        let mut out = Vec::new();
        perf.report(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn counter_events_aggregate_after_flush() {
        let perf = Perf::init(2, 2, 2).unwrap();

        perf.counter_create("ct").unwrap();
        perf.counter_inc("ct").unwrap();
        perf.counter_add("ct", 3).unwrap();
        perf.flush().unwrap();

        assert!(render(&perf).contains("ct: 4"));
        perf.shutdown(None).unwrap();
    }

    #[test]
    fn lookup_requires_a_drained_create() {
        let perf = Perf::init(2, 2, 2).unwrap();

        perf.counter_create("late").unwrap();
        // Creation happens on the worker; after a flush the index exists.
        perf.flush().unwrap();
        let idx = perf.counter_lookup("late").unwrap();

        perf.counter_add_by_idx(idx, 7).unwrap();
        perf.counter_inc_by_idx(idx).unwrap();
        perf.flush().unwrap();

        assert!(render(&perf).contains("late: 8"));
        perf.shutdown(None).unwrap();
    }

    #[test]
    fn unknown_index_events_are_dropped() {
        let perf = Perf::init(1, 1, 1).unwrap();

        perf.counter_add_by_idx(999, 5).unwrap();
        perf.flush().unwrap();

        let report = render(&perf);
        assert!(report.contains("-- Counters --\n-- Timers"));
        perf.shutdown(None).unwrap();
    }

    #[test]
    fn records_for_absent_histograms_are_dropped() {
        let perf = Perf::init(1, 1, 1).unwrap();

        // The producer call is best-effort: it posts the event, and dispatch
        // drops it because no histogram with that name exists.
        perf.histogram_record("absent", 1).unwrap();
        perf.flush().unwrap();
        assert!(render(&perf).ends_with("-- Histograms --\n"));

        perf.histogram_create("hg", &[5, 15, 30]).unwrap();
        assert!(matches!(
            perf.histogram_create("hg", &[5, 15, 30]),
            Err(PerfError::Exists("hg"))
        ));

        perf.histogram_record("hg", 3).unwrap();
        perf.histogram_record("hg", 10).unwrap();
        perf.histogram_record("hg", 20).unwrap();
        perf.flush().unwrap();

        let report = render(&perf);
        assert!(report.contains("  <= 5: 1"));
        assert!(report.contains("  <= 15: 1"));
        assert!(report.contains("  <= 30: 1"));
        perf.shutdown(None).unwrap();
    }

    #[test]
    fn report_has_canonical_section_order() {
        let perf = Perf::init(1, 1, 1).unwrap();
        perf.histogram_create("h", &[1, 2]).unwrap();
        perf.timer_create("t").unwrap();
        perf.flush().unwrap();

        let report = render(&perf);
        let header = report.find("=== Performance Report ===").unwrap();
        let counters = report.find("-- Counters --").unwrap();
        let timers = report.find("-- Timers (ns) --").unwrap();
        let histograms = report.find("-- Histograms --").unwrap();
        assert!(header < counters && counters < timers && timers < histograms);
        assert!(report.contains("h:\n  <= 1: 0\n  <= 2: 0"));

        perf.shutdown(None).unwrap();
    }

    #[test]
    fn shutdown_renders_final_report() {
        let perf = Perf::init(1, 1, 1).unwrap();
        perf.counter_add("done", 2).unwrap();
        perf.flush().unwrap();

        let mut out = Vec::new();
        perf.shutdown(Some(&mut out)).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("done: 2"));
    }

    #[test]
    fn drop_without_shutdown_joins_worker() {
        let perf = Perf::init(1, 1, 1).unwrap();
        perf.counter_add("x", 1).unwrap();
        drop(perf);
    }
}
