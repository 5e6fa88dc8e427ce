//! Aggregator records: one per metric name, mutated with atomics only.

use crate::error::PerfError;
use crate::event::MetricName;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing 64-bit counter.
#[derive(Debug)]
pub struct Counter {
    name: MetricName,
    value: AtomicU64,
}

impl Counter {
    pub(crate) fn new(name: MetricName) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn name(&self) -> MetricName {
        self.name
    }
}

/// Stopwatch accumulating elapsed nanoseconds.
///
/// `start` stores the clock reading; `stop` adds `now - start` to the
/// accumulator. The start cell holds the last start only: overlapping
/// starts from several producers keep whichever landed last, a documented
/// limitation of the wire-level API.
#[derive(Debug)]
pub struct Timer {
    name: MetricName,
    /// Nanoseconds of the last start, or [`Timer::UNSET`].
    started_ns: AtomicU64,
    total_ns: AtomicU64,
}

impl Timer {
    const UNSET: u64 = u64::MAX;

    pub(crate) fn new(name: MetricName) -> Self {
        Self {
            name,
            started_ns: AtomicU64::new(Self::UNSET),
            total_ns: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn start(&self, now_ns: u64) {
        self.started_ns.store(now_ns, Ordering::Relaxed);
    }

    /// Accumulate the elapsed time since the last start. A stop with no
    /// preceding start is a no-op.
    pub(crate) fn stop(&self, now_ns: u64) {
        let started = self.started_ns.load(Ordering::Relaxed);
        if started == Self::UNSET {
            return;
        }
        self.total_ns
            .fetch_add(now_ns.saturating_sub(started), Ordering::Relaxed);
    }

    #[inline]
    pub fn total_ns(&self) -> u64 {
        self.total_ns.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn name(&self) -> MetricName {
        self.name
    }
}

/// Bucketed histogram with inclusive upper-bound thresholds.
///
/// The last bin doubles as the overflow bin: a sample greater than every
/// threshold lands there.
#[derive(Debug)]
pub struct Histogram {
    name: MetricName,
    bins: Box<[u64]>,
    counts: Box<[AtomicU64]>,
}

impl Histogram {
    pub(crate) fn new(name: MetricName, thresholds: &[u64]) -> Result<Self, PerfError> {
        if thresholds.is_empty() {
            return Err(PerfError::InvalidArgument(
                "histogram needs at least one bin",
            ));
        }
        let mut bins = thresholds.to_vec();
        bins.sort_unstable();
        let counts = bins.iter().map(|_| AtomicU64::new(0)).collect();
        Ok(Self {
            name,
            bins: bins.into_boxed_slice(),
            counts,
        })
    }

    /// Count `sample` in the first bin whose threshold is >= `sample`, or in
    /// the last bin when none is.
    pub(crate) fn record(&self, sample: u64) {
        let idx = self
            .bins
            .iter()
            .position(|&bound| sample <= bound)
            .unwrap_or(self.bins.len() - 1);
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn name(&self) -> MetricName {
        self.name
    }

    /// `(threshold, count)` pairs in ascending threshold order.
    pub fn buckets(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.bins
            .iter()
            .zip(self.counts.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
    }
}
