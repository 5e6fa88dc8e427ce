//! The measurement records that cross the event queue.

/// Metric names are stable string literals.
///
/// The producer API leans on `'static` lifetimes so a name can sit in an
/// event slot for the enqueue-to-dispatch window without any ownership
/// hand-off, and so the fast-path cache may key on the literal's address.
pub type MetricName = &'static str;

/// How an event refers to its aggregator.
///
/// Slow-path producers send the name and let the worker resolve (and lazily
/// create) the aggregator; fast-path producers send a previously resolved
/// slot index so dispatch skips hashing entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKey {
    Name(MetricName),
    Index(usize),
}

/// One measurement, written into a pool slot by a producer and consumed by
/// the worker. `Copy`, fixed-size, never heap-allocated.
#[derive(Debug, Clone, Copy)]
pub enum Event {
    CounterAdd { key: MetricKey, delta: u64 },
    TimerStart { key: MetricKey },
    TimerStop { key: MetricKey },
    HistogramRecord { key: MetricKey, sample: u64 },
    /// Sentinel that stops the worker loop.
    Shutdown,
}
