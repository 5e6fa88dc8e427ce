//! Error types for the perf subsystem.

use pulse_ring::{BatchError, PoolError, RingError};
use std::io;
use thiserror::Error;

/// Errors surfaced by the perf subsystem's public API.
///
/// Producer hot paths stay best-effort: the void forms drop silently, the
/// `Result` forms report one of these kinds.
#[derive(Debug, Error)]
pub enum PerfError {
    /// The subsystem has not been initialised.
    #[error("perf subsystem is not initialised")]
    NotInitialised,
    /// `init` was called while the subsystem is already running.
    #[error("perf subsystem is already initialised")]
    AlreadyInitialised,
    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The event queue is full; the event was dropped.
    #[error("event queue is full")]
    NoSpace,
    /// The event pool is exhausted; the event was dropped.
    #[error("temporarily out of event slots")]
    TemporarilyUnavailable,
    /// The pool's backing region could not be mapped.
    #[error("memory mapping failed")]
    MapFailed,
    /// No metric with the given name exists.
    #[error("metric not found: {0}")]
    NotFound(&'static str),
    /// A metric with the given name already exists.
    #[error("metric already exists: {0}")]
    Exists(&'static str),
    /// An allocation failed.
    #[error("out of memory")]
    OutOfMemory,
    /// Writing a report to the supplied sink failed.
    #[error("i/o error")]
    Io(#[from] io::Error),
}

impl From<RingError> for PerfError {
    fn from(err: RingError) -> Self {
        match err {
            RingError::InvalidCapacity => {
                PerfError::InvalidArgument("ring capacity must be a power of two >= 2")
            }
            RingError::Full => PerfError::NoSpace,
            RingError::Empty => PerfError::TemporarilyUnavailable,
        }
    }
}

impl From<PoolError> for PerfError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::InvalidArgument(msg) => PerfError::InvalidArgument(msg),
            PoolError::MapFailed(_) => PerfError::MapFailed,
        }
    }
}

impl From<BatchError> for PerfError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::InvalidBatchSize => {
                PerfError::InvalidArgument("batch size must be positive")
            }
            BatchError::Full => PerfError::NoSpace,
        }
    }
}
