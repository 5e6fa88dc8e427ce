//! pulse-ring - Lock-Free Primitives for In-Process Instrumentation
//!
//! The plumbing layer of the pulse performance subsystem: a bounded
//! power-of-two ring buffer, a huge-page-backed fixed-slot buffer pool whose
//! free list is a ring of slot indices, and an event batcher that couples the
//! ring with a counting wake primitive so a consumer thread can block until
//! work arrives and then drain a bounded batch.
//!
//! # Key Features
//!
//! - Cache-padded monotonic `u64` head/tail counters (no ABA, no false sharing)
//! - Per-slot sequence stamps so the hot sides tolerate concurrent callers
//! - One reserved slot per ring: capacity `N` holds at most `N - 1` items
//! - Adaptive backoff (spin with PAUSE, then yield)
//!
//! # Example
//!
//! ```
//! use pulse_ring::{Batcher, Ring};
//! use std::sync::Arc;
//!
//! let ring = Arc::new(Ring::<u32>::new(64).unwrap());
//! let batcher = Batcher::new(ring, 16).unwrap();
//!
//! batcher.enqueue(7).unwrap();
//!
//! let mut batch = Vec::new();
//! let drained = batcher.next(&mut batch);
//! assert_eq!((drained, batch[0]), (1, 7));
//! ```

mod backoff;
mod batcher;
mod invariants;
mod pool;
mod ring;
mod wake;

pub use backoff::Backoff;
pub use batcher::{BatchError, Batcher};
pub use pool::{PoolError, PoolSlot, ZcPool, MAX_BUF_SIZE};
pub use ring::{Ring, RingError};
pub use wake::WakeCounter;
