use crate::backoff::Backoff;
use crate::invariants::{debug_assert_occupancy_bounded, debug_assert_pow2};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// `head` and `tail` are unbounded u64 sequence numbers; a slot index is
// `sequence & mask`. With 2^64 values wrap-around is out of reach, so the
// occupancy test is plain unsigned subtraction and ABA cannot occur.
//
// One slot is reserved: occupancy is capped at `capacity - 1`, which keeps
// the empty and full states distinguishable by `head - tail` alone.
//
// Each slot additionally carries a sequence stamp:
//
// - free for lap of sequence `p`:   stamp == p
// - published by the writer of `p`: stamp == p + 1   (Release store)
// - handed back by the reader:      stamp == p + capacity
//
// Claims go through a CAS on the counter, so either side may be called from
// several threads: the event queue has many enqueuers, the pool free list has
// many dequeuers. The stamp closes the window between a claim (counter moved)
// and the slot actually being written or drained: the other side spins the
// few cycles until the stamp says the slot is ready.
//
// The CAS revalidates the counter the occupancy check read, so the
// `capacity - 1` bound holds even with concurrent claimers.
//
// `peek`/`peek_at`/`advance` are single-consumer operations: they inspect
// slots without claiming them and rely on no other thread moving `tail`.
// =============================================================================

/// Error type for ring construction and queue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// Capacity was zero, one, or not a power of two.
    #[error("ring capacity must be a power of two >= 2")]
    InvalidCapacity,
    /// The ring already holds `capacity - 1` items.
    #[error("ring is full")]
    Full,
    /// No item was available to dequeue.
    #[error("ring is empty")]
    Empty,
}

struct Slot<T> {
    stamp: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded lock-free queue of `Copy` values - the core building block.
///
/// Power-of-two capacity, one reserved slot, wait-free except for the
/// claim-to-publish window described in the module header.
pub struct Ring<T> {
    // === ENQUEUE HOT ===
    /// Next sequence to write (moved by enqueuers).
    head: CachePadded<AtomicU64>,

    // === DEQUEUE HOT ===
    /// Next sequence to read (moved by dequeuers).
    tail: CachePadded<AtomicU64>,

    // === DATA ===
    slots: Box<[Slot<T>]>,
    mask: u64,
}

// Safety: slot hand-off is mediated by the stamp protocol above; values are
// Copy, so no drop obligations cross threads.
unsafe impl<T: Copy + Send> Send for Ring<T> {}
unsafe impl<T: Copy + Send> Sync for Ring<T> {}

impl<T: Copy> Ring<T> {
    /// Creates a ring with the given capacity.
    ///
    /// The capacity must be a power of two and at least 2; at most
    /// `capacity - 1` items can be queued at once.
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(RingError::InvalidCapacity);
        }
        debug_assert_pow2!(capacity);

        let slots = (0..capacity as u64)
            .map(|seq| Slot {
                stamp: AtomicU64::new(seq),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            slots,
            mask: capacity as u64 - 1,
        })
    }

    // ---------------------------------------------------------------------
    // STATUS
    // ---------------------------------------------------------------------

    /// Ring capacity. Usable occupancy is `capacity() - 1`.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask as usize + 1
    }

    /// Current occupancy. May be stale by the time the caller acts on it.
    #[inline]
    pub fn len(&self) -> usize {
        // tail first: head read afterwards can only be >= the tail we saw
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.mask as usize
    }

    #[inline]
    fn slot(&self, seq: u64) -> &Slot<T> {
        &self.slots[(seq & self.mask) as usize]
    }

    // ---------------------------------------------------------------------
    // ENQUEUE / DEQUEUE
    // ---------------------------------------------------------------------

    /// Append an item. Fails with [`RingError::Full`] at `capacity - 1`
    /// occupancy.
    pub fn enqueue(&self, item: T) -> Result<(), RingError> {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            if head.wrapping_sub(tail) >= self.mask {
                return Err(RingError::Full);
            }
            match self.head.compare_exchange_weak(
                head,
                head.wrapping_add(1),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    debug_assert_occupancy_bounded!(
                        head.wrapping_add(1).wrapping_sub(tail),
                        self.capacity() as u64
                    );
                    break;
                }
                Err(current) => head = current,
            }
        }

        let slot = self.slot(head);
        // Wait for the previous lap's reader to hand the slot back.
        let mut backoff = Backoff::new();
        while slot.stamp.load(Ordering::Acquire) != head {
            backoff.snooze();
        }

        unsafe { (*slot.value.get()).write(item) };
        slot.stamp.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Remove the oldest item. Fails with [`RingError::Empty`] when
    /// `head == tail`.
    pub fn dequeue(&self) -> Result<T, RingError> {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head == tail {
                return Err(RingError::Empty);
            }
            match self.tail.compare_exchange_weak(
                tail,
                tail.wrapping_add(1),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => tail = current,
            }
        }

        let slot = self.slot(tail);
        // The claim may have overtaken a writer mid-publish; wait it out.
        let mut backoff = Backoff::new();
        while slot.stamp.load(Ordering::Acquire) != tail.wrapping_add(1) {
            backoff.snooze();
        }

        let item = unsafe { (*slot.value.get()).assume_init_read() };
        slot.stamp
            .store(tail.wrapping_add(self.capacity() as u64), Ordering::Release);
        Ok(item)
    }

    // ---------------------------------------------------------------------
    // CONSUMER-SIDE INSPECTION
    // ---------------------------------------------------------------------
    //
    // These read slots without claiming them and are only sound while a
    // single thread consumes the ring (nothing else may move `tail`).
    // ---------------------------------------------------------------------

    /// Copy of the oldest item without removing it. Single-consumer only.
    #[inline]
    pub fn peek(&self) -> Option<T> {
        self.peek_at(0)
    }

    /// Copy of the item `offset` positions past the oldest. Returns `None`
    /// when `offset >= len()` or the slot is still being published.
    /// Single-consumer only.
    pub fn peek_at(&self, offset: usize) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if offset as u64 >= head.wrapping_sub(tail) {
            return None;
        }

        let pos = tail.wrapping_add(offset as u64);
        let slot = self.slot(pos);
        if slot.stamp.load(Ordering::Acquire) != pos.wrapping_add(1) {
            return None;
        }

        // Safety: we are the only consumer, so the writer of `pos` cannot be
        // lapped and the slot cannot be reused while we read it.
        Some(unsafe { (*slot.value.get()).assume_init_read() })
    }

    /// Discard up to `n` items from the consumer side. Returns the number
    /// actually skipped. Single-consumer only.
    pub fn advance(&self, n: usize) -> usize {
        let mut skipped = 0;
        while skipped < n {
            if self.dequeue().is_err() {
                break;
            }
            skipped += 1;
        }
        skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rejects_bad_capacities() {
        assert_eq!(Ring::<u32>::new(0).err(), Some(RingError::InvalidCapacity));
        assert_eq!(Ring::<u32>::new(1).err(), Some(RingError::InvalidCapacity));
        assert_eq!(Ring::<u32>::new(12).err(), Some(RingError::InvalidCapacity));
        assert!(Ring::<u32>::new(2).is_ok());
        assert!(Ring::<u32>::new(1024).is_ok());
    }

    #[test]
    fn holds_capacity_minus_one() {
        let ring = Ring::<u64>::new(8).unwrap();

        for i in 0..7 {
            ring.enqueue(i).unwrap();
        }
        assert_eq!(ring.len(), 7);
        assert!(ring.is_full());
        assert_eq!(ring.enqueue(99).err(), Some(RingError::Full));

        assert_eq!(ring.dequeue().unwrap(), 0);
        ring.enqueue(99).unwrap();
        assert_eq!(ring.enqueue(100).err(), Some(RingError::Full));
    }

    #[test]
    fn dequeue_on_empty_fails() {
        let ring = Ring::<u64>::new(8).unwrap();
        assert_eq!(ring.dequeue().err(), Some(RingError::Empty));

        ring.enqueue(1).unwrap();
        assert_eq!(ring.dequeue().unwrap(), 1);
        assert_eq!(ring.dequeue().err(), Some(RingError::Empty));
    }

    #[test]
    fn wraps_in_fifo_order() {
        let ring = Ring::<u64>::new(8).unwrap();

        for i in 0..6 {
            ring.enqueue(i).unwrap();
        }
        for i in 0..4 {
            assert_eq!(ring.dequeue().unwrap(), i);
        }
        for i in 6..10 {
            ring.enqueue(i).unwrap();
        }
        for i in 4..10 {
            assert_eq!(ring.dequeue().unwrap(), i);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn peek_does_not_consume() {
        let ring = Ring::<u64>::new(8).unwrap();
        assert_eq!(ring.peek(), None);

        ring.enqueue(10).unwrap();
        ring.enqueue(20).unwrap();
        ring.enqueue(30).unwrap();

        assert_eq!(ring.peek(), Some(10));
        assert_eq!(ring.peek_at(2), Some(30));
        assert_eq!(ring.peek_at(3), None);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn advance_skips_bounded_by_occupancy() {
        let ring = Ring::<u64>::new(8).unwrap();
        for i in 0..5 {
            ring.enqueue(i).unwrap();
        }

        assert_eq!(ring.advance(3), 3);
        assert_eq!(ring.peek(), Some(3));
        assert_eq!(ring.advance(10), 2);
        assert!(ring.is_empty());
    }

    #[test]
    fn concurrent_enqueuers_preserve_per_thread_fifo() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 10_000;

        let ring = Arc::new(Ring::<u64>::new(256).unwrap());
        let mut handles = Vec::new();

        for id in 0..PRODUCERS {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    let item = (id << 32) | seq;
                    while ring.enqueue(item).is_err() {
                        thread::yield_now();
                    }
                }
            }));
        }

        let mut last_seen = [None::<u64>; PRODUCERS as usize];
        let mut received = 0;
        while received < PRODUCERS * PER_PRODUCER {
            match ring.dequeue() {
                Ok(item) => {
                    let (id, seq) = ((item >> 32) as usize, item & 0xffff_ffff);
                    if let Some(prev) = last_seen[id] {
                        assert!(seq > prev, "producer {id} reordered: {prev} then {seq}");
                    }
                    last_seen[id] = Some(seq);
                    received += 1;
                }
                Err(_) => thread::yield_now(),
            }
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(ring.is_empty());
    }
}
