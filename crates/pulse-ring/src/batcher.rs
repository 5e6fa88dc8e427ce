use crate::ring::Ring;
use crate::wake::WakeCounter;
use std::sync::Arc;
use thiserror::Error;

/// Error types for batcher operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BatchError {
    /// `batch_size` was zero.
    #[error("batch size must be positive")]
    InvalidBatchSize,
    /// The underlying ring rejected the item; the event is dropped.
    #[error("event queue is full")]
    Full,
}

/// Blocking, batched consumer front-end over a [`Ring`].
///
/// Producers enqueue an item and signal the wake counter; the consumer
/// blocks in [`next`](Batcher::next) and drains up to `batch_size` items per
/// wake. Enqueue never blocks; overflow is reported to the caller, which
/// treats the item as dropped.
///
/// There is no dedicated cancellation path: the consumer is stopped by
/// enqueuing a sentinel item it recognises.
pub struct Batcher<T: Copy> {
    ring: Arc<Ring<T>>,
    wake: WakeCounter,
    batch_size: usize,
}

impl<T: Copy> Batcher<T> {
    /// Creates a batcher over `ring` draining at most `batch_size` items per
    /// wake.
    pub fn new(ring: Arc<Ring<T>>, batch_size: usize) -> Result<Self, BatchError> {
        if batch_size == 0 {
            return Err(BatchError::InvalidBatchSize);
        }
        Ok(Self {
            ring,
            wake: WakeCounter::new(),
            batch_size,
        })
    }

    /// Enqueue one item and wake the consumer.
    pub fn enqueue(&self, item: T) -> Result<(), BatchError> {
        self.ring.enqueue(item).map_err(|_| BatchError::Full)?;
        self.wake.signal();
        Ok(())
    }

    /// Block until at least one enqueue has been signalled, then drain up to
    /// `batch_size` items into `out` (cleared first). Returns the count
    /// drained, which may be zero when earlier waits already drained ahead
    /// of their signals.
    pub fn next(&self, out: &mut Vec<T>) -> usize {
        out.clear();
        self.wake.wait();
        while out.len() < self.batch_size {
            match self.ring.dequeue() {
                Ok(item) => out.push(item),
                Err(_) => break,
            }
        }
        out.len()
    }

    /// True iff the underlying ring is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Occupancy of the underlying ring.
    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn rejects_zero_batch_size() {
        let ring = Arc::new(Ring::<u32>::new(8).unwrap());
        assert_eq!(
            Batcher::new(ring, 0).err(),
            Some(BatchError::InvalidBatchSize)
        );
    }

    #[test]
    fn drains_up_to_batch_size() {
        let ring = Arc::new(Ring::<u32>::new(16).unwrap());
        let batcher = Batcher::new(ring, 3).unwrap();

        for i in 0..5 {
            batcher.enqueue(i).unwrap();
        }

        let mut batch = Vec::new();
        assert_eq!(batcher.next(&mut batch), 3);
        assert_eq!(batch, vec![0, 1, 2]);

        assert_eq!(batcher.next(&mut batch), 2);
        assert_eq!(batch, vec![3, 4]);
        assert!(batcher.is_empty());

        // Signals for already-drained items surface as empty batches.
        assert_eq!(batcher.next(&mut batch), 0);
    }

    #[test]
    fn overflow_is_reported() {
        let ring = Arc::new(Ring::<u32>::new(4).unwrap());
        let batcher = Batcher::new(ring, 4).unwrap();

        batcher.enqueue(1).unwrap();
        batcher.enqueue(2).unwrap();
        batcher.enqueue(3).unwrap();
        assert_eq!(batcher.enqueue(4).err(), Some(BatchError::Full));
        assert_eq!(batcher.len(), 3);
    }

    #[test]
    fn consumer_blocks_until_producer_signals() {
        let ring = Arc::new(Ring::<u32>::new(8).unwrap());
        let batcher = Arc::new(Batcher::new(ring, 8).unwrap());

        let consumer = {
            let batcher = Arc::clone(&batcher);
            thread::spawn(move || {
                let mut batch = Vec::new();
                batcher.next(&mut batch);
                batch
            })
        };

        batcher.enqueue(42).unwrap();
        assert_eq!(consumer.join().unwrap(), vec![42]);
    }
}
