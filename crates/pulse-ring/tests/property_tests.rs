//! Property-based tests for the ring and pool invariants.

use proptest::prelude::*;
use pulse_ring::{Ring, ZcPool};
use std::collections::VecDeque;

proptest! {
    /// Occupancy never exceeds capacity - 1 under any interleaving of
    /// enqueues and dequeues, and the ring agrees with a model queue.
    #[test]
    fn ring_matches_model_queue(
        capacity_bits in 1u32..8,
        ops in prop::collection::vec(prop::bool::ANY, 0..400),
    ) {
        let capacity = 1usize << capacity_bits;
        let ring = Ring::<u64>::new(capacity).unwrap();
        let mut model = VecDeque::new();
        let mut next_value = 0u64;

        for is_enqueue in ops {
            if is_enqueue {
                let accepted = ring.enqueue(next_value).is_ok();
                let expected = model.len() < capacity - 1;
                prop_assert_eq!(accepted, expected,
                    "enqueue acceptance diverged at occupancy {}", model.len());
                if accepted {
                    model.push_back(next_value);
                    next_value += 1;
                }
            } else {
                let got = ring.dequeue().ok();
                let expected = model.pop_front();
                prop_assert_eq!(got, expected, "dequeue order diverged");
            }

            prop_assert!(ring.len() <= capacity - 1,
                "occupancy {} exceeded capacity - 1 = {}", ring.len(), capacity - 1);
            prop_assert_eq!(ring.len(), model.len());
        }
    }

    /// peek_at never consumes and mirrors the model's contents.
    #[test]
    fn peek_at_is_pure(
        fill in 0usize..15,
        offset in 0usize..20,
    ) {
        let ring = Ring::<u64>::new(16).unwrap();
        for i in 0..fill {
            ring.enqueue(i as u64).unwrap();
        }

        let expected = if offset < fill { Some(offset as u64) } else { None };
        prop_assert_eq!(ring.peek_at(offset), expected);
        prop_assert_eq!(ring.len(), fill);
    }

    /// Every acquired pool slot is in-range and slot-aligned, and a full
    /// acquire/release cycle restores the free count.
    #[test]
    fn pool_slot_geometry(
        count_bits in 1u32..6,
        buf_size in prop::sample::select(vec![64usize, 128, 256, 1024]),
        takes in 0usize..40,
    ) {
        let buf_count = 1usize << count_bits;
        let pool = ZcPool::new(buf_count, buf_size).unwrap();
        prop_assert_eq!(pool.freecount(), buf_count - 1);

        let base = pool.base().as_ptr() as usize;
        let mut held = Vec::new();
        for _ in 0..takes {
            let Some(slot) = pool.acquire() else { break };
            let addr = slot.as_ptr().as_ptr() as usize;
            prop_assert!(addr >= base && addr < base + buf_count * buf_size);
            prop_assert_eq!((addr - base) % buf_size, 0);
            held.push(slot);
        }
        prop_assert!(held.len() <= buf_count - 1);
        prop_assert_eq!(pool.freecount(), buf_count - 1 - held.len());

        for slot in held {
            pool.release(slot.as_ptr().as_ptr());
        }
        prop_assert_eq!(pool.freecount(), buf_count - 1);
    }
}
