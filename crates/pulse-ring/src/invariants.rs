//! Debug assertion macros for ring and pool invariants.
//!
//! Active only in debug builds (`debug_assert!`), so release builds pay
//! nothing for them.

/// Assert that a ring capacity is a usable power of two.
///
/// Used in: `Ring::new` after validation (guards later refactors).
macro_rules! debug_assert_pow2 {
    ($capacity:expr) => {
        debug_assert!(
            $capacity >= 2 && ($capacity & ($capacity - 1)) == 0,
            "ring capacity {} is not a power of two >= 2",
            $capacity
        )
    };
}

/// Assert that occupancy stays below capacity (one slot is reserved).
///
/// Used in: `Ring::enqueue` after a successful claim.
macro_rules! debug_assert_occupancy_bounded {
    ($occupancy:expr, $capacity:expr) => {
        debug_assert!(
            $occupancy < $capacity,
            "ring occupancy {} reached capacity {} (reserved slot consumed)",
            $occupancy,
            $capacity
        )
    };
}

/// Assert that a released offset is slot-aligned.
///
/// Used in: `ZcPool::release` after the range/alignment screen accepted it.
macro_rules! debug_assert_slot_aligned {
    ($offset:expr, $buf_size:expr) => {
        debug_assert!(
            $offset % $buf_size == 0,
            "pool release offset {} not aligned to slot size {}",
            $offset,
            $buf_size
        )
    };
}

pub(crate) use debug_assert_occupancy_bounded;
pub(crate) use debug_assert_pow2;
pub(crate) use debug_assert_slot_aligned;
