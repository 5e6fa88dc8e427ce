use crate::invariants::debug_assert_slot_aligned;
use crate::ring::Ring;
use memmap2::{MmapMut, MmapOptions};
use std::io;
use std::ptr::NonNull;
use thiserror::Error;

/// Upper bound on a single slot's size.
pub const MAX_BUF_SIZE: usize = 2 * 1024 * 1024;

/// Huge-page granule the region is sized and mapped to when possible.
const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;
const HUGE_PAGE_SHIFT: u8 = 21;

/// Error types for pool construction.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Rejected slot geometry.
    #[error("invalid pool geometry: {0}")]
    InvalidArgument(&'static str),
    /// Neither the huge-page nor the ordinary anonymous mapping succeeded.
    #[error("memory mapping failed: {0}")]
    MapFailed(#[source] io::Error),
}

/// A slot handed out by [`ZcPool::acquire`].
///
/// The pointer stays exclusively owned by the holder until the slot is
/// passed back through [`ZcPool::release`].
#[derive(Debug)]
pub struct PoolSlot {
    index: u32,
    ptr: NonNull<u8>,
    len: usize,
}

impl PoolSlot {
    /// Index of this slot inside the pool, usable as a compact wire token.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Slot size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Fixed-slot buffer pool over a single anonymous mapping.
///
/// The region is partitioned into `buf_count` slots of `buf_size` bytes and
/// a private ring of slot indices serves as the free list, giving O(1)
/// acquire and release. A 2 MiB huge-page mapping is attempted first to keep
/// TLB pressure down; ordinary anonymous pages are the fallback.
///
/// The free ring keeps one slot reserved, so at most `buf_count - 1` buffers
/// circulate concurrently and `freecount()` starts at `buf_count - 1`.
pub struct ZcPool {
    base: NonNull<u8>,
    buf_size: usize,
    buf_count: usize,
    free: Ring<u32>,
    /// Keeps the mapping alive; all access goes through `base`.
    _region: MmapMut,
}

// Safety: the mapping is owned by the pool for its whole lifetime and slot
// exclusivity is mediated by the free-list ring (acquire transfers a slot
// out, release transfers it back).
unsafe impl Send for ZcPool {}
unsafe impl Sync for ZcPool {}

impl ZcPool {
    /// Creates a pool of `buf_count` slots of `buf_size` bytes each.
    ///
    /// `buf_count` must be a power of two >= 2 (the free-list ring
    /// constraint); `buf_size` must be non-zero and at most [`MAX_BUF_SIZE`].
    pub fn new(buf_count: usize, buf_size: usize) -> Result<Self, PoolError> {
        if buf_count < 2 || !buf_count.is_power_of_two() {
            return Err(PoolError::InvalidArgument(
                "buf_count must be a power of two >= 2",
            ));
        }
        if buf_size == 0 {
            return Err(PoolError::InvalidArgument("buf_size must be non-zero"));
        }
        if buf_size > MAX_BUF_SIZE {
            return Err(PoolError::InvalidArgument("buf_size exceeds 2 MiB"));
        }
        let bytes = buf_count
            .checked_mul(buf_size)
            .ok_or(PoolError::InvalidArgument("pool region size overflows"))?;
        let aligned = bytes
            .checked_add(HUGE_PAGE_SIZE - 1)
            .ok_or(PoolError::InvalidArgument("pool region size overflows"))?
            & !(HUGE_PAGE_SIZE - 1);

        let mut region = match MmapOptions::new()
            .len(aligned)
            .huge(Some(HUGE_PAGE_SHIFT))
            .map_anon()
        {
            Ok(region) => region,
            Err(err) => {
                tracing::debug!(error = %err, "huge-page mapping unavailable, using regular pages");
                MmapOptions::new()
                    .len(aligned)
                    .map_anon()
                    .map_err(PoolError::MapFailed)?
            }
        };

        let base = NonNull::new(region.as_mut_ptr())
            .ok_or_else(|| PoolError::MapFailed(io::Error::other("mapping returned null")))?;

        // buf_count is a power of two >= 2, so the ring constructor accepts it.
        let free = Ring::new(buf_count)
            .map_err(|_| PoolError::InvalidArgument("buf_count rejected by free ring"))?;

        // Pre-populate the free list. The ring holds buf_count - 1 entries,
        // so the final slot stays resident and never circulates.
        for index in 0..buf_count as u32 {
            if free.enqueue(index).is_err() {
                break;
            }
        }

        Ok(Self {
            base,
            buf_size,
            buf_count,
            free,
            _region: region,
        })
    }

    /// Take a free slot. Returns `None` when every circulating slot is out.
    pub fn acquire(&self) -> Option<PoolSlot> {
        let index = self.free.dequeue().ok()?;
        Some(PoolSlot {
            index,
            // index came from the free list, so it is always in range
            ptr: self.slot_ptr(index)?,
            len: self.buf_size,
        })
    }

    /// Hand a slot back. Pointers outside the region or not aligned to a
    /// slot boundary are ignored.
    pub fn release(&self, ptr: *const u8) {
        let base = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        if addr < base {
            return;
        }
        let offset = addr - base;
        if offset >= self.buf_count * self.buf_size || offset % self.buf_size != 0 {
            return;
        }
        debug_assert_slot_aligned!(offset, self.buf_size);

        // At most buf_count - 1 slots circulate, so the free ring never fills.
        let _ = self.free.enqueue((offset / self.buf_size) as u32);
    }

    /// Pointer to slot `index`, or `None` when the index is out of range.
    pub fn slot_ptr(&self, index: u32) -> Option<NonNull<u8>> {
        if index as usize >= self.buf_count {
            return None;
        }
        // Safety: index is in range, so the offset stays inside the mapping.
        let ptr = unsafe { self.base.as_ptr().add(index as usize * self.buf_size) };
        NonNull::new(ptr)
    }

    /// Number of slots currently in the free list.
    #[inline]
    pub fn freecount(&self) -> usize {
        self.free.len()
    }

    /// Number of slots that can circulate: `buf_count - 1`.
    #[inline]
    pub fn usable(&self) -> usize {
        self.buf_count - 1
    }

    #[inline]
    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    #[inline]
    pub fn buf_count(&self) -> usize {
        self.buf_count
    }

    /// Base address of the slot region.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_geometry() {
        assert!(matches!(
            ZcPool::new(0, 64),
            Err(PoolError::InvalidArgument(_))
        ));
        assert!(matches!(
            ZcPool::new(3, 64),
            Err(PoolError::InvalidArgument(_))
        ));
        assert!(matches!(
            ZcPool::new(4, 0),
            Err(PoolError::InvalidArgument(_))
        ));
        assert!(matches!(
            ZcPool::new(4, MAX_BUF_SIZE + 1),
            Err(PoolError::InvalidArgument(_))
        ));
    }

    #[test]
    fn freecount_starts_at_count_minus_one() {
        let pool = ZcPool::new(4, 1024).unwrap();
        assert_eq!(pool.freecount(), 3);
        assert_eq!(pool.usable(), 3);
    }

    #[test]
    fn acquired_slots_are_aligned_and_in_range() {
        let pool = ZcPool::new(8, 512).unwrap();
        let base = pool.base().as_ptr() as usize;

        let mut slots = Vec::new();
        while let Some(slot) = pool.acquire() {
            let addr = slot.as_ptr().as_ptr() as usize;
            assert!(addr >= base);
            assert!(addr < base + pool.buf_count() * pool.buf_size());
            assert_eq!((addr - base) % pool.buf_size(), 0);
            slots.push(slot);
        }
        assert_eq!(slots.len(), pool.usable());

        for slot in slots {
            pool.release(slot.as_ptr().as_ptr());
        }
        assert_eq!(pool.freecount(), pool.usable());
    }

    #[test]
    fn exhaustion_then_release_cycles() {
        let pool = ZcPool::new(4, 256).unwrap();

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.freecount(), 0);

        pool.release(b.as_ptr().as_ptr());
        assert_eq!(pool.freecount(), 1);
        let again = pool.acquire().unwrap();
        assert_eq!(again.index(), b.index());

        pool.release(a.as_ptr().as_ptr());
        pool.release(c.as_ptr().as_ptr());
        pool.release(again.as_ptr().as_ptr());
        assert_eq!(pool.freecount(), 3);
    }

    #[test]
    fn release_of_foreign_pointer_is_ignored() {
        let pool = ZcPool::new(4, 1024).unwrap();
        let before = pool.freecount();

        let local = 0u64;
        pool.release(std::ptr::addr_of!(local).cast());
        assert_eq!(pool.freecount(), before);

        // In-range but misaligned is ignored too.
        let inside = unsafe { pool.base().as_ptr().add(3) };
        pool.release(inside);
        assert_eq!(pool.freecount(), before);

        // One past the end is out of range.
        let past = unsafe {
            pool.base()
                .as_ptr()
                .add(pool.buf_count() * pool.buf_size())
        };
        pool.release(past);
        assert_eq!(pool.freecount(), before);
    }

    #[test]
    fn slot_ptr_bounds_checked() {
        let pool = ZcPool::new(4, 128).unwrap();
        assert!(pool.slot_ptr(0).is_some());
        assert!(pool.slot_ptr(3).is_some());
        assert!(pool.slot_ptr(4).is_none());
    }
}
