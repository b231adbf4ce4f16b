//! Shared coordination block
//!
//! Three counters and a code pointer, split across two cache lines so
//! producer-written and consumer-written words never collide:
//!
//! ```text
//! line 0: work_available (i32) | shutdown (i32) | func_ptr (usize) | pad
//! line 1: work_done      (i32) | pad
//! ```
//!
//! The orchestrator writes line 0 and reads line 1; workers read line 0
//! and write line 1.

use core::sync::atomic::{AtomicI32, AtomicUsize};

use crate::constants::CACHE_LINE_SIZE;

/// The shared block. Lives inside the pool's arena; workers reach it by
/// raw pointer for the pool's whole lifetime.
#[repr(C, align(64))]
pub struct SharedBlock {
    /// Jobs still unclaimed in the current batch. May dip below zero
    /// momentarily while a losing claimant normalizes it back to 0.
    pub work_available: AtomicI32,

    /// Non-zero once the pool is tearing down.
    pub shutdown: AtomicI32,

    /// Untyped code address of the current batch's kernel.
    pub func_ptr: AtomicUsize,

    _pad0: [u8; CACHE_LINE_SIZE - 4 - 4 - 8],

    /// Jobs not yet completed in the current batch. Zero between batches.
    pub work_done: AtomicI32,

    _pad1: [u8; CACHE_LINE_SIZE - 4],
}

impl SharedBlock {
    pub const fn new() -> Self {
        Self {
            work_available: AtomicI32::new(0),
            shutdown: AtomicI32::new(0),
            func_ptr: AtomicUsize::new(0),
            _pad0: [0; CACHE_LINE_SIZE - 4 - 4 - 8],
            work_done: AtomicI32::new(0),
            _pad1: [0; CACHE_LINE_SIZE - 4],
        }
    }
}

impl Default for SharedBlock {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = {
    assert!(core::mem::size_of::<SharedBlock>() == 2 * CACHE_LINE_SIZE);
    assert!(core::mem::align_of::<SharedBlock>() == CACHE_LINE_SIZE);
    assert!(core::mem::offset_of!(SharedBlock, work_available) == 0);
    assert!(core::mem::offset_of!(SharedBlock, work_done) == CACHE_LINE_SIZE);
};

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::Ordering;

    #[test]
    fn test_block_layout() {
        assert_eq!(core::mem::size_of::<SharedBlock>(), 128);
        assert_eq!(core::mem::offset_of!(SharedBlock, work_done), 64);
    }

    #[test]
    fn test_block_initial_state() {
        let b = SharedBlock::new();
        assert_eq!(b.work_available.load(Ordering::Relaxed), 0);
        assert_eq!(b.shutdown.load(Ordering::Relaxed), 0);
        assert_eq!(b.func_ptr.load(Ordering::Relaxed), 0);
        assert_eq!(b.work_done.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_claim_race_normalization() {
        // A losing claimant sees old <= 0 and CASes old-1 back to 0.
        // If a new dispatch intervened the CAS fails and the counter is
        // left alone, which is the documented (harmless) outcome.
        let b = SharedBlock::new();

        let old = b.work_available.fetch_sub(1, Ordering::AcqRel);
        assert_eq!(old, 0);
        assert!(b
            .work_available
            .compare_exchange(old - 1, 0, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok());
        assert_eq!(b.work_available.load(Ordering::Relaxed), 0);

        // Racing dispatch case: counter no longer holds old-1, CAS fails.
        let old = b.work_available.fetch_sub(1, Ordering::AcqRel);
        b.work_available.store(4, Ordering::Release); // new dispatch
        assert!(b
            .work_available
            .compare_exchange(old - 1, 0, Ordering::AcqRel, Ordering::Relaxed)
            .is_err());
        assert_eq!(b.work_available.load(Ordering::Relaxed), 4);
    }
}
