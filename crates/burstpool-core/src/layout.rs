//! Per-worker slot layout
//!
//! Each worker owns one page-aligned slot inside the pool's arena:
//!
//! ```text
//! 0                 T = 256   static thread-local image (copied from parent)
//! T                 C = 64    thread-control block (copy, self-pointer patched)
//! T+C               4         child-tid word (kernel clears + wakes on exit)
//! T+C+4             4         padding
//! T+C+8             8         worker id
//! T+C+16            8         magic sentinel
//! T+C+32            32        rseq area (32-byte aligned)
//! ...               -> 4096   padding
//! 4096              4096      guard page (PROT_NONE)
//! 8192              stack     primary stack, grows down
//! 8192+stack        4096      guard page (PROT_NONE)
//! +4096             alt       alternate signal stack
//! ```
//!
//! The thread pointer (FS) is set to the thread-control block, i.e.
//! slot base + T, so the coordination words sit at small positive
//! FS-relative offsets and the TLS image at negative ones.

use crate::constants::{PAGE_SIZE, TCB_SIZE, TLS_IMAGE_SIZE};

/// Slot-base-relative offsets.
pub const CHILD_TID_OFFSET: usize = TLS_IMAGE_SIZE + TCB_SIZE;
pub const WORKER_ID_OFFSET: usize = CHILD_TID_OFFSET + 8;
pub const MAGIC_OFFSET: usize = CHILD_TID_OFFSET + 16;
pub const RSEQ_OFFSET: usize = CHILD_TID_OFFSET + 32;

/// FS-relative offsets (FS = slot base + TLS_IMAGE_SIZE).
pub const TP_CHILD_TID: usize = TCB_SIZE;
pub const TP_WORKER_ID: usize = TCB_SIZE + 8;
pub const TP_MAGIC: usize = TCB_SIZE + 16;
pub const TP_RSEQ: usize = TCB_SIZE + 32;

/// Header region: everything before the first guard page.
pub const HEADER_SIZE: usize = PAGE_SIZE;

const _: () = {
    // Coordination words must fit in the header page.
    assert!(RSEQ_OFFSET + 32 <= HEADER_SIZE);
    // The rseq ABI requires 32-byte alignment; slot bases are page-aligned.
    assert!(RSEQ_OFFSET % 32 == 0);
};

/// Computed layout for one slot, parameterized by the two configurable
/// stack sizes. Both must be positive multiples of the page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub stack_size: usize,
    pub alt_stack_size: usize,
}

impl SlotLayout {
    pub const fn new(stack_size: usize, alt_stack_size: usize) -> Self {
        assert!(stack_size > 0 && stack_size % PAGE_SIZE == 0);
        assert!(alt_stack_size > 0 && alt_stack_size % PAGE_SIZE == 0);
        Self {
            stack_size,
            alt_stack_size,
        }
    }

    /// Offset of the low guard page.
    #[inline]
    pub const fn guard_low_offset(&self) -> usize {
        HEADER_SIZE
    }

    /// Offset of the primary stack (lowest address).
    #[inline]
    pub const fn stack_offset(&self) -> usize {
        HEADER_SIZE + PAGE_SIZE
    }

    /// Offset one past the top of the primary stack.
    #[inline]
    pub const fn stack_top_offset(&self) -> usize {
        self.stack_offset() + self.stack_size
    }

    /// Offset of the high guard page.
    #[inline]
    pub const fn guard_high_offset(&self) -> usize {
        self.stack_top_offset()
    }

    /// Offset of the alternate signal stack.
    #[inline]
    pub const fn alt_stack_offset(&self) -> usize {
        self.guard_high_offset() + PAGE_SIZE
    }

    /// Total slot size, page-aligned.
    #[inline]
    pub const fn slot_size(&self) -> usize {
        self.alt_stack_offset() + self.alt_stack_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DEFAULT_ALT_STACK_SIZE, DEFAULT_STACK_SIZE};

    #[test]
    fn test_offsets() {
        assert_eq!(CHILD_TID_OFFSET, 320);
        assert_eq!(WORKER_ID_OFFSET, 328);
        assert_eq!(MAGIC_OFFSET, 336);
        assert_eq!(RSEQ_OFFSET, 352);

        assert_eq!(TP_CHILD_TID, 64);
        assert_eq!(TP_WORKER_ID, 72);
        assert_eq!(TP_MAGIC, 80);
        assert_eq!(TP_RSEQ, 96);

        // Slot-relative and FS-relative views agree.
        assert_eq!(TLS_IMAGE_SIZE + TP_WORKER_ID, WORKER_ID_OFFSET);
        assert_eq!(TLS_IMAGE_SIZE + TP_MAGIC, MAGIC_OFFSET);
    }

    #[test]
    fn test_slot_size_math() {
        let l = SlotLayout::new(DEFAULT_STACK_SIZE, DEFAULT_ALT_STACK_SIZE);
        assert_eq!(l.guard_low_offset(), 4096);
        assert_eq!(l.stack_offset(), 8192);
        assert_eq!(l.stack_top_offset(), 8192 + DEFAULT_STACK_SIZE);
        assert_eq!(l.alt_stack_offset(), 8192 + DEFAULT_STACK_SIZE + 4096);
        assert_eq!(
            l.slot_size(),
            4096 + 4096 + DEFAULT_STACK_SIZE + 4096 + DEFAULT_ALT_STACK_SIZE
        );
        assert_eq!(l.slot_size() % PAGE_SIZE, 0);
    }

    #[test]
    fn test_minimal_stack() {
        // The stress scenario runs with a single-page stack.
        let l = SlotLayout::new(4096, DEFAULT_ALT_STACK_SIZE);
        assert_eq!(l.stack_top_offset(), 12288);
        assert_eq!(l.slot_size() % PAGE_SIZE, 0);
    }
}
