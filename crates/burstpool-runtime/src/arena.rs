//! NUMA-bound bump arena
//!
//! One anonymous mapping, optionally bound to a single NUMA node and
//! advised for transparent huge pages, carved up by a bump pointer.
//! Backs the pool's slot region so worker stacks, completion words, and
//! argument packs fault local to the chosen node.
//!
//! Failure policy: never partially live. Any failed setup step releases
//! what was acquired and leaves the arena empty.

use burstpool_core::error::MemoryError;
use burstpool_core::{bdebug, bwarn};

use crate::arch::{
    sys_get_mempolicy_node, sys_madvise, sys_mbind, sys_mmap, sys_munmap, MADV_HUGEPAGE,
    MAP_ANONYMOUS, MAP_NORESERVE, MAP_POPULATE, MAP_PRIVATE, MPOL_BIND, MPOL_MF_MOVE, PROT_READ,
    PROT_WRITE,
};

/// Bump allocator over one anonymous mapping.
pub struct NumaArena {
    base: *mut u8,
    size: usize,
    cursor: usize,
    node: Option<u32>,
}

// The arena is owned by exactly one pool; workers only hold raw
// pointers into it.
unsafe impl Send for NumaArena {}

impl NumaArena {
    /// Map `size` bytes, optionally bind them to `node`, optionally ask
    /// for huge-page backing. Returns an empty arena on any failure.
    pub fn new(size: usize, node: Option<u32>, huge_pages: bool) -> Self {
        if size == 0 {
            return Self::empty();
        }

        let addr = unsafe {
            sys_mmap(
                0,
                size,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE | MAP_POPULATE,
                -1,
                0,
            )
        };
        if addr < 0 {
            bwarn!("arena mmap({} bytes) failed: errno {}", size, -addr);
            return Self::empty();
        }
        let base = addr as *mut u8;

        if huge_pages {
            // Advisory only; old kernels without THP just refuse.
            let ret = unsafe { sys_madvise(base as usize, size, MADV_HUGEPAGE) };
            if ret < 0 {
                bdebug!("madvise(HUGEPAGE) refused: errno {}", -ret);
            }
        }

        if let Some(n) = node {
            if n >= 64 {
                bwarn!("node {} exceeds the single-word nodemask", n);
                unsafe {
                    sys_munmap(base as usize, size);
                }
                return Self::empty();
            }
            let nodemask: u64 = 1u64 << n;
            // MPOL_MF_MOVE migrates the pages MAP_POPULATE already
            // faulted on the wrong node.
            let ret = unsafe {
                sys_mbind(
                    base as usize,
                    size,
                    MPOL_BIND,
                    &nodemask,
                    64,
                    MPOL_MF_MOVE,
                )
            };
            if ret < 0 {
                bwarn!("mbind to node {} failed: errno {}", n, -ret);
                unsafe {
                    sys_munmap(base as usize, size);
                }
                return Self::empty();
            }
        }

        Self {
            base,
            size,
            cursor: 0,
            node,
        }
    }

    /// An arena holding nothing.
    pub const fn empty() -> Self {
        Self {
            base: core::ptr::null_mut(),
            size: 0,
            cursor: 0,
            node: None,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.base.is_null()
    }

    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn node(&self) -> Option<u32> {
        self.node
    }

    /// Bump-allocate `len` bytes at `align`. Null when the region would
    /// be overrun.
    pub fn alloc_bytes(&mut self, len: usize, align: usize) -> *mut u8 {
        debug_assert!(align.is_power_of_two());
        if self.base.is_null() {
            return core::ptr::null_mut();
        }
        let start = (self.cursor + align - 1) & !(align - 1);
        let end = match start.checked_add(len) {
            Some(e) => e,
            None => return core::ptr::null_mut(),
        };
        if end > self.size {
            return core::ptr::null_mut();
        }
        self.cursor = end;
        unsafe { self.base.add(start) }
    }

    /// Allocate `count` records of `T`, aligned to at least 8.
    pub fn alloc<T>(&mut self, count: usize) -> *mut T {
        let align = core::mem::align_of::<T>().max(8);
        let len = match core::mem::size_of::<T>().checked_mul(count) {
            Some(l) => l,
            None => return core::ptr::null_mut(),
        };
        self.alloc_bytes(len, align) as *mut T
    }

    /// Current bump position, for scoped reuse.
    #[inline]
    pub fn mark(&self) -> usize {
        self.cursor
    }

    /// Roll back to a previous mark.
    #[inline]
    pub fn reset_to(&mut self, mark: usize) {
        debug_assert!(mark <= self.cursor);
        self.cursor = mark;
    }

    /// Forget every allocation.
    #[inline]
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// True iff the first page resides on the bound node, or the arena
    /// is empty / unbound. Debug aid for the NUMA placement property.
    pub fn verify_placement(&self) -> bool {
        let node = match (self.node, self.base.is_null()) {
            (Some(n), false) => n,
            _ => return true,
        };
        let mut resident: i32 = -1;
        let ret = unsafe { sys_get_mempolicy_node(&mut resident, self.base as usize) };
        if ret < 0 {
            bwarn!("get_mempolicy failed: errno {}", -ret);
            return false;
        }
        resident == node as i32
    }

    /// Unmap the whole region. Also runs on drop.
    pub fn release(&mut self) {
        if !self.base.is_null() {
            unsafe {
                sys_munmap(self.base as usize, self.size);
            }
            self.base = core::ptr::null_mut();
            self.size = 0;
            self.cursor = 0;
        }
    }
}

impl Drop for NumaArena {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_arena_alloc() {
        let mut a = NumaArena::new(64 * 1024, None, false);
        assert!(!a.is_empty());
        assert!(a.verify_placement()); // unbound always passes

        let p: *mut u64 = a.alloc(8);
        assert!(!p.is_null());
        assert_eq!(p as usize % 8, 0);
        unsafe {
            *p = 42;
            assert_eq!(*p, 42);
        }
    }

    #[test]
    fn test_alloc_alignment() {
        #[repr(C, align(64))]
        struct Wide([u8; 64]);

        let mut a = NumaArena::new(16 * 1024, None, false);
        let _: *mut u8 = a.alloc(3); // misalign the cursor
        let p: *mut Wide = a.alloc(2);
        assert!(!p.is_null());
        assert_eq!(p as usize % 64, 0);
    }

    #[test]
    fn test_alloc_exhaustion() {
        let mut a = NumaArena::new(8192, None, false);
        let p: *mut u8 = a.alloc(8192);
        assert!(!p.is_null());
        let q: *mut u8 = a.alloc(1);
        assert!(q.is_null());
    }

    #[test]
    fn test_mark_reset() {
        let mut a = NumaArena::new(8192, None, false);
        let _: *mut u64 = a.alloc(4);
        let m = a.mark();
        let p: *mut u64 = a.alloc(4);
        a.reset_to(m);
        let q: *mut u64 = a.alloc(4);
        assert_eq!(p, q);

        a.reset();
        assert_eq!(a.mark(), 0);
    }

    #[test]
    fn test_empty_arena() {
        let mut a = NumaArena::empty();
        assert!(a.is_empty());
        assert!(a.alloc::<u64>(1).is_null());
        assert!(a.verify_placement());
    }

    #[test]
    fn test_zero_size_is_empty() {
        let a = NumaArena::new(0, None, false);
        assert!(a.is_empty());
    }

    #[test]
    fn test_node_bound_placement() {
        // Only meaningful when node 0 exists and mbind is permitted;
        // an empty arena means the machine refused the binding.
        if !std::path::Path::new("/sys/devices/system/node/node0").exists() {
            return;
        }
        let mut a = NumaArena::new(64 * 1024, Some(0), false);
        if a.is_empty() {
            return;
        }
        let p: *mut u8 = a.alloc(4096);
        unsafe { p.write_volatile(1) };
        assert!(a.verify_placement());
    }
}
