//! Burst pool
//!
//! Construction maps one NUMA-bound arena holding every per-worker slot,
//! the shared coordination block, and the argument arena, then spawns
//! the workers through clone3. Thereafter the orchestrator runs repeated
//! dispatch → join cycles against the same worker set.
//!
//! Workers hold raw pointers into the pool's mapping; the destructor
//! joins every worker (via the kernel's child-tid clear + wake) before
//! the mapping is released, which is what makes those pointers sound.

use core::sync::atomic::{AtomicI32, Ordering};

use burstpool_core::constants::PAGE_SIZE;
use burstpool_core::error::{MemoryError, PoolResult, SpawnError};
use burstpool_core::layout::CHILD_TID_OFFSET;
use burstpool_core::{berror, binfo};
use burstpool_core::{ArgPack, CpuMask, KernelFn, SharedBlock, SlotLayout};

use crate::arch::{
    cpu_relax, sys_clone3, sys_futex_wait, sys_futex_wake, sys_futex_waitv, worker_start,
    CloneArgs, FutexWaitv, CLONE_CHILD_CLEARTID, CLONE_FILES, CLONE_FS, CLONE_PARENT_SETTID,
    CLONE_SETTLS, CLONE_SIGHAND, CLONE_SYSVSEM, CLONE_THREAD, CLONE_VM, FUTEX_32,
    FUTEX_PRIVATE_FLAG,
};
use crate::arena::NumaArena;
use crate::config::PoolConfig;
use crate::fault::install_fault_handler;
use crate::topology;
use crate::worker::StartHeader;

/// Per-worker bookkeeping on the orchestrator side.
struct WorkerHandle {
    slot_base: usize,
    /// The child-tid word inside the slot; zero once the worker exited.
    child_tid: *const i32,
}

/// The burst pool. One orchestrator thread owns dispatch and join;
/// the pool is movable between threads but not shareable.
pub struct BurstPool {
    arena: NumaArena,
    layout: SlotLayout,
    config: PoolConfig,
    capacity: usize,
    slots_base: usize,
    shared: *mut SharedBlock,
    packs: *mut ArgPack,
    workers: Vec<WorkerHandle>,
    valid: bool,
}

unsafe impl Send for BurstPool {}

impl BurstPool {
    /// Build a pool. On any failure the returned pool is empty:
    /// `is_valid()` is false and `capacity()` is zero.
    pub fn new(config: PoolConfig) -> Self {
        match Self::build(config) {
            Ok(pool) => pool,
            Err(e) => {
                berror!("pool construction failed: {}", e);
                Self::invalid()
            }
        }
    }

    /// Pool with `capacity` workers and library defaults otherwise.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(PoolConfig::new().capacity(capacity))
    }

    /// Pool sized to NUMA node `node`: one worker per CPU on the node,
    /// workers pinned to the node's CPU set, arena bound to the node.
    pub fn for_node(node: u32) -> Self {
        let mask = match topology::node_cpu_mask(node) {
            Some(m) if !m.is_empty() => m,
            _ => {
                berror!("NUMA node {} has no CPUs", node);
                return Self::invalid();
            }
        };
        Self::new(
            PoolConfig::new()
                .capacity(mask.count())
                .cpu_mask(mask)
                .numa_node(node),
        )
    }

    /// Like [`for_node`], with `cpu` removed from the set. Capacity
    /// drops by one only if `cpu` actually belonged to the node;
    /// typically `cpu` is the orchestrator's own CPU.
    ///
    /// [`for_node`]: BurstPool::for_node
    pub fn for_node_excluding(node: u32, cpu: usize) -> Self {
        let mut mask = match topology::node_cpu_mask(node) {
            Some(m) if !m.is_empty() => m,
            _ => {
                berror!("NUMA node {} has no CPUs", node);
                return Self::invalid();
            }
        };
        if mask.contains(cpu) {
            mask.clear(cpu);
        }
        if mask.is_empty() {
            berror!("excluding CPU {} empties node {}", cpu, node);
            return Self::invalid();
        }
        Self::new(
            PoolConfig::new()
                .capacity(mask.count())
                .cpu_mask(mask)
                .numa_node(node),
        )
    }

    fn invalid() -> Self {
        Self {
            arena: NumaArena::empty(),
            layout: SlotLayout::new(PAGE_SIZE, PAGE_SIZE),
            config: PoolConfig::new(),
            capacity: 0,
            slots_base: 0,
            shared: core::ptr::null_mut(),
            packs: core::ptr::null_mut(),
            workers: Vec::new(),
            valid: false,
        }
    }

    fn build(config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;

        let layout = SlotLayout::new(config.stack_size, config.alt_stack_size);
        let capacity = config.capacity;

        let total = capacity * layout.slot_size()
            + core::mem::size_of::<SharedBlock>()
            + capacity * core::mem::size_of::<ArgPack>();

        let mut arena = NumaArena::new(total, config.numa_node, config.huge_pages);
        if arena.is_empty() {
            // The arena already logged the precise errno.
            return Err(MemoryError::MapFailed(0).into());
        }

        let slots_base = arena.alloc_bytes(capacity * layout.slot_size(), PAGE_SIZE) as usize;
        let shared = arena.alloc::<SharedBlock>(1);
        let packs = arena.alloc::<ArgPack>(capacity);
        if slots_base == 0 || shared.is_null() || packs.is_null() {
            return Err(MemoryError::ArenaExhausted.into());
        }

        unsafe {
            shared.write(SharedBlock::new());
            core::ptr::write_bytes(packs, 0, capacity);
        }

        // Guard pages bracket every primary stack.
        for i in 0..capacity {
            let slot = slots_base + i * layout.slot_size();
            unsafe {
                let ret = crate::arch::sys_mprotect(
                    slot + layout.guard_low_offset(),
                    PAGE_SIZE,
                    crate::arch::PROT_NONE,
                );
                if ret < 0 {
                    return Err(MemoryError::ProtectFailed(-ret as i32).into());
                }
                let ret = crate::arch::sys_mprotect(
                    slot + layout.guard_high_offset(),
                    PAGE_SIZE,
                    crate::arch::PROT_NONE,
                );
                if ret < 0 {
                    return Err(MemoryError::ProtectFailed(-ret as i32).into());
                }
                // The kernel wakes exit waiters on this word; start it at
                // "not alive".
                *((slot + CHILD_TID_OFFSET) as *mut i32) = 0;
            }
        }

        install_fault_handler()?;

        let mut pool = Self {
            arena,
            layout,
            config,
            capacity,
            slots_base,
            shared,
            packs,
            workers: Vec::with_capacity(capacity),
            valid: false,
        };

        for i in 0..capacity {
            if let Err(e) = pool.spawn_worker(i) {
                // Workers spawned so far sit parked with shutdown == 0;
                // the destructor shuts them down and joins them before
                // the mapping goes away. The pool stays invalid.
                berror!("{}", e);
                return Ok(pool);
            }
        }

        pool.valid = true;
        binfo!(
            "pool up: {} workers, {} KiB stacks, node {:?}",
            capacity,
            pool.layout.stack_size / 1024,
            pool.config.numa_node
        );
        Ok(pool)
    }

    fn spawn_worker(&mut self, idx: usize) -> PoolResult<()> {
        let slot = self.slots_base + idx * self.layout.slot_size();
        let stack_low = slot + self.layout.stack_offset();
        let stack_top = slot + self.layout.stack_top_offset();

        // Start header below the stack top, then the entry address one
        // word lower: the child's first `ret` pops the entry and leaves
        // rsp pointing at the header.
        let header_addr = (stack_top - core::mem::size_of::<StartHeader>()) & !15;
        let entry_slot = header_addr - 8;

        let header = StartHeader {
            slot_base: slot,
            worker_id: idx as u64,
            parent_tp: crate::arch::thread_pointer(),
            shared: self.shared,
            packs: self.packs,
            futex_flags: FUTEX_PRIVATE_FLAG,
            spin_iters: self.config.spin_iters,
            alt_stack_base: slot + self.layout.alt_stack_offset(),
            alt_stack_size: self.layout.alt_stack_size,
            pinned: self.config.cpu_mask.is_some() as u32,
            _pad: 0,
            cpu_mask: self.config.cpu_mask.unwrap_or_else(CpuMask::empty),
        };

        let child_tid = (slot + CHILD_TID_OFFSET) as *mut i32;

        let mut args = CloneArgs {
            flags: CLONE_VM
                | CLONE_FS
                | CLONE_FILES
                | CLONE_SIGHAND
                | CLONE_THREAD
                | CLONE_SYSVSEM
                | CLONE_SETTLS
                | CLONE_PARENT_SETTID
                | CLONE_CHILD_CLEARTID,
            child_tid: child_tid as u64,
            parent_tid: child_tid as u64,
            exit_signal: 0,
            stack: stack_low as u64,
            stack_size: (entry_slot - stack_low) as u64,
            tls: (slot + burstpool_core::constants::TLS_IMAGE_SIZE) as u64,
            ..Default::default()
        };

        let ret = unsafe {
            core::ptr::write(header_addr as *mut StartHeader, header);
            core::ptr::write(entry_slot as *mut usize, worker_start as usize);
            sys_clone3(&mut args, core::mem::size_of::<CloneArgs>())
        };
        if ret < 0 {
            return Err(SpawnError::CloneFailed {
                worker: idx,
                errno: -ret as i32,
            }
            .into());
        }

        self.workers.push(WorkerHandle {
            slot_base: slot,
            child_tid,
        });
        Ok(())
    }

    #[inline]
    fn shared(&self) -> &SharedBlock {
        unsafe { &*self.shared }
    }

    /// Publish one batch: copy `args` into the argument arena, publish
    /// the kernel address, arm both counters, and wake up to
    /// `args.len()` parked workers.
    ///
    /// The previous batch must have been joined; at most one dispatch
    /// is in flight per pool.
    pub fn dispatch(&mut self, func: KernelFn, args: &[ArgPack]) {
        let n = args.len();
        debug_assert!(self.valid, "dispatch on an invalid pool");
        debug_assert!(n > 0 && n <= self.capacity, "bad job count {}", n);
        debug_assert_eq!(
            self.shared().work_done.load(Ordering::Acquire),
            0,
            "previous batch not joined"
        );

        unsafe {
            core::ptr::copy_nonoverlapping(args.as_ptr(), self.packs, n);
        }

        let shared = self.shared();
        shared.func_ptr.store(func as usize, Ordering::Relaxed);
        shared.work_done.store(n as i32, Ordering::Relaxed);
        shared.work_available.store(n as i32, Ordering::Release);
        unsafe {
            sys_futex_wake(
                &shared.work_available as *const AtomicI32 as *const i32,
                n as i32,
                FUTEX_PRIVATE_FLAG,
            );
        }
    }

    /// Wait for every job of the current batch to return. Pure spin:
    /// batches are small and short, so parking the orchestrator would
    /// cost more than it saves.
    pub fn join(&self) {
        if self.shared.is_null() {
            return;
        }
        let shared = self.shared();
        while shared.work_done.load(Ordering::Acquire) != 0 {
            cpu_relax();
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// NUMA placement check of the backing arena (see
    /// [`NumaArena::verify_placement`]).
    pub fn verify_placement(&self) -> bool {
        self.arena.verify_placement()
    }

    /// Wait until the kernel has cleared every worker's child-tid word.
    /// Prefers one vectored wait over the still-live words; kernels
    /// without futex_waitv fall back to per-word waits. Both use the
    /// non-private flavor because the kernel's exit-time wake hashes
    /// into the non-private bucket.
    fn wait_worker_exits(&self) {
        const WAITV_MAX: usize = 128;
        let mut waitv_ok = true;

        loop {
            let mut entries: Vec<FutexWaitv> = Vec::new();
            for w in &self.workers {
                let tid = unsafe { AtomicI32::from_ptr(w.child_tid as *mut i32) }
                    .load(Ordering::Acquire);
                if tid != 0 && entries.len() < WAITV_MAX {
                    entries.push(FutexWaitv {
                        val: tid as u32 as u64,
                        uaddr: w.child_tid as u64,
                        flags: FUTEX_32,
                        __reserved: 0,
                    });
                }
            }
            if entries.is_empty() {
                return;
            }

            if waitv_ok {
                let ret = unsafe { sys_futex_waitv(entries.as_ptr(), entries.len()) };
                if ret == -38 {
                    // ENOSYS: pre-5.16 kernel.
                    waitv_ok = false;
                }
                continue;
            }

            for e in &entries {
                unsafe {
                    sys_futex_wait(e.uaddr as *const i32, e.val as i32, 0);
                }
            }
        }
    }
}

impl Drop for BurstPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            let shared = self.shared();
            shared.shutdown.store(1, Ordering::Release);
            // Arm the wait word itself: a worker between its shutdown
            // check and its futex_wait must fail the kernel's
            // expected-value check instead of sleeping through the one
            // broadcast wake.
            shared.work_available.store(-1, Ordering::Release);
            unsafe {
                sys_futex_wake(
                    &shared.work_available as *const AtomicI32 as *const i32,
                    self.capacity.max(self.workers.len()) as i32,
                    FUTEX_PRIVATE_FLAG,
                );
            }
            self.wait_worker_exits();
            self.workers.clear();
        }
        // The arena unmaps on drop, after every worker is gone.
    }
}
