//! # burstpool - Burst Thread Pool
//!
//! Low-latency fan-out/fan-in kernel dispatch for Linux x86-64.
//!
//! A pool spawns N persistent workers through raw clone3 (no pthread),
//! then supports repeated dispatch → join cycles: the orchestrator
//! publishes up to N per-job argument records plus one kernel address,
//! workers claim job indices off a shared counter, and join returns
//! once every job has completed.
//!
//! ## Quick Start
//!
//! ```ignore
//! use burstpool::{ArgPack, BurstPool};
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! extern "C" fn echo(dst: u64, val: u64, _: u64, _: u64, _: u64, _: u64) {
//!     unsafe { &*(dst as *const AtomicU64) }.store(val, Ordering::Relaxed);
//! }
//!
//! let out: Vec<AtomicU64> = (0..4).map(|_| AtomicU64::new(0)).collect();
//! let mut pool = BurstPool::with_capacity(4);
//! assert!(pool.is_valid());
//!
//! let packs: Vec<ArgPack> = (0..4)
//!     .map(|i| ArgPack::from_args(&out[i] as *const _ as u64, i as u64 + 1, 0, 0, 0, 0))
//!     .collect();
//! pool.dispatch(echo, &packs);
//! pool.join();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Orchestrator                        │
//! │        dispatch(func, args) ──────── join()             │
//! └─────────────────────────────────────────────────────────┘
//!              │ release store + futex wake     ▲ acquire
//!              ▼                                │
//! ┌─────────────────────────────────────────────────────────┐
//! │  Shared block:  work_available | shutdown | func_ptr    │
//! │                 work_done (own cache line)              │
//! └─────────────────────────────────────────────────────────┘
//!              │ fetch_sub claims               │ fetch_sub
//!    ┌─────────┴─────────┬──────────────────────┴──┐
//!    ▼                   ▼                         ▼
//! ┌────────┐        ┌────────┐                ┌────────┐
//! │Worker 0│        │Worker 1│      ...       │Worker N│
//! └────────┘        └────────┘                └────────┘
//!    one NUMA-bound arena: TLS slots, guard-paged stacks,
//!    alt-stacks, argument packs
//! ```
//!
//! Kernels run on a fabricated thread-local block copied from the
//! orchestrator's static image; they should stick to plain computation
//! and atomics rather than thread-local-heavy runtime machinery.

// Re-export core types
pub use burstpool_core::{
    ArgPack, CpuMask, KernelFn, MemoryError, PoolError, PoolResult, SharedBlock, SlotLayout,
    SpawnError,
};

// Re-export log macros and their controls
pub use burstpool_core::{bdebug, berror, binfo, btrace, bwarn};
pub use burstpool_core::blog::{init as init_logging, set_log_level, LogLevel};

// Re-export env utilities
pub use burstpool_core::{env_get, env_get_bool, env_get_opt};

// Re-export runtime types
pub use burstpool_runtime::{
    current_cpu, current_worker_id, topology, BurstPool, NumaArena, PoolConfig,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    extern "C" fn bump(ctr: u64, _a1: u64, _a2: u64, _a3: u64, _a4: u64, _a5: u64) {
        unsafe { &*(ctr as *const AtomicU64) }.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn test_facade_smoke() {
        let ctr: &'static AtomicU64 = Box::leak(Box::new(AtomicU64::new(0)));
        let mut pool = BurstPool::with_capacity(2);
        assert!(pool.is_valid());

        let packs = vec![ArgPack::from_args(ctr as *const AtomicU64 as u64, 0, 0, 0, 0, 0); 2];
        pool.dispatch(bump, &packs);
        pool.join();
        assert_eq!(ctr.load(Ordering::Relaxed), 2);

        // Off-worker helpers degrade to -1.
        assert_eq!(current_worker_id(), -1);
    }
}
