//! # burstpool-runtime
//!
//! Platform-specific runtime for the burstpool burst thread pool.
//!
//! This crate provides:
//! - The raw syscall surface (no libc, inline assembly)
//! - NUMA-bound arena allocation
//! - Worker spawn via clone3 and the claim loop
//! - The process-wide SIGSEGV fault handler
//! - NUMA topology queries for the node-sized factories

#![allow(dead_code)]

pub mod arch;
pub mod arena;
pub mod config;
pub mod fault;
pub mod pool;
pub mod tls;
pub mod topology;
pub mod worker;

// Re-exports
pub use arena::NumaArena;
pub use config::PoolConfig;
pub use pool::BurstPool;
pub use tls::{current_cpu, current_worker_id};

// Platform detection
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        // All modules above are Linux-only.
    } else {
        compile_error!("burstpool only supports Linux");
    }
}

// Architecture detection
cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub use arch::x86_64 as current_arch;
    } else {
        compile_error!("burstpool only supports x86_64");
    }
}
