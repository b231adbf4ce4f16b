//! Fault-path demo: a kernel overflows its worker stack into the guard
//! page. Expected outcome: one diagnostic line on stderr naming the
//! crashing worker, then process termination with status 139
//! (128 + SIGSEGV).

use burstpool::{ArgPack, BurstPool, PoolConfig};

fn recurse(depth: u64) -> u64 {
    if depth == u64::MAX {
        return 0;
    }
    // Frames step down in sub-page increments, so the descent cannot
    // jump over the 4 KiB guard page.
    let pad = std::hint::black_box([depth; 32]);
    pad[0].wrapping_add(recurse(depth + 1))
}

extern "C" fn overflow_kernel(_a0: u64, _a1: u64, _a2: u64, _a3: u64, _a4: u64, _a5: u64) {
    std::hint::black_box(recurse(1));
}

fn main() {
    let mut pool = BurstPool::new(PoolConfig::new().capacity(2).stack_size(64 * 1024));
    if !pool.is_valid() {
        eprintln!("pool construction failed");
        std::process::exit(1);
    }

    println!("dispatching stack overflow; expect a fatal signal line");
    let packs = [ArgPack::new()];
    pool.dispatch(overflow_kernel, &packs);
    pool.join();

    // Unreachable: the fault handler terminates the process.
    eprintln!("fault did not fire");
    std::process::exit(1);
}
