//! Minimal burstpool demo: dispatch one echo batch and print the result.

use std::sync::atomic::{AtomicU64, Ordering};

use burstpool::{ArgPack, BurstPool};

extern "C" fn echo_kernel(dst: u64, val: u64, _a2: u64, _a3: u64, _a4: u64, _a5: u64) {
    unsafe { &*(dst as *const AtomicU64) }.store(val, Ordering::Relaxed);
}

fn main() {
    let out: Vec<AtomicU64> = (0..4).map(|_| AtomicU64::new(0)).collect();

    let mut pool = BurstPool::with_capacity(4);
    if !pool.is_valid() {
        eprintln!("pool construction failed");
        std::process::exit(1);
    }

    let packs: Vec<ArgPack> = (0..4)
        .map(|i| ArgPack::from_args(&out[i] as *const AtomicU64 as u64, i as u64 + 1, 0, 0, 0, 0))
        .collect();

    pool.dispatch(echo_kernel, &packs);
    pool.join();

    let got: Vec<u64> = out.iter().map(|o| o.load(Ordering::Relaxed)).collect();
    println!("echo result: {:?}", got);
    assert_eq!(got, vec![1, 2, 3, 4]);
    println!("ok");
}
