//! Variable-load stress driver.
//!
//! Capacity 15, 5000 dispatch/join iterations, 4 KiB worker stacks.
//! Batch size cycles through {15, 7, 1, 11}; every job result is
//! verified bit-exact against the reference computation. Reports the
//! worst-case dispatch and join latency seen.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use burstpool::{env_get, ArgPack, BurstPool, PoolConfig};

const CAPACITY: usize = 15;

fn mix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn calc_result(iter: u64, job: u64) -> u64 {
    mix64(iter ^ job).wrapping_add((iter.wrapping_add(job)).wrapping_mul(128).wrapping_add(8128))
}

extern "C" fn stress_kernel(dst: u64, iter: u64, job: u64, _a3: u64, _a4: u64, _a5: u64) {
    let v = calc_result(iter, job);
    unsafe { &*(dst as *const AtomicU64) }.store(v, Ordering::Relaxed);
}

fn main() {
    let iterations: u64 = env_get("STRESS_ITERATIONS", 5000);

    let mut pool = BurstPool::new(PoolConfig::new().capacity(CAPACITY).stack_size(4096));
    if !pool.is_valid() {
        eprintln!("pool construction failed");
        std::process::exit(1);
    }

    let out: Vec<AtomicU64> = (0..CAPACITY).map(|_| AtomicU64::new(0)).collect();

    let mut max_dispatch_ns: u128 = 0;
    let mut max_join_ns: u128 = 0;

    let bench_start = Instant::now();
    for iter in 0..iterations {
        let jobs = match iter % 5 {
            1 => CAPACITY / 2,
            2 => 1,
            3 => CAPACITY * 3 / 4,
            _ => CAPACITY,
        };

        let packs: Vec<ArgPack> = (0..jobs)
            .map(|j| {
                ArgPack::from_args(&out[j] as *const AtomicU64 as u64, iter, j as u64, 0, 0, 0)
            })
            .collect();

        let t0 = Instant::now();
        pool.dispatch(stress_kernel, &packs);
        let t1 = Instant::now();
        pool.join();
        let t2 = Instant::now();

        max_dispatch_ns = max_dispatch_ns.max((t1 - t0).as_nanos());
        max_join_ns = max_join_ns.max((t2 - t1).as_nanos());

        for j in 0..jobs {
            let got = out[j].load(Ordering::Relaxed);
            let exp = calc_result(iter, j as u64);
            if got != exp {
                eprintln!(
                    "Mismatch at iter {} job {}: got {} expected {}",
                    iter, j, got, exp
                );
                std::process::exit(1);
            }
        }

        if iter % 1000 == 0 && iter != 0 {
            println!("ok through iter {}", iter);
        }
    }
    let total = bench_start.elapsed();

    println!("Stress test passed.");
    println!("max dispatch ns: {}", max_dispatch_ns);
    println!("max join ns: {}", max_join_ns);
    println!("total benchmark ns: {}", total.as_nanos());
    println!(
        "total benchmark: {} s {} ms",
        total.as_secs(),
        total.subsec_millis()
    );
}
