//! Worker entry and claim loop
//!
//! A worker begins life in `arch::worker_start`, which the child of
//! clone3 ret-pops into with rsp pointing at the [`StartHeader`] the
//! parent wrote at the top of the worker's stack. Until the thread-local
//! image is copied the worker must not touch anything FS-relative, so
//! everything on this path is raw pointers and raw syscalls.

use core::sync::atomic::{AtomicI32, Ordering};

use burstpool_core::constants::{TCB_SIZE, TLS_IMAGE_SIZE, WORKER_MAGIC};
use burstpool_core::layout::{MAGIC_OFFSET, RSEQ_OFFSET, WORKER_ID_OFFSET};
use burstpool_core::{ArgPack, CpuMask, KernelFn, SharedBlock};

use crate::arch::{
    cpu_relax, sys_futex_wait, sys_rseq, sys_sched_setaffinity, sys_sigaltstack, RseqArea, StackT,
    RSEQ_AREA_SIZE, RSEQ_SIG,
};

/// Startup record the parent writes at the top of the worker's primary
/// stack, directly above the entry-pointer word the child ret-pops.
/// Everything the worker needs is embedded by value; nothing points
/// back into parent stack frames.
#[repr(C)]
pub struct StartHeader {
    pub slot_base: usize,
    pub worker_id: u64,
    pub parent_tp: usize,
    pub shared: *const SharedBlock,
    pub packs: *const ArgPack,
    pub futex_flags: u32,
    pub spin_iters: u32,
    pub alt_stack_base: usize,
    pub alt_stack_size: usize,
    pub pinned: u32,
    pub _pad: u32,
    pub cpu_mask: CpuMask,
}

/// Worker body. Called by the naked start stub with the header address;
/// returning hands control back to the stub, which exits the thread.
///
/// # Safety
///
/// Only the clone3 child may call this, with a header the pool wrote.
pub(crate) unsafe extern "C" fn worker_main(header: *mut StartHeader) {
    let h = unsafe { &*header };
    let slot = h.slot_base;

    // Alternate signal stack first: from here on a guard-page hit gets
    // reported instead of double-faulting.
    let ss = StackT {
        ss_sp: h.alt_stack_base,
        ss_flags: 0,
        _pad: 0,
        ss_size: h.alt_stack_size,
    };
    unsafe {
        sys_sigaltstack(&ss);
    }

    // Fabricate the thread-local block: copy the parent's static TLS
    // image plus its TCB, then point the TCB at itself. FS already
    // points at slot+T (CLONE_SETTLS), valid only after this copy.
    unsafe {
        core::ptr::copy_nonoverlapping(
            (h.parent_tp - TLS_IMAGE_SIZE) as *const u8,
            slot as *mut u8,
            TLS_IMAGE_SIZE + TCB_SIZE,
        );
        let tcb = slot + TLS_IMAGE_SIZE;
        *(tcb as *mut usize) = tcb; // tcbhead_t.tcb
        *((tcb + 16) as *mut usize) = tcb; // tcbhead_t.self
    }

    // Publish identity for kernels and the fault handler.
    unsafe {
        *((slot + WORKER_ID_OFFSET) as *mut u64) = h.worker_id;
        *((slot + MAGIC_OFFSET) as *mut u64) = WORKER_MAGIC;
    }

    if h.pinned != 0 {
        let (ptr, size) = h.cpu_mask.as_raw();
        unsafe {
            sys_sched_setaffinity(ptr, size);
        }
    }

    // Best effort; a kernel without rseq leaves cpu_id at zero-init and
    // current_cpu() reports whatever is there.
    unsafe {
        sys_rseq((slot + RSEQ_OFFSET) as *mut RseqArea, RSEQ_AREA_SIZE, 0, RSEQ_SIG);
    }

    unsafe {
        claim_loop(&*h.shared, h.packs, h.futex_flags, h.spin_iters.max(1));
    }
}

/// The work-claim protocol.
///
/// Claims are unique because the fetch_sub return value is unique per
/// worker; a claim that loses the race (old <= 0) normalizes the counter
/// back to zero unless a new dispatch already raced in, in which case
/// the CAS fails and the counter is left alone.
///
/// # Safety
///
/// `shared` and `packs` must stay valid until `shutdown` is observed,
/// which the pool guarantees by joining every worker before unmapping.
pub(crate) unsafe fn claim_loop(
    shared: &SharedBlock,
    packs: *const ArgPack,
    futex_flags: u32,
    spin_budget: u32,
) {
    let avail_addr = &shared.work_available as *const AtomicI32 as *const i32;
    let mut spins: u32 = 0;

    loop {
        if shared.shutdown.load(Ordering::Acquire) != 0 {
            return;
        }

        // Monotonic pre-read saves the wasted atomic on the true-empty
        // path; the fetch_sub below is the claim itself.
        if shared.work_available.load(Ordering::Relaxed) > 0 {
            let old = shared.work_available.fetch_sub(1, Ordering::AcqRel);
            if old > 0 {
                let idx = (old - 1) as usize;
                let func: KernelFn =
                    unsafe { core::mem::transmute(shared.func_ptr.load(Ordering::Relaxed)) };
                let pack = unsafe { &*packs.add(idx) };
                func(
                    pack.slots[0],
                    pack.slots[1],
                    pack.slots[2],
                    pack.slots[3],
                    pack.slots[4],
                    pack.slots[5],
                );
                shared.work_done.fetch_sub(1, Ordering::AcqRel);
                spins = 0;
                continue;
            }
            let _ = shared.work_available.compare_exchange(
                old - 1,
                0,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        }

        spins += 1;
        if spins >= spin_budget {
            // Purely spinning workers can starve a descheduled sibling
            // and deadlock work conservation; park in the kernel and let
            // dispatch wake us.
            unsafe {
                sys_futex_wait(avail_addr, 0, futex_flags);
            }
            spins = 0;
        } else {
            cpu_relax();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{sys_futex_wake, FUTEX_PRIVATE_FLAG};
    use core::sync::atomic::AtomicU64;

    static OUT: [AtomicU64; 4] = [const { AtomicU64::new(0) }; 4];

    extern "C" fn write_kernel(dst: u64, val: u64, _a2: u64, _a3: u64, _a4: u64, _a5: u64) {
        let out = unsafe { &*(dst as *const AtomicU64) };
        out.store(val, Ordering::Relaxed);
    }

    /// The claim protocol is plain shared-memory logic; drive it with
    /// std threads standing in for clone3 workers.
    #[test]
    fn test_claim_loop_protocol() {
        let shared: &'static SharedBlock = Box::leak(Box::new(SharedBlock::new()));
        let packs: &'static mut [ArgPack; 4] = Box::leak(Box::new([ArgPack::new(); 4]));
        for (i, p) in packs.iter_mut().enumerate() {
            *p = ArgPack::from_args(&OUT[i] as *const AtomicU64 as u64, (i + 1) as u64, 0, 0, 0, 0);
        }
        let packs_ptr = packs.as_ptr() as usize;

        let mut handles = Vec::new();
        for _ in 0..2 {
            handles.push(std::thread::spawn(move || unsafe {
                claim_loop(shared, packs_ptr as *const ArgPack, FUTEX_PRIVATE_FLAG, 200);
            }));
        }

        // Dispatch: publish func, work_done, then work_available with
        // release, then wake.
        shared
            .func_ptr
            .store(write_kernel as usize, Ordering::Relaxed);
        shared.work_done.store(4, Ordering::Relaxed);
        shared.work_available.store(4, Ordering::Release);
        unsafe {
            sys_futex_wake(
                &shared.work_available as *const AtomicI32 as *const i32,
                4,
                FUTEX_PRIVATE_FLAG,
            );
        }

        // Join: spin until the batch drains.
        while shared.work_done.load(Ordering::Acquire) != 0 {
            std::hint::spin_loop();
        }

        for (i, out) in OUT.iter().enumerate() {
            assert_eq!(out.load(Ordering::Relaxed), (i + 1) as u64);
        }
        // Losing claimants may still be normalizing; the counter
        // settles back to zero.
        while shared.work_available.load(Ordering::Relaxed) != 0 {
            std::hint::spin_loop();
        }

        // Shutdown path: arm the wait word, then broadcast.
        shared.shutdown.store(1, Ordering::Release);
        shared.work_available.store(-1, Ordering::Release);
        unsafe {
            sys_futex_wake(
                &shared.work_available as *const AtomicI32 as *const i32,
                i32::MAX,
                FUTEX_PRIVATE_FLAG,
            );
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
