//! Process-wide SIGSEGV handler
//!
//! Installed once, at first pool construction, never uninstalled. The
//! handler runs on the faulting worker's alternate stack so stack
//! overflows into a guard page still get reported instead of recursing.
//!
//! On entry it identifies the worker through the thread pointer (the
//! magic sentinel guards against non-worker threads), decodes the
//! signal frame, writes one diagnostic line with the raw write syscall
//! (no allocation, no locks), restores the default disposition,
//! re-raises the signal at the current thread, and terminates the
//! whole process with 128+signo.

use std::sync::atomic::{AtomicBool, Ordering};

use burstpool_core::error::{PoolError, PoolResult};

use crate::arch::{
    sigreturn_restorer, sys_exit_group, sys_getpid, sys_gettid, sys_rt_sigaction, sys_tgkill,
    sys_write, KernelSigaction, SA_ONSTACK, SA_RESTORER, SA_SIGINFO, SIGSEGV, SIG_DFL,
};
use crate::tls::current_worker_id;

static HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the SIGSEGV handler if this process does not have it yet.
pub fn install_fault_handler() -> PoolResult<()> {
    if HANDLER_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let act = KernelSigaction {
        handler: fault_handler as usize,
        flags: SA_SIGINFO | SA_ONSTACK | SA_RESTORER,
        restorer: sigreturn_restorer as usize,
        mask: 0,
    };
    let ret = unsafe { sys_rt_sigaction(SIGSEGV, &act) };
    if ret < 0 {
        return Err(PoolError::FaultHandler(-ret as i32));
    }
    Ok(())
}

// ─── Signal frame (x86-64 kernel layout) ─────────────────────────────

/// Prefix of siginfo_t: for SIGSEGV the fault address sits right after
/// the three header words and their padding.
#[repr(C)]
struct SigInfo {
    si_signo: i32,
    si_errno: i32,
    si_code: i32,
    _pad: i32,
    si_addr: usize,
}

#[repr(C)]
struct SigStack {
    ss_sp: usize,
    ss_flags: i32,
    _pad: i32,
    ss_size: usize,
}

/// struct sigcontext_64.
#[repr(C)]
struct SigContext {
    r8: u64,
    r9: u64,
    r10: u64,
    r11: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    rdi: u64,
    rsi: u64,
    rbp: u64,
    rbx: u64,
    rdx: u64,
    rax: u64,
    rcx: u64,
    rsp: u64,
    rip: u64,
    eflags: u64,
    cs: u16,
    gs: u16,
    fs: u16,
    ss: u16,
    err: u64,
    trapno: u64,
    oldmask: u64,
    cr2: u64,
    fpstate: usize,
    _reserved: [u64; 8],
}

#[repr(C)]
struct UContext {
    uc_flags: u64,
    uc_link: usize,
    uc_stack: SigStack,
    uc_mcontext: SigContext,
    // uc_sigmask and fp state follow; not needed here.
}

// ─── Allocation-free formatting ──────────────────────────────────────

struct LineBuf {
    buf: [u8; 256],
    len: usize,
}

impl LineBuf {
    fn new() -> Self {
        Self {
            buf: [0; 256],
            len: 0,
        }
    }

    fn push_str(&mut self, s: &str) {
        for &b in s.as_bytes() {
            if self.len < self.buf.len() {
                self.buf[self.len] = b;
                self.len += 1;
            }
        }
    }

    fn push_dec(&mut self, mut v: i64) {
        if v < 0 {
            self.push_str("-");
            v = -v;
        }
        let mut digits = [0u8; 20];
        let mut n = 0;
        loop {
            digits[n] = b'0' + (v % 10) as u8;
            v /= 10;
            n += 1;
            if v == 0 {
                break;
            }
        }
        while n > 0 {
            n -= 1;
            if self.len < self.buf.len() {
                self.buf[self.len] = digits[n];
                self.len += 1;
            }
        }
    }

    fn push_hex(&mut self, v: u64) {
        self.push_str("0x");
        let mut started = false;
        for shift in (0..16).rev() {
            let nibble = ((v >> (shift * 4)) & 0xF) as usize;
            if nibble != 0 || started || shift == 0 {
                started = true;
                if self.len < self.buf.len() {
                    self.buf[self.len] = b"0123456789abcdef"[nibble];
                    self.len += 1;
                }
            }
        }
    }

    fn emit(&self) {
        unsafe {
            sys_write(2, self.buf.as_ptr(), self.len);
        }
    }
}

/// The handler. Runs on the alt-stack.
extern "C" fn fault_handler(signo: i32, info: *mut SigInfo, uctx: *mut UContext) {
    let worker = current_worker_id();
    let (addr, ip, sp) = unsafe {
        let addr = if info.is_null() { 0 } else { (*info).si_addr };
        let (ip, sp) = if uctx.is_null() {
            (0, 0)
        } else {
            ((*uctx).uc_mcontext.rip, (*uctx).uc_mcontext.rsp)
        };
        (addr, ip, sp)
    };

    let mut line = LineBuf::new();
    line.push_str("burstpool: fatal signal ");
    line.push_dec(signo as i64);
    line.push_str(" on worker ");
    line.push_dec(worker);
    line.push_str(" addr ");
    line.push_hex(addr as u64);
    line.push_str(" ip ");
    line.push_hex(ip);
    line.push_str(" sp ");
    line.push_hex(sp);
    line.push_str("\n");
    line.emit();

    // Hand the signal back to the default disposition so the process
    // dies as "killed by SIGSEGV"; exit_group is the backstop.
    let dfl = KernelSigaction {
        handler: SIG_DFL,
        flags: 0,
        restorer: 0,
        mask: 0,
    };
    unsafe {
        sys_rt_sigaction(signo, &dfl);
    }
    sys_tgkill(sys_getpid(), sys_gettid(), signo);
    sys_exit_group(128 + signo);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_idempotent() {
        assert!(install_fault_handler().is_ok());
        assert!(install_fault_handler().is_ok());
    }

    #[test]
    fn test_linebuf_dec() {
        let mut l = LineBuf::new();
        l.push_dec(0);
        l.push_str(" ");
        l.push_dec(-1);
        l.push_str(" ");
        l.push_dec(12345);
        assert_eq!(&l.buf[..l.len], b"0 -1 12345");
    }

    #[test]
    fn test_linebuf_hex() {
        let mut l = LineBuf::new();
        l.push_hex(0);
        l.push_str(" ");
        l.push_hex(0xDEAD_BEEF);
        assert_eq!(&l.buf[..l.len], b"0x0 0xdeadbeef");
    }

    #[test]
    fn test_linebuf_truncates() {
        let mut l = LineBuf::new();
        for _ in 0..100 {
            l.push_str("0123456789");
        }
        assert_eq!(l.len, 256);
    }

    #[test]
    fn test_sigcontext_offsets() {
        // rip and rsp must sit where the kernel puts them, or the
        // diagnostic prints garbage.
        assert_eq!(core::mem::offset_of!(SigContext, rsp), 15 * 8);
        assert_eq!(core::mem::offset_of!(SigContext, rip), 16 * 8);
        assert_eq!(core::mem::offset_of!(UContext, uc_mcontext), 40);
    }

    #[test]
    fn test_siginfo_addr_offset() {
        assert_eq!(core::mem::offset_of!(SigInfo, si_addr), 16);
    }
}
