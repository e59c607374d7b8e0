//! Barriered virtual-counter reads for aarch64.
//!
//! CNTVCT_EL0 increments at the system counter frequency and is readable from
//! EL0. Reads of it can be speculated, so each sample is bracketed by `isb`
//! the same way the x86_64 sequences bracket RDTSC: barrier-then-read for the
//! start sample, and an additional trailing barrier for the end sample.

use core::arch::asm;

#[inline(always)]
pub fn read_counter_start() -> u64 {
    let counter: u64;
    // SAFETY: ISB and a CNTVCT_EL0 read are unprivileged and side-effect free.
    unsafe {
        asm!(
            "isb",
            "mrs {}, cntvct_el0",
            out(reg) counter,
            options(nostack),
        );
    }
    counter
}

#[inline(always)]
pub fn read_counter_end() -> u64 {
    let counter: u64;
    // SAFETY: ISB and a CNTVCT_EL0 read are unprivileged and side-effect free.
    unsafe {
        asm!(
            "isb",
            "mrs {}, cntvct_el0",
            "isb",
            out(reg) counter,
            options(nostack),
        );
    }
    counter
}
