//! Serialized TSC read sequences for x86_64.
//!
//! The start and end sequences are deliberately asymmetric, following Intel's
//! benchmarking guidance: the start sample must only be taken once every
//! prior instruction has committed (CPUID then RDTSC), while the end sample
//! is taken as early as possible and immediately bounded by a trailing
//! barrier (RDTSCP then CPUID) so later instructions cannot slip into the
//! measured window speculatively.
//!
//! CPUID clobbers rax, rbx, rcx and rdx. rbx cannot be named as an inline-asm
//! operand (LLVM reserves it), so it is saved and restored around each
//! sequence; the other three are declared as operands.

use core::arch::asm;

/// CPUID then RDTSC: a full speculation barrier before the counter sample.
#[inline(always)]
pub fn read_counter_start() -> u64 {
    let hi: u32;
    let lo: u32;
    // SAFETY: CPUID(leaf 0) and RDTSC are unprivileged and side-effect free;
    // every register they touch is an operand, a clobber or saved/restored.
    unsafe {
        asm!(
            "mov {tmp}, rbx",
            "xor eax, eax",
            "cpuid",
            "rdtsc",
            "mov {hi:e}, edx",
            "mov {lo:e}, eax",
            "mov rbx, {tmp}",
            tmp = out(reg) _,
            hi = out(reg) hi,
            lo = out(reg) lo,
            out("eax") _,
            out("ecx") _,
            out("edx") _,
            options(nostack),
        );
    }
    ((hi as u64) << 32) | (lo as u64)
}

/// RDTSCP then CPUID: the read itself waits for all prior instructions to
/// retire, and the trailing barrier keeps everything after the call from
/// executing before the sample is taken.
#[inline(always)]
pub fn read_counter_end() -> u64 {
    let hi: u32;
    let lo: u32;
    // SAFETY: RDTSCP and CPUID(leaf 0) are unprivileged and side-effect free;
    // every register they touch is an operand, a clobber or saved/restored.
    unsafe {
        asm!(
            "mov {tmp}, rbx",
            "rdtscp",
            "mov {hi:e}, edx",
            "mov {lo:e}, eax",
            "xor eax, eax",
            "cpuid",
            "mov rbx, {tmp}",
            tmp = out(reg) _,
            hi = out(reg) hi,
            lo = out(reg) lo,
            out("eax") _,
            out("ecx") _,
            out("edx") _,
            options(nostack),
        );
    }
    ((hi as u64) << 32) | (lo as u64)
}
