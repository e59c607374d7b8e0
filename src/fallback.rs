//! Fallback for architectures without a wired counter backend.
//!
//! Returns monotonic nanoseconds since a process-local epoch instead of
//! processor cycles. The ordering guarantees degrade to whatever the OS
//! monotonic clock provides, and the microsecond conversion constant no
//! longer divides out to microseconds since the raw unit is a nanosecond,
//! not a cycle.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

#[inline]
pub fn read_counter_start() -> u64 {
    monotonic_nanos()
}

#[inline]
pub fn read_counter_end() -> u64 {
    monotonic_nanos()
}

#[inline]
fn monotonic_nanos() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}
