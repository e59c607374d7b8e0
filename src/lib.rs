//! Cycle-accurate elapsed-time measurement for instrumenting hot code paths.
//!
//! The crate exposes two counter reads with explicit ordering guarantees
//! relative to the surrounding instructions: [`read_cycles_start`] serializes
//! the pipeline before sampling, [`read_cycles_end`] samples before a
//! trailing barrier so the window closes as tightly as possible. On top of
//! that sits a fixed-ratio conversion from cycles to microseconds, with the
//! nominal processor frequency injected as an explicit configuration value.
//!
//! ```
//! use cyclemeter::{read_cycles_end, read_cycles_start, CyclesToMicros};
//!
//! let start = read_cycles_start();
//! // ... measured region ...
//! let end = read_cycles_end();
//! let elapsed_us = CyclesToMicros::default().to_micros(end - start);
//! # let _ = elapsed_us;
//! ```
//!
//! Caller-side constraints, not mitigated here:
//! - The counter is a per-processor register. If the measured thread migrates
//!   between the two samples, the delta is meaningless or negative; pin the
//!   thread or rely on an invariant counter synchronized across cores.
//! - Counter wraparound on very long windows silently corrupts the delta.
//! - The frequency constant is a build-time assumption, not a measurement.
//!   If it does not match the deployment target, every reported duration is
//!   off proportionally.

#[cfg(test)]
#[macro_use]
extern crate approx;

use bincode::de::BorrowDecoder;
use bincode::de::Decoder;
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::BorrowDecode;
use bincode::{Decode, Encode};
use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::{Div, Mul};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[cfg_attr(target_arch = "x86_64", path = "x86_64.rs")]
#[cfg_attr(target_arch = "aarch64", path = "aarch64.rs")]
#[cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64")),
    path = "fallback.rs"
)]
mod arch;

/// A raw sample of the processor cycle counter.
///
/// The underlying type is a u64 counting cycles since an arbitrary,
/// counter-defined epoch. It is always positive to simplify the reasoning on
/// the user side; wraparound at the counter's native width is the caller's
/// hazard.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Cycles(pub u64);

impl Cycles {
    pub fn as_u64(&self) -> u64 {
        let Self(raw) = self;
        *raw
    }

    /// Upper 32 bits of the sample, as read from the counter's high word.
    pub fn high(&self) -> u32 {
        let Self(raw) = self;
        (raw >> 32) as u32
    }

    /// Lower 32 bits of the sample, as read from the counter's low word.
    pub fn low(&self) -> u32 {
        let Self(raw) = self;
        *raw as u32
    }
}

impl From<u64> for Cycles {
    fn from(raw: u64) -> Self {
        Cycles(raw)
    }
}

impl From<Cycles> for u64 {
    fn from(val: Cycles) -> Self {
        let Cycles(raw) = val;
        raw
    }
}

impl Add for Cycles {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        let Cycles(lhs) = self;
        let Cycles(rhs) = rhs;
        Cycles(lhs + rhs)
    }
}

impl Sub for Cycles {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        let Cycles(lhs) = self;
        let Cycles(rhs) = rhs;
        Cycles(lhs - rhs)
    }
}

// a way to divide a cycle count by a scalar.
// useful to compute per-iteration costs for example.
impl<T> Div<T> for Cycles
where
    T: Into<u64>,
{
    type Output = Self;
    fn div(self, rhs: T) -> Self {
        let Cycles(lhs) = self;
        Cycles(lhs / rhs.into())
    }
}

impl<T> Mul<T> for Cycles
where
    T: Into<u64>,
{
    type Output = Self;

    fn mul(self, rhs: T) -> Self {
        let Cycles(lhs) = self;
        Cycles(lhs * rhs.into())
    }
}

impl Encode for Cycles {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        let Cycles(raw) = self;
        raw.encode(encoder)
    }
}

impl<Context> Decode<Context> for Cycles {
    fn decode<D: Decoder>(decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(Cycles(u64::decode(decoder)?))
    }
}

impl<'de, Context> BorrowDecode<'de, Context> for Cycles {
    fn borrow_decode<D: BorrowDecoder<'de>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(Cycles(u64::decode(decoder)?))
    }
}

impl Display for Cycles {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let Self(raw) = self;
        write!(f, "{raw} cycles")
    }
}

/// Nominal processor frequency in megahertz.
///
/// This is a build-time assumption baked into the binary, not a measured
/// value: it is only ever used as a divisor and must be kept consistent with
/// the deployment target's actual frequency for the microsecond conversion
/// to mean anything.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuFreqMhz(pub u64);

impl CpuFreqMhz {
    /// The documented deployment target runs at 2.6GHz.
    pub const NOMINAL: CpuFreqMhz = CpuFreqMhz(2600);
}

impl Default for CpuFreqMhz {
    fn default() -> Self {
        Self::NOMINAL
    }
}

/// Converts cycle counts to microseconds at a fixed frequency.
///
/// Integer division, truncating toward zero: sub-microsecond precision is
/// dropped, not rounded. No overflow check; the input range is bounded by the
/// counter width and realistic measurement windows.
#[derive(Copy, Clone, Debug)]
pub struct CyclesToMicros {
    freq: CpuFreqMhz,
}

impl CyclesToMicros {
    pub const fn new(freq: CpuFreqMhz) -> Self {
        CyclesToMicros { freq }
    }

    #[inline]
    pub const fn to_micros(&self, cycles: Cycles) -> u64 {
        let Cycles(raw) = cycles;
        let CpuFreqMhz(mhz) = self.freq;
        raw / mhz
    }
}

impl Default for CyclesToMicros {
    fn default() -> Self {
        CyclesToMicros::new(CpuFreqMhz::NOMINAL)
    }
}

/// Samples the cycle counter after a full speculation barrier.
///
/// No instruction preceding this call in program order executes after the
/// counter is sampled, and the sample lands before later instructions begin
/// executing out of order. Use it to open a measurement window.
#[inline(always)]
pub fn read_cycles_start() -> Cycles {
    Cycles(arch::read_counter_start())
}

/// Samples the cycle counter before a trailing speculation barrier.
///
/// The read waits for all prior instructions to retire, and nothing after
/// this call executes speculatively before the sample is taken. Stronger
/// ordering than [`read_cycles_start`], appropriate for closing a window.
#[inline(always)]
pub fn read_cycles_end() -> Cycles {
    Cycles(arch::read_counter_end())
}

/// An absolute start reading converted to microseconds at the nominal
/// frequency.
///
/// Note this converts the raw counter value, not a delta: the expected usage
/// is `timer_end_in_us() - timer_start_in_us()` on the caller side.
#[inline]
pub fn timer_start_in_us() -> u64 {
    CyclesToMicros::default().to_micros(read_cycles_start())
}

/// An absolute end reading converted to microseconds at the nominal
/// frequency. See [`timer_start_in_us`] for the subtraction contract.
#[inline]
pub fn timer_end_in_us() -> u64 {
    CyclesToMicros::default().to_micros(read_cycles_end())
}

/// A source of ordered cycle samples.
///
/// The hardware counter is the only real implementation; the trait exists so
/// consumers and tests are not welded to it.
pub trait CycleSource {
    fn read_start(&self) -> Cycles;
    fn read_end(&self) -> Cycles;
}

/// The hardware cycle counter of the current processor.
#[derive(Copy, Clone, Debug, Default)]
pub struct HwCycleSource;

impl CycleSource for HwCycleSource {
    #[inline]
    fn read_start(&self) -> Cycles {
        read_cycles_start()
    }

    #[inline]
    fn read_end(&self) -> Cycles {
        read_cycles_end()
    }
}

/// A mock counter that can be controlled by the user.
/// It is clone resilient, ie a clone ticks with the original.
#[derive(Clone, Debug, Default)]
pub struct MockCycleSource(Arc<AtomicU64>);

impl MockCycleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the counter by the given number of cycles.
    pub fn increment(&self, cycles: u64) {
        let Self(counter) = self;
        counter.fetch_add(cycles, Ordering::Relaxed);
    }

    /// Sets the absolute value of the counter.
    /// Be careful, this can break the monotonicity of the source.
    pub fn set_value(&self, cycles: u64) {
        let Self(counter) = self;
        counter.store(cycles, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn value(&self) -> u64 {
        let Self(counter) = self;
        counter.load(Ordering::Relaxed)
    }
}

impl CycleSource for MockCycleSource {
    fn read_start(&self) -> Cycles {
        Cycles(self.value())
    }

    fn read_end(&self) -> Cycles {
        Cycles(self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_to_micros_truncation() {
        let convert = CyclesToMicros::default();
        assert_eq!(convert.to_micros(Cycles(0)), 0);
        assert_eq!(convert.to_micros(Cycles(2599)), 0);
        assert_eq!(convert.to_micros(Cycles(2600)), 1);
        assert_eq!(convert.to_micros(Cycles(5199)), 1);
        assert_eq!(convert.to_micros(Cycles(5200)), 2);
    }

    #[test]
    fn test_to_micros_injected_frequency() {
        let convert = CyclesToMicros::new(CpuFreqMhz(1000));
        assert_eq!(convert.to_micros(Cycles(1_000_000)), 1000);
        assert_eq!(convert.to_micros(Cycles(999)), 0);
    }

    #[test]
    fn test_cycles_comparison_operators() {
        let a = Cycles(100);
        let b = Cycles(200);

        assert!(a < b);
        assert!(b > a);
        assert_ne!(a, b);
        assert_eq!(a, Cycles(100));
    }

    #[test]
    fn test_cycles_arithmetic_operations() {
        let a = Cycles(100);
        let b = Cycles(50);

        assert_eq!(a + b, Cycles(150));
        assert_eq!(a - b, Cycles(50));
        assert_eq!(a * 2u32, Cycles(200));
        assert_eq!(a / 2u32, Cycles(50));
    }

    #[test]
    fn test_cycles_halves() {
        let sample = Cycles((7u64 << 32) | 42);
        assert_eq!(sample.high(), 7);
        assert_eq!(sample.low(), 42);
        assert_eq!(
            Cycles(((sample.high() as u64) << 32) | sample.low() as u64),
            sample
        );
    }

    #[test]
    fn test_cycles_display() {
        assert_eq!(Cycles(42).to_string(), "42 cycles");
    }

    #[test]
    fn test_mock_source() {
        let mock = MockCycleSource::new();
        assert_eq!(mock.read_start(), Cycles(0));
        mock.increment(2600);
        assert_eq!(mock.read_end(), Cycles(2600));
        mock.set_value(100);
        assert_eq!(mock.read_end(), Cycles(100));
    }

    #[test]
    fn test_mock_source_clone() {
        let mock = MockCycleSource::new();
        let clone = mock.clone();
        mock.increment(500);
        assert_eq!(clone.read_start(), Cycles(500));
        assert_eq!(clone.value(), 500);
    }

    #[test]
    fn test_mock_window_through_converter() {
        let mock = MockCycleSource::new();
        let convert = CyclesToMicros::default();

        let start = mock.read_start();
        mock.increment(26_000);
        let end = mock.read_end();

        assert_eq!(convert.to_micros(end - start), 10);
    }

    #[test]
    fn test_end_reads_are_monotonic() {
        let mut previous = read_cycles_end();
        for _ in 0..10_000 {
            let current = read_cycles_end();
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn test_window_is_ordered() {
        let start = read_cycles_start();
        let mut acc = 0u64;
        for i in 0..1_000u64 {
            acc = acc.wrapping_add(i);
        }
        std::hint::black_box(acc);
        let end = read_cycles_end();
        assert!(end >= start);
    }

    #[test]
    fn test_adjacent_reads_share_high_half() {
        let a = read_cycles_start();
        let b = read_cycles_end();
        // Two immediate reads can only straddle at most one carry into the
        // high word.
        assert!(b.high() - a.high() <= 1);
    }

    #[test]
    fn test_timer_in_us_absolute_contract() {
        let start = timer_start_in_us();
        let end = timer_end_in_us();
        // Both are absolute readings, so the window is their difference.
        assert!(end >= start);
    }

    fn spin_for(duration: Duration) {
        let begin = Instant::now();
        while begin.elapsed() < duration {
            std::hint::spin_loop();
        }
    }

    #[test]
    fn test_window_scales_linearly() {
        let convert = CyclesToMicros::default();

        let start = read_cycles_start();
        spin_for(Duration::from_millis(10));
        let end = read_cycles_end();
        let short = convert.to_micros(end - start);

        let start = read_cycles_start();
        spin_for(Duration::from_millis(20));
        let end = read_cycles_end();
        let long = convert.to_micros(end - start);

        // Any plausible x86 core clock puts a 10ms window well above 1000 µs
        // even when the nominal constant is off for the host. Other counters
        // (eg. a 24MHz aarch64 virtual counter) tick too slowly for an
        // absolute bound.
        #[cfg(target_arch = "x86_64")]
        assert!(short >= 1_000);
        assert!(short > 0);
        assert_relative_eq!(long as f64 / short as f64, 2.0, epsilon = 0.5);
    }
}
