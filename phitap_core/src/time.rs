// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chart time, device time, and the host clock seam.
//!
//! Two clocks meet in this crate:
//!
//! - [`ChartTime`] is a signed fixed-point timestamp in microseconds,
//!   relative to the start of the chart. Differences between chart times are
//!   also expressed as `ChartTime`.
//! - [`DeviceTime`] is an instant on the host's monotonic clock, in
//!   nanosecond ticks. This is the clock the engine sleeps against and the
//!   one the Clock Synchronizer maps chart time onto. [`Duration`] is a
//!   span in the same ticks.
//!
//! [`HostClock`] abstracts reading and sleeping on the device clock, so the
//! engine can be driven by a real monotonic clock or a virtual one in tests.

use core::fmt;
use core::ops::{Add, Neg, Sub};

const MICROS_PER_MILLI: i64 = 1_000;
const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_MICRO: u64 = 1_000;

// ---------------------------------------------------------------------------
// ChartTime
// ---------------------------------------------------------------------------

/// A chart-relative timestamp (or span) in microseconds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ChartTime(pub i64);

impl ChartTime {
    /// The chart origin.
    pub const ZERO: Self = Self(0);

    /// Creates a chart time from whole milliseconds.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(MICROS_PER_MILLI))
    }

    /// Creates a chart time from microseconds.
    #[inline]
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Returns the raw microsecond value.
    #[inline]
    #[must_use]
    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Returns the value in (fractional) milliseconds.
    #[inline]
    #[must_use]
    pub fn as_millis_f64(self) -> f64 {
        self.0 as f64 / MICROS_PER_MILLI as f64
    }

    /// Returns `true` if this is strictly greater than zero.
    #[inline]
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Saturating addition.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Add for ChartTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl Sub for ChartTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl Neg for ChartTime {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

impl fmt::Debug for ChartTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChartTime({}us)", self.0)
    }
}

// ---------------------------------------------------------------------------
// DeviceTime
// ---------------------------------------------------------------------------

/// An instant on the host monotonic clock, in nanosecond ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DeviceTime(pub u64);

impl DeviceTime {
    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Returns the duration between `self` and an earlier time, or zero if
    /// `earlier` is after `self`.
    #[inline]
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }

    /// Adds a duration, clamping at the end of the clock.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.0))
    }

    /// Subtracts a duration, clamping at the clock's origin.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.0))
    }

    /// Shifts by a signed number of ticks, clamping at both ends.
    #[inline]
    #[must_use]
    pub const fn saturating_offset(self, ticks: i64) -> Self {
        Self(self.0.saturating_add_signed(ticks))
    }
}

impl Add<Duration> for DeviceTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        self.saturating_add(rhs)
    }
}

impl Sub<Duration> for DeviceTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Duration) -> Self {
        self.saturating_sub(rhs)
    }
}

impl fmt::Debug for DeviceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceTime({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Duration
// ---------------------------------------------------------------------------

/// A span of device-clock ticks (nanoseconds).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Duration(pub u64);

impl Duration {
    /// A zero-length duration.
    pub const ZERO: Self = Self(0);

    /// Creates a duration from whole milliseconds.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(NANOS_PER_MILLI))
    }

    /// Creates a duration from whole microseconds.
    #[inline]
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros.saturating_mul(NANOS_PER_MICRO))
    }

    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Returns the value in (fractional) milliseconds.
    #[inline]
    #[must_use]
    pub fn as_millis_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_MILLI as f64
    }

    /// Scales by a non-negative factor, saturating at `u64::MAX` ticks.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "float-to-int `as` saturates; the factor is clamped non-negative"
    )]
    pub fn mul_f64(self, factor: f64) -> Self {
        let factor = if factor > 0.0 { factor } else { 0.0 };
        Self((self.0 as f64 * factor) as u64)
    }

    /// Saturating addition.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Add for Duration {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// HostClock
// ---------------------------------------------------------------------------

/// Reads and waits on the device clock.
///
/// Backends implement this over the platform monotonic clock (see
/// `phitap_backend_android::SystemClock`); tests use a virtual clock whose
/// `sleep_until` simply jumps forward.
pub trait HostClock {
    /// Returns the current device time.
    fn now(&mut self) -> DeviceTime;

    /// Blocks until `deadline` has been reached.
    ///
    /// Returning early is allowed; callers re-check [`now`](Self::now).
    fn sleep_until(&mut self, deadline: DeviceTime);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_time_units() {
        let t = ChartTime::from_millis(250);
        assert_eq!(t.as_micros(), 250_000);
        assert!((t.as_millis_f64() - 250.0).abs() < 1e-9, "250ms");
        assert_eq!(-t, ChartTime(-250_000));
    }

    #[test]
    fn chart_time_arithmetic_saturates() {
        let max = ChartTime(i64::MAX);
        assert_eq!(max + ChartTime(1), max);
        assert_eq!(ChartTime(i64::MIN) - ChartTime(1), ChartTime(i64::MIN));
        assert_eq!(
            ChartTime::from_millis(3) - ChartTime::from_millis(1),
            ChartTime::from_millis(2)
        );
    }

    #[test]
    fn device_time_duration_ops() {
        let t = DeviceTime(1000);
        let d = Duration(200);
        assert_eq!((t + d).ticks(), 1200);
        assert_eq!((t - d).ticks(), 800);
        assert_eq!(t - Duration(5000), DeviceTime(0));
        assert_eq!(t.saturating_duration_since(DeviceTime(1500)), Duration::ZERO);
        assert_eq!(t.saturating_duration_since(DeviceTime(400)), Duration(600));
        assert_eq!(t.saturating_offset(-300), DeviceTime(700));
        assert_eq!(t.saturating_offset(-3000), DeviceTime(0));
    }

    #[test]
    fn duration_scaling() {
        let d = Duration::from_millis(100);
        assert_eq!(d.mul_f64(2.0), Duration::from_millis(200));
        assert_eq!(d.mul_f64(-1.0), Duration::ZERO);
        assert_eq!(Duration(u64::MAX).mul_f64(4.0), Duration(u64::MAX));
        assert_eq!(Duration::from_micros(3), Duration(3_000));
    }
}
