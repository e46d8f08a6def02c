// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host monotonic clock reads and sleeps.

use rustix::time::{ClockId, Timespec, clock_gettime};

use phitap_core::time::{DeviceTime, HostClock};

const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// Returns the current `CLOCK_MONOTONIC` time in nanoseconds.
#[must_use]
pub fn now() -> DeviceTime {
    timespec_to_device_time(clock_gettime(ClockId::Monotonic))
}

fn timespec_to_device_time(timespec: Timespec) -> DeviceTime {
    let seconds = u64::try_from(timespec.tv_sec).unwrap_or(0);
    let nanos = u64::try_from(timespec.tv_nsec)
        .unwrap_or(0)
        .min(999_999_999);

    let ticks_u128 = u128::from(seconds)
        .saturating_mul(NANOS_PER_SECOND)
        .saturating_add(u128::from(nanos));
    DeviceTime(u64::try_from(ticks_u128).unwrap_or(u64::MAX))
}

/// [`HostClock`] over the monotonic clock. Sleeps with the OS scheduler, so
/// wakeups may land late by the scheduler's granularity; the engine keeps
/// its sleep slices short to bound that.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl HostClock for SystemClock {
    fn now(&mut self) -> DeviceTime {
        now()
    }

    fn sleep_until(&mut self, deadline: DeviceTime) {
        let remaining = deadline.saturating_duration_since(now());
        if remaining.ticks() > 0 {
            std::thread::sleep(std::time::Duration::from_nanos(remaining.ticks()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic_non_decreasing() {
        let first = now();
        let second = now();
        assert!(second >= first, "monotonic clock should not go backwards");
    }

    #[test]
    fn sleep_until_reaches_the_deadline() {
        let mut clock = SystemClock;
        let deadline = clock.now() + phitap_core::time::Duration::from_millis(2);
        clock.sleep_until(deadline);
        assert!(clock.now() >= deadline);
    }

    #[test]
    fn timespec_conversion_builds_nanosecond_ticks() {
        let input = Timespec {
            tv_sec: 12,
            tv_nsec: 345_678_901,
        };
        assert_eq!(
            timespec_to_device_time(input),
            DeviceTime(12 * 1_000_000_000 + 345_678_901)
        );
    }

    #[test]
    fn timespec_conversion_saturates_on_large_values() {
        let input = Timespec {
            tv_sec: i64::MAX,
            tv_nsec: 999_999_999,
        };
        assert_eq!(timespec_to_device_time(input), DeviceTime(u64::MAX));
    }
}
