// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chart-to-device clock synchronization.
//!
//! [`ClockSync`] maintains a smoothed affine mapping from chart time to
//! device time:
//!
//! ```text
//! device_time = origin + offset + rate * chart_time
//! ```
//!
//! The first calibration sample sets the mapping exactly. Later samples
//! update rate and offset through exponential moving averages, so a single
//! jittery sample cannot dominate the estimate.
//!
//! Every calibration also measures drift: how far the rate observed between
//! the last two samples departs from the rate the mapping assumed. When it
//! exceeds [`ClockConfig::drift_threshold`], [`ClockSync::drift_correction`]
//! reports a [`ClockDesync`] and the engine pauses to [`ClockSync::realign`].

use crate::error::ConfigError;
use crate::time::{ChartTime, DeviceTime};

/// Tuning for [`ClockSync`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClockConfig {
    /// Device ticks per chart microsecond when the game runs at nominal
    /// speed. With nanosecond ticks this is `1000.0`.
    pub nominal_rate: f64,
    /// EMA weight of a new rate observation, in `(0, 1]`.
    pub rate_alpha: f64,
    /// EMA weight of a new offset error, in `(0, 1]`.
    pub offset_alpha: f64,
    /// Relative drift above which a desync is raised.
    pub drift_threshold: f64,
}

impl ClockConfig {
    /// Nanosecond host ticks, moderate smoothing, 1% drift threshold.
    #[must_use]
    pub const fn nanosecond_ticks() -> Self {
        Self {
            nominal_rate: 1000.0,
            rate_alpha: 0.2,
            offset_alpha: 0.2,
            drift_threshold: 0.01,
        }
    }

    /// Checks the configuration for out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a non-positive rate or threshold, or a
    /// smoothing factor outside `(0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |v: f64| v > 0.0 && v.is_finite();
        if !positive(self.nominal_rate) {
            return Err(ConfigError::NonPositive("nominal_rate"));
        }
        if !positive(self.drift_threshold) {
            return Err(ConfigError::NonPositive("drift_threshold"));
        }
        let unit = |a: f64| a > 0.0 && a <= 1.0;
        if !unit(self.rate_alpha) || !unit(self.offset_alpha) {
            return Err(ConfigError::Inconsistent(
                "smoothing factors must lie in (0, 1]",
            ));
        }
        Ok(())
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::nanosecond_ticks()
    }
}

/// One observation pairing device and chart time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationSample {
    /// When the observation was made on the device clock.
    pub device: DeviceTime,
    /// The chart position observed at that instant.
    pub chart: ChartTime,
}

/// Drift beyond the configured threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockDesync {
    /// Relative drift between the last two samples.
    pub measured_drift: f64,
    /// The configured threshold.
    pub threshold: f64,
}

/// A snapshot of the chart-to-device mapping.
///
/// Snapshots are plain values: converting through one never observes later
/// calibrations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockState {
    origin: DeviceTime,
    offset_ticks: f64,
    rate: f64,
    measured_drift: f64,
}

impl ClockState {
    /// Device time the mapping is anchored at.
    #[inline]
    #[must_use]
    pub const fn origin(&self) -> DeviceTime {
        self.origin
    }

    /// Offset from `origin`, in ticks, of chart time zero.
    #[inline]
    #[must_use]
    pub const fn offset_ticks(&self) -> f64 {
        self.offset_ticks
    }

    /// Device ticks per chart microsecond.
    #[inline]
    #[must_use]
    pub const fn rate(&self) -> f64 {
        self.rate
    }

    /// Relative drift measured by the most recent calibration.
    #[inline]
    #[must_use]
    pub const fn measured_drift(&self) -> f64 {
        self.measured_drift
    }

    /// Maps a chart time to a device time.
    ///
    /// Non-decreasing in `chart`: the rate is always positive, and both the
    /// rounding and the clamping at the ends of the device clock preserve
    /// order.
    #[must_use]
    pub fn to_device_time(&self, chart: ChartTime) -> DeviceTime {
        let ticks = self.offset_ticks + self.rate * chart.as_micros() as f64;
        self.origin.saturating_offset(round_ticks(ticks))
    }
}

/// Owns the [`ClockState`] and updates it from calibration samples.
#[derive(Clone, Debug)]
pub struct ClockSync {
    config: ClockConfig,
    state: ClockState,
    last: Option<CalibrationSample>,
    last_observed_rate: Option<f64>,
}

impl ClockSync {
    /// Creates a synchronizer mapping chart time zero to `origin` at the
    /// nominal rate, until the first calibration arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` is invalid.
    pub fn new(config: ClockConfig, origin: DeviceTime) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: ClockState {
                origin,
                offset_ticks: 0.0,
                rate: config.nominal_rate,
                measured_drift: 0.0,
            },
            last: None,
            last_observed_rate: None,
        })
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ClockConfig {
        &self.config
    }

    /// A snapshot of the current mapping.
    #[must_use]
    pub const fn state(&self) -> ClockState {
        self.state
    }

    /// Maps a chart time through the current mapping.
    #[must_use]
    pub fn to_device_time(&self, chart: ChartTime) -> DeviceTime {
        self.state.to_device_time(chart)
    }

    /// Folds a sample into the mapping.
    ///
    /// Samples that go backwards on either clock, or that repeat the
    /// previous chart time, update the offset but not the rate.
    pub fn calibrate(&mut self, observed: DeviceTime, chart: ChartTime) {
        let sample = CalibrationSample {
            device: observed,
            chart,
        };
        let Some(prev) = self.last else {
            self.anchor(sample);
            self.last = Some(sample);
            return;
        };

        let d_chart = (chart - prev.chart).as_micros();
        if d_chart > 0 && observed >= prev.device {
            let d_device = observed.saturating_duration_since(prev.device).ticks();
            let observed_rate = d_device as f64 / d_chart as f64;
            if observed_rate > 0.0 {
                self.state.measured_drift = observed_rate / self.state.rate - 1.0;
                self.last_observed_rate = Some(observed_rate);
                let a = self.config.rate_alpha;
                self.state.rate = a * observed_rate + (1.0 - a) * self.state.rate;
            }
        }

        let predicted = self.state.offset_ticks + self.state.rate * chart.as_micros() as f64;
        let error = relative_ticks(observed, self.state.origin) - predicted;
        self.state.offset_ticks += self.config.offset_alpha * error;
        self.last = Some(sample);
    }

    /// Reports a desync if the latest measured drift exceeds the threshold.
    #[must_use]
    pub fn drift_correction(&self) -> Option<ClockDesync> {
        let drift = self.state.measured_drift;
        let magnitude = if drift < 0.0 { -drift } else { drift };
        (magnitude > self.config.drift_threshold).then_some(ClockDesync {
            measured_drift: drift,
            threshold: self.config.drift_threshold,
        })
    }

    /// Snaps the mapping onto the latest sample and the latest observed
    /// rate, discarding smoothing history.
    pub fn realign(&mut self) {
        if let Some(rate) = self.last_observed_rate {
            self.state.rate = rate;
        }
        if let Some(last) = self.last {
            self.anchor(last);
        }
        self.state.measured_drift = 0.0;
    }

    fn anchor(&mut self, sample: CalibrationSample) {
        self.state.offset_ticks = relative_ticks(sample.device, self.state.origin)
            - self.state.rate * sample.chart.as_micros() as f64;
    }
}

/// Signed tick distance from `origin` to `t`.
fn relative_ticks(t: DeviceTime, origin: DeviceTime) -> f64 {
    if t >= origin {
        t.saturating_duration_since(origin).ticks() as f64
    } else {
        -(origin.saturating_duration_since(t).ticks() as f64)
    }
}

/// Rounds half away from zero; `as` saturates out-of-range values.
#[expect(
    clippy::cast_possible_truncation,
    reason = "float-to-int `as` saturates, which is the clamping we want"
)]
fn round_ticks(v: f64) -> i64 {
    let whole = v as i64;
    let frac = v - whole as f64;
    if frac >= 0.5 {
        whole.saturating_add(1)
    } else if frac <= -0.5 {
        whole.saturating_sub(1)
    } else {
        whole
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_config() -> ClockConfig {
        ClockConfig {
            nominal_rate: 1.0,
            ..ClockConfig::nanosecond_ticks()
        }
    }

    fn us(v: i64) -> ChartTime {
        ChartTime::from_micros(v)
    }

    #[test]
    fn uncalibrated_runs_at_nominal_rate() {
        let sync = ClockSync::new(ClockConfig::default(), DeviceTime(5_000)).unwrap();
        assert_eq!(sync.to_device_time(ChartTime::from_millis(2)), DeviceTime(2_005_000));
    }

    #[test]
    fn first_sample_sets_mapping_exactly() {
        let mut sync = ClockSync::new(unit_config(), DeviceTime(0)).unwrap();
        sync.calibrate(DeviceTime(1_000), us(0));
        assert_eq!(sync.to_device_time(us(0)), DeviceTime(1_000));
        assert_eq!(sync.to_device_time(us(250)), DeviceTime(1_250));
    }

    #[test]
    fn midpoint_lands_between_samples() {
        let mut sync = ClockSync::new(unit_config(), DeviceTime(0)).unwrap();
        sync.calibrate(DeviceTime(1_000), us(0));
        sync.calibrate(DeviceTime(2_005), us(1_000));
        let mid = sync.to_device_time(us(500));
        assert!(mid > DeviceTime(1_000) && mid < DeviceTime(2_005), "{mid:?}");
        assert!(sync.state().rate() > 1.0, "rate moves toward the observed 1.005");
    }

    #[test]
    fn converges_on_steady_samples() {
        let mut sync = ClockSync::new(unit_config(), DeviceTime(0)).unwrap();
        for i in 0..50_u64 {
            sync.calibrate(DeviceTime(300 + i * 1_010), us(i as i64 * 1_000));
        }
        let predicted = sync.to_device_time(us(50_000)).ticks();
        let expected = 300 + 50 * 1_010;
        assert!(predicted.abs_diff(expected) < 20, "{predicted} vs {expected}");
    }

    #[test]
    fn snapshot_ignores_later_calibration() {
        let mut sync = ClockSync::new(unit_config(), DeviceTime(0)).unwrap();
        sync.calibrate(DeviceTime(1_000), us(0));
        let snapshot = sync.state();
        sync.calibrate(DeviceTime(9_000), us(1_000));
        assert_eq!(snapshot.to_device_time(us(100)), DeviceTime(1_100));
        assert_ne!(sync.to_device_time(us(100)), DeviceTime(1_100));
    }

    #[test]
    fn drift_over_threshold_raises_desync() {
        let mut sync = ClockSync::new(unit_config(), DeviceTime(0)).unwrap();
        sync.calibrate(DeviceTime(0), us(0));
        sync.calibrate(DeviceTime(1_005), us(1_000));
        assert!(sync.drift_correction().is_none(), "0.5% is within 1%");

        sync.calibrate(DeviceTime(2_105), us(2_000));
        let desync = sync.drift_correction().unwrap();
        assert!(desync.measured_drift > 0.01);
        assert!((desync.threshold - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn realign_adopts_observed_rate() {
        let mut sync = ClockSync::new(unit_config(), DeviceTime(0)).unwrap();
        sync.calibrate(DeviceTime(0), us(0));
        sync.calibrate(DeviceTime(1_100), us(1_000));
        assert!(sync.drift_correction().is_some());

        sync.realign();
        assert!(sync.drift_correction().is_none());
        assert_eq!(sync.to_device_time(us(1_000)), DeviceTime(1_100));
        assert_eq!(sync.to_device_time(us(2_000)), DeviceTime(2_200));

        // Samples at the new rate no longer count as drift.
        sync.calibrate(DeviceTime(2_200), us(2_000));
        assert!(sync.drift_correction().is_none());
    }

    #[test]
    fn backwards_sample_keeps_rate() {
        let mut sync = ClockSync::new(unit_config(), DeviceTime(0)).unwrap();
        sync.calibrate(DeviceTime(1_000), us(1_000));
        sync.calibrate(DeviceTime(900), us(900));
        assert!((sync.state().rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_bad_config() {
        let mut cfg = unit_config();
        cfg.rate_alpha = 0.0;
        assert!(ClockSync::new(cfg, DeviceTime(0)).is_err());
        cfg = unit_config();
        cfg.nominal_rate = -1.0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NonPositive("nominal_rate"))
        );
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_ticks(1.5), 2);
        assert_eq!(round_ticks(1.49), 1);
        assert_eq!(round_ticks(-1.5), -2);
        assert_eq!(round_ticks(f64::MAX), i64::MAX);
    }
}
