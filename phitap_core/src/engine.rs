// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The execution engine: fires a [`GesturePlan`] against the device clock.
//!
//! The [`Engine`] is a single-threaded cooperative state machine:
//!
//! ```text
//!   Idle ──► Running ◄──► Paused(ClockDesync | LinkDown)
//!               │                    │
//!               ▼                    ▼
//!           Completed             Aborted
//! ```
//!
//! For each segment in [`GesturePlan::firing_order`] it waits until
//! `to_device_time(segment.time) - latency_estimate`, then injects through
//! the [`LinkManager`]. Waiting happens in short slices; between slices the
//! engine polls its [`SignalSource`] and runs periodic health checks. These
//! waits are the only suspension points, so cancellation and pauses take
//! effect between injections, never during one.
//!
//! A segment is confirmed only when the link accepts it; the cursor then
//! advances and never moves back. After a reconnect the engine resumes at
//! the first unconfirmed segment, re-pressing any contacts that were held
//! when the link dropped (see [`EngineConfig::restore_open_contacts`]).
//! If the session is aborted while the link is still up, contacts that are
//! still held get a best-effort release so nothing stays pressed on the
//! device.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use kurbo::Point;

use crate::clock::{CalibrationSample, ClockSync};
use crate::error::{LinkError, SessionError};
use crate::gesture::{FiringStep, GesturePlan, Phase, Slot};
use crate::link::{CommandOrigin, Generation, Health, LinkManager, TouchCommand, Transport};
use crate::time::{DeviceTime, Duration, HostClock};
#[cfg(feature = "trace-rich")]
use crate::trace::SegmentFiredEvent;
use crate::trace::{
    AbortedEvent, CalibrationEvent, ClockDesyncEvent, LinkDownCause, LinkDownEvent,
    ReconnectedEvent, SessionSummary, SessionSummaryBuilder, StaleInjectionEvent,
    StateChangeEvent, Tracer,
};

// ---------------------------------------------------------------------------
// States and signals
// ---------------------------------------------------------------------------

/// Why the engine is paused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PauseReason {
    /// Waiting for the clock mapping to settle after a realignment.
    ClockDesync,
    /// Waiting for the device link to come back.
    LinkDown,
}

/// Why the session stopped for good.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// Every reconnect attempt failed.
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// The caller asked to stop.
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReconnectExhausted { attempts } => {
                write!(f, "reconnect failed after {attempts} attempts")
            }
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Engine lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Not started.
    Idle,
    /// Firing segments.
    Running,
    /// Temporarily not firing.
    Paused(PauseReason),
    /// Every segment was confirmed.
    Completed,
    /// Stopped before the plan completed.
    Aborted(AbortReason),
}

/// A message for the engine from outside its thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineSignal {
    /// A background task saw the link of session `generation` die. Ignored
    /// once the link has moved on to another generation.
    LinkDown {
        /// Session the reporting task belonged to.
        generation: Generation,
    },
    /// A new clock observation.
    Calibration(CalibrationSample),
    /// Stop at the next suspension point.
    Cancel,
}

/// Where the engine polls for [`EngineSignal`]s.
pub trait SignalSource {
    /// Returns the next pending signal without blocking.
    fn poll_signal(&mut self) -> Option<EngineSignal>;
}

impl SignalSource for alloc::collections::VecDeque<EngineSignal> {
    fn poll_signal(&mut self) -> Option<EngineSignal> {
        self.pop_front()
    }
}

/// A [`SignalSource`] that never signals.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSignals;

impl SignalSource for NoSignals {
    fn poll_signal(&mut self) -> Option<EngineSignal> {
        None
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the [`Engine`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Longest single sleep while waiting for a segment.
    pub max_sleep_slice: Duration,
    /// EMA smoothing factor for the latency estimate (0.0–1.0).
    pub latency_alpha: f64,
    /// Latency assumed before the first sample.
    pub initial_latency: Duration,
    /// Time between health checks while running.
    pub health_interval: Duration,
    /// Longest a clock-desync pause waits for a calibration sample.
    pub realign_settle: Duration,
    /// Re-press held contacts after a reconnect.
    pub restore_open_contacts: bool,
}

impl EngineConfig {
    /// Defaults for a USB-attached device.
    #[must_use]
    pub const fn usb() -> Self {
        Self {
            max_sleep_slice: Duration::from_millis(2),
            latency_alpha: 0.2,
            initial_latency: Duration::from_millis(3),
            health_interval: Duration::from_millis(1_000),
            realign_settle: Duration::from_millis(250),
            restore_open_contacts: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::usb()
    }
}

/// Result of a completed session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionReport {
    /// Execution statistics.
    pub summary: SessionSummary,
    /// Generation of the session the plan finished on.
    pub generation: Generation,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Exponential moving average tracker.
#[derive(Clone, Copy, Debug)]
struct Ema {
    value: f64,
    alpha: f64,
    initialized: bool,
}

impl Ema {
    const fn seeded(value: f64, alpha: f64) -> Self {
        Self {
            value,
            alpha,
            initialized: false,
        }
    }

    fn update(&mut self, sample: f64) {
        if self.initialized {
            self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
        } else {
            self.value = sample;
            self.initialized = true;
        }
    }

    const fn get(&self) -> f64 {
        self.value
    }
}

enum Wait {
    Due(DeviceTime),
    Interrupted,
}

/// Fires a [`GesturePlan`]; see the [module docs](self).
#[derive(Debug)]
pub struct Engine<'p> {
    plan: &'p GesturePlan,
    steps: Vec<FiringStep>,
    config: EngineConfig,
    state: EngineState,
    next: usize,
    generation: Generation,
    latency: Ema,
    open: Vec<Option<Point>>,
    summary: SessionSummaryBuilder,
    next_health: DeviceTime,
    pause_started: DeviceTime,
}

impl<'p> Engine<'p> {
    /// Creates an idle engine for `plan`, expecting the link's first
    /// session.
    #[must_use]
    pub fn new(plan: &'p GesturePlan, config: EngineConfig) -> Self {
        Self {
            plan,
            steps: plan.firing_order(),
            config,
            state: EngineState::Idle,
            next: 0,
            generation: Generation::FIRST,
            latency: Ema::seeded(config.initial_latency.ticks() as f64, config.latency_alpha),
            open: vec![None; usize::from(plan.max_touch_points())],
            summary: SessionSummaryBuilder::new(plan.dropped().len(), plan.deferrals().len()),
            next_health: DeviceTime(0),
            pause_started: DeviceTime(0),
        }
    }

    /// The current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Firing-order index of the next segment to fire.
    #[inline]
    #[must_use]
    pub const fn next_index(&self) -> usize {
        self.next
    }

    /// The session generation the engine injects under.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// The smoothed one-way injection latency.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "float-to-int `as` saturates; latency samples are non-negative"
    )]
    pub fn latency_estimate(&self) -> Duration {
        Duration(self.latency.get() as u64)
    }

    /// The plan being fired.
    #[must_use]
    pub const fn plan(&self) -> &'p GesturePlan {
        self.plan
    }

    /// The segments in firing order.
    #[must_use]
    pub fn steps(&self) -> &[FiringStep] {
        &self.steps
    }

    /// Runs the plan to completion.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Aborted`] when reconnection fails or a
    /// [`EngineSignal::Cancel`] arrives, carrying the last confirmed index.
    pub fn run<T, H, S>(
        &mut self,
        link: &mut LinkManager<T>,
        sync: &mut ClockSync,
        host: &mut H,
        signals: &mut S,
        tracer: &mut Tracer<'_>,
    ) -> Result<SessionReport, SessionError>
    where
        T: Transport,
        H: HostClock,
        S: SignalSource,
    {
        if self.state == EngineState::Idle {
            let now = host.now();
            self.next_health = now + self.config.health_interval;
            self.transition(EngineState::Running, now, tracer);
        }
        loop {
            match self.state {
                EngineState::Idle | EngineState::Running => {
                    let Some(step) = self.steps.get(self.next).copied() else {
                        let now = host.now();
                        self.transition(EngineState::Completed, now, tracer);
                        continue;
                    };
                    if let Wait::Due(target) = self.wait_for(&step, link, sync, host, signals, tracer)
                    {
                        self.fire(&step, target, link, host, tracer);
                    }
                }
                EngineState::Paused(PauseReason::LinkDown) => {
                    self.recover_link(link, host, tracer);
                }
                EngineState::Paused(PauseReason::ClockDesync) => {
                    self.settle_clock(link, sync, host, signals, tracer);
                }
                EngineState::Completed => {
                    let summary = self.finish(host, tracer);
                    return Ok(SessionReport {
                        summary,
                        generation: self.generation,
                    });
                }
                EngineState::Aborted(reason) => {
                    self.release_open_contacts(link, host);
                    let last_fired = self.summary.last_fired();
                    tracer.aborted(&AbortedEvent {
                        at: host.now(),
                        reason,
                        last_fired,
                    });
                    self.finish(host, tracer);
                    return Err(SessionError::Aborted { reason, last_fired });
                }
            }
        }
    }

    fn transition(&mut self, to: EngineState, at: DeviceTime, tracer: &mut Tracer<'_>) {
        if self.state != to {
            tracer.state_change(&StateChangeEvent {
                at,
                from: self.state,
                to,
            });
            self.state = to;
        }
    }

    fn finish(&self, host: &mut impl HostClock, tracer: &mut Tracer<'_>) -> SessionSummary {
        let summary = self.summary.finish(host.now(), self.latency_estimate());
        tracer.session_summary(&summary);
        summary
    }

    /// Sleeps until `step` is due, handling signals and health checks.
    fn wait_for<T: Transport>(
        &mut self,
        step: &FiringStep,
        link: &mut LinkManager<T>,
        sync: &mut ClockSync,
        host: &mut impl HostClock,
        signals: &mut impl SignalSource,
        tracer: &mut Tracer<'_>,
    ) -> Wait {
        loop {
            while let Some(signal) = signals.poll_signal() {
                self.handle_signal(signal, link, sync, host, tracer);
                if self.state != EngineState::Running {
                    return Wait::Interrupted;
                }
            }

            let now = host.now();
            if now >= self.next_health {
                self.next_health = now + self.config.health_interval;
                if link.health_check(host) == Health::Dead {
                    self.link_lost(LinkDownCause::HealthCheck, host.now(), tracer);
                    return Wait::Interrupted;
                }
            }

            let target = sync
                .to_device_time(step.time)
                .saturating_sub(self.latency_estimate());
            let now = host.now();
            if now >= target {
                return Wait::Due(target);
            }
            let slice_end = now + self.config.max_sleep_slice;
            host.sleep_until(if target < slice_end { target } else { slice_end });
        }
    }

    /// Applies one signal. Returns `true` if it revealed a clock desync.
    fn handle_signal<T: Transport>(
        &mut self,
        signal: EngineSignal,
        link: &mut LinkManager<T>,
        sync: &mut ClockSync,
        host: &mut impl HostClock,
        tracer: &mut Tracer<'_>,
    ) -> bool {
        let now = host.now();
        match signal {
            EngineSignal::Cancel => {
                self.transition(EngineState::Aborted(AbortReason::Cancelled), now, tracer);
                false
            }
            EngineSignal::LinkDown { generation } => {
                if generation != link.generation() {
                    return false;
                }
                link.mark_down();
                self.link_lost(LinkDownCause::Signal, now, tracer);
                false
            }
            EngineSignal::Calibration(sample) => {
                sync.calibrate(sample.device, sample.chart);
                let state = sync.state();
                tracer.calibration(&CalibrationEvent {
                    device_time: sample.device,
                    chart_time: sample.chart,
                    rate: state.rate(),
                    offset_ticks: state.offset_ticks(),
                });
                let Some(desync) = sync.drift_correction() else {
                    return false;
                };
                tracer.clock_desync(&ClockDesyncEvent {
                    at: now,
                    measured_drift: desync.measured_drift,
                    threshold: desync.threshold,
                });
                self.summary.record_desync();
                sync.realign();
                self.pause_started = now;
                if self.state == EngineState::Running {
                    self.transition(EngineState::Paused(PauseReason::ClockDesync), now, tracer);
                }
                true
            }
        }
    }

    fn link_lost(&mut self, cause: LinkDownCause, at: DeviceTime, tracer: &mut Tracer<'_>) {
        if matches!(self.state, EngineState::Aborted(_)) {
            return;
        }
        tracer.link_down(&LinkDownEvent {
            at,
            generation: self.generation,
            cause,
        });
        self.transition(EngineState::Paused(PauseReason::LinkDown), at, tracer);
    }

    fn fire<T: Transport>(
        &mut self,
        step: &FiringStep,
        target: DeviceTime,
        link: &mut LinkManager<T>,
        host: &mut impl HostClock,
        tracer: &mut Tracer<'_>,
    ) {
        let command = TouchCommand {
            slot: step.slot,
            phase: step.phase,
            position: step.position,
            at: target,
            origin: CommandOrigin::Plan { index: step.index },
        };
        let fired_at = host.now();
        match link.inject(&command, self.generation, host) {
            Ok(ack) => {
                self.next += 1;
                if let Some(rtt) = ack.round_trip {
                    self.latency.update(rtt.ticks() as f64 / 2.0);
                }
                self.open[step.slot.index()] = match step.phase {
                    Phase::Down | Phase::Move => Some(step.position),
                    Phase::Up => None,
                };
                self.summary.record_fire(step.index, target, fired_at);
                #[cfg(feature = "trace-rich")]
                tracer.segment_fired(&SegmentFiredEvent {
                    index: step.index,
                    slot: step.slot,
                    phase: step.phase,
                    target,
                    fired_at,
                    generation: self.generation,
                    round_trip: ack.round_trip,
                });
            }
            Err(LinkError::StaleSession { got, current }) => {
                tracer.stale_injection(&StaleInjectionEvent {
                    at: host.now(),
                    got,
                    current,
                    index: step.index,
                });
                self.generation = current;
            }
            Err(_) => {
                self.link_lost(LinkDownCause::InjectFailed, host.now(), tracer);
            }
        }
    }

    fn recover_link<T: Transport>(
        &mut self,
        link: &mut LinkManager<T>,
        host: &mut impl HostClock,
        tracer: &mut Tracer<'_>,
    ) {
        let generation = match link.reconnect(host, tracer) {
            Ok(generation) => generation,
            Err(err) => {
                let attempts = match err {
                    LinkError::ReconnectExhausted { attempts } => attempts,
                    _ => link.reconnect_attempts(),
                };
                let now = host.now();
                self.transition(
                    EngineState::Aborted(AbortReason::ReconnectExhausted { attempts }),
                    now,
                    tracer,
                );
                return;
            }
        };
        self.generation = generation;
        self.summary.record_reconnect();
        let now = host.now();
        tracer.reconnected(&ReconnectedEvent {
            at: now,
            generation,
            attempts: link.reconnect_attempts(),
        });

        if self.config.restore_open_contacts {
            for (slot, position) in self.open.iter().enumerate() {
                let Some(position) = *position else {
                    continue;
                };
                let command = TouchCommand {
                    slot: slot_at(slot),
                    phase: Phase::Down,
                    position,
                    at: host.now(),
                    origin: CommandOrigin::Restore,
                };
                if link.inject(&command, generation, host).is_err() {
                    // Still down; the next pass reconnects again.
                    self.link_lost(LinkDownCause::InjectFailed, host.now(), tracer);
                    return;
                }
            }
        }
        let now = host.now();
        self.next_health = now + self.config.health_interval;
        self.transition(EngineState::Running, now, tracer);
    }

    /// Lifts every held contact. Failures are ignored; the session is over.
    fn release_open_contacts<T: Transport>(
        &mut self,
        link: &mut LinkManager<T>,
        host: &mut impl HostClock,
    ) {
        for (slot, open) in self.open.iter_mut().enumerate() {
            let Some(position) = open.take() else {
                continue;
            };
            if !link.is_connected() {
                continue;
            }
            let command = TouchCommand {
                slot: slot_at(slot),
                phase: Phase::Up,
                position,
                at: host.now(),
                origin: CommandOrigin::Release,
            };
            // A failed send marks the link down and skips the rest.
            let _ = link.inject(&command, self.generation, host);
        }
    }

    fn settle_clock<T: Transport>(
        &mut self,
        link: &mut LinkManager<T>,
        sync: &mut ClockSync,
        host: &mut impl HostClock,
        signals: &mut impl SignalSource,
        tracer: &mut Tracer<'_>,
    ) {
        loop {
            while let Some(signal) = signals.poll_signal() {
                let calibration = matches!(signal, EngineSignal::Calibration(_));
                let desynced = self.handle_signal(signal, link, sync, host, tracer);
                if self.state != EngineState::Paused(PauseReason::ClockDesync) {
                    return;
                }
                if calibration && !desynced {
                    let now = host.now();
                    self.transition(EngineState::Running, now, tracer);
                    return;
                }
            }
            // A fresh desync restarts the settle window.
            let deadline = self.pause_started + self.config.realign_settle;
            let now = host.now();
            if now >= deadline {
                self.transition(EngineState::Running, now, tracer);
                return;
            }
            let slice_end = now + self.config.max_sleep_slice;
            host.sleep_until(if deadline < slice_end { deadline } else { slice_end });
        }
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "open-contact table is sized from a u8 max_touch_points"
)]
const fn slot_at(index: usize) -> Slot {
    Slot(index as u8)
}
