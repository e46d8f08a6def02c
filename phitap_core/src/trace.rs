// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Structured observability events.
//!
//! The planner, link manager, and engine report everything worth knowing
//! about a session through a [`TraceSink`]: dropped and deferred notes,
//! calibration, clock desync, link loss and recovery, state changes, and the
//! final summary. All sink methods default to no-ops; the core never formats
//! or persists events itself (see `phitap_debug` for sinks that do).
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing. When **on**, each
//! method performs a single `Option` branch before dispatching.
//!
//! [`SessionSummaryBuilder`] accumulates per-segment lateness while the
//! engine runs and produces a [`SessionSummary`] at the end.
//!
//! # Crate features
//!
//! - `trace` (default): enables the `Tracer` method bodies.
//! - `trace-rich` (implies `trace`): gates [`SegmentFiredEvent`], one event
//!   per injected segment.

use crate::engine::{AbortReason, EngineState};
use crate::gesture::Slot;
#[cfg(feature = "trace-rich")]
use crate::gesture::Phase;
use crate::link::Generation;
use crate::time::{ChartTime, DeviceTime, Duration};
use crate::timeline::NoteId;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which planning strategy produced an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Lowest-free-slot assignment (`algo1`).
    Greedy,
    /// Lookahead matching (`algo2`).
    ConflictMinimizing,
}

/// What revealed a dead link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinkDownCause {
    /// An injection failed.
    InjectFailed,
    /// A health check reported the link dead or timed out.
    HealthCheck,
    /// A background task signalled the loss.
    Signal,
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// A note was dropped because no slot was free.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotExhaustionEvent {
    /// The dropped note.
    pub note: NoteId,
    /// The note's chart time.
    pub time: ChartTime,
    /// The strategy that gave up on it.
    pub strategy: StrategyKind,
}

/// A note was scheduled later than the chart asked, to find a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoteDeferredEvent {
    /// The deferred note.
    pub note: NoteId,
    /// Chart time of the contact's first segment as asked.
    pub requested: ChartTime,
    /// Chart time it was scheduled at.
    pub scheduled: ChartTime,
    /// The slot it landed on.
    pub slot: Slot,
}

/// A calibration sample was folded into the clock state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationEvent {
    /// Observed device time.
    pub device_time: DeviceTime,
    /// Chart time it corresponds to.
    pub chart_time: ChartTime,
    /// Smoothed rate after the update (device ticks per chart microsecond).
    pub rate: f64,
    /// Smoothed offset after the update (ticks from the clock origin).
    pub offset_ticks: f64,
}

/// Measured drift exceeded the configured threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockDesyncEvent {
    /// When the desync was detected.
    pub at: DeviceTime,
    /// Relative drift between consecutive samples.
    pub measured_drift: f64,
    /// The configured threshold.
    pub threshold: f64,
}

/// The engine changed state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateChangeEvent {
    /// When the transition happened.
    pub at: DeviceTime,
    /// Previous state.
    pub from: EngineState,
    /// New state.
    pub to: EngineState,
}

/// The device link went down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkDownEvent {
    /// When the loss was noticed.
    pub at: DeviceTime,
    /// Generation of the lost session.
    pub generation: Generation,
    /// What revealed it.
    pub cause: LinkDownCause,
}

/// The link manager is about to try reconnecting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectAttemptEvent {
    /// When the backoff delay started.
    pub at: DeviceTime,
    /// One-based attempt number.
    pub attempt: u32,
    /// Backoff delay before this attempt.
    pub delay: Duration,
}

/// A new session is live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectedEvent {
    /// When the new session came up.
    pub at: DeviceTime,
    /// Generation of the new session.
    pub generation: Generation,
    /// Attempts it took.
    pub attempts: u32,
}

/// An injection tagged with an old generation was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaleInjectionEvent {
    /// When it was rejected.
    pub at: DeviceTime,
    /// The generation the command carried.
    pub got: Generation,
    /// The live generation.
    pub current: Generation,
    /// Firing-order index of the rejected segment.
    pub index: usize,
}

/// The session stopped for good.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbortedEvent {
    /// When it stopped.
    pub at: DeviceTime,
    /// Why.
    pub reason: AbortReason,
    /// Last confirmed segment index in firing order.
    pub last_fired: Option<usize>,
}

/// A segment was confirmed by the link.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentFiredEvent {
    /// Firing-order index.
    pub index: usize,
    /// Slot of the owning gesture.
    pub slot: Slot,
    /// Contact phase.
    pub phase: Phase,
    /// When the engine intended to fire.
    pub target: DeviceTime,
    /// When the injection was issued.
    pub fired_at: DeviceTime,
    /// Session generation it went out on.
    pub generation: Generation,
    /// Round trip, if it arrived within the budget.
    pub round_trip: Option<Duration>,
}

/// End-of-session report produced by [`SessionSummaryBuilder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    /// When the session finished.
    pub at: DeviceTime,
    /// Segments confirmed.
    pub fired: usize,
    /// Last confirmed segment index.
    pub last_fired: Option<usize>,
    /// Notes the plan dropped.
    pub dropped: usize,
    /// Notes the plan deferred.
    pub deferred: usize,
    /// Successful reconnects.
    pub reconnects: u32,
    /// Clock desyncs handled.
    pub desyncs: u32,
    /// Injection latency estimate at the end.
    pub latency_estimate: Duration,
    /// Mean of how late segments fired after their target.
    pub mean_lateness: Duration,
    /// Worst lateness.
    pub max_lateness: Duration,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives observability events.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// A note was dropped for lack of a slot.
    fn on_slot_exhaustion(&mut self, e: &SlotExhaustionEvent) {
        _ = e;
    }

    /// A note was deferred to find a slot.
    fn on_note_deferred(&mut self, e: &NoteDeferredEvent) {
        _ = e;
    }

    /// A calibration sample was applied.
    fn on_calibration(&mut self, e: &CalibrationEvent) {
        _ = e;
    }

    /// Drift exceeded the threshold.
    fn on_clock_desync(&mut self, e: &ClockDesyncEvent) {
        _ = e;
    }

    /// The engine changed state.
    fn on_state_change(&mut self, e: &StateChangeEvent) {
        _ = e;
    }

    /// The link went down.
    fn on_link_down(&mut self, e: &LinkDownEvent) {
        _ = e;
    }

    /// A reconnect attempt is starting.
    fn on_reconnect_attempt(&mut self, e: &ReconnectAttemptEvent) {
        _ = e;
    }

    /// A new session is live.
    fn on_reconnected(&mut self, e: &ReconnectedEvent) {
        _ = e;
    }

    /// A stale-generation injection was dropped.
    fn on_stale_injection(&mut self, e: &StaleInjectionEvent) {
        _ = e;
    }

    /// The session aborted.
    fn on_aborted(&mut self, e: &AbortedEvent) {
        _ = e;
    }

    /// The session completed.
    fn on_session_summary(&mut self, s: &SessionSummary) {
        _ = s;
    }

    /// A segment was confirmed (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    fn on_segment_fired(&mut self, e: &SegmentFiredEvent) {
        _ = e;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

/// Generates a `Tracer` forwarding method.
macro_rules! forward {
    ($(#[$doc:meta])* $name:ident => $hook:ident($ty:ty)) => {
        $(#[$doc])*
        #[inline]
        pub fn $name(&mut self, e: &$ty) {
            #[cfg(feature = "trace")]
            if let Some(s) = &mut self.sink {
                s.$hook(e);
            }
            #[cfg(not(feature = "trace"))]
            {
                _ = e;
            }
        }
    };
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    forward!(
        /// Emits a [`SlotExhaustionEvent`].
        slot_exhaustion => on_slot_exhaustion(SlotExhaustionEvent)
    );
    forward!(
        /// Emits a [`NoteDeferredEvent`].
        note_deferred => on_note_deferred(NoteDeferredEvent)
    );
    forward!(
        /// Emits a [`CalibrationEvent`].
        calibration => on_calibration(CalibrationEvent)
    );
    forward!(
        /// Emits a [`ClockDesyncEvent`].
        clock_desync => on_clock_desync(ClockDesyncEvent)
    );
    forward!(
        /// Emits a [`StateChangeEvent`].
        state_change => on_state_change(StateChangeEvent)
    );
    forward!(
        /// Emits a [`LinkDownEvent`].
        link_down => on_link_down(LinkDownEvent)
    );
    forward!(
        /// Emits a [`ReconnectAttemptEvent`].
        reconnect_attempt => on_reconnect_attempt(ReconnectAttemptEvent)
    );
    forward!(
        /// Emits a [`ReconnectedEvent`].
        reconnected => on_reconnected(ReconnectedEvent)
    );
    forward!(
        /// Emits a [`StaleInjectionEvent`].
        stale_injection => on_stale_injection(StaleInjectionEvent)
    );
    forward!(
        /// Emits an [`AbortedEvent`].
        aborted => on_aborted(AbortedEvent)
    );
    forward!(
        /// Emits a [`SessionSummary`].
        session_summary => on_session_summary(SessionSummary)
    );

    /// Emits a [`SegmentFiredEvent`] (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    #[inline]
    pub fn segment_fired(&mut self, e: &SegmentFiredEvent) {
        if let Some(s) = &mut self.sink {
            s.on_segment_fired(e);
        }
    }
}

// ---------------------------------------------------------------------------
// SessionSummaryBuilder
// ---------------------------------------------------------------------------

/// Accumulates execution statistics and produces a [`SessionSummary`].
#[derive(Clone, Debug, Default)]
pub struct SessionSummaryBuilder {
    fired: usize,
    last_fired: Option<usize>,
    dropped: usize,
    deferred: usize,
    reconnects: u32,
    desyncs: u32,
    lateness_total: u128,
    lateness_max: u64,
}

impl SessionSummaryBuilder {
    /// Starts a summary for a plan with the given dropped/deferred counts.
    #[must_use]
    pub fn new(dropped: usize, deferred: usize) -> Self {
        Self {
            dropped,
            deferred,
            ..Self::default()
        }
    }

    /// Records a confirmed segment.
    pub fn record_fire(&mut self, index: usize, target: DeviceTime, fired_at: DeviceTime) {
        let late = fired_at.saturating_duration_since(target).ticks();
        self.fired += 1;
        self.last_fired = Some(index);
        self.lateness_total += u128::from(late);
        self.lateness_max = self.lateness_max.max(late);
    }

    /// Records a successful reconnect.
    pub fn record_reconnect(&mut self) {
        self.reconnects += 1;
    }

    /// Records a handled clock desync.
    pub fn record_desync(&mut self) {
        self.desyncs += 1;
    }

    /// Last confirmed segment index so far.
    #[must_use]
    pub const fn last_fired(&self) -> Option<usize> {
        self.last_fired
    }

    /// Produces the final summary.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "mean of u64 samples fits in u64"
    )]
    pub fn finish(&self, at: DeviceTime, latency_estimate: Duration) -> SessionSummary {
        let mean = if self.fired == 0 {
            0
        } else {
            (self.lateness_total / self.fired as u128) as u64
        };
        SessionSummary {
            at,
            fired: self.fired,
            last_fired: self.last_fired,
            dropped: self.dropped,
            deferred: self.deferred,
            reconnects: self.reconnects,
            desyncs: self.desyncs,
            latency_estimate,
            mean_lateness: Duration(mean),
            max_lateness: Duration(self.lateness_max),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_exhaustion() -> SlotExhaustionEvent {
        SlotExhaustionEvent {
            note: NoteId(3),
            time: ChartTime::from_millis(50),
            strategy: StrategyKind::Greedy,
        }
    }

    #[test]
    fn noop_sink_compiles() {
        let mut sink = NoopSink;
        sink.on_slot_exhaustion(&sample_exhaustion());
        sink.on_reconnected(&ReconnectedEvent {
            at: DeviceTime(0),
            generation: Generation(2),
            attempts: 1,
        });
    }

    #[test]
    fn tracer_none_does_nothing() {
        let mut tracer = Tracer::none();
        tracer.slot_exhaustion(&sample_exhaustion());
    }

    #[test]
    fn summary_builder_tracks_lateness() {
        let mut b = SessionSummaryBuilder::new(1, 2);
        b.record_fire(0, DeviceTime(1000), DeviceTime(1100));
        b.record_fire(1, DeviceTime(2000), DeviceTime(2300));
        b.record_fire(2, DeviceTime(3000), DeviceTime(2900));
        b.record_reconnect();
        let s = b.finish(DeviceTime(4000), Duration(50));
        assert_eq!(s.fired, 3);
        assert_eq!(s.last_fired, Some(2));
        assert_eq!(s.max_lateness, Duration(300));
        assert_eq!(s.mean_lateness, Duration(133));
        assert_eq!(s.reconnects, 1);
        assert_eq!((s.dropped, s.deferred), (1, 2));
    }

    #[test]
    fn empty_summary_has_no_lateness() {
        let s = SessionSummaryBuilder::new(0, 0).finish(DeviceTime(0), Duration::ZERO);
        assert_eq!(s.fired, 0);
        assert_eq!(s.last_fired, None);
        assert_eq!(s.mean_lateness, Duration::ZERO);
    }

    #[cfg(feature = "trace")]
    #[test]
    fn tracer_dispatches_to_sink() {
        use alloc::vec::Vec;

        struct RecordingSink {
            dropped: Vec<NoteId>,
        }
        impl TraceSink for RecordingSink {
            fn on_slot_exhaustion(&mut self, e: &SlotExhaustionEvent) {
                self.dropped.push(e.note);
            }
        }

        let mut sink = RecordingSink {
            dropped: Vec::new(),
        };
        let mut tracer = Tracer::new(&mut sink);
        tracer.slot_exhaustion(&sample_exhaustion());
        drop(tracer);
        assert_eq!(sink.dropped, &[NoteId(3)]);
    }
}
