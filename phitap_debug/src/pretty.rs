// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr).

use std::io::Write;

use phitap_core::engine::{EngineState, PauseReason};
use phitap_core::time::{ChartTime, DeviceTime};
use phitap_core::trace::{
    AbortedEvent, CalibrationEvent, ClockDesyncEvent, LinkDownEvent, NoteDeferredEvent,
    ReconnectAttemptEvent, ReconnectedEvent, SegmentFiredEvent, SessionSummary,
    SlotExhaustionEvent, StaleInjectionEvent, StateChangeEvent, TraceSink,
};

use crate::ticks_to_us;

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink").finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self { writer }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the sink and returns the writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn us(t: DeviceTime) -> f64 {
    ticks_to_us(t.ticks())
}

fn chart_ms(t: ChartTime) -> f64 {
    t.as_millis_f64()
}

pub(crate) fn state_name(state: EngineState) -> &'static str {
    match state {
        EngineState::Idle => "idle",
        EngineState::Running => "running",
        EngineState::Paused(PauseReason::ClockDesync) => "paused(clock)",
        EngineState::Paused(PauseReason::LinkDown) => "paused(link)",
        EngineState::Completed => "completed",
        EngineState::Aborted(_) => "aborted",
    }
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_slot_exhaustion(&mut self, e: &SlotExhaustionEvent) {
        let _ = writeln!(
            self.writer,
            "[drop] note={} t={:.3}ms strategy={:?}",
            e.note.0,
            chart_ms(e.time),
            e.strategy,
        );
    }

    fn on_note_deferred(&mut self, e: &NoteDeferredEvent) {
        let _ = writeln!(
            self.writer,
            "[defer] note={} {:.3}ms -> {:.3}ms slot={}",
            e.note.0,
            chart_ms(e.requested),
            chart_ms(e.scheduled),
            e.slot.0,
        );
    }

    fn on_calibration(&mut self, e: &CalibrationEvent) {
        let _ = writeln!(
            self.writer,
            "[calibrate] device={:.1}µs chart={:.3}ms rate={:.6} offset={:.0}t",
            us(e.device_time),
            chart_ms(e.chart_time),
            e.rate,
            e.offset_ticks,
        );
    }

    fn on_clock_desync(&mut self, e: &ClockDesyncEvent) {
        let _ = writeln!(
            self.writer,
            "[desync] at={:.1}µs drift={:+.4} threshold={:.4}",
            us(e.at),
            e.measured_drift,
            e.threshold,
        );
    }

    fn on_state_change(&mut self, e: &StateChangeEvent) {
        let _ = writeln!(
            self.writer,
            "[state] at={:.1}µs {} -> {}",
            us(e.at),
            state_name(e.from),
            state_name(e.to),
        );
    }

    fn on_link_down(&mut self, e: &LinkDownEvent) {
        let _ = writeln!(
            self.writer,
            "[link:down] at={:.1}µs gen={} cause={:?}",
            us(e.at),
            e.generation.0,
            e.cause,
        );
    }

    fn on_reconnect_attempt(&mut self, e: &ReconnectAttemptEvent) {
        let _ = writeln!(
            self.writer,
            "[link:retry] at={:.1}µs attempt={} delay={:.1}ms",
            us(e.at),
            e.attempt,
            e.delay.as_millis_f64(),
        );
    }

    fn on_reconnected(&mut self, e: &ReconnectedEvent) {
        let _ = writeln!(
            self.writer,
            "[link:up] at={:.1}µs gen={} attempts={}",
            us(e.at),
            e.generation.0,
            e.attempts,
        );
    }

    fn on_stale_injection(&mut self, e: &StaleInjectionEvent) {
        let _ = writeln!(
            self.writer,
            "[stale] at={:.1}µs index={} got={} live={}",
            us(e.at),
            e.index,
            e.got.0,
            e.current.0,
        );
    }

    fn on_aborted(&mut self, e: &AbortedEvent) {
        let last = e
            .last_fired
            .map_or_else(|| "-".to_owned(), |i| i.to_string());
        let _ = writeln!(
            self.writer,
            "[abort] at={:.1}µs reason={} last_fired={last}",
            us(e.at),
            e.reason,
        );
    }

    fn on_session_summary(&mut self, s: &SessionSummary) {
        let _ = writeln!(
            self.writer,
            "[summary] fired={} dropped={} deferred={} reconnects={} desyncs={} \
             latency={:.1}µs late(mean)={:.1}µs late(max)={:.1}µs",
            s.fired,
            s.dropped,
            s.deferred,
            s.reconnects,
            s.desyncs,
            ticks_to_us(s.latency_estimate.ticks()),
            ticks_to_us(s.mean_lateness.ticks()),
            ticks_to_us(s.max_lateness.ticks()),
        );
    }

    fn on_segment_fired(&mut self, e: &SegmentFiredEvent) {
        let late = e.fired_at.saturating_duration_since(e.target);
        let _ = writeln!(
            self.writer,
            "[fire] index={} slot={} {:?} late={:.1}µs gen={}",
            e.index,
            e.slot.0,
            e.phase,
            ticks_to_us(late.ticks()),
            e.generation.0,
        );
    }
}
