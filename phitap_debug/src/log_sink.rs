// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Forwards trace events to the [`log`] facade.
//!
//! Anything that loses notes or stops the session is logged at `warn`,
//! lifecycle changes at `info`, and per-sample detail at `debug`.

use log::{debug, info, warn};

use phitap_core::trace::{
    AbortedEvent, CalibrationEvent, ClockDesyncEvent, LinkDownEvent, NoteDeferredEvent,
    ReconnectAttemptEvent, ReconnectedEvent, SegmentFiredEvent, SessionSummary,
    SlotExhaustionEvent, StaleInjectionEvent, StateChangeEvent, TraceSink,
};

use crate::pretty::state_name;

/// A [`TraceSink`] that logs under a fixed target.
#[derive(Clone, Copy, Debug)]
pub struct LogSink {
    target: &'static str,
}

impl LogSink {
    /// Logs under the `phitap` target.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_target("phitap")
    }

    /// Logs under `target`.
    #[must_use]
    pub const fn with_target(target: &'static str) -> Self {
        Self { target }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceSink for LogSink {
    fn on_slot_exhaustion(&mut self, e: &SlotExhaustionEvent) {
        warn!(
            target: self.target,
            "no free slot for note {} at {:?} ({:?}); dropped",
            e.note.0, e.time, e.strategy
        );
    }

    fn on_note_deferred(&mut self, e: &NoteDeferredEvent) {
        info!(
            target: self.target,
            "note {} deferred {:?} -> {:?} on {:?}",
            e.note.0, e.requested, e.scheduled, e.slot
        );
    }

    fn on_calibration(&mut self, e: &CalibrationEvent) {
        debug!(
            target: self.target,
            "calibration {:?} @ {:?}: rate={:.6} offset={:.0}",
            e.chart_time, e.device_time, e.rate, e.offset_ticks
        );
    }

    fn on_clock_desync(&mut self, e: &ClockDesyncEvent) {
        warn!(
            target: self.target,
            "clock drift {:+.4} exceeds {:.4}; realigning",
            e.measured_drift, e.threshold
        );
    }

    fn on_state_change(&mut self, e: &StateChangeEvent) {
        info!(
            target: self.target,
            "engine {} -> {}",
            state_name(e.from),
            state_name(e.to)
        );
    }

    fn on_link_down(&mut self, e: &LinkDownEvent) {
        warn!(
            target: self.target,
            "link {:?} down ({:?})",
            e.generation, e.cause
        );
    }

    fn on_reconnect_attempt(&mut self, e: &ReconnectAttemptEvent) {
        info!(
            target: self.target,
            "reconnect attempt {} after {:?}",
            e.attempt, e.delay
        );
    }

    fn on_reconnected(&mut self, e: &ReconnectedEvent) {
        info!(
            target: self.target,
            "link {:?} up after {} attempt(s)",
            e.generation, e.attempts
        );
    }

    fn on_stale_injection(&mut self, e: &StaleInjectionEvent) {
        warn!(
            target: self.target,
            "segment {} tagged {:?} rejected, live session is {:?}",
            e.index, e.got, e.current
        );
    }

    fn on_aborted(&mut self, e: &AbortedEvent) {
        warn!(
            target: self.target,
            "session aborted: {} (last fired: {:?})",
            e.reason, e.last_fired
        );
    }

    fn on_session_summary(&mut self, s: &SessionSummary) {
        info!(
            target: self.target,
            "fired {} segments; {} dropped, {} deferred, {} reconnects, {} desyncs; \
             latency {:?}, lateness mean {:?} max {:?}",
            s.fired,
            s.dropped,
            s.deferred,
            s.reconnects,
            s.desyncs,
            s.latency_estimate,
            s.mean_lateness,
            s.max_lateness
        );
    }

    fn on_segment_fired(&mut self, e: &SegmentFiredEvent) {
        debug!(
            target: self.target,
            "fired #{} {:?} {:?} at {:?} (target {:?})",
            e.index, e.slot, e.phase, e.fired_at, e.target
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use log::{Level, LevelFilter, Log, Metadata, Record};

    use phitap_core::time::ChartTime;
    use phitap_core::timeline::NoteId;
    use phitap_core::trace::StrategyKind;

    struct Capture(Mutex<Vec<(Level, String, String)>>);

    impl Log for Capture {
        fn enabled(&self, _: &Metadata<'_>) -> bool {
            true
        }
        fn log(&self, record: &Record<'_>) {
            self.0.lock().unwrap().push((
                record.level(),
                record.target().to_owned(),
                record.args().to_string(),
            ));
        }
        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture(Mutex::new(Vec::new()));

    #[test]
    fn drops_are_warnings_under_the_target() {
        log::set_logger(&CAPTURE).unwrap();
        log::set_max_level(LevelFilter::Trace);

        let mut sink = LogSink::with_target("phitap::test");
        sink.on_slot_exhaustion(&SlotExhaustionEvent {
            note: NoteId(9),
            time: ChartTime::from_millis(1),
            strategy: StrategyKind::ConflictMinimizing,
        });

        let records = CAPTURE.0.lock().unwrap();
        let (level, target, message) = records
            .iter()
            .find(|(_, target, _)| target == "phitap::test")
            .unwrap();
        assert_eq!(*level, Level::Warn);
        assert_eq!(target, "phitap::test");
        assert!(message.contains("note 9"), "got: {message}");
    }
}
