// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as tagged little-endian records. [`decode`] reads them back as
//! an iterator of [`RecordedEvent`].

use phitap_core::engine::{AbortReason, EngineState, PauseReason};
use phitap_core::gesture::{Phase, Slot};
use phitap_core::link::Generation;
use phitap_core::time::{ChartTime, DeviceTime, Duration};
use phitap_core::timeline::NoteId;
use phitap_core::trace::{
    AbortedEvent, CalibrationEvent, ClockDesyncEvent, LinkDownCause, LinkDownEvent,
    NoteDeferredEvent, ReconnectAttemptEvent, ReconnectedEvent, SegmentFiredEvent,
    SessionSummary, SlotExhaustionEvent, StaleInjectionEvent, StateChangeEvent, StrategyKind,
    TraceSink,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_SLOT_EXHAUSTION: u8 = 1;
const TAG_NOTE_DEFERRED: u8 = 2;
const TAG_CALIBRATION: u8 = 3;
const TAG_CLOCK_DESYNC: u8 = 4;
const TAG_STATE_CHANGE: u8 = 5;
const TAG_LINK_DOWN: u8 = 6;
const TAG_RECONNECT_ATTEMPT: u8 = 7;
const TAG_RECONNECTED: u8 = 8;
const TAG_STALE_INJECTION: u8 = 9;
const TAG_ABORTED: u8 = 10;
const TAG_SESSION_SUMMARY: u8 = 11;
const TAG_SEGMENT_FIRED: u8 = 12;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    fn write_usize(&mut self, v: usize) {
        self.write_u64(v as u64);
    }

    fn write_option_u64(&mut self, v: Option<u64>) {
        match v {
            Some(val) => {
                self.write_u8(1);
                self.write_u64(val);
            }
            None => {
                self.write_u8(0);
                self.write_u64(0);
            }
        }
    }

    fn write_state(&mut self, s: EngineState) {
        let (tag, payload) = match s {
            EngineState::Idle => (0, 0),
            EngineState::Running => (1, 0),
            EngineState::Paused(PauseReason::ClockDesync) => (2, 0),
            EngineState::Paused(PauseReason::LinkDown) => (3, 0),
            EngineState::Completed => (4, 0),
            EngineState::Aborted(reason) => {
                let (tag, payload) = abort_code(reason);
                (tag + 5, payload)
            }
        };
        self.write_u8(tag);
        self.write_u32(payload);
    }

    fn write_abort(&mut self, reason: AbortReason) {
        let (tag, payload) = abort_code(reason);
        self.write_u8(tag);
        self.write_u32(payload);
    }
}

fn abort_code(reason: AbortReason) -> (u8, u32) {
    match reason {
        AbortReason::ReconnectExhausted { attempts } => (0, attempts),
        AbortReason::Cancelled => (1, 0),
    }
}

impl TraceSink for RecorderSink {
    fn on_slot_exhaustion(&mut self, e: &SlotExhaustionEvent) {
        self.write_u8(TAG_SLOT_EXHAUSTION);
        self.write_u32(e.note.0);
        self.write_i64(e.time.as_micros());
        self.write_u8(match e.strategy {
            StrategyKind::Greedy => 0,
            StrategyKind::ConflictMinimizing => 1,
        });
    }

    fn on_note_deferred(&mut self, e: &NoteDeferredEvent) {
        self.write_u8(TAG_NOTE_DEFERRED);
        self.write_u32(e.note.0);
        self.write_i64(e.requested.as_micros());
        self.write_i64(e.scheduled.as_micros());
        self.write_u8(e.slot.0);
    }

    fn on_calibration(&mut self, e: &CalibrationEvent) {
        self.write_u8(TAG_CALIBRATION);
        self.write_u64(e.device_time.ticks());
        self.write_i64(e.chart_time.as_micros());
        self.write_f64(e.rate);
        self.write_f64(e.offset_ticks);
    }

    fn on_clock_desync(&mut self, e: &ClockDesyncEvent) {
        self.write_u8(TAG_CLOCK_DESYNC);
        self.write_u64(e.at.ticks());
        self.write_f64(e.measured_drift);
        self.write_f64(e.threshold);
    }

    fn on_state_change(&mut self, e: &StateChangeEvent) {
        self.write_u8(TAG_STATE_CHANGE);
        self.write_u64(e.at.ticks());
        self.write_state(e.from);
        self.write_state(e.to);
    }

    fn on_link_down(&mut self, e: &LinkDownEvent) {
        self.write_u8(TAG_LINK_DOWN);
        self.write_u64(e.at.ticks());
        self.write_u32(e.generation.0);
        self.write_u8(match e.cause {
            LinkDownCause::InjectFailed => 0,
            LinkDownCause::HealthCheck => 1,
            LinkDownCause::Signal => 2,
        });
    }

    fn on_reconnect_attempt(&mut self, e: &ReconnectAttemptEvent) {
        self.write_u8(TAG_RECONNECT_ATTEMPT);
        self.write_u64(e.at.ticks());
        self.write_u32(e.attempt);
        self.write_u64(e.delay.ticks());
    }

    fn on_reconnected(&mut self, e: &ReconnectedEvent) {
        self.write_u8(TAG_RECONNECTED);
        self.write_u64(e.at.ticks());
        self.write_u32(e.generation.0);
        self.write_u32(e.attempts);
    }

    fn on_stale_injection(&mut self, e: &StaleInjectionEvent) {
        self.write_u8(TAG_STALE_INJECTION);
        self.write_u64(e.at.ticks());
        self.write_u32(e.got.0);
        self.write_u32(e.current.0);
        self.write_usize(e.index);
    }

    fn on_aborted(&mut self, e: &AbortedEvent) {
        self.write_u8(TAG_ABORTED);
        self.write_u64(e.at.ticks());
        self.write_abort(e.reason);
        self.write_option_u64(e.last_fired.map(|i| i as u64));
    }

    fn on_session_summary(&mut self, s: &SessionSummary) {
        self.write_u8(TAG_SESSION_SUMMARY);
        self.write_u64(s.at.ticks());
        self.write_usize(s.fired);
        self.write_option_u64(s.last_fired.map(|i| i as u64));
        self.write_usize(s.dropped);
        self.write_usize(s.deferred);
        self.write_u32(s.reconnects);
        self.write_u32(s.desyncs);
        self.write_u64(s.latency_estimate.ticks());
        self.write_u64(s.mean_lateness.ticks());
        self.write_u64(s.max_lateness.ticks());
    }

    fn on_segment_fired(&mut self, e: &SegmentFiredEvent) {
        self.write_u8(TAG_SEGMENT_FIRED);
        self.write_usize(e.index);
        self.write_u8(e.slot.0);
        self.write_u8(match e.phase {
            Phase::Down => 0,
            Phase::Move => 1,
            Phase::Up => 2,
        });
        self.write_u64(e.target.ticks());
        self.write_u64(e.fired_at.ticks());
        self.write_u32(e.generation.0);
        self.write_option_u64(e.round_trip.map(Duration::ticks));
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedEvent {
    /// A [`SlotExhaustionEvent`].
    SlotExhaustion(SlotExhaustionEvent),
    /// A [`NoteDeferredEvent`].
    NoteDeferred(NoteDeferredEvent),
    /// A [`CalibrationEvent`].
    Calibration(CalibrationEvent),
    /// A [`ClockDesyncEvent`].
    ClockDesync(ClockDesyncEvent),
    /// A [`StateChangeEvent`].
    StateChange(StateChangeEvent),
    /// A [`LinkDownEvent`].
    LinkDown(LinkDownEvent),
    /// A [`ReconnectAttemptEvent`].
    ReconnectAttempt(ReconnectAttemptEvent),
    /// A [`ReconnectedEvent`].
    Reconnected(ReconnectedEvent),
    /// A [`StaleInjectionEvent`].
    StaleInjection(StaleInjectionEvent),
    /// An [`AbortedEvent`].
    Aborted(AbortedEvent),
    /// A [`SessionSummary`].
    SessionSummary(SessionSummary),
    /// A [`SegmentFiredEvent`].
    SegmentFired(SegmentFiredEvent),
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
///
/// Iteration stops at the first unknown tag or truncated record.
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.pos..self.pos + N)?;
        self.pos += N;
        bytes.try_into().ok()
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[b]| b)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn read_i64(&mut self) -> Option<i64> {
        self.take().map(i64::from_le_bytes)
    }

    fn read_f64(&mut self) -> Option<f64> {
        self.read_u64().map(f64::from_bits)
    }

    fn read_usize(&mut self) -> Option<usize> {
        usize::try_from(self.read_u64()?).ok()
    }

    fn read_option_u64(&mut self) -> Option<Option<u64>> {
        let present = self.read_u8()?;
        let val = self.read_u64()?;
        Some((present != 0).then_some(val))
    }

    fn read_option_usize(&mut self) -> Option<Option<usize>> {
        match self.read_option_u64()? {
            Some(v) => usize::try_from(v).ok().map(Some),
            None => Some(None),
        }
    }

    fn read_abort(&mut self) -> Option<AbortReason> {
        let tag = self.read_u8()?;
        let payload = self.read_u32()?;
        abort_from(tag, payload)
    }

    fn read_state(&mut self) -> Option<EngineState> {
        let tag = self.read_u8()?;
        let payload = self.read_u32()?;
        Some(match tag {
            0 => EngineState::Idle,
            1 => EngineState::Running,
            2 => EngineState::Paused(PauseReason::ClockDesync),
            3 => EngineState::Paused(PauseReason::LinkDown),
            4 => EngineState::Completed,
            _ => EngineState::Aborted(abort_from(tag - 5, payload)?),
        })
    }

    fn read_time(&mut self) -> Option<DeviceTime> {
        self.read_u64().map(DeviceTime)
    }

    fn read_chart(&mut self) -> Option<ChartTime> {
        self.read_i64().map(ChartTime::from_micros)
    }

    fn decode_slot_exhaustion(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::SlotExhaustion(SlotExhaustionEvent {
            note: NoteId(self.read_u32()?),
            time: self.read_chart()?,
            strategy: match self.read_u8()? {
                0 => StrategyKind::Greedy,
                _ => StrategyKind::ConflictMinimizing,
            },
        }))
    }

    fn decode_note_deferred(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::NoteDeferred(NoteDeferredEvent {
            note: NoteId(self.read_u32()?),
            requested: self.read_chart()?,
            scheduled: self.read_chart()?,
            slot: Slot(self.read_u8()?),
        }))
    }

    fn decode_calibration(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Calibration(CalibrationEvent {
            device_time: self.read_time()?,
            chart_time: self.read_chart()?,
            rate: self.read_f64()?,
            offset_ticks: self.read_f64()?,
        }))
    }

    fn decode_clock_desync(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::ClockDesync(ClockDesyncEvent {
            at: self.read_time()?,
            measured_drift: self.read_f64()?,
            threshold: self.read_f64()?,
        }))
    }

    fn decode_state_change(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::StateChange(StateChangeEvent {
            at: self.read_time()?,
            from: self.read_state()?,
            to: self.read_state()?,
        }))
    }

    fn decode_link_down(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::LinkDown(LinkDownEvent {
            at: self.read_time()?,
            generation: Generation(self.read_u32()?),
            cause: match self.read_u8()? {
                0 => LinkDownCause::InjectFailed,
                1 => LinkDownCause::HealthCheck,
                _ => LinkDownCause::Signal,
            },
        }))
    }

    fn decode_reconnect_attempt(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::ReconnectAttempt(ReconnectAttemptEvent {
            at: self.read_time()?,
            attempt: self.read_u32()?,
            delay: Duration(self.read_u64()?),
        }))
    }

    fn decode_reconnected(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Reconnected(ReconnectedEvent {
            at: self.read_time()?,
            generation: Generation(self.read_u32()?),
            attempts: self.read_u32()?,
        }))
    }

    fn decode_stale_injection(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::StaleInjection(StaleInjectionEvent {
            at: self.read_time()?,
            got: Generation(self.read_u32()?),
            current: Generation(self.read_u32()?),
            index: self.read_usize()?,
        }))
    }

    fn decode_aborted(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Aborted(AbortedEvent {
            at: self.read_time()?,
            reason: self.read_abort()?,
            last_fired: self.read_option_usize()?,
        }))
    }

    fn decode_session_summary(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::SessionSummary(SessionSummary {
            at: self.read_time()?,
            fired: self.read_usize()?,
            last_fired: self.read_option_usize()?,
            dropped: self.read_usize()?,
            deferred: self.read_usize()?,
            reconnects: self.read_u32()?,
            desyncs: self.read_u32()?,
            latency_estimate: Duration(self.read_u64()?),
            mean_lateness: Duration(self.read_u64()?),
            max_lateness: Duration(self.read_u64()?),
        }))
    }

    fn decode_segment_fired(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::SegmentFired(SegmentFiredEvent {
            index: self.read_usize()?,
            slot: Slot(self.read_u8()?),
            phase: match self.read_u8()? {
                0 => Phase::Down,
                1 => Phase::Move,
                _ => Phase::Up,
            },
            target: self.read_time()?,
            fired_at: self.read_time()?,
            generation: Generation(self.read_u32()?),
            round_trip: self.read_option_u64()?.map(Duration),
        }))
    }
}

fn abort_from(tag: u8, payload: u32) -> Option<AbortReason> {
    match tag {
        0 => Some(AbortReason::ReconnectExhausted { attempts: payload }),
        1 => Some(AbortReason::Cancelled),
        _ => None,
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        match tag {
            TAG_SLOT_EXHAUSTION => self.decode_slot_exhaustion(),
            TAG_NOTE_DEFERRED => self.decode_note_deferred(),
            TAG_CALIBRATION => self.decode_calibration(),
            TAG_CLOCK_DESYNC => self.decode_clock_desync(),
            TAG_STATE_CHANGE => self.decode_state_change(),
            TAG_LINK_DOWN => self.decode_link_down(),
            TAG_RECONNECT_ATTEMPT => self.decode_reconnect_attempt(),
            TAG_RECONNECTED => self.decode_reconnected(),
            TAG_STALE_INJECTION => self.decode_stale_injection(),
            TAG_ABORTED => self.decode_aborted(),
            TAG_SESSION_SUMMARY => self.decode_session_summary(),
            TAG_SEGMENT_FIRED => self.decode_segment_fired(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(f: impl FnOnce(&mut RecorderSink)) -> Vec<RecordedEvent> {
        let mut rec = RecorderSink::new();
        f(&mut rec);
        decode(rec.as_bytes()).collect()
    }

    #[test]
    fn state_changes_keep_abort_payloads() {
        let change = StateChangeEvent {
            at: DeviceTime(9_000),
            from: EngineState::Paused(PauseReason::LinkDown),
            to: EngineState::Aborted(AbortReason::ReconnectExhausted { attempts: 6 }),
        };
        let events = record(|r| r.on_state_change(&change));
        assert_eq!(events, [RecordedEvent::StateChange(change)]);
    }

    #[test]
    fn a_session_decodes_in_order() {
        let drop = SlotExhaustionEvent {
            note: NoteId(3),
            time: ChartTime::from_millis(50),
            strategy: StrategyKind::Greedy,
        };
        let calibration = CalibrationEvent {
            device_time: DeviceTime(40_000_000),
            chart_time: ChartTime::ZERO,
            rate: 1000.25,
            offset_ticks: -12.5,
        };
        let aborted = AbortedEvent {
            at: DeviceTime(1),
            reason: AbortReason::Cancelled,
            last_fired: None,
        };
        let events = record(|r| {
            r.on_slot_exhaustion(&drop);
            r.on_calibration(&calibration);
            r.on_aborted(&aborted);
        });
        assert_eq!(
            events,
            [
                RecordedEvent::SlotExhaustion(drop),
                RecordedEvent::Calibration(calibration),
                RecordedEvent::Aborted(aborted),
            ]
        );
    }

    #[test]
    fn summary_and_fired_segments_survive() {
        let fired = SegmentFiredEvent {
            index: 4,
            slot: Slot(1),
            phase: Phase::Move,
            target: DeviceTime(100),
            fired_at: DeviceTime(130),
            generation: Generation(2),
            round_trip: Some(Duration(20)),
        };
        let summary = SessionSummary {
            at: DeviceTime(500),
            fired: 5,
            last_fired: Some(4),
            dropped: 1,
            deferred: 2,
            reconnects: 1,
            desyncs: 0,
            latency_estimate: Duration(10),
            mean_lateness: Duration(6),
            max_lateness: Duration(30),
        };
        let events = record(|r| {
            r.on_segment_fired(&fired);
            r.on_session_summary(&summary);
        });
        assert_eq!(
            events,
            [
                RecordedEvent::SegmentFired(fired),
                RecordedEvent::SessionSummary(summary),
            ]
        );
    }

    #[test]
    fn empty_buffer_decodes_to_nothing() {
        assert_eq!(decode(&[]).count(), 0);
    }

    #[test]
    fn truncated_record_stops_iteration() {
        let mut rec = RecorderSink::new();
        rec.on_reconnected(&ReconnectedEvent {
            at: DeviceTime(1),
            generation: Generation(2),
            attempts: 1,
        });
        rec.on_reconnected(&ReconnectedEvent {
            at: DeviceTime(2),
            generation: Generation(3),
            attempts: 1,
        });
        let bytes = rec.into_bytes();
        let cut = &bytes[..bytes.len() - 3];
        assert_eq!(decode(cut).count(), 1);
    }
}
