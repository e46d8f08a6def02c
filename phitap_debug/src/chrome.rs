// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][spec] JSON to the given writer.
//!
//! Engine pauses become duration spans on thread 0; fired segments are
//! instants on one thread per slot (`tid = slot + 1`). Planner events carry
//! no device time and are placed at `ts = 0` with their chart time in
//! `args`.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use phitap_core::engine::EngineState;

use crate::pretty::state_name;
use crate::recorder::{RecordedEvent, decode};
use crate::ticks_to_us;

fn instant(name: &str, cat: &str, ts: f64, tid: u32, args: Value) -> Value {
    json!({
        "ph": "i",
        "name": name,
        "cat": cat,
        "ts": ts,
        "pid": 0,
        "tid": tid,
        "s": "t",
        "args": args,
    })
}

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
pub fn export(bytes: &[u8], writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::SlotExhaustion(e) => events.push(instant(
                "SlotExhaustion",
                "Planner",
                0.0,
                0,
                json!({
                    "note": e.note.0,
                    "chart_ms": e.time.as_millis_f64(),
                    "strategy": format!("{:?}", e.strategy),
                }),
            )),
            RecordedEvent::NoteDeferred(e) => events.push(instant(
                "NoteDeferred",
                "Planner",
                0.0,
                0,
                json!({
                    "note": e.note.0,
                    "requested_ms": e.requested.as_millis_f64(),
                    "scheduled_ms": e.scheduled.as_millis_f64(),
                    "slot": e.slot.0,
                }),
            )),
            RecordedEvent::Calibration(e) => events.push(instant(
                "Calibration",
                "Clock",
                ticks_to_us(e.device_time.ticks()),
                0,
                json!({
                    "chart_ms": e.chart_time.as_millis_f64(),
                    "rate": e.rate,
                    "offset_ticks": e.offset_ticks,
                }),
            )),
            RecordedEvent::ClockDesync(e) => events.push(instant(
                "ClockDesync",
                "Clock",
                ticks_to_us(e.at.ticks()),
                0,
                json!({
                    "drift": e.measured_drift,
                    "threshold": e.threshold,
                }),
            )),
            RecordedEvent::StateChange(e) => {
                let ts = ticks_to_us(e.at.ticks());
                if let EngineState::Paused(_) = e.from {
                    events.push(json!({
                        "ph": "E",
                        "name": state_name(e.from),
                        "cat": "Engine",
                        "ts": ts,
                        "pid": 0,
                        "tid": 0,
                    }));
                }
                if let EngineState::Paused(_) = e.to {
                    events.push(json!({
                        "ph": "B",
                        "name": state_name(e.to),
                        "cat": "Engine",
                        "ts": ts,
                        "pid": 0,
                        "tid": 0,
                    }));
                } else {
                    events.push(instant(
                        state_name(e.to),
                        "Engine",
                        ts,
                        0,
                        json!({ "from": state_name(e.from) }),
                    ));
                }
            }
            RecordedEvent::LinkDown(e) => events.push(instant(
                "LinkDown",
                "Link",
                ticks_to_us(e.at.ticks()),
                0,
                json!({
                    "generation": e.generation.0,
                    "cause": format!("{:?}", e.cause),
                }),
            )),
            RecordedEvent::ReconnectAttempt(e) => events.push(instant(
                "ReconnectAttempt",
                "Link",
                ticks_to_us(e.at.ticks()),
                0,
                json!({
                    "attempt": e.attempt,
                    "delay_ms": e.delay.as_millis_f64(),
                }),
            )),
            RecordedEvent::Reconnected(e) => events.push(instant(
                "Reconnected",
                "Link",
                ticks_to_us(e.at.ticks()),
                0,
                json!({
                    "generation": e.generation.0,
                    "attempts": e.attempts,
                }),
            )),
            RecordedEvent::StaleInjection(e) => events.push(instant(
                "StaleInjection",
                "Link",
                ticks_to_us(e.at.ticks()),
                0,
                json!({
                    "index": e.index,
                    "got": e.got.0,
                    "current": e.current.0,
                }),
            )),
            RecordedEvent::Aborted(e) => events.push(instant(
                "Aborted",
                "Engine",
                ticks_to_us(e.at.ticks()),
                0,
                json!({
                    "reason": e.reason.to_string(),
                    "last_fired": e.last_fired,
                }),
            )),
            RecordedEvent::SessionSummary(s) => events.push(json!({
                "ph": "i",
                "name": "SessionSummary",
                "cat": "Summary",
                "ts": ticks_to_us(s.at.ticks()),
                "pid": 0,
                "tid": 0,
                "s": "g",
                "args": {
                    "fired": s.fired,
                    "last_fired": s.last_fired,
                    "dropped": s.dropped,
                    "deferred": s.deferred,
                    "reconnects": s.reconnects,
                    "desyncs": s.desyncs,
                    "latency_us": ticks_to_us(s.latency_estimate.ticks()),
                    "mean_lateness_us": ticks_to_us(s.mean_lateness.ticks()),
                    "max_lateness_us": ticks_to_us(s.max_lateness.ticks()),
                }
            })),
            RecordedEvent::SegmentFired(e) => events.push(instant(
                &format!("{:?}", e.phase),
                "Segment",
                ticks_to_us(e.fired_at.ticks()),
                u32::from(e.slot.0) + 1,
                json!({
                    "index": e.index,
                    "target_us": ticks_to_us(e.target.ticks()),
                    "generation": e.generation.0,
                    "round_trip_us": e.round_trip.map(|d| ticks_to_us(d.ticks())),
                }),
            )),
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use phitap_core::engine::PauseReason;
    use phitap_core::gesture::{Phase, Slot};
    use phitap_core::link::Generation;
    use phitap_core::time::DeviceTime;
    use phitap_core::trace::{SegmentFiredEvent, StateChangeEvent, TraceSink};

    fn parse(bytes: &[u8]) -> Vec<Value> {
        let mut out = Vec::new();
        export(bytes, &mut out).unwrap();
        serde_json::from_slice(&out).unwrap()
    }

    #[test]
    fn pauses_become_spans() {
        let mut rec = RecorderSink::new();
        rec.on_state_change(&StateChangeEvent {
            at: DeviceTime(1_000),
            from: EngineState::Running,
            to: EngineState::Paused(PauseReason::LinkDown),
        });
        rec.on_state_change(&StateChangeEvent {
            at: DeviceTime(5_000),
            from: EngineState::Paused(PauseReason::LinkDown),
            to: EngineState::Running,
        });

        let parsed = parse(rec.as_bytes());
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0]["ph"], "B");
        assert_eq!(parsed[0]["name"], "paused(link)");
        assert_eq!(parsed[1]["ph"], "E");
        assert_eq!(parsed[1]["ts"], 5.0);
        assert_eq!(parsed[2]["ph"], "i");
        assert_eq!(parsed[2]["name"], "running");
    }

    #[test]
    fn segments_land_on_their_slot_thread() {
        let mut rec = RecorderSink::new();
        rec.on_segment_fired(&SegmentFiredEvent {
            index: 0,
            slot: Slot(2),
            phase: Phase::Down,
            target: DeviceTime(2_000),
            fired_at: DeviceTime(2_500),
            generation: Generation::FIRST,
            round_trip: None,
        });

        let parsed = parse(rec.as_bytes());
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["name"], "Down");
        assert_eq!(parsed[0]["tid"], 3);
        assert_eq!(parsed[0]["ts"], 2.5);
        assert!(parsed[0]["args"]["round_trip_us"].is_null());
    }

    #[test]
    fn export_empty_recording() {
        assert!(parse(&[]).is_empty());
    }
}
