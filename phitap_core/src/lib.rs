// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core types and algorithms for rhythm-game touch automation.
//!
//! `phitap_core` turns a chart's note records into precisely timed touch
//! injections and keeps the device link alive while it plays them. It is
//! `no_std` compatible (with `alloc`), performs no I/O of its own, and
//! reaches the outside world only through the [`Transport`](link::Transport),
//! [`HostClock`](time::HostClock), [`SignalSource`](engine::SignalSource),
//! and [`TraceSink`](trace::TraceSink) traits.
//!
//! # Architecture
//!
//! ```text
//!   RawNote records
//!       │
//!       ▼
//!   Timeline::build() ──► Planner::plan() ──► GesturePlan
//!                                                 │
//!                 ┌───────────────────────────────┘
//!                 ▼
//!   Engine::run() ──► ClockSync::to_device_time() (when to fire)
//!        │
//!        └──────────► LinkManager::inject()       (what to fire)
//!                          │
//!                          ▼
//!                     Transport (backend)
//! ```
//!
//! **[`timeline`]**: Validated, time-ordered note events. Ties are broken
//! by position, then kind; unresolvable ties and orphaned hold ends are
//! rejected as [`MalformedChart`](error::MalformedChart).
//!
//! **[`planner`]**: Slot assignment under the device's multi-touch limit,
//! with two strategies: greedy (`algo1`) and conflict-minimizing (`algo2`).
//!
//! **[`gesture`]**: Gestures, plans, and the flattened firing order.
//!
//! **[`clock`]**: Smoothed chart-to-device time mapping with drift
//! detection.
//!
//! **[`link`]**: Generation-tagged session management over a pluggable
//! transport, with exponential-backoff reconnection.
//!
//! **[`engine`]**: Cooperative execution state machine.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types,
//! with zero-overhead [`Tracer`](trace::Tracer) wrapper.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `serde` (disabled by default): `Serialize`/`Deserialize` for note
//!   records, time types, and configuration.
//! - `trace` (enabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).
//! - `trace-rich` (disabled by default, implies `trace`): Gates one event per
//!   fired segment.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod clock;
pub mod engine;
pub mod error;
pub mod gesture;
pub mod link;
pub mod planner;
pub mod time;
pub mod timeline;
pub mod trace;

use error::SessionError;
use gesture::GesturePlan;
use planner::Planner;
use timeline::{RawNote, Timeline};
use trace::Tracer;

/// Validates `raw` and plans it: everything that happens before execution.
///
/// # Errors
///
/// Returns [`SessionError::MalformedChart`] if the records cannot form a
/// timeline.
pub fn prepare_session(
    raw: impl IntoIterator<Item = RawNote>,
    planner: &Planner,
    tracer: &mut Tracer<'_>,
) -> Result<(Timeline, GesturePlan), SessionError> {
    let timeline = Timeline::build(raw)?;
    let plan = planner.plan(&timeline, tracer);
    Ok((timeline, plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MalformedChart;
    use crate::planner::PlannerConfig;
    use crate::time::ChartTime;
    use crate::timeline::{NoteId, NoteKind};
    use kurbo::Point;

    #[test]
    fn orphan_hold_end_fails_before_planning() {
        let planner = Planner::new(PlannerConfig::greedy(2)).unwrap();
        let raw = [RawNote {
            id: NoteId(2),
            time: ChartTime::from_millis(10),
            position: Point::ZERO,
            kind: NoteKind::HoldEnd { start: NoteId(1) },
        }];
        let err = prepare_session(raw, &planner, &mut Tracer::none()).unwrap_err();
        assert_eq!(
            err,
            SessionError::MalformedChart(MalformedChart::UnmatchedHoldEnd {
                end: NoteId(2),
                start: NoteId(1),
            })
        );
    }

    #[test]
    fn plans_a_valid_chart() {
        let planner = Planner::new(PlannerConfig::conflict_minimizing(4)).unwrap();
        let raw = [RawNote::tap(1, ChartTime::from_millis(0), Point::ZERO)];
        let (timeline, plan) = prepare_session(raw, &planner, &mut Tracer::none()).unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(plan.gestures().len(), 1);
    }
}
