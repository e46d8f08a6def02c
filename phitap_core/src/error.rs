// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy.
//!
//! Only [`MalformedChart`] and an aborted session reach the caller as
//! [`SessionError`]. Slot exhaustion, clock desync, link loss, and stale
//! sessions are handled inside their owning component and surface as trace
//! events instead.

use alloc::string::String;

use crate::engine::AbortReason;
use crate::link::Generation;
use crate::time::ChartTime;
use crate::timeline::NoteId;

/// The raw note records cannot form a deterministic timeline.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MalformedChart {
    /// Two records share the same id.
    #[error("note id {0:?} appears more than once")]
    DuplicateId(NoteId),
    /// A position coordinate is NaN or infinite.
    #[error("note {0:?} has a non-finite position")]
    NonFinitePosition(NoteId),
    /// Two records share time, position, and kind, so no ordering between
    /// them is deterministic.
    #[error("notes {first:?} and {second:?} tie at {time:?} with no way to order them")]
    AmbiguousTie {
        /// The record listed first in the input.
        first: NoteId,
        /// The record listed second in the input.
        second: NoteId,
        /// The shared timestamp.
        time: ChartTime,
    },
    /// A hold end refers to a note that is missing or is not a hold start.
    #[error("hold end {end:?} has no matching hold start {start:?}")]
    UnmatchedHoldEnd {
        /// The hold-end record.
        end: NoteId,
        /// The start it refers to.
        start: NoteId,
    },
    /// Two hold ends refer to the same hold start.
    #[error("hold start {0:?} is closed more than once")]
    DuplicateHoldEnd(NoteId),
    /// A hold start that no hold end refers to.
    #[error("hold start {0:?} is never closed")]
    UnterminatedHold(NoteId),
    /// A hold end at or before its start.
    #[error("hold {start:?} ends at {end_time:?}, not after it starts")]
    EmptyHold {
        /// The hold-start record.
        start: NoteId,
        /// Time of the hold end.
        end_time: ChartTime,
    },
}

/// A planner or engine configuration value is out of range.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `max_touch_points` must be at least one.
    #[error("max_touch_points must be at least 1")]
    NoTouchPoints,
    /// A duration that must be strictly positive is not.
    #[error("{0} must be positive")]
    NonPositive(&'static str),
    /// Two related settings contradict each other.
    #[error("{0}")]
    Inconsistent(&'static str),
}

/// Failure reported by the Device Link Manager.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The call was tagged with a generation other than the live session's.
    #[error("stale session: call tagged {got:?}, live session is {current:?}")]
    StaleSession {
        /// The generation the caller supplied.
        got: Generation,
        /// The live generation.
        current: Generation,
    },
    /// The connection is unresponsive or closed.
    #[error("device link is down")]
    LinkDown,
    /// The initial connection could not be established.
    #[error("could not connect to device: {0}")]
    ConnectFailed(String),
    /// Every reconnect attempt in the policy failed.
    #[error("reconnect failed after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of attempts made.
        attempts: u32,
    },
}

/// Terminal session failure, surfaced to the caller.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// The chart was rejected before execution started.
    #[error("malformed chart: {0}")]
    MalformedChart(#[from] MalformedChart),
    /// Execution stopped before the plan completed.
    #[error("session aborted ({reason}); last fired segment: {last_fired:?}")]
    Aborted {
        /// Why the session stopped.
        reason: AbortReason,
        /// Index (in firing order) of the last confirmed segment, if any.
        last_fired: Option<usize>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn messages_name_the_offending_note() {
        let err = MalformedChart::UnmatchedHoldEnd {
            end: NoteId(7),
            start: NoteId(3),
        };
        let msg = err.to_string();
        assert!(msg.contains("NoteId(7)"), "got {msg}");
        assert!(msg.contains("NoteId(3)"), "got {msg}");
    }

    #[test]
    fn malformed_chart_converts_into_session_error() {
        let err: SessionError = MalformedChart::DuplicateId(NoteId(1)).into();
        assert!(matches!(err, SessionError::MalformedChart(_)));
    }

    #[test]
    fn aborted_reports_last_fired_index() {
        let err = SessionError::Aborted {
            reason: AbortReason::Cancelled,
            last_fired: Some(41),
        };
        assert!(err.to_string().contains("Some(41)"), "got {err}");
    }
}
