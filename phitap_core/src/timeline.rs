// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Immutable, time-ordered note events.
//!
//! [`Timeline::build`] validates raw note records coming from a chart parser
//! and sorts them into a deterministic order:
//!
//! 1. ascending time,
//! 2. then lane position (x, then y),
//! 3. then kind, with hold ends first so a finger lifting at an instant is
//!    processed before one landing at the same instant.
//!
//! Two records that agree on all three keys cannot be ordered
//! deterministically and are rejected with
//! [`MalformedChart::AmbiguousTie`]. Hold starts and hold ends are paired
//! explicitly: every [`NoteKind::HoldEnd`] names the id of its start.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::cmp::Ordering;
use core::fmt;

use kurbo::Point;

use crate::error::MalformedChart;
use crate::time::ChartTime;

/// Identifier of a note, unique within a chart.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct NoteId(pub u32);

impl fmt::Debug for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NoteId({})", self.0)
    }
}

/// What the player has to do for a note.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum NoteKind {
    /// A single touch.
    Tap,
    /// Touch down and keep holding.
    HoldStart,
    /// Release a hold.
    HoldEnd {
        /// The [`HoldStart`](Self::HoldStart) this end closes.
        start: NoteId,
    },
    /// Touch while sliding; any contact crossing the note counts.
    Drag,
    /// A fast swipe through the note.
    Flick,
}

impl NoteKind {
    /// Tie-break rank among events at the same time and position.
    const fn rank(self) -> u8 {
        match self {
            Self::HoldEnd { .. } => 0,
            Self::Tap => 1,
            Self::Drag => 2,
            Self::Flick => 3,
            Self::HoldStart => 4,
        }
    }
}

/// A note record as delivered by the chart parser, before validation.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawNote {
    /// Unique id within the chart.
    pub id: NoteId,
    /// Time relative to chart start.
    pub time: ChartTime,
    /// Screen position the note is hit at.
    pub position: Point,
    /// Note kind.
    pub kind: NoteKind,
}

impl RawNote {
    /// A tap record.
    #[must_use]
    pub const fn tap(id: u32, time: ChartTime, position: Point) -> Self {
        Self {
            id: NoteId(id),
            time,
            position,
            kind: NoteKind::Tap,
        }
    }

    /// A drag record.
    #[must_use]
    pub const fn drag(id: u32, time: ChartTime, position: Point) -> Self {
        Self {
            id: NoteId(id),
            time,
            position,
            kind: NoteKind::Drag,
        }
    }

    /// A flick record.
    #[must_use]
    pub const fn flick(id: u32, time: ChartTime, position: Point) -> Self {
        Self {
            id: NoteId(id),
            time,
            position,
            kind: NoteKind::Flick,
        }
    }

    /// A hold as a start/end record pair. The end record uses id `end_id`.
    #[must_use]
    pub const fn hold(
        id: u32,
        end_id: u32,
        start: ChartTime,
        end: ChartTime,
        from: Point,
        to: Point,
    ) -> [Self; 2] {
        [
            Self {
                id: NoteId(id),
                time: start,
                position: from,
                kind: NoteKind::HoldStart,
            },
            Self {
                id: NoteId(end_id),
                time: end,
                position: to,
                kind: NoteKind::HoldEnd { start: NoteId(id) },
            },
        ]
    }
}

/// A validated note event. Only a [`Timeline`] hands these out.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteEvent {
    id: NoteId,
    time: ChartTime,
    position: Point,
    kind: NoteKind,
}

impl NoteEvent {
    /// The note id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> NoteId {
        self.id
    }

    /// Chart-relative time.
    #[inline]
    #[must_use]
    pub const fn time(&self) -> ChartTime {
        self.time
    }

    /// Hit position.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> Point {
        self.position
    }

    /// Note kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> NoteKind {
        self.kind
    }
}

impl From<RawNote> for NoteEvent {
    fn from(raw: RawNote) -> Self {
        Self {
            id: raw.id,
            time: raw.time,
            position: raw.position,
            kind: raw.kind,
        }
    }
}

/// An immutable, deterministically ordered sequence of [`NoteEvent`]s.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Timeline {
    events: Vec<NoteEvent>,
    /// Hold-start id to the index of its hold end in `events`.
    hold_ends: BTreeMap<NoteId, usize>,
}

impl Timeline {
    /// Validates and orders raw note records.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedChart`] if ids repeat, a position is not finite, two
    /// records tie on every ordering key, or holds are not properly paired.
    pub fn build(raw: impl IntoIterator<Item = RawNote>) -> Result<Self, MalformedChart> {
        let mut events: Vec<NoteEvent> = Vec::new();
        let mut seen: BTreeMap<NoteId, NoteKind> = BTreeMap::new();
        for note in raw {
            if !note.position.is_finite() {
                return Err(MalformedChart::NonFinitePosition(note.id));
            }
            if seen.insert(note.id, note.kind).is_some() {
                return Err(MalformedChart::DuplicateId(note.id));
            }
            events.push(note.into());
        }

        // Stable, so an ambiguous pair stays in input order for the report.
        events.sort_by(order);
        for pair in events.windows(2) {
            if order(&pair[0], &pair[1]) == Ordering::Equal {
                return Err(MalformedChart::AmbiguousTie {
                    first: pair[0].id,
                    second: pair[1].id,
                    time: pair[0].time,
                });
            }
        }

        let hold_ends = pair_holds(&events, &seen)?;
        Ok(Self { events, hold_ends })
    }

    /// Iterates the events in order. Call again to restart.
    #[inline]
    pub fn iter(&self) -> core::slice::Iter<'_, NoteEvent> {
        self.events.iter()
    }

    /// Number of events, hold ends included.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if the chart has no notes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The event at `index` in timeline order.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&NoteEvent> {
        self.events.get(index)
    }

    /// The hold end closing the hold that starts with `start`.
    #[must_use]
    pub fn hold_end(&self, start: NoteId) -> Option<&NoteEvent> {
        self.hold_ends.get(&start).and_then(|&i| self.events.get(i))
    }

    /// Time of the last event, if any.
    #[must_use]
    pub fn end_time(&self) -> Option<ChartTime> {
        self.events.last().map(|e| e.time)
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a NoteEvent;
    type IntoIter = core::slice::Iter<'a, NoteEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn order(a: &NoteEvent, b: &NoteEvent) -> Ordering {
    a.time
        .cmp(&b.time)
        .then_with(|| a.position.x.total_cmp(&b.position.x))
        .then_with(|| a.position.y.total_cmp(&b.position.y))
        .then_with(|| a.kind.rank().cmp(&b.kind.rank()))
}

fn pair_holds(
    events: &[NoteEvent],
    kinds: &BTreeMap<NoteId, NoteKind>,
) -> Result<BTreeMap<NoteId, usize>, MalformedChart> {
    let starts: BTreeMap<NoteId, ChartTime> = events
        .iter()
        .filter(|e| e.kind == NoteKind::HoldStart)
        .map(|e| (e.id, e.time))
        .collect();

    let mut ends = BTreeMap::new();
    for (index, event) in events.iter().enumerate() {
        let NoteKind::HoldEnd { start } = event.kind else {
            continue;
        };
        if kinds.get(&start) != Some(&NoteKind::HoldStart) {
            return Err(MalformedChart::UnmatchedHoldEnd {
                end: event.id,
                start,
            });
        }
        let Some(&start_time) = starts.get(&start) else {
            return Err(MalformedChart::UnmatchedHoldEnd {
                end: event.id,
                start,
            });
        };
        if event.time <= start_time {
            return Err(MalformedChart::EmptyHold {
                start,
                end_time: event.time,
            });
        }
        if ends.insert(start, index).is_some() {
            return Err(MalformedChart::DuplicateHoldEnd(start));
        }
    }

    if let Some(open) = starts.keys().find(|id| !ends.contains_key(id)) {
        return Err(MalformedChart::UnterminatedHold(*open));
    }
    Ok(ends)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: i64) -> ChartTime {
        ChartTime::from_millis(v)
    }

    #[test]
    fn orders_by_time_then_lane() {
        let tl = Timeline::build([
            RawNote::tap(1, ms(200), Point::new(10.0, 0.0)),
            RawNote::tap(2, ms(100), Point::new(50.0, 0.0)),
            RawNote::tap(3, ms(100), Point::new(20.0, 0.0)),
        ])
        .unwrap();
        let ids: Vec<u32> = tl.iter().map(|e| e.id().0).collect();
        assert_eq!(ids, [3, 2, 1]);
        assert_eq!(tl.end_time(), Some(ms(200)));
    }

    #[test]
    fn iteration_restarts() {
        let tl = Timeline::build([
            RawNote::tap(1, ms(0), Point::new(0.0, 0.0)),
            RawNote::drag(2, ms(5), Point::new(0.0, 0.0)),
        ])
        .unwrap();
        let first: Vec<_> = tl.iter().map(NoteEvent::id).collect();
        let second: Vec<_> = (&tl).into_iter().map(NoteEvent::id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn hold_end_sorts_before_tap_at_same_spot() {
        let [start, end] = RawNote::hold(
            1,
            2,
            ms(0),
            ms(100),
            Point::new(5.0, 5.0),
            Point::new(5.0, 5.0),
        );
        let tap = RawNote::tap(3, ms(100), Point::new(5.0, 5.0));
        let tl = Timeline::build([tap, end, start]).unwrap();
        let ids: Vec<u32> = tl.iter().map(|e| e.id().0).collect();
        assert_eq!(ids, [1, 2, 3]);
        assert_eq!(tl.hold_end(NoteId(1)).map(NoteEvent::id), Some(NoteId(2)));
    }

    #[test]
    fn rejects_unresolvable_tie() {
        let err = Timeline::build([
            RawNote::tap(1, ms(50), Point::new(1.0, 1.0)),
            RawNote::tap(2, ms(50), Point::new(1.0, 1.0)),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            MalformedChart::AmbiguousTie {
                first: NoteId(1),
                second: NoteId(2),
                time: ms(50),
            }
        );
    }

    #[test]
    fn rejects_orphan_hold_end() {
        let err = Timeline::build([RawNote {
            id: NoteId(9),
            time: ms(10),
            position: Point::ZERO,
            kind: NoteKind::HoldEnd { start: NoteId(4) },
        }])
        .unwrap_err();
        assert_eq!(
            err,
            MalformedChart::UnmatchedHoldEnd {
                end: NoteId(9),
                start: NoteId(4),
            }
        );
    }

    #[test]
    fn rejects_hold_end_pointing_at_a_tap() {
        let err = Timeline::build([
            RawNote::tap(1, ms(0), Point::ZERO),
            RawNote {
                id: NoteId(2),
                time: ms(10),
                position: Point::ZERO,
                kind: NoteKind::HoldEnd { start: NoteId(1) },
            },
        ])
        .unwrap_err();
        assert!(matches!(err, MalformedChart::UnmatchedHoldEnd { .. }));
    }

    #[test]
    fn rejects_unterminated_and_empty_holds() {
        let [start, _] = RawNote::hold(1, 2, ms(0), ms(10), Point::ZERO, Point::ZERO);
        assert_eq!(
            Timeline::build([start]).unwrap_err(),
            MalformedChart::UnterminatedHold(NoteId(1))
        );

        let pair = RawNote::hold(1, 2, ms(10), ms(10), Point::ZERO, Point::ZERO);
        assert_eq!(
            Timeline::build(pair).unwrap_err(),
            MalformedChart::EmptyHold {
                start: NoteId(1),
                end_time: ms(10),
            }
        );
    }

    #[test]
    fn rejects_duplicate_ids_and_nan() {
        assert_eq!(
            Timeline::build([
                RawNote::tap(1, ms(0), Point::ZERO),
                RawNote::tap(1, ms(5), Point::ZERO),
            ])
            .unwrap_err(),
            MalformedChart::DuplicateId(NoteId(1))
        );
        assert_eq!(
            Timeline::build([RawNote::tap(1, ms(0), Point::new(f64::NAN, 0.0))]).unwrap_err(),
            MalformedChart::NonFinitePosition(NoteId(1))
        );
    }

    #[test]
    fn empty_chart_is_valid() {
        let tl = Timeline::build(Vec::<RawNote>::new()).unwrap();
        assert!(tl.is_empty());
        assert_eq!(tl.end_time(), None);
    }
}
