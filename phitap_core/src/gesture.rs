// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Gestures and gesture plans.
//!
//! A [`Gesture`] is one simulated finger contact: a `Down`, any number of
//! `Move`s, and an `Up`, all on one touch [`Slot`]. A gesture is open on the
//! half-open interval `[down, up)`, so a slot released at `t` can be pressed
//! again at `t`.
//!
//! A [`GesturePlan`] is the planner's full output for a chart. It is
//! read-only once built; [`GesturePlan::firing_order`] flattens it into the
//! exact sequence the engine fires.

use alloc::vec::Vec;
use core::fmt;

use kurbo::Point;

use crate::time::ChartTime;
use crate::timeline::NoteId;

/// One of the device's simultaneously trackable touch points.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Slot(pub u8);

impl Slot {
    /// The slot number as an index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.0)
    }
}

/// Contact phase of a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Phase {
    /// Finger lands.
    Down,
    /// Finger moves while in contact.
    Move,
    /// Finger lifts.
    Up,
}

/// A timed contact point within a gesture.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Segment {
    /// Chart time of the transition.
    pub time: ChartTime,
    /// Contact position.
    pub position: Point,
    /// Contact phase.
    pub phase: Phase,
}

impl Segment {
    /// Creates a segment.
    #[inline]
    #[must_use]
    pub const fn new(time: ChartTime, position: Point, phase: Phase) -> Self {
        Self {
            time,
            position,
            phase,
        }
    }
}

/// One finger contact on one slot.
///
/// Segments start with `Down`, end with `Up`, carry only `Move`s in
/// between, and never go back in time.
#[derive(Clone, Debug, PartialEq)]
pub struct Gesture {
    pub(crate) slot: Slot,
    pub(crate) segments: Vec<Segment>,
    pub(crate) notes: Vec<NoteId>,
}

impl Gesture {
    /// The slot this gesture occupies.
    #[inline]
    #[must_use]
    pub const fn slot(&self) -> Slot {
        self.slot
    }

    /// The contact segments, in time order.
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The notes this gesture plays.
    #[inline]
    #[must_use]
    pub fn notes(&self) -> &[NoteId] {
        &self.notes
    }

    /// Time of the `Down`.
    #[must_use]
    pub fn start(&self) -> ChartTime {
        self.segments.first().map_or(ChartTime::ZERO, |s| s.time)
    }

    /// Time of the `Up`.
    #[must_use]
    pub fn end(&self) -> ChartTime {
        self.segments.last().map_or(ChartTime::ZERO, |s| s.time)
    }

    /// Returns `true` if the contact is held at `t`.
    #[inline]
    #[must_use]
    pub fn is_open_at(&self, t: ChartTime) -> bool {
        self.start() <= t && t < self.end()
    }

    /// Checks the segment shape invariants.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        let n = self.segments.len();
        if n < 2 {
            return false;
        }
        let phases_ok = self.segments.iter().enumerate().all(|(i, s)| match i {
            0 => s.phase == Phase::Down,
            i if i == n - 1 => s.phase == Phase::Up,
            _ => s.phase == Phase::Move,
        });
        phases_ok && self.segments.windows(2).all(|w| w[0].time <= w[1].time)
    }
}

/// A note the planner moved later to find a free slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deferral {
    /// The deferred note.
    pub note: NoteId,
    /// The time the chart asked for.
    pub requested: ChartTime,
    /// The time the contact was scheduled at.
    pub scheduled: ChartTime,
}

/// The planner's complete output for a chart.
#[derive(Clone, Debug, PartialEq)]
pub struct GesturePlan {
    pub(crate) max_touch_points: u8,
    pub(crate) gestures: Vec<Gesture>,
    pub(crate) dropped: Vec<NoteId>,
    pub(crate) deferrals: Vec<Deferral>,
}

/// One segment as the engine fires it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FiringStep {
    /// Position in firing order.
    pub index: usize,
    /// Index of the owning gesture in [`GesturePlan::gestures`].
    pub gesture: usize,
    /// Index of the segment within its gesture.
    pub segment: usize,
    /// The gesture's slot.
    pub slot: Slot,
    /// Chart time to fire at.
    pub time: ChartTime,
    /// Contact position.
    pub position: Point,
    /// Contact phase.
    pub phase: Phase,
}

impl GesturePlan {
    /// An empty plan for the given slot budget.
    #[must_use]
    pub const fn empty(max_touch_points: u8) -> Self {
        Self {
            max_touch_points,
            gestures: Vec::new(),
            dropped: Vec::new(),
            deferrals: Vec::new(),
        }
    }

    /// The slot budget the plan was built for.
    #[inline]
    #[must_use]
    pub const fn max_touch_points(&self) -> u8 {
        self.max_touch_points
    }

    /// All gestures, in the order they were planned.
    #[inline]
    #[must_use]
    pub fn gestures(&self) -> &[Gesture] {
        &self.gestures
    }

    /// Notes that could not be given a slot.
    #[inline]
    #[must_use]
    pub fn dropped(&self) -> &[NoteId] {
        &self.dropped
    }

    /// Notes that were scheduled later than the chart asked.
    #[inline]
    #[must_use]
    pub fn deferrals(&self) -> &[Deferral] {
        &self.deferrals
    }

    /// Number of segments across all gestures.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.gestures.iter().map(|g| g.segments.len()).sum()
    }

    /// Number of gestures open at `t`.
    #[must_use]
    pub fn open_at(&self, t: ChartTime) -> usize {
        self.gestures.iter().filter(|g| g.is_open_at(t)).count()
    }

    /// The largest number of gestures open at any one instant.
    #[must_use]
    pub fn peak_open(&self) -> usize {
        // Lifts sort before presses at the same instant.
        let mut edges: Vec<(ChartTime, i8)> = Vec::with_capacity(self.gestures.len() * 2);
        for g in &self.gestures {
            if g.start() < g.end() {
                edges.push((g.start(), 1));
                edges.push((g.end(), -1));
            }
        }
        edges.sort_unstable();
        let mut open: usize = 0;
        let mut peak = 0;
        for (_, delta) in edges {
            if delta > 0 {
                open += 1;
                peak = peak.max(open);
            } else {
                open = open.saturating_sub(1);
            }
        }
        peak
    }

    /// Flattens the plan into firing order.
    ///
    /// Steps are ordered by chart time, ties broken by ascending slot, then
    /// by plan order within the slot.
    #[must_use]
    pub fn firing_order(&self) -> Vec<FiringStep> {
        let mut steps: Vec<FiringStep> = Vec::with_capacity(self.segment_count());
        for (gi, gesture) in self.gestures.iter().enumerate() {
            for (si, seg) in gesture.segments.iter().enumerate() {
                steps.push(FiringStep {
                    index: 0,
                    gesture: gi,
                    segment: si,
                    slot: gesture.slot,
                    time: seg.time,
                    position: seg.position,
                    phase: seg.phase,
                });
            }
        }
        steps.sort_by(|a, b| {
            a.time
                .cmp(&b.time)
                .then(a.slot.cmp(&b.slot))
                .then(a.gesture.cmp(&b.gesture))
                .then(a.segment.cmp(&b.segment))
        });
        for (i, step) in steps.iter_mut().enumerate() {
            step.index = i;
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn ms(v: i64) -> ChartTime {
        ChartTime::from_millis(v)
    }

    fn tap(slot: u8, at: i64, len: i64) -> Gesture {
        Gesture {
            slot: Slot(slot),
            segments: vec![
                Segment::new(ms(at), Point::ZERO, Phase::Down),
                Segment::new(ms(at + len), Point::ZERO, Phase::Up),
            ],
            notes: vec![NoteId(u32::from(slot))],
        }
    }

    fn plan(gestures: Vec<Gesture>) -> GesturePlan {
        GesturePlan {
            max_touch_points: 2,
            gestures,
            dropped: Vec::new(),
            deferrals: Vec::new(),
        }
    }

    #[test]
    fn open_interval_is_half_open() {
        let g = tap(0, 10, 20);
        assert!(g.is_open_at(ms(10)));
        assert!(g.is_open_at(ms(29)));
        assert!(!g.is_open_at(ms(30)));
        assert!(g.is_well_formed());
    }

    #[test]
    fn back_to_back_gestures_do_not_overlap() {
        let p = plan(vec![tap(0, 0, 10), tap(0, 10, 10), tap(1, 5, 10)]);
        assert_eq!(p.peak_open(), 2);
        assert_eq!(p.open_at(ms(10)), 2);
        assert_eq!(p.open_at(ms(20)), 0);
    }

    #[test]
    fn firing_order_breaks_ties_by_slot_then_plan_order() {
        let p = plan(vec![tap(1, 0, 10), tap(0, 0, 10), tap(0, 10, 5)]);
        let order: Vec<(i64, u8, Phase)> = p
            .firing_order()
            .iter()
            .map(|s| (s.time.as_micros() / 1000, s.slot.0, s.phase))
            .collect();
        assert_eq!(
            order,
            [
                (0, 0, Phase::Down),
                (0, 1, Phase::Down),
                (10, 0, Phase::Up),
                (10, 0, Phase::Down),
                (10, 1, Phase::Up),
                (15, 0, Phase::Up),
            ]
        );
        let indices: Vec<usize> = p.firing_order().iter().map(|s| s.index).collect();
        assert_eq!(indices, [0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn malformed_shapes_are_detected() {
        let mut g = tap(0, 0, 10);
        g.segments.swap(0, 1);
        assert!(!g.is_well_formed());
        let single = Gesture {
            slot: Slot(0),
            segments: vec![Segment::new(ms(0), Point::ZERO, Phase::Down)],
            notes: Vec::new(),
        };
        assert!(!single.is_well_formed());
    }
}
