// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Contact templates: the finger path each note kind needs.

use alloc::vec;
use alloc::vec::Vec;

use kurbo::Point;

use super::PlannerConfig;
use crate::gesture::{Phase, Segment};
use crate::time::ChartTime;
use crate::timeline::{NoteEvent, NoteId, NoteKind, Timeline};

/// Shape class of a contact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ContactKind {
    Tap,
    Drag,
    Flick,
    Hold,
}

impl ContactKind {
    /// Tap-like contacts may lift early, down to `min_contact`.
    pub(crate) const fn is_tap_like(self) -> bool {
        matches!(self, Self::Tap | Self::Drag)
    }
}

/// The segments one note needs, before a slot is chosen.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Contact {
    pub(crate) note: NoteId,
    /// The note's chart time; unaffected by [`Contact::delayed`].
    pub(crate) time: ChartTime,
    pub(crate) kind: ContactKind,
    pub(crate) segments: Vec<Segment>,
}

impl Contact {
    /// Builds the contact for `event`, or `None` for hold ends, which are
    /// folded into their hold start.
    pub(crate) fn from_event(
        event: &NoteEvent,
        timeline: &Timeline,
        config: &PlannerConfig,
    ) -> Option<Self> {
        let (kind, segments) = match event.kind() {
            NoteKind::Tap => (ContactKind::Tap, tap_like(event, config)),
            NoteKind::Drag => (ContactKind::Drag, tap_like(event, config)),
            NoteKind::Flick => (ContactKind::Flick, flick(event, config)),
            NoteKind::HoldStart => {
                let end = timeline.hold_end(event.id())?;
                (ContactKind::Hold, hold(event, end, config))
            }
            NoteKind::HoldEnd { .. } => return None,
        };
        Some(Self {
            note: event.id(),
            time: event.time(),
            kind,
            segments,
        })
    }

    pub(crate) fn start(&self) -> ChartTime {
        self.segments.first().map_or(ChartTime::ZERO, |s| s.time)
    }

    pub(crate) fn end(&self) -> ChartTime {
        self.segments.last().map_or(ChartTime::ZERO, |s| s.time)
    }

    /// Where the finger lands.
    pub(crate) fn entry(&self) -> Point {
        self.segments.first().map_or(Point::ZERO, |s| s.position)
    }

    /// Where the finger lifts.
    pub(crate) fn exit(&self) -> Point {
        self.segments.last().map_or(Point::ZERO, |s| s.position)
    }

    /// Earliest time the contact may lift.
    pub(crate) fn soft_end(&self, min_contact: ChartTime) -> ChartTime {
        if self.kind.is_tap_like() {
            (self.start() + min_contact).min(self.end())
        } else {
            self.end()
        }
    }

    /// The same contact, `by` later.
    pub(crate) fn delayed(mut self, by: ChartTime) -> Self {
        for seg in &mut self.segments {
            seg.time = seg.time + by;
        }
        self
    }
}

fn tap_like(event: &NoteEvent, config: &PlannerConfig) -> Vec<Segment> {
    let t = event.time();
    let p = event.position();
    vec![
        Segment::new(t, p, Phase::Down),
        Segment::new(t + config.tap_duration, p, Phase::Up),
    ]
}

fn hold(start: &NoteEvent, end: &NoteEvent, config: &PlannerConfig) -> Vec<Segment> {
    let (t0, t1) = (start.time(), end.time());
    let (p0, p1) = (start.position(), end.position());
    let mut segments = vec![Segment::new(t0, p0, Phase::Down)];
    push_moves(&mut segments, t0, t1, config.hold_sample_interval, |t| {
        p0.lerp(p1, fraction(t0, t1, t))
    });
    segments.push(Segment::new(t1, p1, Phase::Up));
    segments
}

/// A stroke through the note: in from `-flick_vector`, through the note at
/// its time, out to `+flick_vector`.
fn flick(event: &NoteEvent, config: &PlannerConfig) -> Vec<Segment> {
    let t = event.time();
    let p = event.position();
    let from = p - config.flick_vector;
    let to = p + config.flick_vector;
    let start = t - config.flick_lead;
    let stop = t + config.flick_tail;
    let step = config.flick_sample_interval;

    let mut segments = vec![Segment::new(start, from, Phase::Down)];
    push_moves(&mut segments, start, t, step, |at| {
        from.lerp(p, fraction(start, t, at))
    });
    segments.push(Segment::new(t, p, Phase::Move));
    push_moves(&mut segments, t, stop, step, |at| {
        p.lerp(to, fraction(t, stop, at))
    });
    segments.push(Segment::new(stop, to, Phase::Up));
    segments
}

/// Pushes `Move`s every `step` strictly inside `(from, to)`.
fn push_moves(
    segments: &mut Vec<Segment>,
    from: ChartTime,
    to: ChartTime,
    step: ChartTime,
    at: impl Fn(ChartTime) -> Point,
) {
    if !step.is_positive() {
        return;
    }
    let mut t = from + step;
    while t < to {
        segments.push(Segment::new(t, at(t), Phase::Move));
        t = t + step;
    }
}

fn fraction(from: ChartTime, to: ChartTime, at: ChartTime) -> f64 {
    let span = (to - from).as_micros();
    if span <= 0 {
        return 1.0;
    }
    (at - from).as_micros() as f64 / span as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::RawNote;
    use kurbo::Vec2;

    fn ms(v: i64) -> ChartTime {
        ChartTime::from_millis(v)
    }

    fn config() -> PlannerConfig {
        PlannerConfig::greedy(2)
    }

    fn first_contact(notes: &[RawNote], cfg: &PlannerConfig) -> Contact {
        let tl = Timeline::build(notes.iter().copied()).unwrap();
        let ev = tl.iter().next().unwrap();
        Contact::from_event(ev, &tl, cfg).unwrap()
    }

    #[test]
    fn tap_is_a_down_up_pair() {
        let cfg = config();
        let c = first_contact(&[RawNote::tap(1, ms(100), Point::new(3.0, 4.0))], &cfg);
        assert_eq!(c.segments.len(), 2);
        assert_eq!(c.start(), ms(100));
        assert_eq!(c.end(), ms(100) + cfg.tap_duration);
        assert_eq!(c.soft_end(cfg.min_contact), ms(100) + cfg.min_contact);
    }

    #[test]
    fn hold_samples_between_endpoints() {
        let mut cfg = config();
        cfg.hold_sample_interval = ms(25);
        let notes = RawNote::hold(
            1,
            2,
            ms(0),
            ms(100),
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
        );
        let c = first_contact(&notes, &cfg);
        let times: Vec<i64> = c.segments.iter().map(|s| s.time.as_micros() / 1000).collect();
        assert_eq!(times, [0, 25, 50, 75, 100]);
        assert!((c.segments[2].position.x - 50.0).abs() < 1e-9, "midpoint");
        assert_eq!(c.segments.last().unwrap().phase, Phase::Up);
        assert_eq!(c.soft_end(cfg.min_contact), ms(100));
    }

    #[test]
    fn hold_end_has_no_contact() {
        let cfg = config();
        let notes = RawNote::hold(1, 2, ms(0), ms(10), Point::ZERO, Point::ZERO);
        let tl = Timeline::build(notes).unwrap();
        let end = tl.get(1).unwrap();
        assert!(Contact::from_event(end, &tl, &cfg).is_none());
    }

    #[test]
    fn flick_passes_through_the_note() {
        let mut cfg = config();
        cfg.flick_lead = ms(20);
        cfg.flick_tail = ms(20);
        cfg.flick_sample_interval = ms(5);
        cfg.flick_vector = Vec2::new(0.0, -40.0);
        let p = Point::new(500.0, 500.0);
        let c = first_contact(&[RawNote::flick(1, ms(100), p)], &cfg);
        assert_eq!(c.start(), ms(80));
        assert_eq!(c.end(), ms(120));
        assert_eq!(c.entry(), Point::new(500.0, 540.0));
        assert_eq!(c.exit(), Point::new(500.0, 460.0));
        let at_note = c.segments.iter().find(|s| s.time == ms(100)).unwrap();
        assert_eq!(at_note.position, p);
        assert!(c.segments.windows(2).all(|w| w[0].time < w[1].time));
    }

    #[test]
    fn delaying_shifts_every_segment() {
        let cfg = config();
        let c = first_contact(&[RawNote::drag(1, ms(10), Point::ZERO)], &cfg).delayed(ms(5));
        assert_eq!(c.start(), ms(15));
        assert_eq!(c.end(), ms(15) + cfg.tap_duration);
    }
}
