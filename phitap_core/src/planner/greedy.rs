// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `algo1`: lowest free slot, in timeline order.

use super::{Board, Contact, PlannerConfig};
use crate::gesture::GesturePlan;
use crate::timeline::Timeline;
use crate::trace::Tracer;

pub(super) fn plan(
    timeline: &Timeline,
    config: &PlannerConfig,
    tracer: &mut Tracer<'_>,
) -> GesturePlan {
    let mut board = Board::new(config);
    for event in timeline {
        let Some(contact) = Contact::from_event(event, timeline, config) else {
            continue;
        };
        match board.free_slots(contact.start()).first() {
            Some(&slot) => board.place(slot, contact),
            None => board.drop_note(contact.note, event.time(), tracer),
        }
    }
    board.finish()
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use kurbo::Point;

    use crate::gesture::Slot;
    use crate::planner::{Planner, PlannerConfig};
    use crate::time::ChartTime;
    use crate::timeline::{NoteId, RawNote, Timeline};
    use crate::trace::{SlotExhaustionEvent, StrategyKind, TraceSink, Tracer};

    fn ms(v: i64) -> ChartTime {
        ChartTime::from_millis(v)
    }

    #[derive(Default)]
    struct Exhaustions(Vec<SlotExhaustionEvent>);

    impl TraceSink for Exhaustions {
        fn on_slot_exhaustion(&mut self, e: &SlotExhaustionEvent) {
            self.0.push(*e);
        }
    }

    #[test]
    fn simultaneous_taps_take_ascending_slots() {
        let tl = Timeline::build([
            RawNote::tap(1, ms(100), Point::new(100.0, 100.0)),
            RawNote::tap(2, ms(100), Point::new(300.0, 100.0)),
        ])
        .unwrap();
        let planner = Planner::new(PlannerConfig::greedy(10)).unwrap();
        let plan = planner.plan(&tl, &mut Tracer::none());
        let slots: Vec<Slot> = plan.gestures().iter().map(|g| g.slot()).collect();
        assert_eq!(slots, [Slot(0), Slot(1)]);
        assert!(plan.dropped().is_empty());
        assert_eq!(plan.firing_order().len(), 4);
    }

    #[test]
    fn exhaustion_drops_and_reports() {
        let tl = Timeline::build([
            RawNote::tap(1, ms(50), Point::new(0.0, 0.0)),
            RawNote::tap(2, ms(50), Point::new(100.0, 0.0)),
            RawNote::tap(3, ms(50), Point::new(200.0, 0.0)),
        ])
        .unwrap();
        let planner = Planner::new(PlannerConfig::greedy(2)).unwrap();
        let mut sink = Exhaustions::default();
        let plan = planner.plan(&tl, &mut Tracer::new(&mut sink));

        assert_eq!(plan.gestures().len(), 2);
        assert_eq!(plan.dropped(), &[NoteId(3)]);
        assert_eq!(
            sink.0,
            [SlotExhaustionEvent {
                note: NoteId(3),
                time: ms(50),
                strategy: StrategyKind::Greedy,
            }]
        );
        assert!(plan.peak_open() <= 2);
    }

    #[test]
    fn released_slot_is_reused() {
        let tl = Timeline::build([
            RawNote::tap(1, ms(0), Point::ZERO),
            RawNote::tap(2, ms(20), Point::ZERO),
        ])
        .unwrap();
        let planner = Planner::new(PlannerConfig::greedy(1)).unwrap();
        let plan = planner.plan(&tl, &mut Tracer::none());
        assert!(plan.dropped().is_empty());
        assert!(plan.gestures().iter().all(|g| g.slot() == Slot(0)));
    }

    #[test]
    fn hold_keeps_its_slot_until_release() {
        let [start, end] = RawNote::hold(1, 2, ms(0), ms(200), Point::ZERO, Point::ZERO);
        let tl = Timeline::build([start, end, RawNote::tap(3, ms(100), Point::ZERO)]).unwrap();
        let planner = Planner::new(PlannerConfig::greedy(1)).unwrap();
        let plan = planner.plan(&tl, &mut Tracer::none());
        assert_eq!(plan.dropped(), &[NoteId(3)]);
        assert_eq!(plan.gestures()[0].end(), ms(200));
    }
}
