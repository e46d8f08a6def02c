// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property tests over randomly generated, heavily overlapping charts.

use std::collections::BTreeMap;

use kurbo::Point;
use proptest::prelude::*;

use phitap_core::clock::{ClockConfig, ClockSync};
use phitap_core::gesture::{GesturePlan, Phase};
use phitap_core::planner::{Planner, PlannerConfig};
use phitap_core::time::{ChartTime, DeviceTime};
use phitap_core::timeline::{NoteKind, RawNote, Timeline};
use phitap_core::trace::Tracer;

/// One generated note: time (ms), lane position, kind selector, hold length.
type NoteSpec = (i64, u16, u16, u8, i64);

fn note_spec() -> impl Strategy<Value = NoteSpec> {
    (0_i64..1_500, 0_u16..1080, 0_u16..1920, 0_u8..4, 30_i64..400)
}

/// Builds raw records with unique ids. Every x coordinate carries a
/// per-record fraction, so no two records can tie.
fn chart(specs: &[NoteSpec]) -> Vec<RawNote> {
    let mut raw = Vec::new();
    let mut next_id = 0_u32;
    let mut fresh = |x: u16| {
        next_id += 1;
        (next_id, f64::from(x) + f64::from(next_id) * 1e-4)
    };
    for &(t, x, y, kind, hold_len) in specs {
        let time = ChartTime::from_millis(t);
        let y = f64::from(y);
        match kind {
            0 => {
                let (id, x) = fresh(x);
                raw.push(RawNote::tap(id, time, Point::new(x, y)));
            }
            1 => {
                let (id, x) = fresh(x);
                raw.push(RawNote::drag(id, time, Point::new(x, y)));
            }
            2 => {
                let (id, x) = fresh(x);
                raw.push(RawNote::flick(id, time, Point::new(x, y)));
            }
            _ => {
                let (id, x0) = fresh(x);
                let (end_id, x1) = fresh(x);
                raw.extend(RawNote::hold(
                    id,
                    end_id,
                    time,
                    time + ChartTime::from_millis(hold_len),
                    Point::new(x0, y),
                    Point::new(x1, y),
                ));
            }
        }
    }
    raw
}

fn config(max: u8, algo2: bool) -> PlannerConfig {
    if algo2 {
        PlannerConfig::conflict_minimizing(max)
    } else {
        PlannerConfig::greedy(max)
    }
}

fn plan(raw: &[RawNote], config: PlannerConfig) -> (Timeline, GesturePlan) {
    let timeline = Timeline::build(raw.iter().copied()).expect("generated charts are valid");
    let planner = Planner::new(config).expect("presets are valid");
    let plan = planner.plan(&timeline, &mut Tracer::none());
    (timeline, plan)
}

proptest! {
    #[test]
    fn never_exceeds_touch_points(
        specs in prop::collection::vec(note_spec(), 1..60),
        max in 1_u8..6,
        algo2 in any::<bool>(),
    ) {
        let (_, plan) = plan(&chart(&specs), config(max, algo2));
        prop_assert!(plan.peak_open() <= usize::from(max));

        // Stronger: gestures sharing a slot never overlap.
        let mut by_slot: BTreeMap<u8, Vec<(ChartTime, ChartTime)>> = BTreeMap::new();
        for g in plan.gestures() {
            prop_assert!(g.slot().0 < max);
            prop_assert!(g.is_well_formed());
            by_slot.entry(g.slot().0).or_default().push((g.start(), g.end()));
        }
        for spans in by_slot.values_mut() {
            spans.sort();
            for pair in spans.windows(2) {
                prop_assert!(pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn every_playable_note_is_planned_or_dropped(
        specs in prop::collection::vec(note_spec(), 1..60),
        max in 1_u8..6,
        algo2 in any::<bool>(),
    ) {
        let (timeline, plan) = plan(&chart(&specs), config(max, algo2));
        let playable = timeline
            .iter()
            .filter(|e| !matches!(e.kind(), NoteKind::HoldEnd { .. }))
            .count();
        let planned: usize = plan.gestures().iter().map(|g| g.notes().len()).sum();
        prop_assert_eq!(planned + plan.dropped().len(), playable);
        if !algo2 {
            prop_assert!(plan.deferrals().is_empty());
        }
    }

    #[test]
    fn planning_is_deterministic(
        specs in prop::collection::vec(note_spec(), 1..60),
        max in 1_u8..6,
        algo2 in any::<bool>(),
    ) {
        let raw = chart(&specs);
        let (_, first) = plan(&raw, config(max, algo2));
        let (_, second) = plan(&raw, config(max, algo2));
        prop_assert_eq!(format!("{first:?}"), format!("{second:?}"));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn input_order_does_not_matter(
        specs in prop::collection::vec(note_spec(), 1..40),
        algo2 in any::<bool>(),
    ) {
        let raw = chart(&specs);
        let mut reversed = raw.clone();
        reversed.reverse();
        let (_, forward) = plan(&raw, config(3, algo2));
        let (_, backward) = plan(&reversed, config(3, algo2));
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn firing_order_is_time_ordered_and_per_slot_in_plan_order(
        specs in prop::collection::vec(note_spec(), 1..40),
        algo2 in any::<bool>(),
    ) {
        let (_, plan) = plan(&chart(&specs), config(4, algo2));
        let steps = plan.firing_order();
        prop_assert_eq!(steps.len(), plan.segment_count());
        for pair in steps.windows(2) {
            prop_assert!(
                (pair[0].time, pair[0].slot) <= (pair[1].time, pair[1].slot),
                "out of order: {:?} then {:?}", pair[0], pair[1]
            );
        }
        // Per gesture, segments fire in their own order.
        let mut last: BTreeMap<usize, usize> = BTreeMap::new();
        for step in &steps {
            if let Some(&prev) = last.get(&step.gesture) {
                prop_assert!(step.segment > prev);
            } else {
                prop_assert_eq!(step.phase, Phase::Down);
            }
            last.insert(step.gesture, step.segment);
        }
    }

    #[test]
    fn device_time_is_monotonic_in_chart_time(
        samples in prop::collection::vec((0_u64..10_000_000, 0_i64..10_000), 0..12),
        mut probes in prop::collection::vec(-1_000_000_i64..20_000_000, 2..40),
    ) {
        let mut sync = ClockSync::new(ClockConfig::nanosecond_ticks(), DeviceTime(1_000_000))
            .expect("preset is valid");
        for (device, chart_ms) in samples {
            sync.calibrate(DeviceTime(device), ChartTime::from_millis(chart_ms));
        }
        let snapshot = sync.state();
        probes.sort_unstable();
        for pair in probes.windows(2) {
            let a = snapshot.to_device_time(ChartTime::from_micros(pair[0]));
            let b = snapshot.to_device_time(ChartTime::from_micros(pair[1]));
            prop_assert!(a <= b, "{:?} -> {:?}, {:?} -> {:?}", pair[0], a, pair[1], b);
        }
    }
}
