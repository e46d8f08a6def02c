// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Gesture planning: turning a [`Timeline`] into a [`GesturePlan`].
//!
//! Every playable note becomes a *contact*: the finger path its kind needs
//! (a press for taps and drags, a sampled path for holds, a stroke for
//! flicks). The [`Planner`] then assigns contacts to touch slots under one
//! of two strategies, chosen at configuration time:
//!
//! - [`Strategy::Greedy`] (`algo1`) walks the timeline and gives each
//!   contact the lowest-numbered free slot, dropping the note when none is
//!   free.
//! - [`Strategy::ConflictMinimizing`] (`algo2`) assigns simultaneous
//!   contacts jointly by a matching heuristic that prefers slots whose last
//!   contact ended nearby. It lets drags and flicks continue a lingering
//!   nearby finger. Before dropping a note it may lift an earlier tap early
//!   or delay the note a little.
//!
//! Slots are only ever reused after their previous gesture has lifted, so
//! no plan holds more than `max_touch_points` gestures open at once.
//! Planning is pure and deterministic: no I/O, no randomness, and ties are
//! always broken by slot number and timeline order.

mod contact;
mod greedy;
mod matching;

use alloc::vec;
use alloc::vec::Vec;

use kurbo::{Point, Vec2};

use crate::error::ConfigError;
use crate::gesture::{Deferral, Gesture, GesturePlan, Phase, Slot};
use crate::time::ChartTime;
use crate::timeline::{NoteId, Timeline};
use crate::trace::{NoteDeferredEvent, SlotExhaustionEvent, StrategyKind, Tracer};

pub(crate) use contact::{Contact, ContactKind};

/// Tuning for the conflict-minimizing strategy.
///
/// The reuse cost of a slot is
/// `distance(previous exit, new entry) + time_weight * idle_ms`; a slot that
/// has never been used costs `fresh_slot_cost`. All weights are tunable.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MatchingParams {
    /// How far ahead a contact may look for a slot that frees up, and how
    /// long a lifted tap or drag stays available for a following drag or
    /// flick to continue from.
    pub lookahead: ChartTime,
    /// Longest a single note may be delayed. Must not exceed `lookahead`.
    pub defer_tolerance: ChartTime,
    /// Largest distance a drag or flick will slide from a previous contact.
    pub merge_radius: f64,
    /// Cost per millisecond a slot has been idle.
    pub time_weight: f64,
    /// Cost of a slot with no previous contact.
    pub fresh_slot_cost: f64,
}

impl MatchingParams {
    /// Defaults tuned for Phigros-style judgement windows.
    #[must_use]
    pub const fn phigros() -> Self {
        Self {
            lookahead: ChartTime::from_millis(100),
            defer_tolerance: ChartTime::from_millis(40),
            merge_radius: 120.0,
            time_weight: 1.0 / 50.0,
            fresh_slot_cost: 120.0,
        }
    }
}

impl Default for MatchingParams {
    fn default() -> Self {
        Self::phigros()
    }
}

/// Slot-assignment strategy.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "name"))]
pub enum Strategy {
    /// Lowest free slot, drop on exhaustion.
    #[cfg_attr(feature = "serde", serde(rename = "algo1"))]
    Greedy,
    /// Lookahead matching with spatial reuse.
    #[cfg_attr(feature = "serde", serde(rename = "algo2"))]
    ConflictMinimizing(MatchingParams),
}

impl Strategy {
    /// The strategy's kind, for trace events.
    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        match self {
            Self::Greedy => StrategyKind::Greedy,
            Self::ConflictMinimizing(_) => StrategyKind::ConflictMinimizing,
        }
    }
}

/// Configuration for the [`Planner`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PlannerConfig {
    /// Touch points the device tracks at once (`MAX_TOUCH_POINTS`).
    pub max_touch_points: u8,
    /// Slot-assignment strategy.
    pub strategy: Strategy,
    /// How long a tap or drag press lasts.
    pub tap_duration: ChartTime,
    /// Shortest press a tap or drag may be cut to.
    pub min_contact: ChartTime,
    /// Spacing of `Move` samples along a hold.
    pub hold_sample_interval: ChartTime,
    /// How long before the note a flick stroke starts.
    pub flick_lead: ChartTime,
    /// How long after the note a flick stroke ends.
    pub flick_tail: ChartTime,
    /// Spacing of `Move` samples along a flick stroke.
    pub flick_sample_interval: ChartTime,
    /// Half of the flick stroke, as a screen-space vector.
    pub flick_vector: Vec2,
}

impl PlannerConfig {
    /// `algo1` with Phigros-style contact shapes.
    #[must_use]
    pub const fn greedy(max_touch_points: u8) -> Self {
        Self {
            max_touch_points,
            strategy: Strategy::Greedy,
            tap_duration: ChartTime::from_millis(20),
            min_contact: ChartTime::from_millis(8),
            hold_sample_interval: ChartTime::from_millis(20),
            flick_lead: ChartTime::from_millis(20),
            flick_tail: ChartTime::from_millis(20),
            flick_sample_interval: ChartTime::from_millis(2),
            flick_vector: Vec2::new(0.0, -40.0),
        }
    }

    /// `algo2` with Phigros-style contact shapes and matching weights.
    #[must_use]
    pub const fn conflict_minimizing(max_touch_points: u8) -> Self {
        let mut config = Self::greedy(max_touch_points);
        config.strategy = Strategy::ConflictMinimizing(MatchingParams::phigros());
        config
    }

    /// Checks the configuration for out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_touch_points == 0 {
            return Err(ConfigError::NoTouchPoints);
        }
        let positive = [
            (self.tap_duration, "tap_duration"),
            (self.min_contact, "min_contact"),
            (self.hold_sample_interval, "hold_sample_interval"),
            (self.flick_sample_interval, "flick_sample_interval"),
            (self.flick_lead + self.flick_tail, "flick_lead + flick_tail"),
        ];
        if let Some((_, name)) = positive.iter().find(|(t, _)| !t.is_positive()) {
            return Err(ConfigError::NonPositive(name));
        }
        if self.flick_lead.as_micros() < 0 || self.flick_tail.as_micros() < 0 {
            return Err(ConfigError::Inconsistent(
                "flick_lead and flick_tail must not be negative",
            ));
        }
        if self.min_contact > self.tap_duration {
            return Err(ConfigError::Inconsistent(
                "min_contact must not exceed tap_duration",
            ));
        }
        if let Strategy::ConflictMinimizing(p) = &self.strategy {
            if !p.lookahead.is_positive() {
                return Err(ConfigError::NonPositive("lookahead"));
            }
            if p.defer_tolerance.as_micros() < 0 || p.defer_tolerance > p.lookahead {
                return Err(ConfigError::Inconsistent(
                    "defer_tolerance must lie within the lookahead window",
                ));
            }
            let weight_ok = |w: f64| w >= 0.0 && w.is_finite();
            if !(weight_ok(p.merge_radius) && weight_ok(p.time_weight) && weight_ok(p.fresh_slot_cost)) {
                return Err(ConfigError::Inconsistent(
                    "matching weights must be non-negative numbers",
                ));
            }
        }
        Ok(())
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self::greedy(10)
    }
}

/// Builds gesture plans under a validated configuration.
#[derive(Clone, Debug)]
pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    /// Creates a planner.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn new(config: PlannerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plans `timeline`, reporting dropped and deferred notes to `tracer`.
    #[must_use]
    pub fn plan(&self, timeline: &Timeline, tracer: &mut Tracer<'_>) -> GesturePlan {
        match &self.config.strategy {
            Strategy::Greedy => greedy::plan(timeline, &self.config, tracer),
            Strategy::ConflictMinimizing(params) => {
                matching::plan(timeline, &self.config, params, tracer)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Board: slot bookkeeping shared by both strategies
// ---------------------------------------------------------------------------

/// What the planner knows about one slot.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SlotState {
    /// Index of the slot's latest gesture.
    pub(crate) last: Option<usize>,
    /// Shape of the latest contact on the slot.
    pub(crate) kind: ContactKind,
    /// When the latest gesture lifts.
    pub(crate) free_at: ChartTime,
    /// Earliest time the latest gesture could be made to lift.
    pub(crate) soft_free_at: ChartTime,
    /// Time of the latest gesture's last non-`Up` segment.
    pub(crate) last_contact: ChartTime,
    /// Where the latest gesture lifts.
    pub(crate) exit: Point,
}

impl SlotState {
    const IDLE: Self = Self {
        last: None,
        kind: ContactKind::Tap,
        free_at: ChartTime(i64::MIN),
        soft_free_at: ChartTime(i64::MIN),
        last_contact: ChartTime(i64::MIN),
        exit: Point::ZERO,
    };

    /// Earliest time a new contact could start here, truncating if allowed.
    pub(crate) fn available_at(&self) -> ChartTime {
        self.free_at.min(self.soft_free_at)
    }
}

/// Gestures under construction plus per-slot state.
#[derive(Debug)]
pub(crate) struct Board {
    slots: Vec<SlotState>,
    plan: GesturePlan,
    min_contact: ChartTime,
    strategy: StrategyKind,
}

impl Board {
    pub(crate) fn new(config: &PlannerConfig) -> Self {
        Self {
            slots: vec![SlotState::IDLE; usize::from(config.max_touch_points)],
            plan: GesturePlan::empty(config.max_touch_points),
            min_contact: config.min_contact,
            strategy: config.strategy.kind(),
        }
    }

    pub(crate) fn state(&self, slot: Slot) -> &SlotState {
        &self.slots[slot.index()]
    }

    /// All slots, ascending.
    pub(crate) fn slots(&self) -> impl Iterator<Item = (Slot, &SlotState)> + '_ {
        self.slots.iter().enumerate().map(|(i, s)| (slot_at(i), s))
    }

    /// Slots whose latest gesture has lifted by `at`, ascending.
    pub(crate) fn free_slots(&self, at: ChartTime) -> Vec<Slot> {
        self.slots()
            .filter(|(_, s)| s.free_at <= at)
            .map(|(slot, _)| slot)
            .collect()
    }

    /// Puts `contact` on `slot` as a new gesture.
    pub(crate) fn place(&mut self, slot: Slot, contact: Contact) {
        let index = self.plan.gestures.len();
        self.record(slot, index, &contact);
        self.plan.gestures.push(Gesture {
            slot,
            segments: contact.segments,
            notes: vec![contact.note],
        });
    }

    /// Continues the slot's latest gesture into `contact`: its `Up` is
    /// replaced by the contact's path, starting with a `Move`.
    pub(crate) fn extend(&mut self, slot: Slot, contact: Contact) {
        let Some(index) = self.slots[slot.index()].last else {
            self.place(slot, contact);
            return;
        };
        self.record(slot, index, &contact);
        let gesture = &mut self.plan.gestures[index];
        gesture.segments.pop();
        gesture
            .segments
            .extend(contact.segments.into_iter().enumerate().map(|(i, mut s)| {
                if i == 0 {
                    s.phase = Phase::Move;
                }
                s
            }));
        gesture.notes.push(contact.note);
    }

    /// Lifts the slot's latest gesture at `at` instead of its planned end.
    pub(crate) fn truncate(&mut self, slot: Slot, at: ChartTime) {
        let state = &mut self.slots[slot.index()];
        let Some(index) = state.last else {
            return;
        };
        if at >= state.free_at || at < state.soft_free_at {
            return;
        }
        if let Some(up) = self.plan.gestures[index].segments.last_mut() {
            up.time = at;
        }
        state.free_at = at;
        state.soft_free_at = at;
    }

    pub(crate) fn drop_note(&mut self, note: NoteId, time: ChartTime, tracer: &mut Tracer<'_>) {
        self.plan.dropped.push(note);
        tracer.slot_exhaustion(&SlotExhaustionEvent {
            note,
            time,
            strategy: self.strategy,
        });
    }

    pub(crate) fn note_deferred(
        &mut self,
        note: NoteId,
        requested: ChartTime,
        scheduled: ChartTime,
        slot: Slot,
        tracer: &mut Tracer<'_>,
    ) {
        self.plan.deferrals.push(Deferral {
            note,
            requested,
            scheduled,
        });
        tracer.note_deferred(&NoteDeferredEvent {
            note,
            requested,
            scheduled,
            slot,
        });
    }

    pub(crate) fn finish(self) -> GesturePlan {
        self.plan
    }

    fn record(&mut self, slot: Slot, index: usize, contact: &Contact) {
        let last_contact = contact
            .segments
            .iter()
            .rev()
            .nth(1)
            .map_or(contact.start(), |s| s.time);
        self.slots[slot.index()] = SlotState {
            last: Some(index),
            kind: contact.kind,
            free_at: contact.end(),
            soft_free_at: if contact.kind.is_tap_like() {
                (last_contact + self.min_contact).min(contact.end())
            } else {
                contact.end()
            },
            last_contact,
            exit: contact.exit(),
        };
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "slot count comes from a u8 max_touch_points"
)]
const fn slot_at(index: usize) -> Slot {
    Slot(index as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::RawNote;

    fn ms(v: i64) -> ChartTime {
        ChartTime::from_millis(v)
    }

    #[test]
    fn presets_validate() {
        assert!(PlannerConfig::greedy(2).validate().is_ok());
        assert!(PlannerConfig::conflict_minimizing(10).validate().is_ok());
        assert!(PlannerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_touch_points() {
        assert_eq!(
            Planner::new(PlannerConfig::greedy(0)).unwrap_err(),
            ConfigError::NoTouchPoints
        );
    }

    #[test]
    fn rejects_inconsistent_settings() {
        let mut cfg = PlannerConfig::greedy(2);
        cfg.min_contact = ms(50);
        assert!(matches!(cfg.validate(), Err(ConfigError::Inconsistent(_))));

        let mut cfg = PlannerConfig::greedy(2);
        cfg.hold_sample_interval = ChartTime::ZERO;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NonPositive("hold_sample_interval"))
        );

        let mut cfg = PlannerConfig::conflict_minimizing(2);
        cfg.strategy = Strategy::ConflictMinimizing(MatchingParams {
            defer_tolerance: ms(200),
            ..MatchingParams::phigros()
        });
        assert!(matches!(cfg.validate(), Err(ConfigError::Inconsistent(_))));
    }

    #[test]
    fn truncation_respects_min_contact() {
        let cfg = PlannerConfig::greedy(1);
        let tl = Timeline::build([RawNote::tap(1, ms(0), Point::ZERO)]).unwrap();
        let contact = Contact::from_event(tl.get(0).unwrap(), &tl, &cfg).unwrap();
        let mut board = Board::new(&cfg);
        board.place(Slot(0), contact);

        board.truncate(Slot(0), ms(2));
        assert_eq!(board.state(Slot(0)).free_at, ms(20), "too early, ignored");

        board.truncate(Slot(0), ms(10));
        assert_eq!(board.state(Slot(0)).free_at, ms(10));
        let plan = board.finish();
        assert_eq!(plan.gestures()[0].end(), ms(10));
    }

    #[test]
    fn extending_turns_up_into_move() {
        let cfg = PlannerConfig::greedy(1);
        let tl = Timeline::build([
            RawNote::tap(1, ms(0), Point::ZERO),
            RawNote::drag(2, ms(30), Point::new(10.0, 0.0)),
        ])
        .unwrap();
        let mut board = Board::new(&cfg);
        for ev in &tl {
            let c = Contact::from_event(ev, &tl, &cfg).unwrap();
            if board.state(Slot(0)).last.is_none() {
                board.place(Slot(0), c);
            } else {
                board.extend(Slot(0), c);
            }
        }
        let plan = board.finish();
        let phases: Vec<Phase> = plan.gestures()[0]
            .segments()
            .iter()
            .map(|s| s.phase)
            .collect();
        assert_eq!(phases, [Phase::Down, Phase::Move, Phase::Up]);
        assert_eq!(plan.gestures()[0].notes(), &[NoteId(1), NoteId(2)]);
        assert!(plan.gestures()[0].is_well_formed());
    }
}
