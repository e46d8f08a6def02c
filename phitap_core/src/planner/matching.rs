// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `algo2`: conflict-minimizing slot assignment.
//!
//! Contacts are processed in chords: every contact starting at the same
//! chart time is assigned together. For each chord, in order:
//!
//! 1. Drags and flicks continue a nearby tap or drag still held or released
//!    within `lookahead`, turning its `Up` into a slide.
//! 2. The rest are matched to free slots by reuse cost. The matching is a
//!    greedy pass over all (contact, slot) pairs, cheapest first; it is used
//!    only when it beats handing out slots in ascending order.
//! 3. Contacts still without a slot may cut an earlier tap short, down to
//!    `min_contact`.
//! 4. Failing that, a contact may start late, on the slot that frees
//!    soonest, if the delay stays within `defer_tolerance`.
//! 5. Anything left is dropped.

use alloc::vec::Vec;
use core::cmp::Ordering;

use super::{Board, Contact, ContactKind, MatchingParams, PlannerConfig, SlotState};
use crate::gesture::{GesturePlan, Slot};
use crate::time::ChartTime;
use crate::timeline::Timeline;
use crate::trace::Tracer;

pub(super) fn plan(
    timeline: &Timeline,
    config: &PlannerConfig,
    params: &MatchingParams,
    tracer: &mut Tracer<'_>,
) -> GesturePlan {
    let mut contacts: Vec<Contact> = timeline
        .iter()
        .filter_map(|event| Contact::from_event(event, timeline, config))
        .collect();
    // Flicks start before their note; keep timeline order within a start.
    contacts.sort_by_key(Contact::start);

    let mut board = Board::new(config);
    let mut pending = contacts.into_iter().peekable();
    while let Some(first) = pending.next() {
        let start = first.start();
        let mut chord = Vec::from([first]);
        while let Some(next) = pending.next_if(|c| c.start() == start) {
            chord.push(next);
        }
        assign_chord(&mut board, chord, start, params, tracer);
    }
    board.finish()
}

fn assign_chord(
    board: &mut Board,
    chord: Vec<Contact>,
    start: ChartTime,
    params: &MatchingParams,
    tracer: &mut Tracer<'_>,
) {
    let mut rest = Vec::with_capacity(chord.len());
    for contact in chord {
        match merge_target(board, &contact, params) {
            Some(slot) => board.extend(slot, contact),
            None => rest.push(contact),
        }
    }

    let free = board.free_slots(start);
    let assignment = assign_free(board, &rest, &free, params);
    let mut leftover = Vec::new();
    for (contact, slot) in rest.into_iter().zip(assignment) {
        match slot {
            Some(slot) => board.place(slot, contact),
            None => leftover.push(contact),
        }
    }

    for contact in leftover {
        if let Some(slot) = truncation_target(board, &contact, params) {
            board.truncate(slot, start);
            board.place(slot, contact);
        } else if let Some((slot, at)) = deferral_target(board, start, params) {
            board.truncate(slot, at);
            board.note_deferred(contact.note, start, at, slot, tracer);
            board.place(slot, contact.delayed(at - start));
        } else {
            board.drop_note(contact.note, contact.time, tracer);
        }
    }
}

/// Cost of putting `contact` on a slot in state `state`.
fn reuse_cost(state: &SlotState, contact: &Contact, params: &MatchingParams) -> f64 {
    if state.last.is_none() {
        return params.fresh_slot_cost;
    }
    let idle = (contact.start() - state.free_at).as_millis_f64();
    let idle = if idle > 0.0 { idle } else { 0.0 };
    state.exit.distance(contact.entry()) + params.time_weight * idle
}

/// Cheapest slot among `candidates`, lowest slot on ties.
fn cheapest<'a>(
    candidates: impl Iterator<Item = (Slot, &'a SlotState)>,
    contact: &Contact,
    params: &MatchingParams,
) -> Option<Slot> {
    let mut best: Option<(f64, Slot)> = None;
    for (slot, state) in candidates {
        let cost = reuse_cost(state, contact, params);
        if best.is_none_or(|(b, _)| cost < b) {
            best = Some((cost, slot));
        }
    }
    best.map(|(_, slot)| slot)
}

fn merge_target(board: &Board, contact: &Contact, params: &MatchingParams) -> Option<Slot> {
    if !matches!(contact.kind, ContactKind::Drag | ContactKind::Flick) {
        return None;
    }
    let start = contact.start();
    let candidates = board.slots().filter(|(_, s)| {
        s.last.is_some()
            && s.kind.is_tap_like()
            && s.last_contact < start
            && s.free_at + params.lookahead >= start
            && s.exit.distance(contact.entry()) <= params.merge_radius
    });
    cheapest(candidates, contact, params)
}

/// Assigns `contacts` to `free` slots, one slot each at most.
fn assign_free(
    board: &Board,
    contacts: &[Contact],
    free: &[Slot],
    params: &MatchingParams,
) -> Vec<Option<Slot>> {
    let cost = |ci: usize, slot: Slot| reuse_cost(board.state(slot), &contacts[ci], params);

    let mut in_order: Vec<Option<Slot>> = contacts.iter().map(|_| None).collect();
    let mut in_order_cost = 0.0;
    for (ci, &slot) in free.iter().enumerate().take(contacts.len()) {
        in_order[ci] = Some(slot);
        in_order_cost += cost(ci, slot);
    }

    let mut pairs: Vec<(f64, usize, Slot)> = Vec::with_capacity(contacts.len() * free.len());
    for ci in 0..contacts.len() {
        for &slot in free {
            pairs.push((cost(ci, slot), ci, slot));
        }
    }
    pairs.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    let mut matched: Vec<Option<Slot>> = contacts.iter().map(|_| None).collect();
    let mut taken: Vec<Slot> = Vec::with_capacity(free.len());
    let mut matched_cost = 0.0;
    for (c, ci, slot) in pairs {
        if matched[ci].is_none() && !taken.contains(&slot) {
            matched[ci] = Some(slot);
            taken.push(slot);
            matched_cost += c;
        }
    }

    match f64::total_cmp(&matched_cost, &in_order_cost) {
        Ordering::Less => matched,
        _ => in_order,
    }
}

fn truncation_target(board: &Board, contact: &Contact, params: &MatchingParams) -> Option<Slot> {
    let start = contact.start();
    let candidates = board
        .slots()
        .filter(|(_, s)| s.last.is_some() && s.free_at > start && s.soft_free_at <= start);
    cheapest(candidates, contact, params)
}

/// The slot that can take a contact soonest after `start`, and when.
fn deferral_target(
    board: &Board,
    start: ChartTime,
    params: &MatchingParams,
) -> Option<(Slot, ChartTime)> {
    let limit = start + params.defer_tolerance.min(params.lookahead);
    let mut best: Option<(Slot, ChartTime)> = None;
    for (slot, state) in board.slots() {
        let at = state.available_at();
        if at > start && at <= limit && best.is_none_or(|(_, b)| at < b) {
            best = Some((slot, at));
        }
    }
    best
}
