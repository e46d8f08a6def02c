// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recording, pretty-printing, log forwarding, and Chrome trace export for
//! phitap sessions.
//!
//! This crate provides [`TraceSink`](phitap_core::trace::TraceSink)
//! implementations for development and post-mortem analysis:
//!
//! - [`pretty::PrettyPrintSink`]: human-readable one-line-per-event output.
//! - [`log_sink::LogSink`]: forwards events to the [`log`] facade.
//! - [`recorder::RecorderSink`]: compact binary recording with
//!   [`recorder::decode`] for playback.
//! - [`chrome::export`]: writes Chrome Trace Event Format JSON from recorded
//!   bytes.
//!
//! Device times are nanosecond ticks; every sink here prints them in
//! microseconds.

pub mod chrome;
pub mod log_sink;
pub mod pretty;
pub mod recorder;

/// Nanosecond ticks to microseconds.
fn ticks_to_us(ticks: u64) -> f64 {
    ticks as f64 / 1000.0
}
