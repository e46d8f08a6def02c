// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Android device link for phitap.
//!
//! This crate drives a real device from the host:
//!
//! - [`Adb`]: the `adb` subprocess calls (push, reverse tunnel, server
//!   launch, `wm size`)
//! - [`ScrcpyTransport`]: a [`Transport`](phitap_core::link::Transport)
//!   writing scrcpy inject-touch messages to the control socket
//! - [`SystemClock`]: a [`HostClock`](phitap_core::time::HostClock) on the
//!   monotonic clock
//! - [`channel`]: background [`EngineSignal`](phitap_core::engine::EngineSignal)
//!   delivery, used by the transport to report a dropped connection

pub mod adb;
pub mod control;
pub mod scrcpy;
pub mod signals;
pub mod time;

pub use adb::{Adb, AdbError};
pub use scrcpy::{ScrcpyConfig, ScrcpyError, ScrcpyTransport};
pub use signals::{ChannelSignals, channel};
pub use time::{SystemClock, now};
