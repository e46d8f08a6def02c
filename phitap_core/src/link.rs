// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Device link management.
//!
//! Phitap splits device work into a transport-generic manager here and
//! platform *backend* crates that implement [`Transport`]:
//!
//! - **Transport**: connects to the device, sends one touch command per call,
//!   and answers a liveness probe. It knows nothing about sessions.
//!
//! - **Manager**: [`LinkManager`] owns the transport and the session state.
//!   Every session gets a [`Generation`], and every injection must carry the
//!   generation it was issued under. A command tagged with an older
//!   generation is rejected *before* the transport sees it, so nothing is
//!   replayed into a session that replaced the one it was meant for.
//!
//! Timing budgets are enforced against the caller's [`HostClock`]: a probe
//! that answers later than [`LinkConfig::health_budget`] counts as dead, and
//! an injection confirmed later than [`LinkConfig::inject_budget`] still
//! succeeds but yields no latency sample.
//!
//! Reconnection draws from one backoff schedule per outage. The schedule and
//! its attempt count carry over between [`LinkManager::reconnect`] calls and
//! only start again after a plan command is confirmed on the new session, so
//! a device that accepts connections but drops every command still runs out
//! of attempts.
//!
//! # Crate boundaries
//!
//! `phitap_core` owns the session bookkeeping and reconnection policy.
//! `phitap_backend_android` provides the scrcpy-over-adb transport. Tests
//! use scripted in-memory transports.

use alloc::format;
use core::fmt;

use kurbo::Point;

use crate::error::LinkError;
use crate::gesture::{Phase, Slot};
use crate::time::{DeviceTime, Duration, HostClock};
use crate::trace::{ReconnectAttemptEvent, Tracer};

/// Identifier of one device-link session. Increases on every reconnect.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u32);

impl Generation {
    /// The first session's generation.
    pub const FIRST: Self = Self(1);

    /// The generation after this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Generation({})", self.0)
    }
}

/// Result of a health check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Health {
    /// The device answered within budget.
    Alive,
    /// The device did not answer, or answered too late.
    Dead,
}

/// Why a command is being sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandOrigin {
    /// A plan segment, by firing-order index.
    Plan {
        /// Firing-order index.
        index: usize,
    },
    /// Re-pressing a contact that was open when the link dropped.
    Restore,
    /// Lifting a contact that was still open when the session ended early.
    Release,
}

/// One touch transition to inject.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TouchCommand {
    /// Touch slot.
    pub slot: Slot,
    /// Contact phase.
    pub phase: Phase,
    /// Screen position.
    pub position: Point,
    /// Device time the command is scheduled for.
    pub at: DeviceTime,
    /// Why it is sent.
    pub origin: CommandOrigin,
}

/// A physical connection to a device.
pub trait Transport {
    /// Transport-specific failure.
    type Error: fmt::Display;

    /// Opens a connection for session `generation`, replacing any previous
    /// one. Anything the transport reports about this connection later
    /// should carry the same generation.
    fn connect(&mut self, generation: Generation) -> Result<(), Self::Error>;

    /// Tears the connection down. Must be safe to call when not connected.
    fn disconnect(&mut self);

    /// Sends one command and returns once the transport has accepted it.
    fn send(&mut self, command: &TouchCommand) -> Result<(), Self::Error>;

    /// Checks that the device is still there.
    fn probe(&mut self) -> Health;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Exponential backoff for reconnection.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Factor applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// 250 ms doubling up to 4 s, six attempts.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            multiplier: 2.0,
            max_delay: Duration::from_millis(4_000),
            max_attempts: 6,
        }
    }

    /// The delay before each attempt, in order.
    #[must_use]
    pub fn delays(&self) -> Backoff {
        Backoff {
            next: self.initial_delay.min(self.max_delay),
            multiplier: self.multiplier,
            max_delay: self.max_delay,
            remaining: self.max_attempts,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Iterator over backoff delays; see [`ReconnectPolicy::delays`].
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    multiplier: f64,
    max_delay: Duration,
    remaining: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.next;
        self.next = delay.mul_f64(self.multiplier).min(self.max_delay);
        Some(delay)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Backoff {}

/// Configuration for [`LinkManager`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LinkConfig {
    /// Backoff used by [`LinkManager::reconnect`].
    pub reconnect: ReconnectPolicy,
    /// Longest a health probe may take before the link counts as dead.
    pub health_budget: Duration,
    /// Longest an injection may take and still yield a latency sample.
    pub inject_budget: Duration,
}

impl LinkConfig {
    /// Standard backoff, 500 ms probes, 50 ms injections.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            reconnect: ReconnectPolicy::standard(),
            health_budget: Duration::from_millis(500),
            inject_budget: Duration::from_millis(50),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::standard()
    }
}

// ---------------------------------------------------------------------------
// LinkManager
// ---------------------------------------------------------------------------

/// Outcome of a confirmed injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InjectAck {
    /// Round trip, or `None` if it exceeded the injection budget.
    pub round_trip: Option<Duration>,
}

#[derive(Clone, Debug)]
struct LinkSession {
    generation: Generation,
    last_health_check: Option<DeviceTime>,
    /// Attempts since the last confirmed plan command.
    reconnect_attempts: u32,
    /// Remaining schedule of the current outage.
    backoff: Option<Backoff>,
    connected: bool,
}

/// Owns the device connection and its session generation.
#[derive(Debug)]
pub struct LinkManager<T> {
    transport: T,
    config: LinkConfig,
    session: LinkSession,
}

impl<T: Transport> LinkManager<T> {
    /// Connects `transport` and starts session [`Generation::FIRST`].
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::ConnectFailed`] if the transport cannot connect.
    pub fn connect(mut transport: T, config: LinkConfig) -> Result<Self, LinkError> {
        transport
            .connect(Generation::FIRST)
            .map_err(|e| LinkError::ConnectFailed(format!("{e}")))?;
        Ok(Self {
            transport,
            config,
            session: LinkSession {
                generation: Generation::FIRST,
                last_health_check: None,
                reconnect_attempts: 0,
                backoff: None,
                connected: true,
            },
        })
    }

    /// The live session's generation.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.session.generation
    }

    /// Whether the current session is believed usable.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.session.connected
    }

    /// When the last health check finished.
    #[must_use]
    pub const fn last_health_check(&self) -> Option<DeviceTime> {
        self.session.last_health_check
    }

    /// Reconnect attempts made since a plan command was last confirmed.
    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.session.reconnect_attempts
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// The underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// The underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Marks the session dead without touching the transport, e.g. when a
    /// background reader saw the connection close.
    pub fn mark_down(&mut self) {
        self.session.connected = false;
    }

    /// Sends `command` if `generation` is the live one.
    ///
    /// # Errors
    ///
    /// - [`LinkError::StaleSession`] if `generation` is not the live
    ///   generation. The transport is not touched.
    /// - [`LinkError::LinkDown`] if the session is down or the send failed.
    pub fn inject(
        &mut self,
        command: &TouchCommand,
        generation: Generation,
        host: &mut impl HostClock,
    ) -> Result<InjectAck, LinkError> {
        if generation != self.session.generation {
            return Err(LinkError::StaleSession {
                got: generation,
                current: self.session.generation,
            });
        }
        if !self.session.connected {
            return Err(LinkError::LinkDown);
        }
        let sent = host.now();
        if self.transport.send(command).is_err() {
            self.session.connected = false;
            return Err(LinkError::LinkDown);
        }
        let rtt = host.now().saturating_duration_since(sent);
        if matches!(command.origin, CommandOrigin::Plan { .. }) {
            self.session.backoff = None;
            self.session.reconnect_attempts = 0;
        }
        Ok(InjectAck {
            round_trip: (rtt <= self.config.inject_budget).then_some(rtt),
        })
    }

    /// Probes the device. A probe slower than the health budget is `Dead`.
    pub fn health_check(&mut self, host: &mut impl HostClock) -> Health {
        if !self.session.connected {
            return Health::Dead;
        }
        let start = host.now();
        let answer = self.transport.probe();
        let done = host.now();
        self.session.last_health_check = Some(done);
        let health = if done.saturating_duration_since(start) > self.config.health_budget {
            Health::Dead
        } else {
            answer
        };
        if health == Health::Dead {
            self.session.connected = false;
        }
        health
    }

    /// Replaces the session, retrying with backoff.
    ///
    /// On success the generation is incremented and returned; commands
    /// tagged with any earlier generation are rejected from then on.
    ///
    /// The backoff picks up where the previous call left off unless a plan
    /// command has been confirmed since. A reconnect that succeeds does not
    /// refill the budget by itself.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::ReconnectExhausted`] once every attempt of the
    /// policy has been spent. The session stays down.
    pub fn reconnect(
        &mut self,
        host: &mut impl HostClock,
        tracer: &mut Tracer<'_>,
    ) -> Result<Generation, LinkError> {
        self.transport.disconnect();
        self.session.connected = false;
        let policy = self.config.reconnect;
        let mut backoff = self
            .session
            .backoff
            .take()
            .unwrap_or_else(|| policy.delays());
        let next = self.session.generation.next();
        let mut connected = false;
        for delay in backoff.by_ref() {
            self.session.reconnect_attempts += 1;
            let now = host.now();
            tracer.reconnect_attempt(&ReconnectAttemptEvent {
                at: now,
                attempt: self.session.reconnect_attempts,
                delay,
            });
            wait_until(host, now + delay);
            if self.transport.connect(next).is_ok() {
                connected = true;
                break;
            }
        }
        self.session.backoff = Some(backoff);
        if !connected {
            return Err(LinkError::ReconnectExhausted {
                attempts: self.session.reconnect_attempts,
            });
        }
        self.session.generation = next;
        self.session.connected = true;
        self.session.last_health_check = None;
        Ok(next)
    }
}

fn wait_until(host: &mut impl HostClock, deadline: DeviceTime) {
    while host.now() < deadline {
        host.sleep_until(deadline);
    }
}
