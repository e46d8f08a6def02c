// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Plans a chart and plays it through the execution engine.
//!
//! By default the plan runs against a simulated device on a virtual clock,
//! so a whole chart plays in an instant. Built with the `device` feature and
//! run with `--device`, it drives a real Android device through scrcpy.
//!
//! Events go to the `log` facade (set `RUST_LOG`), to a
//! [`RecorderSink`](phitap_debug::recorder::RecorderSink) that can be
//! exported as a Chrome trace with `--trace-out`, and with `--pretty` to a
//! [`PrettyPrintSink`](phitap_debug::pretty::PrettyPrintSink) on stderr.

use std::cell::Cell;
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use clap::{Parser, ValueEnum};
use log::{debug, info, warn};
use serde::Deserialize;

use phitap_core::clock::{ClockConfig, ClockSync};
use phitap_core::engine::{Engine, EngineConfig, NoSignals, SessionReport, SignalSource};
use phitap_core::gesture::GesturePlan;
use phitap_core::link::{Generation, Health, LinkConfig, LinkManager, TouchCommand, Transport};
use phitap_core::planner::{MatchingParams, Planner, PlannerConfig, Strategy};
use phitap_core::prepare_session;
use phitap_core::time::{DeviceTime, Duration, HostClock};
use phitap_core::timeline::RawNote;
use phitap_core::trace::{
    AbortedEvent, CalibrationEvent, ClockDesyncEvent, LinkDownEvent, NoteDeferredEvent,
    ReconnectAttemptEvent, ReconnectedEvent, SegmentFiredEvent, SessionSummary,
    SlotExhaustionEvent, StaleInjectionEvent, StateChangeEvent, TraceSink, Tracer,
};

use phitap_debug::chrome;
use phitap_debug::log_sink::LogSink;
use phitap_debug::pretty::PrettyPrintSink;
use phitap_debug::recorder::RecorderSink;

/// Virtual clock start: 1 s.
const SIM_START_TICKS: u64 = 1_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    /// Lowest free slot, drop on exhaustion.
    Algo1,
    /// Lookahead matching with spatial reuse.
    Algo2,
}

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Chart file: a JSON array of raw note records.
    chart: PathBuf,
    /// JSON configuration; missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the slot-assignment strategy.
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    /// Override the device's touch-point limit.
    #[arg(long)]
    touch_points: Option<u8>,
    /// Time from start until chart zero, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    lead_in_ms: u64,
    /// Print every trace event to stderr.
    #[arg(long)]
    pretty: bool,
    /// Write a Chrome trace of the session to this file.
    #[arg(long)]
    trace_out: Option<PathBuf>,
    /// Simulated injection latency, in microseconds.
    #[arg(long, default_value_t = 400)]
    sim_latency_us: u64,
    /// Make the simulated link drop on this send (1-based).
    #[arg(long)]
    sim_drop_at: Option<usize>,
    /// Play on a real device instead of the simulator.
    #[cfg(feature = "device")]
    #[arg(long)]
    device: bool,
    /// Device serial; defaults to the first attached device.
    #[cfg(feature = "device")]
    #[arg(long)]
    serial: Option<String>,
    /// Server jar to push before connecting.
    #[cfg(feature = "device")]
    #[arg(long)]
    server_jar: Option<PathBuf>,
}

impl Args {
    fn apply_overrides(&self, planner: &mut PlannerConfig) {
        if let Some(points) = self.touch_points {
            planner.max_touch_points = points;
        }
        match (self.strategy, planner.strategy) {
            (Some(StrategyArg::Algo1), _) => planner.strategy = Strategy::Greedy,
            (Some(StrategyArg::Algo2), Strategy::Greedy) => {
                planner.strategy = Strategy::ConflictMinimizing(MatchingParams::default());
            }
            _ => {}
        }
    }
}

/// Everything tunable, loaded from `--config`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DemoConfig {
    planner: PlannerConfig,
    clock: ClockConfig,
    engine: EngineConfig,
    link: LinkConfig,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, Box<dyn Error>> {
    let file = File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

// -- sinks -------------------------------------------------------------------

/// Forwards every event to each inner sink, in order.
struct Fanout<'a>(Vec<&'a mut dyn TraceSink>);

macro_rules! forward {
    ($($method:ident($event:ty)),* $(,)?) => {
        $(
            fn $method(&mut self, e: &$event) {
                for sink in &mut self.0 {
                    sink.$method(e);
                }
            }
        )*
    };
}

impl TraceSink for Fanout<'_> {
    forward! {
        on_slot_exhaustion(SlotExhaustionEvent),
        on_note_deferred(NoteDeferredEvent),
        on_calibration(CalibrationEvent),
        on_clock_desync(ClockDesyncEvent),
        on_state_change(StateChangeEvent),
        on_link_down(LinkDownEvent),
        on_reconnect_attempt(ReconnectAttemptEvent),
        on_reconnected(ReconnectedEvent),
        on_stale_injection(StaleInjectionEvent),
        on_aborted(AbortedEvent),
        on_session_summary(SessionSummary),
        on_segment_fired(SegmentFiredEvent),
    }
}

// -- simulated device --------------------------------------------------------

/// A clock that only moves when slept on or when the device spends time.
#[derive(Debug)]
struct SimClock {
    now: Rc<Cell<u64>>,
}

impl HostClock for SimClock {
    fn now(&mut self) -> DeviceTime {
        DeviceTime(self.now.get())
    }

    fn sleep_until(&mut self, deadline: DeviceTime) {
        if deadline.ticks() > self.now.get() {
            self.now.set(deadline.ticks());
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("simulated link lost")]
struct LinkLost;

#[derive(Debug)]
struct SimDevice {
    clock: Rc<Cell<u64>>,
    latency_ticks: u64,
    drop_at: Option<usize>,
    sends: usize,
    up: bool,
}

impl Transport for SimDevice {
    type Error = LinkLost;

    fn connect(&mut self, generation: Generation) -> Result<(), LinkLost> {
        debug!("device session {}", generation.0);
        self.up = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.up = false;
    }

    fn send(&mut self, command: &TouchCommand) -> Result<(), LinkLost> {
        if !self.up {
            return Err(LinkLost);
        }
        self.sends += 1;
        if self.drop_at == Some(self.sends) {
            warn!("simulated link drop on send {}", self.sends);
            self.up = false;
            return Err(LinkLost);
        }
        self.clock
            .set(self.clock.get().saturating_add(self.latency_ticks));
        debug!(
            "slot {} {:?} at ({:.0}, {:.0}) due {}",
            command.slot.0,
            command.phase,
            command.position.x,
            command.position.y,
            command.at.ticks()
        );
        Ok(())
    }

    fn probe(&mut self) -> Health {
        if self.up { Health::Alive } else { Health::Dead }
    }
}

// -- session -----------------------------------------------------------------

fn play<T: Transport>(
    plan: &GesturePlan,
    config: &DemoConfig,
    transport: T,
    host: &mut impl HostClock,
    signals: &mut impl SignalSource,
    lead_in: Duration,
    tracer: &mut Tracer<'_>,
) -> Result<SessionReport, Box<dyn Error>> {
    let mut link = LinkManager::connect(transport, config.link)?;
    let origin = host.now() + lead_in;
    let mut sync = ClockSync::new(config.clock, origin)?;
    let mut engine = Engine::new(plan, config.engine);
    Ok(engine.run(&mut link, &mut sync, host, signals, tracer)?)
}

fn run(
    args: &Args,
    config: &DemoConfig,
    plan: &GesturePlan,
    tracer: &mut Tracer<'_>,
) -> Result<SessionReport, Box<dyn Error>> {
    let lead_in = Duration::from_millis(args.lead_in_ms);

    #[cfg(feature = "device")]
    if args.device {
        return device::play(args, config, plan, lead_in, tracer);
    }

    let clock = Rc::new(Cell::new(SIM_START_TICKS));
    let transport = SimDevice {
        clock: Rc::clone(&clock),
        latency_ticks: args.sim_latency_us.saturating_mul(1000),
        drop_at: args.sim_drop_at,
        sends: 0,
        up: false,
    };
    let mut host = SimClock { now: clock };
    play(
        plan,
        config,
        transport,
        &mut host,
        &mut NoSignals,
        lead_in,
        tracer,
    )
}

#[cfg(feature = "device")]
mod device {
    use super::*;

    use phitap_backend_android::{Adb, ScrcpyConfig, ScrcpyTransport, SystemClock, channel};

    pub(crate) fn play(
        args: &Args,
        config: &DemoConfig,
        plan: &GesturePlan,
        lead_in: Duration,
        tracer: &mut Tracer<'_>,
    ) -> Result<SessionReport, Box<dyn Error>> {
        let serial = match &args.serial {
            Some(serial) => serial.clone(),
            None => Adb::default()
                .devices()?
                .into_iter()
                .next()
                .ok_or("no device attached")?,
        };
        info!("using device {serial}");

        let (tx, mut signals) = channel();
        let scrcpy = ScrcpyConfig {
            server_jar: args.server_jar.clone(),
            ..ScrcpyConfig::default()
        };
        let transport = ScrcpyTransport::new(Adb::default().with_serial(serial), scrcpy, Some(tx));
        super::play(
            plan,
            config,
            transport,
            &mut SystemClock,
            &mut signals,
            lead_in,
            tracer,
        )
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config: DemoConfig = match &args.config {
        Some(path) => read_json(path)?,
        None => DemoConfig::default(),
    };
    args.apply_overrides(&mut config.planner);
    let raw: Vec<RawNote> = read_json(&args.chart)?;
    let planner = Planner::new(config.planner)?;

    let mut log_sink = LogSink::new();
    let mut recorder = RecorderSink::new();
    let mut pretty = PrettyPrintSink::stderr();
    let mut sinks: Vec<&mut dyn TraceSink> = vec![&mut log_sink, &mut recorder];
    if args.pretty {
        sinks.push(&mut pretty);
    }
    let mut fanout = Fanout(sinks);

    let result = {
        let mut tracer = Tracer::new(&mut fanout);
        let (timeline, plan) = prepare_session(raw, &planner, &mut tracer)?;
        info!(
            "{} notes -> {} gestures ({} dropped, {} deferred, peak {} contacts)",
            timeline.len(),
            plan.gestures().len(),
            plan.dropped().len(),
            plan.deferrals().len(),
            plan.peak_open(),
        );
        run(&args, &config, &plan, &mut tracer)
    };
    drop(fanout);

    // Export even when the session aborted; that is when the trace matters.
    if let Some(path) = &args.trace_out {
        let mut out = BufWriter::new(File::create(path)?);
        chrome::export(recorder.as_bytes(), &mut out)?;
        out.flush()?;
        info!("wrote {}", path.display());
    }

    let report = result?;
    let s = report.summary;
    println!(
        "fired {} segments on generation {}; dropped {}, deferred {}, reconnects {}, desyncs {}",
        s.fired, report.generation.0, s.dropped, s.deferred, s.reconnects, s.desyncs,
    );
    println!(
        "lateness mean {:.3} ms, max {:.3} ms; latency estimate {:.3} ms",
        s.mean_lateness.as_millis_f64(),
        s.max_lateness.as_millis_f64(),
        s.latency_estimate.as_millis_f64(),
    );
    Ok(())
}
