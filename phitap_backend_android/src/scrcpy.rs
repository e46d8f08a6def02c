// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! [`Transport`] over a scrcpy server's control socket.
//!
//! Connecting runs the full server bring-up:
//!
//! ```text
//!   adb push (once) ─► listen on tcp:port ─► adb reverse ─► start server
//!        ─► accept video socket ─► accept control socket ─► remove reverse
//!        ─► read video header (screen size) ─► spawn reader threads
//! ```
//!
//! Two background threads per session keep the sockets drained. When the
//! control socket closes or errors, the session is marked dead (seen by
//! [`probe`](Transport::probe)) and, if a signal sender was supplied, an
//! [`EngineSignal::LinkDown`] tagged with that session's generation is sent
//! so the engine notices between injections. A session torn down by [`disconnect`](Transport::disconnect)
//! does not signal.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::Child;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{debug, info, warn};

use phitap_core::engine::EngineSignal;
use phitap_core::link::{Generation, Health, TouchCommand, Transport};

use crate::adb::{Adb, AdbError, ServerArgs};
use crate::control::{
    FALLBACK_SCREEN, ScreenSize, VIDEO_HEADER_LEN, encode_touch, header_device_name,
    parse_video_header,
};

/// Failure of the scrcpy transport.
#[derive(Debug, thiserror::Error)]
pub enum ScrcpyError {
    /// An `adb` step failed.
    #[error(transparent)]
    Adb(#[from] AdbError),
    /// A socket operation failed.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    /// The server never connected back.
    #[error("server did not connect within {0:?}")]
    AcceptTimeout(Duration),
    /// No session is open.
    #[error("not connected")]
    NotConnected,
}

/// Settings for [`ScrcpyTransport`].
#[derive(Clone, Debug)]
pub struct ScrcpyConfig {
    /// Local server jar to push before the first connect, if any.
    pub server_jar: Option<PathBuf>,
    /// Server version string; must match the jar on the device.
    pub server_version: String,
    /// Host port the device connects back to.
    pub port: u16,
    /// Longest video dimension requested from the server.
    pub max_size: u32,
    /// Video bit rate requested from the server.
    pub video_bit_rate: u32,
    /// Video frame rate cap.
    pub max_fps: u32,
    /// How long to wait for the server to open both sockets.
    pub accept_timeout: Duration,
}

impl Default for ScrcpyConfig {
    fn default() -> Self {
        Self {
            server_jar: None,
            server_version: "2.4".to_owned(),
            port: 27188,
            max_size: 1920,
            video_bit_rate: 8_000_000,
            max_fps: 60,
            accept_timeout: Duration::from_secs(10),
        }
    }
}

/// State shared between a session and its reader threads.
#[derive(Debug)]
struct SessionFlags {
    generation: Generation,
    alive: AtomicBool,
    closing: AtomicBool,
}

impl SessionFlags {
    fn fresh(generation: Generation) -> Arc<Self> {
        Arc::new(Self {
            generation,
            alive: AtomicBool::new(true),
            closing: AtomicBool::new(false),
        })
    }

    /// Records that the device side went away, signalling the engine
    /// unless the session is being closed on purpose.
    fn report_loss(&self, signals: Option<&Sender<EngineSignal>>) {
        let was_alive = self.alive.swap(false, Ordering::AcqRel);
        if !was_alive || self.closing.load(Ordering::Acquire) {
            return;
        }
        warn!("scrcpy control socket closed ({:?})", self.generation);
        if let Some(tx) = signals {
            // The engine may already be gone.
            let _ = tx.send(EngineSignal::LinkDown {
                generation: self.generation,
            });
        }
    }
}

#[derive(Debug)]
struct Session {
    control: TcpStream,
    video: TcpStream,
    server: Child,
    screen: ScreenSize,
    flags: Arc<SessionFlags>,
}

/// A [`Transport`] injecting touches through scrcpy.
#[derive(Debug)]
pub struct ScrcpyTransport {
    adb: Adb,
    config: ScrcpyConfig,
    signals: Option<Sender<EngineSignal>>,
    pushed: bool,
    connects: u32,
    session: Option<Session>,
}

impl ScrcpyTransport {
    /// Creates a disconnected transport. `signals`, if given, receives
    /// [`EngineSignal::LinkDown`] when the device drops the connection.
    #[must_use]
    pub fn new(adb: Adb, config: ScrcpyConfig, signals: Option<Sender<EngineSignal>>) -> Self {
        Self {
            adb,
            config,
            signals,
            pushed: false,
            connects: 0,
            session: None,
        }
    }

    /// Screen size of the open session.
    #[must_use]
    pub fn screen(&self) -> Option<ScreenSize> {
        self.session.as_ref().map(|s| s.screen)
    }

    fn next_scid(&mut self) -> u32 {
        self.connects = self.connects.wrapping_add(1);
        (std::process::id() ^ self.connects.rotate_left(16)) & 0x7FFF_FFFF
    }

    fn open(&mut self, generation: Generation) -> Result<Session, ScrcpyError> {
        if let Some(jar) = &self.config.server_jar
            && !self.pushed
        {
            self.adb.push_server(jar)?;
            self.pushed = true;
        }

        let scid = self.next_scid();
        let listener = TcpListener::bind(("127.0.0.1", self.config.port))?;
        self.adb.reverse(scid, self.config.port)?;
        let mut server = self.adb.start_server(&ServerArgs {
            version: self.config.server_version.clone(),
            scid,
            max_size: self.config.max_size,
            video_bit_rate: self.config.video_bit_rate,
            max_fps: self.config.max_fps,
        })?;

        let accepted = accept_pair(&listener, self.config.accept_timeout);
        if let Err(err) = self.adb.remove_reverse(scid) {
            warn!("could not remove reverse tunnel: {err}");
        }
        let (mut video, control) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                let _ = server.kill();
                let _ = server.wait();
                return Err(err);
            }
        };

        let screen = self.read_screen(&mut video);
        control.set_nodelay(true)?;
        info!(
            "scrcpy session {scid:08x} up, screen {}x{}",
            screen.width, screen.height
        );

        let flags = SessionFlags::fresh(generation);
        spawn_readers(&control, &video, &flags, self.signals.clone())?;
        Ok(Session {
            control,
            video,
            server,
            screen,
            flags,
        })
    }

    fn read_screen(&self, video: &mut TcpStream) -> ScreenSize {
        let mut header = [0_u8; VIDEO_HEADER_LEN];
        match video.read_exact(&mut header) {
            Ok(()) => {
                debug!("device: {}", header_device_name(&header));
                if let Some(size) = parse_video_header(&header) {
                    return size;
                }
                warn!("stream header has no screen size; asking wm size");
            }
            Err(err) => warn!("could not read stream header: {err}"),
        }
        match self.adb.screen_size() {
            Ok((w, h)) => ScreenSize::from_dims(w, h).unwrap_or(FALLBACK_SCREEN),
            Err(err) => {
                warn!("wm size failed ({err}); assuming {FALLBACK_SCREEN:?}");
                FALLBACK_SCREEN
            }
        }
    }
}

impl Transport for ScrcpyTransport {
    type Error = ScrcpyError;

    fn connect(&mut self, generation: Generation) -> Result<(), ScrcpyError> {
        self.disconnect();
        let session = self.open(generation)?;
        self.session = Some(session);
        Ok(())
    }

    fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.flags.closing.store(true, Ordering::Release);
        let _ = session.control.shutdown(Shutdown::Both);
        let _ = session.video.shutdown(Shutdown::Both);
        let _ = session.server.kill();
        let _ = session.server.wait();
        debug!("scrcpy session closed");
    }

    fn send(&mut self, command: &TouchCommand) -> Result<(), ScrcpyError> {
        let session = self.session.as_mut().ok_or(ScrcpyError::NotConnected)?;
        let message = encode_touch(command, session.screen);
        if let Err(err) = session.control.write_all(&message) {
            session.flags.alive.store(false, Ordering::Release);
            return Err(err.into());
        }
        Ok(())
    }

    fn probe(&mut self) -> Health {
        let Some(session) = self.session.as_mut() else {
            return Health::Dead;
        };
        let server_running = matches!(session.server.try_wait(), Ok(None));
        if server_running && session.flags.alive.load(Ordering::Acquire) {
            Health::Alive
        } else {
            Health::Dead
        }
    }
}

impl Drop for ScrcpyTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Accepts the video and then the control connection.
fn accept_pair(
    listener: &TcpListener,
    timeout: Duration,
) -> Result<(TcpStream, TcpStream), ScrcpyError> {
    listener.set_nonblocking(true)?;
    let deadline = Instant::now() + timeout;
    let accept = || -> Result<TcpStream, ScrcpyError> {
        loop {
            match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    return Ok(stream);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(ScrcpyError::AcceptTimeout(timeout));
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(err) => return Err(err.into()),
            }
        }
    };
    let video = accept()?;
    let control = accept()?;
    Ok((video, control))
}

fn spawn_readers(
    control: &TcpStream,
    video: &TcpStream,
    flags: &Arc<SessionFlags>,
    signals: Option<Sender<EngineSignal>>,
) -> io::Result<()> {
    let mut control = control.try_clone()?;
    let control_flags = Arc::clone(flags);
    thread::Builder::new()
        .name("phitap-control".into())
        .spawn(move || {
            match drain_control(&mut control) {
                Ok(count) => debug!("control socket EOF after {count} messages"),
                Err(err) => debug!("control socket error: {err}"),
            }
            control_flags.report_loss(signals.as_ref());
        })?;

    let mut video = video.try_clone()?;
    thread::Builder::new()
        .name("phitap-video".into())
        .spawn(move || {
            let _ = io::copy(&mut video, &mut io::sink());
        })?;
    Ok(())
}

/// Reads device messages (`u8` type, `u32` big-endian length, body) until
/// EOF, discarding them. Returns how many complete messages were read.
fn drain_control(reader: &mut impl Read) -> io::Result<usize> {
    let mut count = 0;
    let mut head = [0_u8; 5];
    loop {
        match reader.read_exact(&mut head) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(count),
            Err(err) => return Err(err),
        }
        let len = u32::from_be_bytes([head[1], head[2], head[3], head[4]]);
        let skipped = io::copy(&mut reader.by_ref().take(u64::from(len)), &mut io::sink())?;
        if skipped < u64::from(len) {
            return Ok(count);
        }
        count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Point;
    use phitap_core::gesture::{Phase, Slot};
    use phitap_core::link::CommandOrigin;
    use phitap_core::time::DeviceTime;

    #[test]
    fn drains_messages_until_eof() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0, 0, 0, 0, 3, b'a', b'b', b'c']);
        bytes.extend_from_slice(&[1, 0, 0, 0, 0]);
        bytes.extend_from_slice(&[0, 0, 0]);
        assert_eq!(drain_control(&mut io::Cursor::new(bytes)).unwrap(), 2);
    }

    #[test]
    fn truncated_body_ends_the_drain() {
        let bytes = vec![0, 0, 0, 0, 9, b'x'];
        assert_eq!(drain_control(&mut io::Cursor::new(bytes)).unwrap(), 0);
    }

    #[test]
    fn loss_signals_once() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let flags = SessionFlags::fresh(Generation(3));
        flags.report_loss(Some(&tx));
        flags.report_loss(Some(&tx));
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            [EngineSignal::LinkDown {
                generation: Generation(3)
            }]
        );
        assert!(!flags.alive.load(Ordering::Acquire));
    }

    #[test]
    fn deliberate_close_does_not_signal() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let flags = SessionFlags::fresh(Generation::FIRST);
        flags.closing.store(true, Ordering::Release);
        flags.report_loss(Some(&tx));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnected_transport_is_dead() {
        let mut transport = ScrcpyTransport::new(Adb::default(), ScrcpyConfig::default(), None);
        assert_eq!(transport.probe(), Health::Dead);
        assert!(transport.screen().is_none());
        let err = transport
            .send(&TouchCommand {
                slot: Slot(0),
                phase: Phase::Down,
                position: Point::ZERO,
                at: DeviceTime(0),
                origin: CommandOrigin::Restore,
            })
            .unwrap_err();
        assert!(matches!(err, ScrcpyError::NotConnected));
        transport.disconnect();
    }

    #[test]
    fn accept_times_out_without_a_server() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let err = accept_pair(&listener, Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, ScrcpyError::AcceptTimeout(_)));
    }
}
