// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Thin wrapper over the `adb` command-line tool.
//!
//! Every call is one blocking `adb` subprocess. Output parsing lives in
//! free functions so it can be tested without a device.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};

use log::{debug, info};

/// Where the server jar is pushed on the device.
pub const DEVICE_SERVER_PATH: &str = "/data/local/tmp/scrcpy-server.jar";

/// Failure of an `adb` invocation.
#[derive(Debug, thiserror::Error)]
pub enum AdbError {
    /// `adb` could not be started.
    #[error("could not run adb: {0}")]
    Spawn(#[from] io::Error),
    /// `adb` ran and reported failure.
    #[error("`adb {command}` failed: {stderr}")]
    Failed {
        /// The subcommand that failed.
        command: String,
        /// What adb printed on stderr.
        stderr: String,
    },
    /// `adb` succeeded but printed something we could not parse.
    #[error("unexpected output from `adb {command}`: {output:?}")]
    UnexpectedOutput {
        /// The subcommand.
        command: String,
        /// Its stdout.
        output: String,
    },
}

/// Launch arguments for the scrcpy server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerArgs {
    /// Server version; must match the pushed jar.
    pub version: String,
    /// Session id, also used in the abstract socket name.
    pub scid: u32,
    /// Longest video dimension requested.
    pub max_size: u32,
    /// Video bit rate.
    pub video_bit_rate: u32,
    /// Video frame rate cap.
    pub max_fps: u32,
}

impl ServerArgs {
    /// The `key=value` arguments passed after the server class.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.version.clone(),
            format!("scid={:08x}", self.scid),
            "log_level=info".to_owned(),
            "audio=false".to_owned(),
            "clipboard_autosync=false".to_owned(),
            "video_codec=h264".to_owned(),
            format!("max_size={}", self.max_size),
            format!("video_bit_rate={}", self.video_bit_rate),
            format!("max_fps={}", self.max_fps),
            "display_id=0".to_owned(),
        ]
    }
}

/// Name of the device-side abstract socket for session `scid`.
#[must_use]
pub fn socket_name(scid: u32) -> String {
    format!("localabstract:scrcpy_{scid:08x}")
}

/// An `adb` binary, optionally bound to one device serial.
#[derive(Clone, Debug)]
pub struct Adb {
    program: PathBuf,
    serial: Option<String>,
}

impl Default for Adb {
    fn default() -> Self {
        Self::new("adb")
    }
}

impl Adb {
    /// Uses `program` as the adb binary.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            serial: None,
        }
    }

    /// Targets the device with `serial` (`adb -s`).
    #[must_use]
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// The targeted serial, if any.
    #[must_use]
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args);
        cmd
    }

    fn run(&self, args: &[&str]) -> Result<Output, AdbError> {
        debug!("adb {}", args.join(" "));
        let output = self.command(args).stdin(Stdio::null()).output()?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(AdbError::Failed {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }

    /// Serials of attached devices in the `device` state.
    ///
    /// # Errors
    ///
    /// Returns [`AdbError`] if `adb devices` fails.
    pub fn devices(&self) -> Result<Vec<String>, AdbError> {
        let output = self.run(&["devices"])?;
        Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Pushes `local` to [`DEVICE_SERVER_PATH`].
    ///
    /// # Errors
    ///
    /// Returns [`AdbError`] if the push fails.
    pub fn push_server(&self, local: &Path) -> Result<(), AdbError> {
        info!("pushing {} to device", local.display());
        let local = local.to_string_lossy();
        self.run(&["push", &*local, DEVICE_SERVER_PATH])?;
        Ok(())
    }

    /// Routes the session's device socket to `tcp:port` on this host.
    ///
    /// # Errors
    ///
    /// Returns [`AdbError`] if the tunnel cannot be set up.
    pub fn reverse(&self, scid: u32, port: u16) -> Result<(), AdbError> {
        let remote = socket_name(scid);
        let local = format!("tcp:{port}");
        self.run(&["reverse", remote.as_str(), local.as_str()])?;
        Ok(())
    }

    /// Removes the session's reverse tunnel.
    ///
    /// # Errors
    ///
    /// Returns [`AdbError`] if adb reports failure.
    pub fn remove_reverse(&self, scid: u32) -> Result<(), AdbError> {
        let remote = socket_name(scid);
        self.run(&["reverse", "--remove", remote.as_str()])?;
        Ok(())
    }

    /// Starts the server in the background. The caller owns the child.
    ///
    /// # Errors
    ///
    /// Returns [`AdbError::Spawn`] if the process cannot be started.
    pub fn start_server(&self, args: &ServerArgs) -> Result<Child, AdbError> {
        info!("starting scrcpy server {}", args.version);
        let classpath = format!("CLASSPATH={DEVICE_SERVER_PATH}");
        let mut shell = vec![
            "shell".to_owned(),
            classpath,
            "app_process".to_owned(),
            "/".to_owned(),
            "com.genymobile.scrcpy.Server".to_owned(),
        ];
        shell.extend(args.to_args());
        let child = self
            .command(&shell)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(child)
    }

    /// Physical screen size from `wm size`.
    ///
    /// # Errors
    ///
    /// Returns [`AdbError`] if the command fails or its output has no
    /// physical size line.
    pub fn screen_size(&self) -> Result<(u32, u32), AdbError> {
        let output = self.run(&["shell", "wm", "size"])?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_wm_size(&stdout).ok_or_else(|| AdbError::UnexpectedOutput {
            command: "shell wm size".to_owned(),
            output: stdout.into_owned(),
        })
    }
}

/// Parses `adb devices` output into serials in the `device` state.
#[must_use]
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (serial, state) = line.split_once('\t')?;
            (state.trim() == "device").then(|| serial.trim().to_owned())
        })
        .collect()
}

/// Parses the `Physical size: WxH` line of `wm size` output.
#[must_use]
pub fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    let rest = output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Physical size:"))?;
    let (w, h) = rest.trim().split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devices_keeps_only_ready_devices() {
        let out = "List of devices attached\n\
                   emulator-5554\tdevice\n\
                   R58M123\tunauthorized\n\
                   192.168.1.7:5555\tdevice\n\
                   \n";
        assert_eq!(parse_devices(out), ["emulator-5554", "192.168.1.7:5555"]);
    }

    #[test]
    fn devices_with_no_devices() {
        assert!(parse_devices("List of devices attached\n\n").is_empty());
    }

    #[test]
    fn wm_size_reads_physical_size() {
        assert_eq!(parse_wm_size("Physical size: 1080x2400\n"), Some((1080, 2400)));
        assert_eq!(
            parse_wm_size("Physical size: 1440x3200\nOverride size: 1080x2400\n"),
            Some((1440, 3200))
        );
        assert_eq!(parse_wm_size("Override size: 1080x2400"), None);
        assert_eq!(parse_wm_size("Physical size: garbage"), None);
    }

    #[test]
    fn server_args_carry_the_session() {
        let args = ServerArgs {
            version: "2.4".to_owned(),
            scid: 0x1234_abcd,
            max_size: 1920,
            video_bit_rate: 8_000_000,
            max_fps: 60,
        }
        .to_args();
        assert_eq!(args[0], "2.4");
        assert!(args.contains(&"scid=1234abcd".to_owned()));
        assert!(args.contains(&"audio=false".to_owned()));
        assert_eq!(socket_name(0x1234_abcd), "localabstract:scrcpy_1234abcd");
    }

    #[test]
    fn serial_is_passed_first() {
        let adb = Adb::new("/opt/adb").with_serial("emulator-5554");
        let cmd = adb.command(["devices"]);
        let args: Vec<&OsStr> = cmd.get_args().collect();
        assert_eq!(args, ["-s", "emulator-5554", "devices"]);
        assert_eq!(adb.serial(), Some("emulator-5554"));
    }
}
