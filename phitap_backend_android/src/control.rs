// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! scrcpy control-socket wire format.
//!
//! An inject-touch message is 32 bytes, big-endian:
//!
//! ```text
//!  0      1       2          10    14    18      20       22         24          28        32
//!  ┌──────┬───────┬──────────┬─────┬─────┬───────┬────────┬──────────┬───────────┬─────────┐
//!  │ type │action │pointer id│  x  │  y  │ width │ height │ pressure │ act. btn  │ buttons │
//!  │  u8  │  u8   │   u64    │ i32 │ i32 │  u16  │  u16   │   u16    │    u32    │   u32   │
//!  └──────┴───────┴──────────┴─────┴─────┴───────┴────────┴──────────┴───────────┴─────────┘
//! ```

use phitap_core::gesture::{Phase, Slot};
use phitap_core::link::TouchCommand;

/// Control message type of an injected touch.
pub const MSG_INJECT_TOUCH: u8 = 2;

/// Length of an encoded inject-touch message.
pub const TOUCH_MESSAGE_LEN: usize = 32;

/// Length of the video socket header: device name, codec id, width, height.
pub const VIDEO_HEADER_LEN: usize = 64 + 4 + 4 + 4;

/// Pointer ids start here; slot `n` uses `POINTER_ID_BASE + n`.
pub const POINTER_ID_BASE: u64 = 1000;

const PRESSURE_MAX: u16 = 0xFFFF;
const BUTTON_PRIMARY: u32 = 1;

/// Screen size used when neither the stream header nor `wm size` has one.
pub const FALLBACK_SCREEN: ScreenSize = ScreenSize {
    width: 1080,
    height: 1920,
};

/// Device screen dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScreenSize {
    /// Width.
    pub width: u16,
    /// Height.
    pub height: u16,
}

impl ScreenSize {
    /// Builds a size from wider integers, rejecting zero or oversized
    /// dimensions.
    #[must_use]
    pub fn from_dims(width: u32, height: u32) -> Option<Self> {
        let width = u16::try_from(width).ok().filter(|&w| w > 0)?;
        let height = u16::try_from(height).ok().filter(|&h| h > 0)?;
        Some(Self { width, height })
    }
}

/// scrcpy motion action for a contact phase.
#[must_use]
pub const fn action(phase: Phase) -> u8 {
    match phase {
        Phase::Down => 0,
        Phase::Up => 1,
        Phase::Move => 2,
    }
}

/// Pointer id for a touch slot.
#[must_use]
pub const fn pointer_id(slot: Slot) -> u64 {
    POINTER_ID_BASE + slot.0 as u64
}

/// Rounds `v` to a pixel in `[0, max - 1]`.
#[expect(
    clippy::cast_possible_truncation,
    reason = "float-to-int `as` saturates, and the value is clamped to a u16 range"
)]
fn clamp_coord(v: f64, max: u16) -> i32 {
    let hi = f64::from(max.saturating_sub(1));
    let v = if v.is_nan() { 0.0 } else { v };
    (v + 0.5).floor().clamp(0.0, hi) as i32
}

/// Encodes `command` as an inject-touch message for a `screen`-sized
/// device. Coordinates are rounded and clamped to the screen.
#[must_use]
pub fn encode_touch(command: &TouchCommand, screen: ScreenSize) -> [u8; TOUCH_MESSAGE_LEN] {
    let mut buf = [0_u8; TOUCH_MESSAGE_LEN];
    buf[0] = MSG_INJECT_TOUCH;
    buf[1] = action(command.phase);
    buf[2..10].copy_from_slice(&pointer_id(command.slot).to_be_bytes());
    buf[10..14].copy_from_slice(&clamp_coord(command.position.x, screen.width).to_be_bytes());
    buf[14..18].copy_from_slice(&clamp_coord(command.position.y, screen.height).to_be_bytes());
    buf[18..20].copy_from_slice(&screen.width.to_be_bytes());
    buf[20..22].copy_from_slice(&screen.height.to_be_bytes());
    buf[22..24].copy_from_slice(&PRESSURE_MAX.to_be_bytes());
    buf[24..28].copy_from_slice(&BUTTON_PRIMARY.to_be_bytes());
    buf[28..32].copy_from_slice(&BUTTON_PRIMARY.to_be_bytes());
    buf
}

/// Reads the screen size from the video socket header. Returns `None` when
/// the server reported a zero dimension.
#[must_use]
pub fn parse_video_header(header: &[u8; VIDEO_HEADER_LEN]) -> Option<ScreenSize> {
    let width = u32::from_be_bytes([header[68], header[69], header[70], header[71]]);
    let height = u32::from_be_bytes([header[72], header[73], header[74], header[75]]);
    ScreenSize::from_dims(width, height)
}

/// Device name from the video socket header, up to the first NUL.
#[must_use]
pub fn header_device_name(header: &[u8; VIDEO_HEADER_LEN]) -> String {
    let name = &header[..64];
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    String::from_utf8_lossy(&name[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Point;
    use phitap_core::link::CommandOrigin;
    use phitap_core::time::DeviceTime;

    fn command(slot: u8, phase: Phase, x: f64, y: f64) -> TouchCommand {
        TouchCommand {
            slot: Slot(slot),
            phase,
            position: Point::new(x, y),
            at: DeviceTime(0),
            origin: CommandOrigin::Plan { index: 0 },
        }
    }

    #[test]
    fn touch_message_layout() {
        let screen = ScreenSize {
            width: 1080,
            height: 2400,
        };
        let msg = encode_touch(&command(3, Phase::Move, 540.4, 1200.6), screen);
        assert_eq!(msg.len(), 32);
        assert_eq!(msg[0], 2);
        assert_eq!(msg[1], 2);
        assert_eq!(&msg[2..10], &1003_u64.to_be_bytes());
        assert_eq!(&msg[10..14], &540_i32.to_be_bytes());
        assert_eq!(&msg[14..18], &1201_i32.to_be_bytes());
        assert_eq!(&msg[18..22], &[0x04, 0x38, 0x09, 0x60]);
        assert_eq!(&msg[22..24], &[0xFF, 0xFF]);
        assert_eq!(&msg[24..32], &[0, 0, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn actions_match_android_codes() {
        assert_eq!(action(Phase::Down), 0);
        assert_eq!(action(Phase::Up), 1);
        assert_eq!(action(Phase::Move), 2);
        assert_eq!(pointer_id(Slot(0)), 1000);
    }

    #[test]
    fn coordinates_are_clamped_to_the_screen() {
        let screen = ScreenSize {
            width: 100,
            height: 50,
        };
        let msg = encode_touch(&command(0, Phase::Down, -20.0, 500.0), screen);
        assert_eq!(&msg[10..14], &0_i32.to_be_bytes());
        assert_eq!(&msg[14..18], &49_i32.to_be_bytes());
        let msg = encode_touch(&command(0, Phase::Down, f64::NAN, f64::INFINITY), screen);
        assert_eq!(&msg[10..14], &0_i32.to_be_bytes());
        assert_eq!(&msg[14..18], &49_i32.to_be_bytes());
    }

    #[test]
    fn header_gives_size_and_name() {
        let mut header = [0_u8; VIDEO_HEADER_LEN];
        header[..7].copy_from_slice(b"Pixel 7");
        header[64..68].copy_from_slice(b"h264");
        header[68..72].copy_from_slice(&1080_u32.to_be_bytes());
        header[72..76].copy_from_slice(&2400_u32.to_be_bytes());
        assert_eq!(
            parse_video_header(&header),
            Some(ScreenSize {
                width: 1080,
                height: 2400
            })
        );
        assert_eq!(header_device_name(&header), "Pixel 7");

        header[72..76].copy_from_slice(&0_u32.to_be_bytes());
        assert_eq!(parse_video_header(&header), None);
    }
}
