// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::time::Duration;

pub mod curve;
pub mod discovery;
pub mod frame;
pub mod line;
pub mod transmitter;

pub use curve::FadeCurve;
pub use frame::ChannelLimit;
pub use transmitter::{Statistics, Transmitter};

/// The DMX512 line rate.
pub const BAUD_RATE: u32 = 250_000;

/// A DMX universe is 512 channels.
pub const CHANNELS: usize = 512;

/// The start code for standard dimmer data.
pub const START_CODE: u8 = 0;

/// A frame is the start code followed by every channel.
pub const FRAME_SIZE: usize = CHANNELS + 1;

/// Minimum break duration, with margin.
pub const BREAK_TIME: Duration = Duration::from_micros(100);

/// Minimum mark-after-break duration, with margin.
pub const MARK_AFTER_BREAK: Duration = Duration::from_micros(10);

/// Idle refresh interval. Some fixtures blank out if they don't see a frame this often.
pub const REFRESH_INTERVAL: Duration = Duration::from_millis(40);

/// Minimum gap between two frames when changes arrive back to back.
pub const MIN_FRAME_GAP: Duration = Duration::from_millis(1);

/// Fades recompute their values this often.
pub const FADE_TICK: Duration = Duration::from_millis(20);

/// Errors raised by the DMX layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A channel, byte value or ratio is outside its protocol bounds.
    #[error("{0}")]
    Range(String),

    /// The transmitter has been shut down.
    #[error("controller is closed")]
    Closed,

    /// The serial device failed to open, write, break or drain.
    #[error("device error: {0}")]
    Device(String),
}

impl From<serialport::Error> for Error {
    fn from(e: serialport::Error) -> Self {
        Error::Device(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Device(e.to_string())
    }
}

/// Verifies that the given channel is addressable (1-512).
pub fn check_channel(channel: usize) -> Result<(), Error> {
    if channel < 1 || channel > CHANNELS {
        return Err(Error::Range(format!(
            "channel must be 1-{}, got {}",
            CHANNELS, channel
        )));
    }
    Ok(())
}
