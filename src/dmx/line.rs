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

use std::io::Write;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::{Error, BAUD_RATE};

/// The physical side of the transmitter: something that can hold a break, push a frame and
/// wait for it to leave the wire.
pub trait SerialLine: Send {
    /// Holds the line in a break condition for the given duration.
    fn send_break(&mut self, duration: Duration) -> Result<(), Error>;

    /// Writes the frame bytes.
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), Error>;

    /// Blocks until the transmit buffer has drained.
    fn drain(&mut self) -> Result<(), Error>;
}

/// A DMX line backed by a USB serial interface.
pub struct SerialPortLine {
    port: Box<dyn SerialPort>,
}

impl SerialPortLine {
    /// Opens the named device at 250k baud, 8N2.
    pub fn open(device: &str) -> Result<SerialPortLine, Error> {
        if device.is_empty() {
            return Err(Error::Device("port name cannot be empty".into()));
        }

        let port = serialport::new(device, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::Two)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| Error::Device(format!("failed to open port {}: {}", device, e)))?;

        Ok(SerialPortLine { port })
    }
}

impl SerialLine for SerialPortLine {
    fn send_break(&mut self, duration: Duration) -> Result<(), Error> {
        self.port.set_break()?;
        spin_sleep::sleep(duration);
        self.port.clear_break()?;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), Error> {
        self.port.write_all(frame)?;
        Ok(())
    }

    fn drain(&mut self) -> Result<(), Error> {
        // On POSIX ports flush is a tcdrain.
        self.port.flush()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) use mock::{LineEvent, MockLine};
