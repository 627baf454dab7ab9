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
use tracing::debug;

use super::Error;

/// Lists the serial ports that look like USB DMX interfaces.
pub fn list_candidate_serial_ports() -> Result<Vec<String>, Error> {
    let ports = serialport::available_ports()?;
    if ports.is_empty() {
        return Err(Error::Device("no serial ports found".into()));
    }

    let candidates = filter_candidates(
        ports.into_iter().map(|port| port.port_name),
        std::env::consts::OS,
    );
    if candidates.is_empty() {
        return Err(Error::Device("no DMX USB interfaces found".into()));
    }

    debug!(ports = ?candidates, "Found candidate DMX ports");
    Ok(candidates)
}

/// Keeps the names that look like USB serial adapters on the given OS.
fn filter_candidates(names: impl Iterator<Item = String>, os: &str) -> Vec<String> {
    names.filter(|name| is_likely_dmx_port(name, os)).collect()
}

/// Whether a port name looks like a USB serial adapter on the given OS.
pub fn is_likely_dmx_port(name: &str, os: &str) -> bool {
    match os {
        "linux" => name.starts_with("/dev/ttyUSB") || name.starts_with("/dev/ttyACM"),
        "macos" => name.to_lowercase().contains("usb"),
        "windows" => name.to_uppercase().starts_with("COM"),
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_port_heuristics() {
        assert!(is_likely_dmx_port("/dev/ttyUSB0", "linux"));
        assert!(is_likely_dmx_port("/dev/ttyACM1", "linux"));
        assert!(!is_likely_dmx_port("/dev/ttyS0", "linux"));

        assert!(is_likely_dmx_port("/dev/cu.usbserial-EN123", "macos"));
        assert!(is_likely_dmx_port("/dev/tty.USBmodem1", "macos"));
        assert!(!is_likely_dmx_port("/dev/cu.Bluetooth-Incoming-Port", "macos"));

        assert!(is_likely_dmx_port("COM3", "windows"));
        assert!(!is_likely_dmx_port("LPT1", "windows"));

        assert!(!is_likely_dmx_port("/dev/ttyUSB0", "freebsd"));
    }

    #[test]
    fn test_filter_candidates() {
        let names = ["/dev/ttyS0", "/dev/ttyUSB0", "/dev/ttyACM0", "/dev/ttyS1"]
            .into_iter()
            .map(String::from);
        assert_eq!(
            filter_candidates(names, "linux"),
            vec!["/dev/ttyUSB0".to_string(), "/dev/ttyACM0".to_string()]
        );
    }
}
