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
use std::collections::HashMap;

use serde::Serialize;

use super::{Error, CHANNELS, FRAME_SIZE, START_CODE};

/// Clamps the transmitted value of a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelLimit {
    pub min: u8,
    pub max: u8,
}

impl Default for ChannelLimit {
    fn default() -> Self {
        ChannelLimit {
            min: u8::MIN,
            max: u8::MAX,
        }
    }
}

impl ChannelLimit {
    /// Creates a new limit. The minimum may not exceed the maximum.
    pub fn new(min: u8, max: u8) -> Result<ChannelLimit, Error> {
        if min > max {
            return Err(Error::Range(format!(
                "min {} cannot exceed max {}",
                min, max
            )));
        }
        Ok(ChannelLimit { min, max })
    }

    /// Clamps the value into this limit.
    pub fn clamp(&self, value: u8) -> u8 {
        value.clamp(self.min, self.max)
    }
}

/// Computes the value that goes on the wire for a raw channel value: the master dimmer is
/// applied first, then the channel limit.
pub fn output_value(raw: u8, master_dimmer: f64, limit: Option<&ChannelLimit>) -> u8 {
    let dimmed = (f64::from(raw) * master_dimmer)
        .round()
        .clamp(f64::from(u8::MIN), f64::from(u8::MAX)) as u8;
    limit.copied().unwrap_or_default().clamp(dimmed)
}

/// Encodes the raw channel buffer into a full frame, start code included.
pub fn encode(
    channels: &[u8; CHANNELS],
    master_dimmer: f64,
    limits: &HashMap<usize, ChannelLimit>,
) -> [u8; FRAME_SIZE] {
    let mut frame = [0u8; FRAME_SIZE];
    frame[0] = START_CODE;
    for (index, raw) in channels.iter().enumerate() {
        let channel = index + 1;
        frame[channel] = output_value(*raw, master_dimmer, limits.get(&channel));
    }
    frame
}

/// A frame with every channel at zero.
pub fn dark() -> [u8; FRAME_SIZE] {
    let mut frame = [0u8; FRAME_SIZE];
    frame[0] = START_CODE;
    frame
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_output_value_without_limit() {
        for raw in 0..=u8::MAX {
            for dimmer in [0.0, 0.1, 0.25, 0.333, 0.5, 0.75, 0.999, 1.0] {
                let expected = (f64::from(raw) * dimmer).round() as u8;
                assert_eq!(output_value(raw, dimmer, None), expected);
            }
        }
    }

    #[test]
    fn test_output_value_with_limit() {
        let limits = [(0u8, 255u8), (10, 200), (50, 50), (0, 0), (255, 255)];
        for (min, max) in limits {
            let limit = ChannelLimit::new(min, max).expect("valid limit");
            for raw in 0..=u8::MAX {
                for dimmer in [0.0, 0.5, 1.0] {
                    let expected = ((f64::from(raw) * dimmer).round() as u8).clamp(min, max);
                    assert_eq!(output_value(raw, dimmer, Some(&limit)), expected);
                }
            }
        }
    }

    #[test]
    fn test_dimmer_rounds() {
        // 3 * 0.5 = 1.5 which rounds up rather than truncating.
        assert_eq!(output_value(3, 0.5, None), 2);
        assert_eq!(output_value(255, 0.5, None), 128);
    }

    #[test]
    fn test_invalid_limit() {
        assert!(matches!(ChannelLimit::new(200, 100), Err(Error::Range(_))));
        assert!(ChannelLimit::new(100, 100).is_ok());
    }

    #[test]
    fn test_encode() {
        let mut channels = [0u8; CHANNELS];
        channels[0] = 255;
        channels[9] = 100;
        channels[511] = 40;

        let mut limits = HashMap::new();
        limits.insert(10, ChannelLimit::new(0, 30).expect("valid limit"));
        limits.insert(2, ChannelLimit::new(5, 255).expect("valid limit"));

        let frame = encode(&channels, 0.5, &limits);
        assert_eq!(frame.len(), FRAME_SIZE);
        assert_eq!(frame[0], START_CODE);
        assert_eq!(frame[1], 128);
        // A limit floor applies even to dark channels.
        assert_eq!(frame[2], 5);
        assert_eq!(frame[10], 30);
        assert_eq!(frame[512], 20);
        assert_eq!(frame[3], 0);
    }
}
