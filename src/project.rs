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

use serde::{Deserialize, Serialize};

/// The device used for new projects.
pub const DEFAULT_USB_INTERFACE: &str = "/dev/ttyUSB0";

/// A lighting project: the rig, the looks and the shows built from them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// The serial device the DMX interface is attached to.
    pub usb_interface: String,
    #[serde(default)]
    pub fixtures: Vec<Fixture>,
    #[serde(default)]
    pub presets: Vec<Preset>,
    #[serde(default)]
    pub shows: Vec<Show>,
}

impl Project {
    /// Creates an empty project with a fresh ID.
    pub fn new(name: &str, usb_interface: &str) -> Project {
        Project {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            usb_interface: usb_interface.to_string(),
            ..Default::default()
        }
    }

    pub fn preset(&self, id: &str) -> Option<&Preset> {
        self.presets.iter().find(|preset| preset.id == id)
    }

    pub fn show(&self, id: &str) -> Option<&Show> {
        self.shows.iter().find(|show| show.id == id)
    }
}

/// A lighting device occupying one or more channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub channels: Vec<FixtureChannel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureChannel {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub min: u8,
    #[serde(default = "default_max")]
    pub max: u8,
    pub channel_address: usize,
}

fn default_max() -> u8 {
    u8::MAX
}

/// A named look: a set of channel values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub channels: Vec<ChannelValue>,
}

impl Preset {
    /// The preset as a channel to value map. Later entries win over earlier ones.
    pub fn channel_map(&self) -> HashMap<usize, u8> {
        self.channels
            .iter()
            .map(|channel| (channel.dmx_address, channel.value))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelValue {
    pub dmx_address: usize,
    pub value: u8,
}

/// An ordered list of preset steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Show {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<ShowStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowStep {
    pub preset_id: String,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub fade_ms: u64,
}
