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
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Environment, File};
use duration_string::DurationString;
use serde::Deserialize;

use crate::control::SessionTiming;

mod error;

pub use error::ConfigError;

/// Prefix for environment overrides, e.g. DMXSHOW_SERVER_PORT.
pub const ENV_PREFIX: &str = "DMXSHOW";

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u16 = 3000;
pub const DEFAULT_DATA_FILE: &str = ".data/project.yaml";

/// Service configuration.
#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    bind_address: String,

    #[serde(default = "default_server_port")]
    server_port: u16,

    /// The serial device to drive. Falls back to the project's USB interface.
    dmx_port: Option<String>,

    /// Whether to open the DMX device at all.
    #[serde(default = "default_enable_dmx")]
    enable_dmx: bool,

    #[serde(default = "default_data_file")]
    data_file: PathBuf,

    /// How often sessions are pinged, e.g. "30s".
    ping_interval: Option<String>,

    /// How long a session may stay silent before it is dropped.
    read_timeout: Option<String>,

    /// How long a single write to a session may take.
    write_timeout: Option<String>,
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_enable_dmx() -> bool {
    true
}

fn default_data_file() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_FILE)
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_address: default_bind_address(),
            server_port: default_server_port(),
            dmx_port: None,
            enable_dmx: default_enable_dmx(),
            data_file: default_data_file(),
            ping_interval: None,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl Config {
    /// Loads the configuration from an optional YAML file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        Ok(builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize::<Config>()?)
    }

    /// The address the server listens on.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.server_port)
    }

    pub fn dmx_port(&self) -> Option<&str> {
        self.dmx_port.as_deref().filter(|port| !port.is_empty())
    }

    pub fn enable_dmx(&self) -> bool {
        self.enable_dmx
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    /// Session keepalive and deadline settings.
    pub fn session_timing(&self) -> Result<SessionTiming, ConfigError> {
        let defaults = SessionTiming::default();
        Ok(SessionTiming {
            ping_interval: parse_duration(
                "ping_interval",
                &self.ping_interval,
                defaults.ping_interval,
            )?,
            read_timeout: parse_duration("read_timeout", &self.read_timeout, defaults.read_timeout)?,
            write_timeout: parse_duration(
                "write_timeout",
                &self.write_timeout,
                defaults.write_timeout,
            )?,
        })
    }
}

fn parse_duration(
    field: &'static str,
    value: &Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    value.as_ref().map_or(Ok(default), |value| {
        DurationString::from_string(value.clone())
            .map(Duration::from)
            .map_err(|e| ConfigError::Duration {
                field,
                message: e.to_string(),
            })
    })
}
