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
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use dmxshow::config::Config;
use dmxshow::control::ControlContext;
use dmxshow::dmx::discovery;
use dmxshow::server::{self, AppState};
use dmxshow::storage::{ProjectStore, YamlStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=DMX show controller

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/dmxshow
ExecStart=/usr/local/bin/dmxshow start --config "$DMXSHOW_CONFIG"

[Install]
WantedBy=multi-user.target
Alias=dmxshow.service
"#;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A DMX512 show controller."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the controller and its control server.
    Start {
        /// The path to the config file. Environment variables prefixed with DMXSHOW_
        /// override it.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Lists the serial ports that look like DMX interfaces.
    Ports {},
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config } => start(config.as_deref()).await?,
        Commands::Ports {} => {
            let ports = discovery::list_candidate_serial_ports()?;

            println!("Ports:");
            for port in ports {
                println!("- {}", port);
            }
        }
        Commands::Systemd {} => println!("{}", SYSTEMD_SERVICE),
    }

    Ok(())
}

async fn start(config_path: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let config = Config::load(config_path)?;
    let store = YamlStore::open_or_default(config.data_file())?;
    let project = store.get();
    let store: Arc<dyn ProjectStore> = Arc::new(store);

    let control = ControlContext::new(Some(store), config.session_timing()?);

    if config.enable_dmx() {
        let device = config
            .dmx_port()
            .map(str::to_string)
            .or_else(|| project.map(|project| project.usb_interface));
        match device {
            Some(device) => match control.initialize_transmitter(&device) {
                Ok(()) => info!(device, "DMX transmitter initialized."),
                Err(e) => warn!(device, err = %e, "DMX transmitter unavailable, DMX commands will fail"),
            },
            None => warn!("No DMX device configured"),
        }
    } else {
        info!("DMX disabled.");
    }

    server::serve(
        &config.listen_address(),
        AppState::new(control, config.enable_dmx()),
    )
    .await
}
