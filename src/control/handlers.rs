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
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use serde_json::json;
use tracing::info;

use crate::{dmx, playsync::CancelHandle};

use super::{
    message::{Command, Message, PresetRequest, ShowRequest},
    sequencer::{self, Sequence, SequenceStep},
    ControlContext, ControlError, SHOW_PREEMPT_GRACE,
};

impl ControlContext {
    /// Executes a command. Returns the reply for the requester, if there is one;
    /// broadcasts are queued by the handlers themselves.
    pub(super) async fn dispatch(
        self: &Arc<Self>,
        command: Command,
    ) -> Result<Option<Message>, ControlError> {
        match command {
            Command::ApplyPreset(request) => self.apply_preset(request).await.map(|_| None),
            Command::RunShow(request) => self.run_show(request).await.map(|_| None),
            Command::StopShow => {
                self.cancel_show();
                Ok(Some(Message::empty("show_stopped")))
            }
            Command::UpdateChannel { dmx_address, value } => {
                self.update_channel(dmx_address, value).await.map(|_| None)
            }
            Command::Blackout => self.blackout().await.map(|_| None),
            Command::GetStatus => Ok(Some(self.status())),
            Command::GetDmxState => Ok(Some(Message::new("dmx_state", self.dmx_state()?))),
            Command::GetProjectConfig => self.project_config().map(Some),
            Command::StartMonitoring => {
                self.start_monitoring();
                Ok(Some(Message::empty("monitoring_started")))
            }
            Command::StopMonitoring => {
                self.stop_monitoring();
                Ok(Some(Message::empty("monitoring_stopped")))
            }
            Command::Unknown(kind) => Err(ControlError::UnknownType(kind)),
        }
    }

    async fn apply_preset(&self, request: PresetRequest) -> Result<(), ControlError> {
        let (preset_id, channels) = match request {
            PresetRequest::Stored(id) => {
                let preset = self
                    .project()
                    .and_then(|project| project.preset(&id).map(|preset| preset.channel_map()))
                    .ok_or_else(|| ControlError::PresetNotFound(id.clone()))?;
                (id, preset)
            }
            PresetRequest::Inline(channels) => (String::new(), channels),
        };

        let transmitter = self.require_transmitter()?;
        self.cancel_show();
        transmitter
            .blackout()
            .map_err(ControlError::dmx("blackout"))?;
        transmitter
            .set_channels(&channels)
            .map_err(ControlError::dmx("set channels"))?;
        self.set_active_preset(&preset_id);

        info!(preset_id, channels = channels.len(), "Preset applied.");
        let channels: BTreeMap<String, u8> = channels
            .into_iter()
            .map(|(channel, value)| (channel.to_string(), value))
            .collect();
        self.broadcast(Message::new(
            "preset_applied",
            json!({ "preset_id": preset_id, "channels": channels }),
        ))
        .await;
        Ok(())
    }

    async fn run_show(self: &Arc<Self>, request: ShowRequest) -> Result<(), ControlError> {
        let sequence = self.resolve_show(request)?;
        if sequence.steps.is_empty() {
            return Err(ControlError::InvalidShow);
        }
        self.require_transmitter()?;

        if self.cancel_show().is_some() {
            tokio::time::sleep(SHOW_PREEMPT_GRACE).await;
        }

        let cancel = CancelHandle::new();
        let generation = self.begin_show(&sequence.show_id, sequence.loop_show, cancel.clone());
        self.set_active_preset("");

        info!(
            show_id = sequence.show_id,
            steps = sequence.steps.len(),
            loop_show = sequence.loop_show,
            "Show started."
        );
        self.broadcast(Message::new(
            "show_started",
            json!({
                "show_id": sequence.show_id,
                "steps": sequence.steps.len(),
                "loop": sequence.loop_show,
            }),
        ))
        .await;

        sequencer::spawn(self.clone(), generation, sequence, cancel);
        Ok(())
    }

    /// Snapshots the steps of a show. Stored steps whose preset no longer exists become
    /// empty steps, and out of range channels are dropped.
    fn resolve_show(&self, request: ShowRequest) -> Result<Sequence, ControlError> {
        match request {
            ShowRequest::Stored { show_id, loop_show } => {
                let project = self
                    .project()
                    .ok_or_else(|| ControlError::ShowNotFound(show_id.clone()))?;
                let show = project
                    .show(&show_id)
                    .ok_or_else(|| ControlError::ShowNotFound(show_id.clone()))?;

                let steps = show
                    .steps
                    .iter()
                    .map(|step| {
                        let channels: HashMap<usize, u8> = project
                            .preset(&step.preset_id)
                            .map(|preset| preset.channel_map())
                            .unwrap_or_default()
                            .into_iter()
                            .filter(|(channel, _)| dmx::check_channel(*channel).is_ok())
                            .collect();
                        SequenceStep {
                            channels,
                            delay: Duration::from_millis(step.delay_ms),
                            fade: Duration::from_millis(step.fade_ms),
                        }
                    })
                    .collect();

                Ok(Sequence {
                    show_id,
                    steps,
                    loop_show,
                })
            }
            ShowRequest::Inline { steps, loop_show } => Ok(Sequence {
                show_id: String::new(),
                steps: steps
                    .into_iter()
                    .map(|step| SequenceStep {
                        channels: step.channels,
                        delay: Duration::from_millis(step.delay_ms),
                        fade: Duration::from_millis(step.fade_ms),
                    })
                    .collect(),
                loop_show,
            }),
        }
    }

    async fn update_channel(&self, dmx_address: usize, value: u8) -> Result<(), ControlError> {
        let transmitter = self.require_transmitter()?;
        transmitter
            .set_channel(dmx_address, value)
            .map_err(ControlError::dmx("set channel"))?;
        self.set_active_preset("");

        self.broadcast(Message::new(
            "channel_update",
            json!({ "dmx_address": dmx_address, "value": value }),
        ))
        .await;
        Ok(())
    }

    async fn blackout(&self) -> Result<(), ControlError> {
        let transmitter = self.require_transmitter()?;
        self.cancel_show();
        transmitter
            .blackout()
            .map_err(ControlError::dmx("blackout"))?;
        self.set_active_preset("");

        info!("Blackout.");
        self.broadcast(Message::empty("blackout")).await;
        Ok(())
    }

    fn status(&self) -> Message {
        let transmitter = self.transmitter();
        let show = self.show_info();
        let show_running = show.is_some();
        let (active_show_id, show_step, show_loop) = show.unwrap_or_default();

        let mut status = json!({
            "dmx_initialized": transmitter.is_some(),
            "show_running": show_running,
            "active_show_id": active_show_id,
            "show_step": show_step,
            "show_loop": show_loop,
            "active_preset_id": self.active_preset(),
            "monitoring": self.is_monitoring(),
            "connected_clients": self.connected_clients(),
        });
        if let Some(transmitter) = transmitter {
            status["device"] = json!(transmitter.device());
            status["statistics"] = json!(transmitter.statistics());
        }
        Message::new("status", status)
    }

    fn project_config(&self) -> Result<Message, ControlError> {
        if self.store.is_none() {
            return Err(ControlError::Config("Project store not initialized"));
        }
        let project = self
            .project()
            .ok_or(ControlError::Config("No project loaded"))?;

        Ok(Message::new(
            "project_config",
            json!({
                "project_id": project.id,
                "project_name": project.name,
                "usb_interface": project.usb_interface,
                "fixtures": project.fixtures,
                "presets": project.presets,
                "shows": project.shows,
            }),
        ))
    }
}
