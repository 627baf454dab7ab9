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

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::dmx::{self, CHANNELS};

use super::error::ControlError;

/// The envelope for everything on the control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Message {
    pub fn new(kind: &str, payload: impl Serialize) -> Message {
        Message {
            kind: kind.to_string(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    /// A message with an empty object payload.
    pub fn empty(kind: &str) -> Message {
        Message::new(kind, json!({}))
    }

    pub fn parse(text: &str) -> Result<Message, ControlError> {
        serde_json::from_str(text).map_err(|e| ControlError::Parse(e.to_string()))
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A decoded inbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ApplyPreset(PresetRequest),
    RunShow(ShowRequest),
    StopShow,
    UpdateChannel { dmx_address: usize, value: u8 },
    Blackout,
    GetStatus,
    GetDmxState,
    GetProjectConfig,
    StartMonitoring,
    StopMonitoring,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresetRequest {
    /// A preset stored in the project.
    Stored(String),
    /// Channel values given directly.
    Inline(HashMap<usize, u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShowRequest {
    Stored {
        show_id: String,
        loop_show: bool,
    },
    Inline {
        steps: Vec<InlineStep>,
        loop_show: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineStep {
    pub channels: HashMap<usize, u8>,
    pub delay_ms: u64,
    pub fade_ms: u64,
}

#[derive(Deserialize)]
struct StoredPreset {
    #[serde(default)]
    preset_id: String,
}

#[derive(Deserialize)]
struct StoredShow {
    #[serde(default)]
    show_id: String,
    #[serde(default, rename = "loop")]
    loop_show: bool,
}

#[derive(Deserialize)]
struct RawShow {
    #[serde(default)]
    steps: Vec<RawStep>,
    #[serde(default, rename = "loop")]
    loop_show: bool,
}

#[derive(Deserialize)]
struct RawStep {
    #[serde(default)]
    preset: HashMap<String, i64>,
    #[serde(default, alias = "duration")]
    delay_ms: u64,
    #[serde(default)]
    fade_ms: u64,
}

#[derive(Deserialize)]
struct RawChannelUpdate {
    dmx_address: i64,
    value: i64,
}

fn payload_as<T: DeserializeOwned>(payload: &Value, message: &'static str) -> Result<T, ControlError> {
    T::deserialize(payload).map_err(|e| ControlError::invalid(message, e.to_string()))
}

/// Validates an address/value map keyed by decimal channel strings.
fn channel_map(raw: HashMap<String, i64>) -> Result<HashMap<usize, u8>, ControlError> {
    raw.into_iter()
        .map(|(address, value)| {
            let channel = address
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|channel| dmx::check_channel(*channel).is_ok());
            match (channel, u8::try_from(value)) {
                (Some(channel), Ok(value)) => Ok((channel, value)),
                _ => Err(ControlError::invalid("Invalid channel data", address)),
            }
        })
        .collect()
}

impl Command {
    /// Decodes the command carried by a message.
    pub fn decode(message: Message) -> Result<Command, ControlError> {
        let payload = &message.payload;
        Ok(match message.kind.as_str() {
            "apply_preset" => Command::ApplyPreset(Command::decode_preset(payload)?),
            "run_show" => Command::RunShow(Command::decode_show(payload)?),
            "stop_show" => Command::StopShow,
            "update_channel" => {
                let update: RawChannelUpdate =
                    payload_as(payload, "Invalid channel update payload")?;
                let dmx_address = usize::try_from(update.dmx_address)
                    .ok()
                    .filter(|channel| (1..=CHANNELS).contains(channel));
                match (dmx_address, u8::try_from(update.value)) {
                    (Some(dmx_address), Ok(value)) => Command::UpdateChannel { dmx_address, value },
                    _ => {
                        return Err(ControlError::InvalidPayload {
                            message: "Channel update out of range",
                            details: None,
                        })
                    }
                }
            }
            "blackout" => Command::Blackout,
            "get_status" => Command::GetStatus,
            "get_dmx_state" => Command::GetDmxState,
            "get_project_config" => Command::GetProjectConfig,
            "start_monitoring" => Command::StartMonitoring,
            "stop_monitoring" => Command::StopMonitoring,
            other => Command::Unknown(other.to_string()),
        })
    }

    fn decode_preset(payload: &Value) -> Result<PresetRequest, ControlError> {
        if let Ok(stored) = StoredPreset::deserialize(payload) {
            if !stored.preset_id.is_empty() {
                return Ok(PresetRequest::Stored(stored.preset_id));
            }
        }

        let raw: HashMap<String, i64> = payload_as(payload, "Invalid preset payload")?;
        Ok(PresetRequest::Inline(channel_map(raw)?))
    }

    fn decode_show(payload: &Value) -> Result<ShowRequest, ControlError> {
        if let Ok(stored) = StoredShow::deserialize(payload) {
            if !stored.show_id.is_empty() {
                return Ok(ShowRequest::Stored {
                    show_id: stored.show_id,
                    loop_show: stored.loop_show,
                });
            }
        }

        let raw: RawShow = payload_as(payload, "Invalid show payload")?;
        let steps = raw
            .steps
            .into_iter()
            .map(|step| {
                Ok(InlineStep {
                    channels: channel_map(step.preset)?,
                    delay_ms: step.delay_ms,
                    fade_ms: step.fade_ms,
                })
            })
            .collect::<Result<Vec<InlineStep>, ControlError>>()?;

        Ok(ShowRequest::Inline {
            steps,
            loop_show: raw.loop_show,
        })
    }
}

/// A single lit channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelState {
    pub address: usize,
    pub value: u8,
}

/// Snapshot of the universe plus what is driving it. Sent as `dmx_state` and `dmx_update`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DmxState {
    pub channels: Vec<ChannelState>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub active_preset_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub active_show_id: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub show_step: usize,
    #[serde(skip_serializing_if = "is_false")]
    pub show_loop: bool,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl DmxState {
    /// Lists the non-zero channels of a raw buffer.
    pub fn lit_channels(channels: &[u8]) -> Vec<ChannelState> {
        channels
            .iter()
            .enumerate()
            .filter(|(_, value)| **value > 0)
            .map(|(index, value)| ChannelState {
                address: index + 1,
                value: *value,
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode(text: &str) -> Result<Command, ControlError> {
        Command::decode(Message::parse(text)?)
    }

    #[test]
    fn test_parse() {
        let message = Message::parse(r#"{"type":"blackout"}"#).expect("valid message");
        assert_eq!(message.kind, "blackout");
        assert_eq!(message.payload, Value::Null);

        assert!(matches!(
            Message::parse("not json"),
            Err(ControlError::Parse(_))
        ));
        assert!(matches!(
            Message::parse(r#"{"payload":{}}"#),
            Err(ControlError::Parse(_))
        ));
    }

    #[test]
    fn test_decode_simple_commands() {
        assert_eq!(decode(r#"{"type":"stop_show"}"#).unwrap(), Command::StopShow);
        assert_eq!(
            decode(r#"{"type":"get_status","payload":{}}"#).unwrap(),
            Command::GetStatus
        );
        assert_eq!(
            decode(r#"{"type":"dance"}"#).unwrap(),
            Command::Unknown("dance".into())
        );
    }

    #[test]
    fn test_decode_preset() {
        assert_eq!(
            decode(r#"{"type":"apply_preset","payload":{"preset_id":"warm"}}"#).unwrap(),
            Command::ApplyPreset(PresetRequest::Stored("warm".into()))
        );
        assert_eq!(
            decode(r#"{"type":"apply_preset","payload":{"1":255,"10":128}}"#).unwrap(),
            Command::ApplyPreset(PresetRequest::Inline(HashMap::from([(1, 255), (10, 128)])))
        );

        for payload in [r#"{"0":1}"#, r#"{"513":1}"#, r#"{"a":1}"#, r#"{"1":256}"#, r#"{"1":-1}"#] {
            let text = format!(r#"{{"type":"apply_preset","payload":{}}}"#, payload);
            match decode(&text) {
                Err(e @ ControlError::InvalidPayload { .. }) => {
                    assert_eq!(e.code(), "invalid_payload")
                }
                other => panic!("expected invalid payload for {}, got {:?}", payload, other),
            }
        }
        assert!(matches!(
            decode(r#"{"type":"apply_preset","payload":[1,2]}"#),
            Err(ControlError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_decode_show() {
        assert_eq!(
            decode(r#"{"type":"run_show","payload":{"show_id":"intro","loop":true}}"#).unwrap(),
            Command::RunShow(ShowRequest::Stored {
                show_id: "intro".into(),
                loop_show: true,
            })
        );

        let command = decode(
            r#"{"type":"run_show","payload":{"steps":[
                {"preset":{"1":10},"delay_ms":100,"fade_ms":50},
                {"preset":{"2":20},"duration":300}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            Command::RunShow(ShowRequest::Inline {
                steps: vec![
                    InlineStep {
                        channels: HashMap::from([(1, 10)]),
                        delay_ms: 100,
                        fade_ms: 50,
                    },
                    InlineStep {
                        channels: HashMap::from([(2, 20)]),
                        delay_ms: 300,
                        fade_ms: 0,
                    },
                ],
                loop_show: false,
            })
        );

        assert!(matches!(
            decode(r#"{"type":"run_show","payload":{"steps":"many"}}"#),
            Err(ControlError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_decode_channel_update() {
        assert_eq!(
            decode(r#"{"type":"update_channel","payload":{"dmx_address":512,"value":0}}"#)
                .unwrap(),
            Command::UpdateChannel {
                dmx_address: 512,
                value: 0
            }
        );
        for payload in [
            r#"{"dmx_address":0,"value":1}"#,
            r#"{"dmx_address":513,"value":1}"#,
            r#"{"dmx_address":1,"value":256}"#,
            r#"{"dmx_address":1}"#,
        ] {
            let text = format!(r#"{{"type":"update_channel","payload":{}}}"#, payload);
            assert!(
                matches!(decode(&text), Err(ControlError::InvalidPayload { .. })),
                "{}",
                payload
            );
        }
    }

    #[test]
    fn test_dmx_state_serialization() {
        let mut channels = [0u8; CHANNELS];
        channels[0] = 255;
        channels[9] = 128;

        let state = DmxState {
            channels: DmxState::lit_channels(&channels),
            active_preset_id: String::new(),
            active_show_id: String::new(),
            show_step: 0,
            show_loop: false,
            timestamp: 1,
        };
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({
                "channels": [{"address": 1, "value": 255}, {"address": 10, "value": 128}],
                "timestamp": 1
            })
        );
    }
}
