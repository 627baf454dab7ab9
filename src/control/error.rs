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
use serde::Serialize;

use crate::dmx;

use super::message::Message;

/// Failures of a single control request. These are reported back to the requesting
/// session and never affect other sessions.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The message itself could not be parsed.
    #[error("invalid message: {0}")]
    Parse(String),

    /// The payload doesn't fit the command.
    #[error("{message}")]
    InvalidPayload {
        message: &'static str,
        details: Option<String>,
    },

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("preset not found: {0}")]
    PresetNotFound(String),

    #[error("show not found: {0}")]
    ShowNotFound(String),

    #[error("show must have at least one step")]
    InvalidShow,

    #[error("DMX controller not initialized")]
    NotInitialized,

    /// The transmitter refused the operation.
    #[error("failed to {action}: {source}")]
    Dmx {
        action: &'static str,
        #[source]
        source: dmx::Error,
    },

    #[error("{0}")]
    Config(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorPayload {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl ControlError {
    pub(super) fn invalid(message: &'static str, details: impl Into<String>) -> ControlError {
        ControlError::InvalidPayload {
            message,
            details: Some(details.into()),
        }
    }

    pub(super) fn dmx(action: &'static str) -> impl FnOnce(dmx::Error) -> ControlError {
        move |source| ControlError::Dmx { action, source }
    }

    /// The short code clients match on.
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::Parse(_) => "parse_error",
            ControlError::InvalidPayload { .. } => "invalid_payload",
            ControlError::UnknownType(_) => "unknown_type",
            ControlError::PresetNotFound(_) => "preset_not_found",
            ControlError::ShowNotFound(_) => "show_not_found",
            ControlError::InvalidShow => "invalid_show",
            ControlError::NotInitialized | ControlError::Dmx { .. } => "dmx_error",
            ControlError::Config(_) => "config_error",
            ControlError::Internal(_) => "internal_error",
        }
    }

    /// The `error` message sent back to the client.
    pub fn to_message(&self) -> Message {
        let (error, details) = match self {
            ControlError::InvalidPayload { message, details } => {
                (message.to_string(), details.clone())
            }
            ControlError::PresetNotFound(id) => ("Preset not found".to_string(), Some(id.clone())),
            ControlError::ShowNotFound(id) => ("Show not found".to_string(), Some(id.clone())),
            ControlError::UnknownType(kind) => ("Unknown message type".to_string(), Some(kind.clone())),
            ControlError::Parse(details) => ("Invalid message".to_string(), Some(details.clone())),
            ControlError::Dmx { action, source } => {
                (format!("Failed to {}", action), Some(source.to_string()))
            }
            other => (other.to_string(), None),
        };

        Message::new(
            "error",
            ErrorPayload {
                error,
                code: self.code(),
                details,
            },
        )
    }
}
