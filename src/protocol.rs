//! Message contract between the host and its render surfaces.
//!
//! Every message is a JSON object discriminated by its `command` field. The
//! set of commands is closed: anything else is rejected at the boundary as a
//! [`ProtocolViolation`] and never reaches a state machine.
//!
//! Document payloads travel as base64 text; decoding happens here so the rest
//! of the crate only ever sees raw bytes.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Surface-level open status, used to toggle a surface's open affordance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OpenStatus {
    Opening,
    Ready,
}

/// Result of a migrate-to-primary request, reported to the secondary surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MigrationResult {
    Opened,
    Failed,
}

/// Messages sent from the host to a surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum HostMessage {
    /// Display a document, optionally starting at a stored position.
    #[serde(rename_all = "camelCase")]
    LoadDocument {
        identity: String,
        display_name: String,
        #[serde(with = "payload_codec")]
        payload: Vec<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_position: Option<String>,
    },
    /// Open-request status for the surface's open button.
    Status { value: OpenStatus },
    /// Outcome of a migration request (secondary surfaces only).
    MigrationStatus { value: MigrationResult },
}

impl HostMessage {
    /// Wire name of the command.
    pub fn command(&self) -> &'static str {
        match self {
            HostMessage::LoadDocument { .. } => "loadDocument",
            HostMessage::Status { .. } => "status",
            HostMessage::MigrationStatus { .. } => "migrationStatus",
        }
    }
}

/// Messages sent from a surface to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum SurfaceMessage {
    /// The user clicked "open" inside the surface.
    RequestOpen,
    /// The reading position changed.
    #[serde(rename_all = "camelCase")]
    ReportPosition {
        identity: String,
        position_marker: String,
    },
    /// A secondary surface asks to move its document to the primary surface.
    MigrateToPrimary,
}

impl SurfaceMessage {
    /// Wire name of the command.
    pub fn command(&self) -> &'static str {
        match self {
            SurfaceMessage::RequestOpen => "requestOpen",
            SurfaceMessage::ReportPosition { .. } => "reportPosition",
            SurfaceMessage::MigrateToPrimary => "migrateToPrimary",
        }
    }
}

const HOST_COMMANDS: &[&str] = &["loadDocument", "status", "migrationStatus"];
const SURFACE_COMMANDS: &[&str] = &["requestOpen", "reportPosition", "migrateToPrimary"];

/// A message that was malformed or arrived in a state that cannot accept it.
///
/// Violations are logged and dropped by the receiver; they never propagate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Not valid JSON, not an object, or missing/invalid fields.
    Malformed { message: String },
    /// A `command` outside the closed message set.
    UnknownCommand { command: String },
    /// A well-formed message the receiver cannot accept right now.
    OutOfState { command: String, reason: String },
}

impl ProtocolViolation {
    pub fn out_of_state(command: &str, reason: impl Into<String>) -> Self {
        Self::OutOfState {
            command: command.to_string(),
            reason: reason.into(),
        }
    }
}

impl Display for ProtocolViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed { message } => write!(f, "malformed message: {}", message),
            Self::UnknownCommand { command } => write!(f, "unknown command '{}'", command),
            Self::OutOfState { command, reason } => {
                write!(f, "'{}' not accepted: {}", command, reason)
            }
        }
    }
}

impl std::error::Error for ProtocolViolation {}

/// Decodes a message sent by a surface.
pub fn decode_surface_message(raw: &str) -> Result<SurfaceMessage, ProtocolViolation> {
    let message: SurfaceMessage = decode_tagged(raw, SURFACE_COMMANDS)?;
    if let SurfaceMessage::ReportPosition {
        identity,
        position_marker,
    } = &message
    {
        if identity.is_empty() || position_marker.is_empty() {
            return Err(ProtocolViolation::Malformed {
                message: "reportPosition requires non-empty identity and positionMarker"
                    .to_string(),
            });
        }
    }
    Ok(message)
}

/// Decodes a message sent by the host.
pub fn decode_host_message(raw: &str) -> Result<HostMessage, ProtocolViolation> {
    let message: HostMessage = decode_tagged(raw, HOST_COMMANDS)?;
    if let HostMessage::LoadDocument { identity, .. } = &message {
        if identity.is_empty() {
            return Err(ProtocolViolation::Malformed {
                message: "loadDocument requires a non-empty identity".to_string(),
            });
        }
    }
    Ok(message)
}

/// Encodes a message for the wire.
pub fn encode<M: Serialize>(message: &M) -> anyhow::Result<String> {
    Ok(serde_json::to_string(message)?)
}

fn decode_tagged<M>(raw: &str, known: &[&str]) -> Result<M, ProtocolViolation>
where
    M: for<'de> Deserialize<'de>,
{
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ProtocolViolation::Malformed {
            message: e.to_string(),
        })?;

    let command = value
        .as_object()
        .ok_or_else(|| ProtocolViolation::Malformed {
            message: "expected a JSON object".to_string(),
        })?
        .get("command")
        .and_then(|c| c.as_str())
        .ok_or_else(|| ProtocolViolation::Malformed {
            message: "missing string field 'command'".to_string(),
        })?;

    if !known.contains(&command) {
        return Err(ProtocolViolation::UnknownCommand {
            command: command.to_string(),
        });
    }

    serde_json::from_value(value).map_err(|e| ProtocolViolation::Malformed {
        message: e.to_string(),
    })
}

/// Base64 transport encoding for document payloads.
mod payload_codec {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
