use crate::reconciler::ActivationReason;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_PLUGIN_ID: &str = "buffer_buddy";
pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;
pub const CLEAR_COMMAND: &str = "clear";

/// Configuration half of the plugin state, as returned by the snapshot
/// endpoint and broadcast in `state` push messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginState {
    #[serde(default)]
    pub enabled: bool,
    /// Older plugin builds never send this field.
    #[serde(default)]
    pub advanced_ok_detected: bool,
    pub state: String,
    #[serde(default)]
    pub planner_buffer_size: Option<u64>,
    #[serde(default)]
    pub command_buffer_size: Option<u64>,
    #[serde(default)]
    pub inflight_target: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotResponse {
    pub state: PluginState,
}

/// The host reports CTS either as a flag or as a running trigger count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CtsTriggered {
    Flag(bool),
    Count(u64),
}

impl fmt::Display for CtsTriggered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtsTriggered::Flag(flag) => write!(f, "{flag}"),
            CtsTriggered::Count(count) => write!(f, "{count}"),
        }
    }
}

/// Runtime counters pushed with `type: "update"`. Every counter is unsigned:
/// a negative value (e.g. a transiently negative `inflight`) fails the whole
/// payload, and the update is dropped as malformed rather than half-applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdatePayload {
    pub command_buffer_avail: u64,
    pub command_underruns_detected: u64,
    pub planner_buffer_avail: u64,
    pub planner_underruns_detected: u64,
    pub cts_triggered: CtsTriggered,
    pub current_line_number: u64,
    pub acked_line_number: u64,
    pub inflight: u64,
    pub resends_detected: u64,
    pub send_queue_size: u64,
}

/// A typed `data` body of a plugin push message.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Update(UpdatePayload),
    Status(String),
    State(PluginState),
    Unknown { kind: String },
}

#[derive(Debug, Deserialize)]
struct RawPushData {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Value,
}

impl PushMessage {
    pub fn from_data(data: &Value) -> Result<Self, FrameError> {
        let raw = RawPushData::deserialize(data).map_err(|err| FrameError::Decode(err.to_string()))?;
        match raw.kind.as_str() {
            "update" => serde_json::from_value(raw.message)
                .map(PushMessage::Update)
                .map_err(|err| FrameError::Decode(format!("update payload: {err}"))),
            "status" => match raw.message {
                Value::String(text) => Ok(PushMessage::Status(text)),
                other => Err(FrameError::Decode(format!(
                    "status payload must be a string, got {other}"
                ))),
            },
            "state" => serde_json::from_value(raw.message)
                .map(PushMessage::State)
                .map_err(|err| FrameError::Decode(format!("state payload: {err}"))),
            _ => Ok(PushMessage::Unknown { kind: raw.kind }),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            PushMessage::Update(_) => "update",
            PushMessage::Status(_) => "status",
            PushMessage::State(_) => "state",
            PushMessage::Unknown { kind } => kind,
        }
    }
}

/// Envelope of a `plugin` socket frame. `data` stays untyped until the
/// receiver has checked that the message is addressed to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginMessage {
    pub plugin: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocketEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl SocketEvent {
    pub fn activation_reason(&self) -> Option<ActivationReason> {
        match self.kind.as_str() {
            "UserLoggedIn" => Some(ActivationReason::UserLoggedIn),
            "UserLoggedOut" => Some(ActivationReason::UserLoggedOut),
            "SettingsUpdated" => Some(ActivationReason::SettingsUpdated),
            _ => None,
        }
    }
}

/// One message from the OctoPrint push socket. Every frame is an object with
/// a single top-level key naming its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketFrame {
    Connected(Value),
    Plugin(PluginMessage),
    Event(SocketEvent),
    ReauthRequired(Value),
    Other(String),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuthFrame {
    pub auth: String,
}

impl AuthFrame {
    pub fn new(user: &str, session: &str) -> Self {
        Self {
            auth: format!("{user}:{session}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginCommand {
    pub command: String,
}

impl PluginCommand {
    pub fn clear() -> Self {
        Self {
            command: CLEAR_COMMAND.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded = serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_socket_frame(text: &str, max_frame_bytes: usize) -> Result<SocketFrame, FrameError> {
    let raw = text.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    let object: Map<String, Value> =
        serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))?;
    let Some((key, body)) = object.into_iter().next() else {
        return Err(FrameError::Decode("empty socket frame".to_string()));
    };
    match key.as_str() {
        "connected" => Ok(SocketFrame::Connected(body)),
        "plugin" => serde_json::from_value(body)
            .map(SocketFrame::Plugin)
            .map_err(|err| FrameError::Decode(format!("plugin frame: {err}"))),
        "event" => serde_json::from_value(body)
            .map(SocketFrame::Event)
            .map_err(|err| FrameError::Decode(format!("event frame: {err}"))),
        "reauthRequired" => Ok(SocketFrame::ReauthRequired(body)),
        _ => Ok(SocketFrame::Other(key)),
    }
}
