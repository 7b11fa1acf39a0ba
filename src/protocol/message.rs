//! Control message types exchanged over the text side of the connection.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// The fixed set of control message discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Open,
    Opened,
    Pause,
    Paused,
    Resume,
    Resumed,
    Update,
    Close,
    Closed,
    Pong,
}

impl MessageType {
    pub const ALL: [MessageType; 10] = [
        MessageType::Open,
        MessageType::Opened,
        MessageType::Pause,
        MessageType::Paused,
        MessageType::Resume,
        MessageType::Resumed,
        MessageType::Update,
        MessageType::Close,
        MessageType::Closed,
        MessageType::Pong,
    ];

    /// Wire value of the `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Open => "open",
            MessageType::Opened => "opened",
            MessageType::Pause => "pause",
            MessageType::Paused => "paused",
            MessageType::Resume => "resume",
            MessageType::Resumed => "resumed",
            MessageType::Update => "update",
            MessageType::Close => "close",
            MessageType::Closed => "closed",
            MessageType::Pong => "pong",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every control message.
///
/// `id` links a response to the request it answers. `seq` is the sender's
/// own sequence number; `clientseq` (sent by the server) and `serverseq`
/// (sent by the client) acknowledge the peer's last sequence number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageHeader {
    pub id: String,
    pub version: String,
    pub seq: Option<u64>,
    pub clientseq: Option<u64>,
    pub serverseq: Option<u64>,
    pub parameters: Option<Map<String, Value>>,
}

/// A decoded control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Open(MessageHeader),
    Opened(MessageHeader),
    Pause(MessageHeader),
    Paused { header: MessageHeader, position: String },
    Resume(MessageHeader),
    Resumed(MessageHeader),
    Update(MessageHeader),
    Close(MessageHeader),
    Closed(MessageHeader),
    Pong(MessageHeader),
}

impl ControlMessage {
    /// Assemble a message of the given type. `position` is only kept for
    /// `paused`.
    pub fn from_parts(kind: MessageType, header: MessageHeader, position: Option<String>) -> Self {
        match kind {
            MessageType::Open => ControlMessage::Open(header),
            MessageType::Opened => ControlMessage::Opened(header),
            MessageType::Pause => ControlMessage::Pause(header),
            MessageType::Paused => ControlMessage::Paused {
                header,
                position: position.unwrap_or_default(),
            },
            MessageType::Resume => ControlMessage::Resume(header),
            MessageType::Resumed => ControlMessage::Resumed(header),
            MessageType::Update => ControlMessage::Update(header),
            MessageType::Close => ControlMessage::Close(header),
            MessageType::Closed => ControlMessage::Closed(header),
            MessageType::Pong => ControlMessage::Pong(header),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            ControlMessage::Open(_) => MessageType::Open,
            ControlMessage::Opened(_) => MessageType::Opened,
            ControlMessage::Pause(_) => MessageType::Pause,
            ControlMessage::Paused { .. } => MessageType::Paused,
            ControlMessage::Resume(_) => MessageType::Resume,
            ControlMessage::Resumed(_) => MessageType::Resumed,
            ControlMessage::Update(_) => MessageType::Update,
            ControlMessage::Close(_) => MessageType::Close,
            ControlMessage::Closed(_) => MessageType::Closed,
            ControlMessage::Pong(_) => MessageType::Pong,
        }
    }

    pub fn header(&self) -> &MessageHeader {
        match self {
            ControlMessage::Open(h)
            | ControlMessage::Opened(h)
            | ControlMessage::Pause(h)
            | ControlMessage::Paused { header: h, .. }
            | ControlMessage::Resume(h)
            | ControlMessage::Resumed(h)
            | ControlMessage::Update(h)
            | ControlMessage::Close(h)
            | ControlMessage::Closed(h)
            | ControlMessage::Pong(h) => h,
        }
    }

    /// `position` of a `paused` message, `None` for every other type.
    pub fn position(&self) -> Option<&str> {
        match self {
            ControlMessage::Paused { position, .. } => Some(position),
            _ => None,
        }
    }
}

/// Body of the `parameters` object on the initial `open`.
///
/// Replaces the template file the server expects to see: who the
/// organization and participant are, and which media the client sends.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenParameters {
    pub organization_id: String,
    pub conversation_id: String,
    pub participant: Participant,
    pub media: Vec<MediaFormat>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    pub channels: Vec<String>,
    pub rate: u32,
}

impl OpenParameters {
    pub fn into_map(self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
