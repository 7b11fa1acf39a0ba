//! # Control Message Codec
//!
//! Converts between [`ControlMessage`] values and the JSON text carried in
//! WebSocket text frames.
//!
//! ## Decoding order:
//! 1. **Parse**: The frame must be a JSON object
//! 2. **Discriminator**: `type` must be present, a string, and not blank
//! 3. **Known type**: `type` must name one of the fixed message variants
//! 4. **Fields**: Remaining fields are mapped with defaults for absent ones
//!
//! Steps 2 and 3 run before any field mapping so a message with a bad
//! `type` is reported as such rather than as a generic field error.

use crate::error::{ClientResult, DecodeError};
use crate::protocol::message::{ControlMessage, MessageHeader, MessageType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat on-the-wire shape shared by every message type.
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    clientseq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    serverseq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parameters: Option<Map<String, Value>>,
}

/// Decode one text frame.
pub fn decode(raw: &str) -> Result<ControlMessage, DecodeError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(DecodeError::Malformed("expected a JSON object".to_string()));
    }

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(t) if !t.trim().is_empty() => t.to_string(),
        _ => return Err(DecodeError::MissingType),
    };
    let kind: MessageType = kind.parse().map_err(DecodeError::UnknownType)?;

    let wire: WireMessage =
        serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let header = MessageHeader {
        id: wire.id,
        version: wire.version,
        seq: wire.seq,
        clientseq: wire.clientseq,
        serverseq: wire.serverseq,
        parameters: wire.parameters,
    };
    Ok(ControlMessage::from_parts(kind, header, wire.position))
}

/// Encode a message as one JSON text frame.
pub fn encode(msg: &ControlMessage) -> ClientResult<String> {
    let header = msg.header().clone();
    let wire = WireMessage {
        kind: msg.message_type().as_str().to_string(),
        id: header.id,
        version: header.version,
        seq: header.seq,
        clientseq: header.clientseq,
        serverseq: header.serverseq,
        position: msg.position().map(str::to_string),
        parameters: header.parameters,
    };
    Ok(serde_json::to_string(&wire)?)
}
