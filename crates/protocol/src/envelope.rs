//! The tagged wire unit exchanged over every socket.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::ChatMessage;

const KNOWN_KINDS: &[&str] = &["message", "ping", "pong", "system", "notification"];

/// Payload of `ping` and `pong` envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Unix seconds at which the heartbeat was produced
    pub timestamp: i64,
}

impl Heartbeat {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Payload of `system` envelopes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemNotice {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// A single frame on the wire: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Envelope {
    Message(ChatMessage),
    Ping(Heartbeat),
    Pong(Heartbeat),
    System(SystemNotice),
    Notification(Value),
}

/// How an inbound envelope should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Chat,
    HeartbeatPing,
    HeartbeatPong,
    System,
    Unknown,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
}

impl Envelope {
    pub fn message(message: ChatMessage) -> Self {
        Envelope::Message(message)
    }

    pub fn ping() -> Self {
        Envelope::Ping(Heartbeat::now())
    }

    pub fn pong() -> Self {
        Envelope::Pong(Heartbeat::now())
    }

    pub fn system(message: impl Into<String>) -> Self {
        Envelope::System(SystemNotice {
            message: message.into(),
            code: None,
        })
    }

    pub fn notification(payload: Value) -> Self {
        Envelope::Notification(payload)
    }

    /// Wire name of this envelope's type.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Message(_) => "message",
            Envelope::Ping(_) => "ping",
            Envelope::Pong(_) => "pong",
            Envelope::System(_) => "system",
            Envelope::Notification(_) => "notification",
        }
    }

    /// Classify for dispatch. Server-to-client notifications arriving inbound
    /// have no handler and are reported as unknown.
    pub fn classify(&self) -> Classification {
        match self {
            Envelope::Message(_) => Classification::Chat,
            Envelope::Ping(_) => Classification::HeartbeatPing,
            Envelope::Pong(_) => Classification::HeartbeatPong,
            Envelope::System(_) => Classification::System,
            Envelope::Notification(_) => Classification::Unknown,
        }
    }

    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a text frame. A well formed frame with an unrecognised `type`
    /// yields [`ProtocolError::UnknownKind`] rather than a generic parse error.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => Ok(envelope),
            Err(err) => match serde_json::from_str::<RawEnvelope>(text) {
                Ok(raw) if !KNOWN_KINDS.contains(&raw.kind.as_str()) => {
                    Err(ProtocolError::UnknownKind(raw.kind))
                }
                _ => Err(ProtocolError::Malformed(err)),
            },
        }
    }
}
