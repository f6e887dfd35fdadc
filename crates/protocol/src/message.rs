//! Chat message payload carried by `message` envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ProtocolError, ProtocolResult};
use crate::identity::Identity;

/// Kind of content a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Voice,
    Video,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Voice => "voice",
            MessageKind::Video => "video",
            MessageKind::File => "file",
        }
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "voice" => Ok(MessageKind::Voice),
            "video" => Ok(MessageKind::Video),
            "file" => Ok(MessageKind::File),
            other => Err(ProtocolError::UnknownMessageKind(other.to_string())),
        }
    }
}

/// Delivery status of a message.
///
/// Statuses only move forward: `sending -> sent -> delivered -> read`.
/// `failed` is terminal and reachable from `sending` or `sent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    fn rank(&self) -> Option<u8> {
        match self {
            MessageStatus::Sending => Some(0),
            MessageStatus::Sent => Some(1),
            MessageStatus::Delivered => Some(2),
            MessageStatus::Read => Some(3),
            MessageStatus::Failed => None,
        }
    }

    /// Whether a message in this status may move to `next`.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(current), Some(target)) => target > current,
            (Some(current), None) => current <= 1,
            (None, _) => false,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(ProtocolError::UnknownStatus(other.to_string())),
        }
    }
}

/// Where a message is headed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    Direct(&'a Identity),
    Group(&'a str),
}

/// A chat message as exchanged on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default = "new_message_id")]
    pub id: String,
    /// Filled from the authenticated session on the hub.
    #[serde(default)]
    pub sender_id: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

impl ChatMessage {
    /// Create a direct text message in the `sending` state.
    pub fn direct(
        sender: impl Into<Identity>,
        receiver: impl Into<Identity>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_message_id(),
            sender_id: sender.into(),
            receiver_id: Some(receiver.into()),
            group_id: None,
            kind: MessageKind::Text,
            content: content.into(),
            media_url: None,
            thumbnail_url: None,
            status: MessageStatus::Sending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a group text message in the `sending` state.
    pub fn group(
        sender: impl Into<Identity>,
        group_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_message_id(),
            sender_id: sender.into(),
            receiver_id: None,
            group_id: Some(group_id.into()),
            kind: MessageKind::Text,
            content: content.into(),
            media_url: None,
            thumbnail_url: None,
            status: MessageStatus::Sending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Resolve the addressing of this message; exactly one of receiver or group must be set.
    pub fn target(&self) -> ProtocolResult<Target<'_>> {
        match (&self.receiver_id, &self.group_id) {
            (Some(receiver), None) => Ok(Target::Direct(receiver)),
            (None, Some(group)) => Ok(Target::Group(group.as_str())),
            _ => Err(ProtocolError::InvalidAddressing {
                id: self.id.clone(),
            }),
        }
    }

    /// Move the message to `next`, refusing any backwards or post-terminal step.
    pub fn advance(&mut self, next: MessageStatus) -> ProtocolResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ProtocolError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_moves_forward_only() {
        use MessageStatus::*;

        assert!(Sending.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Delivered));
        assert!(Delivered.can_transition_to(Read));
        assert!(Sending.can_transition_to(Delivered));

        assert!(!Sent.can_transition_to(Sending));
        assert!(!Read.can_transition_to(Delivered));
        assert!(!Sent.can_transition_to(Sent));
    }

    #[test]
    fn failed_is_terminal_and_reachable_early_only() {
        use MessageStatus::*;

        assert!(Sending.can_transition_to(Failed));
        assert!(Sent.can_transition_to(Failed));
        assert!(!Delivered.can_transition_to(Failed));
        assert!(!Read.can_transition_to(Failed));

        for next in [Sending, Sent, Delivered, Read, Failed] {
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn advance_rejects_regression() {
        let mut message = ChatMessage::direct("alice", "bob", "hi");
        message.advance(MessageStatus::Sent).unwrap();
        message.advance(MessageStatus::Delivered).unwrap();

        let err = message.advance(MessageStatus::Sent).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::IllegalTransition {
                from: MessageStatus::Delivered,
                to: MessageStatus::Sent
            }
        ));
        assert_eq!(message.status, MessageStatus::Delivered);
    }

    #[test]
    fn target_requires_exactly_one_address() {
        let direct = ChatMessage::direct("alice", "bob", "hi");
        assert_eq!(direct.target().unwrap(), Target::Direct(&Identity::from("bob")));

        let group = ChatMessage::group("alice", "g-1", "hi");
        assert_eq!(group.target().unwrap(), Target::Group("g-1"));

        let mut both = ChatMessage::direct("alice", "bob", "hi");
        both.group_id = Some("g-1".into());
        assert!(both.target().is_err());

        let mut neither = ChatMessage::direct("alice", "bob", "hi");
        neither.receiver_id = None;
        assert!(neither.target().is_err());
    }

    #[test]
    fn wire_fields_are_camel_case() {
        let message = ChatMessage::direct("alice", "bob", "hello");
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["senderId"], "alice");
        assert_eq!(value["receiverId"], "bob");
        assert_eq!(value["type"], "text");
        assert_eq!(value["status"], "sending");
        assert!(value.get("groupId").is_none());
        assert!(value.get("mediaUrl").is_none());
    }

    #[test]
    fn minimal_client_payload_fills_defaults() {
        let message: ChatMessage =
            serde_json::from_str(r#"{"groupId":"g-7","content":"yo"}"#).unwrap();

        assert!(!message.id.is_empty());
        assert_eq!(message.sender_id, Identity::default());
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(message.status, MessageStatus::Sending);
        assert_eq!(message.target().unwrap(), Target::Group("g-7"));
    }

    #[test]
    fn bad_content_kind_is_not_an_unknown_envelope() {
        let err = "sticker".parse::<MessageKind>().unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageKind(ref kind) if kind == "sticker"));
        assert!(!err.is_unknown_kind());
    }
}
