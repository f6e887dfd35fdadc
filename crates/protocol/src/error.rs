//! Error types for the wire protocol

use thiserror::Error;

use crate::message::MessageStatus;

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown envelope type: {0}")]
    UnknownKind(String),

    #[error("unknown message kind: {0}")]
    UnknownMessageKind(String),

    #[error("unknown message status: {0}")]
    UnknownStatus(String),

    #[error("frame is not text")]
    NotText,

    #[error("message {id} must carry exactly one of receiverId or groupId")]
    InvalidAddressing { id: String },

    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition {
        from: MessageStatus,
        to: MessageStatus,
    },
}

impl ProtocolError {
    /// Returns true when the frame was well formed but addressed to a type
    /// this side does not understand.
    pub fn is_unknown_kind(&self) -> bool {
        matches!(self, ProtocolError::UnknownKind(_))
    }
}
