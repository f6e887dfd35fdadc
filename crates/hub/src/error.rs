//! Session-local errors. These end a session but never reach the hub.

use courier_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("no frame received within the heartbeat window")]
    ReadDeadline,

    #[error("write did not complete within the deadline")]
    WriteDeadline,

    #[error("outbound queue is full")]
    QueueFull,

    #[error("outbound queue is closed")]
    QueueClosed,

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] ProtocolError),
}

impl SessionError {
    pub fn transport(error: impl std::fmt::Display) -> Self {
        SessionError::Transport(error.to_string())
    }
}
