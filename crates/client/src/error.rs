//! Client error types

use courier_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("connection attempt timed out")]
    ConnectTimeout,

    #[error("write timed out")]
    WriteTimeout,

    #[error("not connected")]
    NotConnected,

    #[error("controller has been disposed")]
    Disposed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] ProtocolError),
}

impl ClientError {
    pub fn transport(error: impl std::fmt::Display) -> Self {
        ClientError::Transport(error.to_string())
    }
}
