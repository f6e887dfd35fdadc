//! Transport-neutral socket frame.
//!
//! The hub and the client speak [`Frame`] so their loops can run over axum,
//! tungstenite or an in-memory channel alike.

use crate::envelope::Envelope;
use crate::error::{ProtocolError, ProtocolResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    pub fn envelope(envelope: &Envelope) -> ProtocolResult<Self> {
        Ok(Frame::Text(envelope.encode()?))
    }

    /// Decode a data frame into an envelope. Binary frames must hold UTF-8 JSON.
    pub fn into_envelope(self) -> ProtocolResult<Envelope> {
        match self {
            Frame::Text(text) => Envelope::decode(&text),
            Frame::Binary(bytes) => {
                let text = String::from_utf8(bytes).map_err(|_| ProtocolError::NotText)?;
                Envelope::decode(&text)
            }
            _ => Err(ProtocolError::NotText),
        }
    }
}
