//! Error types for the store layer

use courier_protocol::{MessageStatus, ProtocolError};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Message not found: {id}")]
    NotFound { id: String },

    #[error("Duplicate message: {id}")]
    Duplicate { id: String },

    #[error("Illegal status transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("Corrupt row for {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl StoreError {
    pub fn corrupt(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Corrupt {
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<(String, ProtocolError)> for StoreError {
    fn from((id, error): (String, ProtocolError)) -> Self {
        match error {
            ProtocolError::IllegalTransition { from, to } => {
                StoreError::IllegalTransition { id, from, to }
            }
            other => StoreError::corrupt(id, other),
        }
    }
}
