//! # Courier Protocol Crate
//!
//! Wire types shared between the connection hub and the reconnecting client.
//! Every frame exchanged over the socket is an [`Envelope`], serialized as
//! `{"type": ..., "data": ...}`.

pub mod envelope;
pub mod error;
pub mod frame;
pub mod identity;
pub mod message;

pub use envelope::{Classification, Envelope, Heartbeat, SystemNotice};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::Frame;
pub use identity::Identity;
pub use message::{ChatMessage, MessageKind, MessageStatus, Target};
