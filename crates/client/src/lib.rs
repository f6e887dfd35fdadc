//! # Courier Client Crate
//!
//! A [`ReconnectController`] keeps one connection to the hub alive: it
//! connects with a bearer token, sends heartbeats, retries with a growing
//! delay after failures, and gives up into [`ConnectionStatus::Failed`]
//! after a bounded number of attempts. Status transitions and inbound
//! messages are published on broadcast channels.

pub mod connector;
pub mod controller;
pub mod error;
pub mod options;

pub use connector::{Connector, TungsteniteConnector, Transport};
pub use controller::{ConnectionStatus, InboundMessage, ReconnectController};
pub use error::ClientError;
pub use options::ReconnectOptions;
