//! # Courier Hub Crate
//!
//! The server half of the realtime transport:
//!
//! - [`Hub`]: the registry of live sessions keyed by [`Identity`]. All
//!   mutation goes through a single actor task; callers hold a cheap
//!   cloneable handle.
//! - [`Session`]: one connection, driven by an inbound and an outbound loop
//!   over any `Sink<Frame>`/`Stream<Item = Result<Frame, E>>` pair.
//! - [`MessageRouter`]: turns inbound chat envelopes into deliveries.
//!
//! [`Identity`]: courier_protocol::Identity

pub mod error;
pub mod hub;
pub mod router;
pub mod session;

pub use error::SessionError;
pub use hub::Hub;
pub use router::{MessageRouter, RouteOutcome};
pub use session::{Session, SessionConfig, SessionHandle, SessionState};
