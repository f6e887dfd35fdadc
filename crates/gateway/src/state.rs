//! Shared application state for the gateway

use std::sync::Arc;

use courier_auth::TokenVerifier;
use courier_hub::{Hub, MessageRouter, SessionConfig};

#[derive(Clone)]
pub struct GatewayState {
    /// Verifies the bearer token presented on upgrade
    pub verifier: Arc<dyn TokenVerifier>,
    pub router: Arc<MessageRouter>,
    pub session_config: SessionConfig,
}

impl GatewayState {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        router: Arc<MessageRouter>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            verifier,
            router,
            session_config,
        }
    }

    pub fn hub(&self) -> &Hub {
        self.router.hub()
    }
}
