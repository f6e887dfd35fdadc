use std::sync::Arc;

use anyhow::{Context, Result};
use courier_auth::JwtVerifier;
use courier_config::AppConfig;
use courier_gateway::GatewayState;
use courier_hub::{Hub, MessageRouter, SessionConfig};
use courier_store::{open_message_store, MessageStore};
use tracing::info;

pub mod telemetry {
    use anyhow::Result;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Everything the gateway needs, wired from one `AppConfig`.
#[derive(Clone)]
pub struct CourierServices {
    pub store: Arc<dyn MessageStore>,
    pub verifier: Arc<JwtVerifier>,
    pub hub: Hub,
    pub router: Arc<MessageRouter>,
    pub session_config: SessionConfig,
}

impl CourierServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let store = open_message_store(&config.database)
            .await
            .context("failed to open message store")?;
        let verifier = Arc::new(JwtVerifier::new(&config.auth));
        let hub = Hub::from_config(&config.hub);
        let router = Arc::new(MessageRouter::new(hub.clone(), store.clone()));

        info!(
            database = %config.database.url,
            outbound_capacity = config.hub.outbound_capacity,
            heartbeat_timeout_seconds = config.hub.heartbeat_timeout_seconds,
            "courier services ready"
        );

        Ok(Self {
            store,
            verifier,
            hub,
            router,
            session_config: SessionConfig::from(&config.hub),
        })
    }

    pub fn gateway_state(&self) -> GatewayState {
        GatewayState::new(
            self.verifier.clone(),
            self.router.clone(),
            self.session_config.clone(),
        )
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
