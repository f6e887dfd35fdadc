use std::path::Path;

use anyhow::Result;
use courier_auth::TokenVerifier;
use courier_config::{AppConfig, MEMORY_DATABASE_URL};
use courier_protocol::{ChatMessage, Identity, MessageStatus};
use courier_runtime::CourierServices;
use tempfile::TempDir;

fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}", path.to_string_lossy())
}

fn build_config(database_url: String) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = database_url;
    config.auth.jwt_secret = "runtime-test-secret".into();
    config
}

#[tokio::test]
async fn initialise_opens_sqlite_store_with_migrations() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("runtime/courier.db");
    let services = CourierServices::initialise(&build_config(sqlite_url(&db_path))).await?;

    assert!(db_path.exists());

    let message = ChatMessage::direct("alice", "bob", "persisted");
    services.store.create(&message).await?;
    services
        .store
        .update_status(&message.id, MessageStatus::Delivered)
        .await?;

    let stored = services.store.find(&message.id).await?.expect("message row");
    assert_eq!(stored.status, MessageStatus::Delivered);
    Ok(())
}

#[tokio::test]
async fn initialise_wires_verifier_and_hub() -> Result<()> {
    let services =
        CourierServices::initialise(&build_config(MEMORY_DATABASE_URL.to_string())).await?;

    let token = services.verifier.issue(&Identity::from("alice"))?;
    let identity = services.gateway_state().verifier.verify(&token).await?;
    assert_eq!(identity, Identity::from("alice"));

    assert!(services.hub.connected_identities().await.is_empty());
    services.hub.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn initialise_rejects_invalid_hub_settings() {
    let mut config = build_config(MEMORY_DATABASE_URL.to_string());
    config.hub.outbound_capacity = 0;

    let error = match CourierServices::initialise(&config).await {
        Ok(_) => panic!("zero outbound capacity should be rejected"),
        Err(error) => error,
    };
    let message = format!("{error:?}");
    assert!(message.contains("invalid configuration"), "got {message}");
}
