//! Plain HTTP endpoints

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;

use crate::state::GatewayState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ConnectionsResponse {
    pub count: usize,
    pub identities: Vec<String>,
}

/// Snapshot of connected identities, sorted for stable output.
pub async fn list_connections(State(state): State<GatewayState>) -> Json<ConnectionsResponse> {
    let mut identities: Vec<String> = state
        .hub()
        .connected_identities()
        .await
        .into_iter()
        .map(|identity| identity.into_inner())
        .collect();
    identities.sort();

    Json(ConnectionsResponse {
        count: identities.len(),
        identities,
    })
}
