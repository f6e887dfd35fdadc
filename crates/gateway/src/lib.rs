//! # Courier Gateway Crate
//!
//! The axum surface of the hub:
//!
//! - `GET /ws?token=...` verifies the bearer token and upgrades to a
//!   websocket session. A bad or missing token is answered with 401 before
//!   any upgrade.
//! - `GET /health` for liveness probes.
//! - `GET /api/connections` lists the identities currently connected.

pub mod error;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod websocket;

pub use error::{GatewayError, GatewayResult};
pub use state::GatewayState;

use axum::{http::Method, middleware as axum_middleware, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

/// Create the application router
pub fn create_router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(websocket::websocket_handler))
        .route("/health", get(rest::health_check))
        .route("/api/connections", get(rest::list_connections))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET])
                .allow_headers(Any),
        )
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
}
