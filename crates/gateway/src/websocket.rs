//! The upgrade endpoint and the bridge from axum sockets to hub sessions.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use courier_hub::{MessageRouter, Session, SessionConfig};
use courier_protocol::{Frame, Identity};
use futures_util::{future, SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::middleware::bearer_token;
use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct UpgradeQuery {
    token: Option<String>,
}

/// `GET /ws?token=...`. Authentication happens before the upgrade is accepted.
pub async fn websocket_handler(
    State(state): State<GatewayState>,
    Query(query): Query<UpgradeQuery>,
    headers: HeaderMap,
    upgrade: Option<WebSocketUpgrade>,
) -> GatewayResult<Response> {
    let token = query
        .token
        .or_else(|| bearer_token(&headers).map(str::to_string))
        .unwrap_or_default();

    let identity = state.verifier.verify(&token).await.map_err(|err| {
        warn!(error = %err, "rejecting websocket upgrade");
        GatewayError::from(err)
    })?;
    let upgrade = upgrade.ok_or(GatewayError::UpgradeRequired)?;

    debug!(identity = %identity, "upgrading connection");
    let router = state.router.clone();
    let config = state.session_config.clone();
    Ok(upgrade.on_upgrade(move |socket| serve_socket(socket, identity, router, config)))
}

async fn serve_socket(
    socket: WebSocket,
    identity: Identity,
    router: Arc<MessageRouter>,
    config: SessionConfig,
) {
    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(frame_to_message(frame))));
    let stream = stream.map(|item| item.map(message_to_frame));

    Session::new(identity, config)
        .run(sink, stream, &router)
        .await;
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
        Frame::Ping(payload) => Message::Ping(payload),
        Frame::Pong(payload) => Message::Pong(payload),
        Frame::Close => Message::Close(None),
    }
}

fn message_to_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text),
        Message::Binary(bytes) => Frame::Binary(bytes),
        Message::Ping(payload) => Frame::Ping(payload),
        Message::Pong(payload) => Frame::Pong(payload),
        Message::Close(_) => Frame::Close,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frame_carries_no_reason() {
        assert!(matches!(frame_to_message(Frame::Close), Message::Close(None)));
        assert_eq!(message_to_frame(Message::Close(None)), Frame::Close);
    }
}
