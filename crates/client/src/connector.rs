//! Opening transports to the hub.

use std::pin::Pin;

use async_trait::async_trait;
use courier_protocol::Frame;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::ClientError;

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = ClientError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ClientError>> + Send>>;

/// An open connection, split into its write and read halves.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Frame, Error = ClientError> + Send + 'static,
        St: Stream<Item = Result<Frame, ClientError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport authenticated with `token`.
    async fn connect(&self, token: &str) -> Result<Transport, ClientError>;
}

/// Connects with `tokio-tungstenite`, passing the token as `?token=`.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    url: String,
}

impl TungsteniteConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn request_url(&self, token: &str) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}token={}", self.url, separator, token)
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, token: &str) -> Result<Transport, ClientError> {
        let (socket, response) = tokio_tungstenite::connect_async(self.request_url(token))
            .await
            .map_err(|err| ClientError::ConnectFailed(err.to_string()))?;
        debug!(url = %self.url, status = %response.status(), "websocket handshake complete");

        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(ClientError::transport)
            .with(|frame: Frame| future::ready(Ok::<_, ClientError>(frame_to_message(frame))));
        let stream = stream.filter_map(|item| {
            future::ready(match item {
                Ok(message) => message_to_frame(message).map(Ok),
                Err(err) => Some(Err(ClientError::transport(err))),
            })
        });

        Ok(Transport::new(sink, stream))
    }
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

fn message_to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(bytes) => Some(Frame::Binary(bytes)),
        Message::Ping(payload) => Some(Frame::Ping(payload)),
        Message::Pong(payload) => Some(Frame::Pong(payload)),
        Message::Close(_) => Some(Frame::Close),
        Message::Frame(_) => None,
    }
}
