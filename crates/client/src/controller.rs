//! Client-side connection state machine.
//!
//! The controller is a handle onto a driver task that owns all connection
//! state. Commands arrive over a channel, and the driver waits on them
//! together with the pending connect attempt, the retry timer, the
//! heartbeat ticker and the open transport. Cancelling a timer is
//! dropping it, so `disconnect` can never race a scheduled retry.

use std::fmt;
use std::future::{self, Future};
use std::pin::Pin;
use std::sync::Arc;

use courier_protocol::{ChatMessage, Envelope, Frame};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use crate::connector::{Connector, Transport};
use crate::error::ClientError;
use crate::options::{ReconnectOptions, MIN_PERIOD};

const EVENT_BUFFER_SIZE: usize = 64;
const MESSAGE_BUFFER_SIZE: usize = 256;
const COMMAND_BUFFER_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Retries exhausted; only an explicit connect or reset leaves this state.
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A frame received from the hub
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A recognised envelope
    Typed(Envelope),
    /// Valid JSON that is not a known envelope
    Json(Value),
    /// Anything else
    Raw(String),
}

impl InboundMessage {
    fn from_text(text: String) -> Self {
        if let Ok(envelope) = Envelope::decode(&text) {
            return InboundMessage::Typed(envelope);
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => InboundMessage::Json(value),
            Err(_) => InboundMessage::Raw(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    status: ConnectionStatus,
    attempts: u32,
}

enum Command {
    Connect(oneshot::Sender<()>),
    Disconnect(oneshot::Sender<()>),
    Reset(oneshot::Sender<()>),
    SetToken(String, oneshot::Sender<()>),
    Send(Envelope, oneshot::Sender<Result<(), ClientError>>),
    Dispose(oneshot::Sender<()>),
}

/// Handle to one reconnecting connection. Dropping every handle stops the driver.
pub struct ReconnectController {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
    events: broadcast::Sender<ConnectionStatus>,
    messages: broadcast::Sender<InboundMessage>,
}

impl ReconnectController {
    /// Spawn the driver task. The controller starts out disconnected.
    pub fn new(
        connector: Arc<dyn Connector>,
        token: impl Into<String>,
        options: ReconnectOptions,
    ) -> Self {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let (snapshot_tx, snapshot) = watch::channel(Snapshot {
            status: ConnectionStatus::Disconnected,
            attempts: 0,
        });
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        let (messages, _) = broadcast::channel(MESSAGE_BUFFER_SIZE);

        let driver = Driver {
            connector,
            token: token.into(),
            options,
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            pending: None,
            retry: None,
            heartbeat: None,
            transport: None,
            snapshot: snapshot_tx,
            events: events.clone(),
            messages: messages.clone(),
        };
        tokio::spawn(driver.run(receiver));

        Self {
            commands,
            snapshot,
            events,
            messages,
        }
    }

    /// Start connecting if disconnected or failed. Otherwise a no-op.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.request(Command::Connect).await
    }

    /// Cancel timers, close the transport and go to `disconnected`. Idempotent.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.request(Command::Disconnect).await
    }

    /// Disconnect and connect again with a fresh attempt counter.
    pub async fn reset_connection(&self) -> Result<(), ClientError> {
        self.request(Command::Reset).await
    }

    /// Replace the token used by subsequent connection attempts.
    pub async fn set_token(&self, token: impl Into<String>) -> Result<(), ClientError> {
        let token = token.into();
        self.request(|reply| Command::SetToken(token, reply)).await
    }

    pub async fn send(&self, envelope: Envelope) -> Result<(), ClientError> {
        self.request(|reply| Command::Send(envelope, reply)).await?
    }

    pub async fn send_message(&self, message: ChatMessage) -> Result<(), ClientError> {
        self.send(Envelope::message(message)).await
    }

    /// Disconnect and stop the driver. Later calls fail with [`ClientError::Disposed`].
    pub async fn dispose(&self) -> Result<(), ClientError> {
        self.request(Command::Dispose).await
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshot.borrow().status
    }

    /// Consecutive failed attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.snapshot.borrow().attempts
    }

    /// Every status transition from now on.
    pub fn status_events(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.events.subscribe()
    }

    pub fn messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.messages.subscribe()
    }

    /// Wait until the controller reaches `status`.
    pub async fn wait_for(&self, status: ConnectionStatus) -> Result<(), ClientError> {
        let mut snapshot = self.snapshot.clone();
        snapshot
            .wait_for(|current| current.status == status)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Disposed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ClientError::Disposed)?;
        response.await.map_err(|_| ClientError::Disposed)
    }
}

type ConnectFuture = Pin<Box<dyn Future<Output = Result<Transport, ClientError>> + Send>>;

struct Driver {
    connector: Arc<dyn Connector>,
    token: String,
    options: ReconnectOptions,
    status: ConnectionStatus,
    /// Consecutive failed connection attempts
    attempts: u32,
    pending: Option<ConnectFuture>,
    retry: Option<Pin<Box<Sleep>>>,
    heartbeat: Option<Interval>,
    transport: Option<Transport>,
    snapshot: watch::Sender<Snapshot>,
    events: broadcast::Sender<ConnectionStatus>,
    messages: broadcast::Sender<InboundMessage>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle(command).await {
                        break;
                    }
                }
                result = wait_pending(&mut self.pending), if self.pending.is_some() => {
                    self.pending = None;
                    self.on_connect_result(result);
                }
                _ = wait_retry(&mut self.retry), if self.retry.is_some() => {
                    self.retry = None;
                    self.start_attempt();
                }
                _ = wait_tick(&mut self.heartbeat), if self.heartbeat.is_some() => {
                    if let Err(err) = self.write(&Envelope::ping()).await {
                        debug!(error = %err, "heartbeat failed");
                    }
                }
                frame = next_frame(&mut self.transport), if self.transport.is_some() => {
                    self.on_frame(frame).await;
                }
            }
        }

        self.shutdown().await;
        debug!("reconnect controller stopped");
    }

    /// Returns false once the driver should stop.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Connect(reply) => {
                match self.status {
                    ConnectionStatus::Disconnected | ConnectionStatus::Failed => {
                        self.attempts = 0;
                        self.start_attempt();
                    }
                    status => debug!(%status, "connect ignored"),
                }
                let _ = reply.send(());
            }
            Command::Disconnect(reply) => {
                self.shutdown().await;
                let _ = reply.send(());
            }
            Command::Reset(reply) => {
                self.shutdown().await;
                self.start_attempt();
                let _ = reply.send(());
            }
            Command::SetToken(token, reply) => {
                self.token = token;
                let _ = reply.send(());
            }
            Command::Send(envelope, reply) => {
                let _ = reply.send(self.write(&envelope).await);
            }
            Command::Dispose(reply) => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn start_attempt(&mut self) {
        if self.status != ConnectionStatus::Reconnecting {
            self.transition(ConnectionStatus::Connecting);
        }

        let connector = self.connector.clone();
        let token = self.token.clone();
        let timeout = self.options.connect_timeout;
        debug!(attempt = self.attempts + 1, "opening connection");
        self.pending = Some(Box::pin(async move {
            time::timeout(timeout, connector.connect(&token))
                .await
                .unwrap_or(Err(ClientError::ConnectTimeout))
        }));
    }

    fn on_connect_result(&mut self, result: Result<Transport, ClientError>) {
        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                self.attempts = 0;
                let period = self.options.heartbeat_interval.max(MIN_PERIOD);
                let mut heartbeat = time::interval_at(Instant::now() + period, period);
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(heartbeat);
                self.transition(ConnectionStatus::Connected);
                info!("connected to hub");
            }
            Err(err) => {
                self.attempts += 1;
                warn!(attempt = self.attempts, error = %err, "connection attempt failed");
                self.schedule_retry();
            }
        }
    }

    fn schedule_retry(&mut self) {
        if self.options.exhausted(self.attempts) {
            self.retry = None;
            self.transition(ConnectionStatus::Failed);
            warn!(attempts = self.attempts, "giving up on reconnecting");
            return;
        }

        let delay = self.options.retry_delay(self.attempts);
        info!(
            attempt = self.attempts + 1,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.retry = Some(Box::pin(time::sleep(delay)));
        self.transition(ConnectionStatus::Reconnecting);
    }

    async fn on_frame(&mut self, frame: Option<Result<Frame, ClientError>>) {
        let text = match frame {
            Some(Ok(Frame::Text(text))) => text,
            Some(Ok(Frame::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    debug!(error = %err, "dropping non-utf8 binary frame");
                    return;
                }
            },
            Some(Ok(Frame::Ping(_) | Frame::Pong(_))) => return,
            Some(Ok(Frame::Close)) | None => {
                info!("hub closed the connection");
                self.connection_lost();
                return;
            }
            Some(Err(err)) => {
                warn!(error = %err, "transport error");
                self.connection_lost();
                return;
            }
        };

        match InboundMessage::from_text(text) {
            InboundMessage::Typed(Envelope::Ping(_)) => {
                if let Err(err) = self.write(&Envelope::pong()).await {
                    debug!(error = %err, "failed to answer ping");
                }
            }
            InboundMessage::Typed(Envelope::Pong(_)) => {}
            message => {
                let _ = self.messages.send(message);
            }
        }
    }

    async fn write(&mut self, envelope: &Envelope) -> Result<(), ClientError> {
        if self.status != ConnectionStatus::Connected {
            return Err(ClientError::NotConnected);
        }
        let Some(transport) = self.transport.as_mut() else {
            return Err(ClientError::NotConnected);
        };

        let frame = Frame::envelope(envelope)?;
        let result = time::timeout(self.options.write_timeout, transport.sink.send(frame))
            .await
            .unwrap_or(Err(ClientError::WriteTimeout));
        if let Err(err) = result {
            warn!(error = %err, "write failed");
            self.connection_lost();
            return Err(err);
        }
        Ok(())
    }

    fn connection_lost(&mut self) {
        self.transport = None;
        self.heartbeat = None;
        self.schedule_retry();
    }

    /// Drop timers and the transport and settle in `disconnected`.
    async fn shutdown(&mut self) {
        self.pending = None;
        self.retry = None;
        self.heartbeat = None;
        if let Some(mut transport) = self.transport.take() {
            let _ = time::timeout(self.options.write_timeout, async {
                transport.sink.send(Frame::Close).await?;
                transport.sink.close().await
            })
            .await;
        }
        self.attempts = 0;
        self.transition(ConnectionStatus::Disconnected);
    }

    fn transition(&mut self, status: ConnectionStatus) {
        let changed = self.status != status;
        self.status = status;
        self.snapshot.send_replace(Snapshot {
            status,
            attempts: self.attempts,
        });
        if changed {
            debug!(%status, "connection status changed");
            let _ = self.events.send(status);
        }
    }
}

async fn wait_pending(pending: &mut Option<ConnectFuture>) -> Result<Transport, ClientError> {
    match pending {
        Some(attempt) => attempt.await,
        None => future::pending().await,
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.await,
        None => future::pending().await,
    }
}

async fn wait_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn next_frame(transport: &mut Option<Transport>) -> Option<Result<Frame, ClientError>> {
    match transport {
        Some(transport) => transport.stream.next().await,
        None => future::pending().await,
    }
}
