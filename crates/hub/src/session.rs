//! A single live connection.
//!
//! Each session runs two loops over its transport. The inbound loop reads
//! frames under a heartbeat deadline and dispatches them; the outbound loop
//! drains the session's bounded queue, coalescing queued frames into one
//! flush, and enqueues a `ping` every ping interval. When either loop ends
//! the other is cancelled, and the session unregisters from the hub.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_config::HubConfig;
use courier_protocol::{Classification, Envelope, Frame, Identity};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::router::MessageRouter;

/// Lifecycle of a session. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Active = 0,
    Closing = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Active,
            1 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Floor for timer periods; tokio intervals reject a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Timing and sizing for a session's loops
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub outbound_capacity: usize,
    /// Read deadline for the inbound loop
    pub heartbeat_timeout: Duration,
    pub ping_interval: Duration,
    pub write_timeout: Duration,
    pub max_batch: usize,
}

impl From<&HubConfig> for SessionConfig {
    fn from(config: &HubConfig) -> Self {
        Self {
            outbound_capacity: config.outbound_capacity.max(1),
            heartbeat_timeout: config.heartbeat_timeout().max(MIN_PERIOD),
            ping_interval: config.ping_interval().max(MIN_PERIOD),
            write_timeout: config.write_timeout().max(MIN_PERIOD),
            max_batch: config.max_batch.max(1),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&HubConfig::default())
    }
}

struct HandleInner {
    id: Uuid,
    identity: Identity,
    outbound: mpsc::Sender<Frame>,
    state: AtomicU8,
    last_pong: AtomicI64,
    closed: CancellationToken,
}

/// Cloneable reference to a session, held by the hub's registry.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<HandleInner>,
}

impl SessionHandle {
    /// Create a handle and the receiving end of its outbound queue.
    pub fn channel(identity: Identity, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, queue) = mpsc::channel(capacity.max(1));
        let handle = Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                identity,
                outbound,
                state: AtomicU8::new(SessionState::Active as u8),
                last_pong: AtomicI64::new(Utc::now().timestamp_millis()),
                closed: CancellationToken::new(),
            }),
        };
        (handle, queue)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Time of the last heartbeat reply from the peer, or session start.
    pub fn last_pong(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.inner.last_pong.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    pub fn record_pong(&self) {
        self.inner
            .last_pong
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Queue a frame without waiting. A full queue means the peer is not keeping up.
    pub fn try_push(&self, frame: Frame) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::QueueClosed);
        }
        self.inner.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => SessionError::QueueFull,
            TrySendError::Closed(_) => SessionError::QueueClosed,
        })
    }

    pub fn enqueue(&self, envelope: &Envelope) -> Result<(), SessionError> {
        self.try_push(Frame::envelope(envelope)?)
    }

    /// Stop both loops. Calling this more than once has no further effect.
    pub fn close(&self) {
        self.advance(SessionState::Closing);
        self.inner.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    fn advance(&self, next: SessionState) {
        self.inner.state.fetch_max(next as u8, Ordering::AcqRel);
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("identity", &self.inner.identity)
            .field("state", &self.state())
            .finish()
    }
}

/// A session that has not started running yet.
pub struct Session {
    handle: SessionHandle,
    queue: mpsc::Receiver<Frame>,
    config: SessionConfig,
}

impl Session {
    pub fn new(identity: Identity, config: SessionConfig) -> Self {
        let (handle, queue) = SessionHandle::channel(identity, config.outbound_capacity);
        Self {
            handle,
            queue,
            config,
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Register with the router's hub and drive the connection until it ends.
    pub async fn run<Si, St, E>(self, sink: Si, stream: St, router: &MessageRouter)
    where
        Si: Sink<Frame>,
        Si::Error: fmt::Display,
        St: Stream<Item = Result<Frame, E>>,
        E: fmt::Display,
    {
        let Session {
            handle,
            queue,
            config,
        } = self;
        let hub = router.hub();

        hub.register(handle.clone()).await;
        info!(identity = %handle.identity(), session_id = %handle.id(), "session started");

        let inbound = read_loop(stream, &handle, router, config.heartbeat_timeout);
        let outbound = write_loop(sink, queue, &handle, &config);
        tokio::pin!(inbound);
        tokio::pin!(outbound);

        let inbound_first = tokio::select! {
            result = &mut inbound => {
                log_exit(&handle, "inbound", result);
                true
            }
            result = &mut outbound => {
                log_exit(&handle, "outbound", result);
                false
            }
        };

        handle.close();
        if inbound_first {
            log_exit(&handle, "outbound", outbound.await);
        } else {
            log_exit(&handle, "inbound", inbound.await);
        }

        hub.unregister(&handle).await;
        handle.advance(SessionState::Closed);
        info!(identity = %handle.identity(), session_id = %handle.id(), "session closed");
    }
}

fn log_exit(handle: &SessionHandle, side: &'static str, result: Result<(), SessionError>) {
    match result {
        Ok(()) => debug!(
            identity = %handle.identity(),
            session_id = %handle.id(),
            side,
            "session loop finished"
        ),
        Err(SessionError::ReadDeadline) => warn!(
            identity = %handle.identity(),
            session_id = %handle.id(),
            "peer missed heartbeat deadline"
        ),
        Err(err) => debug!(
            identity = %handle.identity(),
            session_id = %handle.id(),
            side,
            error = %err,
            "session loop failed"
        ),
    }
}

async fn read_loop<St, E>(
    stream: St,
    handle: &SessionHandle,
    router: &MessageRouter,
    deadline: Duration,
) -> Result<(), SessionError>
where
    St: Stream<Item = Result<Frame, E>>,
    E: fmt::Display,
{
    tokio::pin!(stream);

    loop {
        // Each read gets a fresh deadline, so any inbound frame extends it.
        let next = tokio::select! {
            _ = handle.closed() => return Ok(()),
            next = time::timeout(deadline, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => return Err(SessionError::ReadDeadline),
            Ok(None) | Ok(Some(Ok(Frame::Close))) => return Ok(()),
            Ok(Some(Err(err))) => return Err(SessionError::transport(err)),
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Pong(_) => handle.record_pong(),
            // Control pings are answered by the websocket layer itself.
            Frame::Ping(_) => {}
            data => dispatch(data, handle, router).await?,
        }
    }
}

async fn dispatch(
    frame: Frame,
    handle: &SessionHandle,
    router: &MessageRouter,
) -> Result<(), SessionError> {
    let envelope = match frame.into_envelope() {
        Ok(envelope) => envelope,
        Err(err) if err.is_unknown_kind() => {
            debug!(identity = %handle.identity(), error = %err, "ignoring envelope");
            return Ok(());
        }
        Err(err) => {
            warn!(identity = %handle.identity(), error = %err, "dropping malformed frame");
            return Ok(());
        }
    };

    match envelope.classify() {
        Classification::HeartbeatPing => handle.enqueue(&Envelope::pong()),
        Classification::HeartbeatPong => {
            handle.record_pong();
            Ok(())
        }
        _ => {
            router.route(handle.identity(), envelope).await;
            Ok(())
        }
    }
}

async fn write_loop<Si>(
    sink: Si,
    mut queue: mpsc::Receiver<Frame>,
    handle: &SessionHandle,
    config: &SessionConfig,
) -> Result<(), SessionError>
where
    Si: Sink<Frame>,
    Si::Error: fmt::Display,
{
    tokio::pin!(sink);

    let period = config.ping_interval.max(MIN_PERIOD);
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut batch = Vec::with_capacity(config.max_batch);

    let result = loop {
        tokio::select! {
            biased;
            _ = handle.closed() => break Ok(()),
            _ = ticker.tick() => {
                if let Err(err) = handle.enqueue(&Envelope::ping()) {
                    break Err(err);
                }
            }
            frame = queue.recv() => {
                let Some(frame) = frame else {
                    break Err(SessionError::QueueClosed);
                };
                batch.push(frame);
                while batch.len() < config.max_batch {
                    match queue.try_recv() {
                        Ok(frame) => batch.push(frame),
                        Err(_) => break,
                    }
                }
                if let Err(err) = write_batch(&mut sink, &mut batch, config.write_timeout).await {
                    break Err(err);
                }
            }
        }
    };

    // A wedged or broken sink gets no close frame.
    if !matches!(
        result,
        Err(SessionError::WriteDeadline | SessionError::Transport(_))
    ) {
        let _ = time::timeout(config.write_timeout, async {
            sink.feed(Frame::Close).await?;
            sink.close().await
        })
        .await;
    }

    result
}

/// Write every frame in `batch` and flush once. Frame boundaries are kept.
async fn write_batch<S>(
    sink: &mut S,
    batch: &mut Vec<Frame>,
    deadline: Duration,
) -> Result<(), SessionError>
where
    S: Sink<Frame> + Unpin,
    S::Error: fmt::Display,
{
    let write = async {
        for frame in batch.drain(..) {
            sink.feed(frame).await?;
        }
        sink.flush().await
    };

    match time::timeout(deadline, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(SessionError::transport(err)),
        Err(_) => Err(SessionError::WriteDeadline),
    }
}
