//! Registry of live sessions.
//!
//! The registry map is owned by one actor task. [`Hub`] is a handle that
//! sends commands to it over a bounded queue, so the map is never touched
//! from two tasks at once and no lock is held across I/O. Delivery into a
//! session is a `try_send`; a full or closed queue evicts the session
//! instead of applying backpressure to the caller.

use std::collections::{HashMap, HashSet};

use courier_config::HubConfig;
use courier_protocol::{Envelope, Frame, Identity};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::session::SessionHandle;

enum Command {
    Register(SessionHandle),
    Unregister {
        identity: Identity,
        session_id: Uuid,
    },
    SendToUser {
        identity: Identity,
        frame: Frame,
        reply: oneshot::Sender<bool>,
    },
    Broadcast {
        frame: Frame,
        reply: oneshot::Sender<usize>,
    },
    ConnectedIdentities {
        reply: oneshot::Sender<HashSet<Identity>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the connection hub. Clones share one registry.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
}

impl Hub {
    /// Spawn the registry actor. Must be called inside a tokio runtime.
    pub fn new(command_capacity: usize) -> Self {
        let (commands, receiver) = mpsc::channel(command_capacity.max(1));
        tokio::spawn(Registry::default().run(receiver));
        Self { commands }
    }

    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(config.command_capacity)
    }

    /// Add `session` to the registry, superseding any session already held
    /// for the same identity.
    pub async fn register(&self, session: SessionHandle) {
        if let Err(mpsc::error::SendError(Command::Register(session))) =
            self.commands.send(Command::Register(session)).await
        {
            warn!(identity = %session.identity(), "hub is shut down, closing session");
            session.close();
        }
    }

    /// Remove `session` if it is still the registered session for its identity.
    pub async fn unregister(&self, session: &SessionHandle) {
        let _ = self
            .commands
            .send(Command::Unregister {
                identity: session.identity().clone(),
                session_id: session.id(),
            })
            .await;
    }

    /// Queue `envelope` for `identity`. Returns whether a live session accepted it.
    pub async fn send_to_user(&self, identity: &Identity, envelope: &Envelope) -> bool {
        let frame = match Frame::envelope(envelope) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(identity = %identity, error = %err, "failed to encode envelope");
                return false;
            }
        };
        self.send_frame_to_user(identity, frame).await
    }

    pub async fn send_frame_to_user(&self, identity: &Identity, frame: Frame) -> bool {
        let (reply, response) = oneshot::channel();
        let command = Command::SendToUser {
            identity: identity.clone(),
            frame,
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    /// Queue `envelope` for every registered session. Returns how many accepted it.
    pub async fn broadcast(&self, envelope: &Envelope) -> usize {
        let frame = match Frame::envelope(envelope) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "failed to encode broadcast envelope");
                return 0;
            }
        };
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(Command::Broadcast { frame, reply })
            .await
            .is_err()
        {
            return 0;
        }
        response.await.unwrap_or(0)
    }

    /// Deliver a `notification` envelope carrying `payload`.
    pub async fn notify_user(&self, identity: &Identity, payload: Value) -> bool {
        self.send_to_user(identity, &Envelope::notification(payload))
            .await
    }

    /// Snapshot of registered identities. Diagnostics only.
    pub async fn connected_identities(&self) -> HashSet<Identity> {
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(Command::ConnectedIdentities { reply })
            .await
            .is_err()
        {
            return HashSet::new();
        }
        response.await.unwrap_or_default()
    }

    pub async fn is_connected(&self, identity: &Identity) -> bool {
        self.connected_identities().await.contains(identity)
    }

    /// Close every session and stop the registry actor.
    pub async fn shutdown(&self) {
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(Command::Shutdown { reply })
            .await
            .is_ok()
        {
            let _ = response.await;
        }
    }
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<Identity, SessionHandle>,
}

impl Registry {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Register(session) => self.register(session),
                Command::Unregister {
                    identity,
                    session_id,
                } => self.unregister(&identity, session_id),
                Command::SendToUser {
                    identity,
                    frame,
                    reply,
                } => {
                    let _ = reply.send(self.send_to_user(&identity, frame));
                }
                Command::Broadcast { frame, reply } => {
                    let _ = reply.send(self.broadcast(frame));
                }
                Command::ConnectedIdentities { reply } => {
                    let _ = reply.send(self.sessions.keys().cloned().collect());
                }
                Command::Shutdown { reply } => {
                    self.close_all();
                    let _ = reply.send(());
                    break;
                }
            }
        }

        self.close_all();
        debug!("hub registry stopped");
    }

    fn register(&mut self, session: SessionHandle) {
        let identity = session.identity().clone();
        let session_id = session.id();

        if let Some(previous) = self.sessions.insert(identity.clone(), session) {
            if previous.id() != session_id {
                info!(
                    identity = %identity,
                    session_id = %previous.id(),
                    replaced_by = %session_id,
                    "session superseded"
                );
                previous.close();
            }
        }
        info!(identity = %identity, session_id = %session_id, "session registered");
    }

    fn unregister(&mut self, identity: &Identity, session_id: Uuid) {
        match self.sessions.get(identity) {
            Some(current) if current.id() == session_id => {
                if let Some(session) = self.sessions.remove(identity) {
                    session.close();
                }
                info!(identity = %identity, session_id = %session_id, "session unregistered");
            }
            _ => debug!(
                identity = %identity,
                session_id = %session_id,
                "ignoring unregister for a session that is no longer current"
            ),
        }
    }

    fn send_to_user(&mut self, identity: &Identity, frame: Frame) -> bool {
        let Some(session) = self.sessions.get(identity) else {
            return false;
        };
        match session.try_push(frame) {
            Ok(()) => true,
            Err(err) => {
                self.evict(identity, &err);
                false
            }
        }
    }

    fn broadcast(&mut self, frame: Frame) -> usize {
        let mut failed = Vec::new();
        let mut delivered = 0;

        for (identity, session) in &self.sessions {
            match session.try_push(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => failed.push((identity.clone(), err)),
            }
        }
        for (identity, err) in failed {
            self.evict(&identity, &err);
        }

        delivered
    }

    fn evict(&mut self, identity: &Identity, reason: &SessionError) {
        if let Some(session) = self.sessions.remove(identity) {
            warn!(
                identity = %identity,
                session_id = %session.id(),
                reason = %reason,
                "evicting session"
            );
            session.close();
        }
    }

    fn close_all(&mut self) {
        for (_, session) in self.sessions.drain() {
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(name: &str, capacity: usize) -> (SessionHandle, mpsc::Receiver<Frame>) {
        SessionHandle::channel(Identity::from(name), capacity)
    }

    #[tokio::test]
    async fn register_supersedes_previous_session() {
        let hub = Hub::new(8);
        let (first, _q1) = session("alice", 4);
        let (second, mut q2) = session("alice", 4);

        hub.register(first.clone()).await;
        hub.register(second.clone()).await;

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(hub.connected_identities().await.len(), 1);

        assert!(hub.send_to_user(&Identity::from("alice"), &Envelope::ping()).await);
        assert!(matches!(q2.recv().await, Some(Frame::Text(_))));
    }

    #[tokio::test]
    async fn unregister_ignores_superseded_session() {
        let hub = Hub::new(8);
        let (first, _q1) = session("alice", 4);
        let (second, _q2) = session("alice", 4);

        hub.register(first.clone()).await;
        hub.register(second.clone()).await;
        hub.unregister(&first).await;

        assert!(hub.is_connected(&Identity::from("alice")).await);

        hub.unregister(&second).await;
        hub.unregister(&second).await;
        assert!(!hub.is_connected(&Identity::from("alice")).await);
    }

    #[tokio::test]
    async fn send_to_absent_user_is_a_miss() {
        let hub = Hub::new(8);
        assert!(!hub.send_to_user(&Identity::from("ghost"), &Envelope::ping()).await);
    }

    #[tokio::test]
    async fn full_queue_evicts_session() {
        let hub = Hub::new(8);
        let (slow, _queue) = session("slow", 1);
        hub.register(slow.clone()).await;

        let target = Identity::from("slow");
        assert!(hub.send_to_user(&target, &Envelope::ping()).await);
        assert!(!hub.send_to_user(&target, &Envelope::ping()).await);

        assert!(slow.is_closed());
        assert!(!hub.is_connected(&target).await);
        assert!(!hub.send_to_user(&target, &Envelope::ping()).await);
    }

    #[tokio::test]
    async fn broadcast_evicts_only_full_sessions() {
        let hub = Hub::new(8);
        let (fast, mut fast_q) = session("fast", 8);
        let (slow, _slow_q) = session("slow", 1);
        hub.register(fast.clone()).await;
        hub.register(slow.clone()).await;
        slow.try_push(Frame::Text("backlog".into())).unwrap();

        let reached = hub.broadcast(&Envelope::system("maintenance")).await;

        assert_eq!(reached, 1);
        assert!(slow.is_closed());
        let identities = hub.connected_identities().await;
        assert!(identities.contains(&Identity::from("fast")));
        assert!(!identities.contains(&Identity::from("slow")));
        assert!(matches!(fast_q.recv().await, Some(Frame::Text(text)) if text.contains("maintenance")));
    }

    #[tokio::test]
    async fn notify_user_wraps_payload() {
        let hub = Hub::new(8);
        let (bob, mut queue) = session("bob", 4);
        hub.register(bob).await;

        let delivered = hub
            .notify_user(&Identity::from("bob"), serde_json::json!({"title": "hi"}))
            .await;

        assert!(delivered);
        let Some(Frame::Text(text)) = queue.recv().await else {
            panic!("expected a text frame");
        };
        assert_eq!(
            Envelope::decode(&text).unwrap(),
            Envelope::notification(serde_json::json!({"title": "hi"}))
        );
    }

    #[tokio::test]
    async fn shutdown_closes_every_session() {
        let hub = Hub::new(8);
        let (alice, _q) = session("alice", 4);
        hub.register(alice.clone()).await;

        hub.shutdown().await;

        assert!(alice.is_closed());
        assert!(hub.connected_identities().await.is_empty());
        assert!(!hub.send_to_user(&Identity::from("alice"), &Envelope::ping()).await);
    }
}
