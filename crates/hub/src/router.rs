//! Routing of inbound chat envelopes.

use std::sync::Arc;

use chrono::Utc;
use courier_protocol::{ChatMessage, Classification, Envelope, Identity, MessageStatus, Target};
use courier_store::{GroupMembership, MessageStore, StoreError};
use tracing::{debug, error, warn};

use crate::hub::Hub;

/// What the router did with an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Direct message; `delivered` is whether the recipient's session took it.
    Direct { delivered: bool },
    /// Group message; `recipients` counts sessions that took it.
    Group { recipients: usize },
    /// Chat message with invalid addressing, or an id the store already holds.
    Rejected,
    /// Not a chat envelope.
    Ignored,
}

pub struct MessageRouter {
    hub: Hub,
    store: Arc<dyn MessageStore>,
    membership: Option<Arc<dyn GroupMembership>>,
}

impl MessageRouter {
    pub fn new(hub: Hub, store: Arc<dyn MessageStore>) -> Self {
        Self {
            hub,
            store,
            membership: None,
        }
    }

    /// Resolve group members through `membership` instead of broadcasting.
    pub fn with_membership(mut self, membership: Arc<dyn GroupMembership>) -> Self {
        self.membership = Some(membership);
        self
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn classify(envelope: &Envelope) -> Classification {
        envelope.classify()
    }

    /// Handle an envelope received on `sender`'s session.
    pub async fn route(&self, sender: &Identity, envelope: Envelope) -> RouteOutcome {
        match envelope {
            Envelope::Message(message) => self.route_chat(sender, message).await,
            other => {
                debug!(
                    identity = %sender,
                    kind = other.kind(),
                    classification = ?Self::classify(&other),
                    "router ignoring envelope"
                );
                RouteOutcome::Ignored
            }
        }
    }

    async fn route_chat(&self, sender: &Identity, mut message: ChatMessage) -> RouteOutcome {
        // The session's identity is authoritative, whatever the client claims.
        message.sender_id = sender.clone();

        let target = match message.target() {
            Ok(Target::Direct(recipient)) => Route::Direct(recipient.clone()),
            Ok(Target::Group(group)) => Route::Group(group.to_string()),
            Err(err) => {
                warn!(identity = %sender, message_id = %message.id, error = %err, "rejecting chat message");
                return RouteOutcome::Rejected;
            }
        };

        // Status on an inbound message is the client's optimistic view; the
        // hub restarts it from `sent`.
        message.status = MessageStatus::Sent;
        message.updated_at = Utc::now();
        match self.store.create(&message).await {
            Ok(()) => {}
            // Re-sending a known id would publish a status older than the stored one.
            Err(StoreError::Duplicate { .. }) => {
                warn!(identity = %sender, message_id = %message.id, "rejecting reused message id");
                return RouteOutcome::Rejected;
            }
            Err(err) => {
                error!(message_id = %message.id, error = %err, "failed to persist message");
            }
        }

        match target {
            Route::Direct(recipient) => self.deliver_direct(sender, &recipient, message).await,
            Route::Group(group) => self.deliver_group(sender, &group, message).await,
        }
    }

    async fn deliver_direct(
        &self,
        sender: &Identity,
        recipient: &Identity,
        mut message: ChatMessage,
    ) -> RouteOutcome {
        let envelope = Envelope::message(message.clone());
        let delivered = self.hub.send_to_user(recipient, &envelope).await;
        if !delivered {
            debug!(message_id = %message.id, recipient = %recipient, "recipient offline");
        }

        // The sender always sees the `sent` copy first.
        if sender != recipient {
            self.hub.send_to_user(sender, &envelope).await;
        }

        if delivered && message.advance(MessageStatus::Delivered).is_ok() {
            if let Err(err) = self
                .store
                .update_status(&message.id, MessageStatus::Delivered)
                .await
            {
                error!(message_id = %message.id, error = %err, "failed to record delivery");
            }
            self.hub
                .send_to_user(sender, &Envelope::message(message))
                .await;
        }

        RouteOutcome::Direct { delivered }
    }

    async fn deliver_group(
        &self,
        sender: &Identity,
        group: &str,
        message: ChatMessage,
    ) -> RouteOutcome {
        let envelope = Envelope::message(message);

        let Some(membership) = &self.membership else {
            // Without a membership resolver every connected session gets it,
            // the sender's own included.
            let recipients = self.hub.broadcast(&envelope).await;
            return RouteOutcome::Group { recipients };
        };

        let members = match membership.members(group).await {
            Ok(members) => members,
            Err(err) => {
                error!(group_id = %group, error = %err, "failed to resolve group members");
                Vec::new()
            }
        };

        let mut recipients = 0;
        for member in members.iter().filter(|member| *member != sender) {
            if self.hub.send_to_user(member, &envelope).await {
                recipients += 1;
            }
        }
        self.hub.send_to_user(sender, &envelope).await;

        RouteOutcome::Group { recipients }
    }
}

enum Route {
    Direct(Identity),
    Group(String),
}
