//! In-process message store

use std::collections::HashMap;

use async_trait::async_trait;
use courier_protocol::{ChatMessage, MessageStatus};
use tokio::sync::Mutex;

use crate::{MessageStore, StoreError, StoreResult};

/// Message store backed by a map. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: Mutex<HashMap<String, ChatMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, message: &ChatMessage) -> StoreResult<()> {
        let mut messages = self.messages.lock().await;
        if messages.contains_key(&message.id) {
            return Err(StoreError::Duplicate {
                id: message.id.clone(),
            });
        }
        messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn update_status(&self, id: &str, status: MessageStatus) -> StoreResult<()> {
        let mut messages = self.messages.lock().await;
        let message = messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        if message.status == status {
            return Ok(());
        }
        message
            .advance(status)
            .map_err(|error| StoreError::from((id.to_string(), error)))
    }

    async fn find(&self, id: &str) -> StoreResult<Option<ChatMessage>> {
        Ok(self.messages.lock().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_protocol::Identity;

    fn message() -> ChatMessage {
        ChatMessage::direct(Identity::from("alice"), Identity::from("bob"), "hi")
    }

    #[tokio::test]
    async fn create_then_find() {
        let store = MemoryMessageStore::new();
        let message = message();
        store.create(&message).await.unwrap();

        let found = store.find(&message.id).await.unwrap().unwrap();
        assert_eq!(found.content, "hi");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = MemoryMessageStore::new();
        let message = message();
        store.create(&message).await.unwrap();

        let err = store.create(&message).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn status_moves_forward_only() {
        let store = MemoryMessageStore::new();
        let mut message = message();
        message.status = MessageStatus::Sent;
        store.create(&message).await.unwrap();

        store
            .update_status(&message.id, MessageStatus::Delivered)
            .await
            .unwrap();
        let err = store
            .update_status(&message.id, MessageStatus::Sent)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::IllegalTransition { .. }));
        let found = store.find(&message.id).await.unwrap().unwrap();
        assert_eq!(found.status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = MemoryMessageStore::new();
        let err = store
            .update_status("missing", MessageStatus::Sent)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
