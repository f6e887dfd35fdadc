//! Courier Store Crate
//!
//! Collaborators the hub calls into but does not own: the message store
//! that records chat messages and their delivery status, and the group
//! membership resolver used for group-scoped delivery.

use std::sync::Arc;

use async_trait::async_trait;
use courier_config::DatabaseConfig;
use courier_protocol::{ChatMessage, Identity, MessageStatus};
use tracing::info;

pub mod connection;
pub mod error;
pub mod membership;
pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use connection::prepare_database;
pub use error::{StoreError, StoreResult};
pub use membership::StaticGroupMembership;
pub use memory::MemoryMessageStore;
pub use migrations::run_migrations;
pub use sqlite::SqliteMessageStore;

/// Persistence for chat messages and their delivery status.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Record a new message. Fails with [`StoreError::Duplicate`] if the id is taken.
    async fn create(&self, message: &ChatMessage) -> StoreResult<()>;

    /// Move a stored message to `status`. Backward moves are refused.
    async fn update_status(&self, id: &str, status: MessageStatus) -> StoreResult<()>;

    async fn find(&self, id: &str) -> StoreResult<Option<ChatMessage>>;
}

/// Resolves the members of a group for group-scoped delivery.
#[async_trait]
pub trait GroupMembership: Send + Sync {
    async fn members(&self, group_id: &str) -> StoreResult<Vec<Identity>>;
}

/// Open the message store selected by `config`.
pub async fn open_message_store(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn MessageStore>> {
    if config.is_memory() {
        info!("using in-memory message store");
        return Ok(Arc::new(MemoryMessageStore::new()));
    }

    let pool = prepare_database(config).await?;
    run_migrations(&pool).await?;
    Ok(Arc::new(SqliteMessageStore::new(pool)))
}
