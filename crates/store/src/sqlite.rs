//! Sqlite-backed message store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_protocol::{ChatMessage, Identity, MessageKind, MessageStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::{MessageStore, StoreError, StoreResult};

const SELECT_MESSAGE: &str = "SELECT id, sender_id, receiver_id, group_id, kind, content, media_url, \
     thumbnail_url, status, created_at, updated_at FROM messages WHERE id = ?";

pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn message_from_row(row: &SqliteRow) -> StoreResult<ChatMessage> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;

    Ok(ChatMessage {
        sender_id: Identity::new(row.try_get::<String, _>("sender_id")?),
        receiver_id: row
            .try_get::<Option<String>, _>("receiver_id")?
            .map(Identity::new),
        group_id: row.try_get("group_id")?,
        kind: kind
            .parse::<MessageKind>()
            .map_err(|e| StoreError::corrupt(&id, e))?,
        content: row.try_get("content")?,
        media_url: row.try_get("media_url")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        status: status
            .parse::<MessageStatus>()
            .map_err(|e| StoreError::corrupt(&id, e))?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        id,
    })
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn create(&self, message: &ChatMessage) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO messages (id, sender_id, receiver_id, group_id, kind, content, media_url, \
             thumbnail_url, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(message.sender_id.as_str())
        .bind(message.receiver_id.as_ref().map(Identity::as_str))
        .bind(message.group_id.as_deref())
        .bind(message.kind.as_str())
        .bind(&message.content)
        .bind(message.media_url.as_deref())
        .bind(message.thumbnail_url.as_deref())
        .bind(message.status.as_str())
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(message_id = %message.id, "message stored");
                Ok(())
            }
            Err(error) if is_unique_violation(&error) => Err(StoreError::Duplicate {
                id: message.id.clone(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    async fn update_status(&self, id: &str, status: MessageStatus) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> = sqlx::query_scalar("SELECT status FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let current = current
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?
            .parse::<MessageStatus>()
            .map_err(|e| StoreError::corrupt(id, e))?;

        if current == status {
            return Ok(());
        }
        if !current.can_transition_to(status) {
            return Err(StoreError::IllegalTransition {
                id: id.to_string(),
                from: current,
                to: status,
            });
        }

        sqlx::query("UPDATE messages SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(message_id = %id, %status, "message status updated");
        Ok(())
    }

    async fn find(&self, id: &str) -> StoreResult<Option<ChatMessage>> {
        let row = sqlx::query(SELECT_MESSAGE)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }
}
