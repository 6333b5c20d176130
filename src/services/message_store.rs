use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};

use crate::error::AppResult;
use crate::models::message::{NewMessage, StoredMessage};
use crate::models::{ConversationId, MessageId, UserId};

/// Persistence collaborator for conversations, messages and read state.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Participant ids for a conversation; empty when it does not exist.
    async fn participant_ids(
        &self,
        conversation_id: ConversationId,
    ) -> AppResult<HashSet<UserId>>;

    /// Persists a message and advances the conversation's `last_message_at`.
    async fn create_message(&self, message: NewMessage) -> AppResult<StoredMessage>;

    /// Marks the given messages read on behalf of `actor_id`. Messages
    /// authored by the actor are left untouched; the batch applies
    /// atomically.
    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        actor_id: UserId,
        message_ids: &[MessageId],
        read_at: DateTime<Utc>,
    ) -> AppResult<()>;
}

pub struct PgMessageStore {
    db: Pool<Postgres>,
}

impl PgMessageStore {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn participant_ids(
        &self,
        conversation_id: ConversationId,
    ) -> AppResult<HashSet<UserId>> {
        let ids: Vec<UserId> = sqlx::query_scalar(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn create_message(&self, message: NewMessage) -> AppResult<StoredMessage> {
        let mut tx = self.db.begin().await?;
        let row = sqlx::query(
            "INSERT INTO messages (conversation_id, sender_id, content, message_type, media_url) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, created_at",
        )
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.kind.as_str())
        .bind(&message.media_url)
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query("UPDATE conversations SET last_message_at = NOW() WHERE id = $1")
            .bind(message.conversation_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(StoredMessage {
            id: row.try_get("id")?,
            conversation_id: message.conversation_id,
            sender_id: Some(message.sender_id),
            content: message.content,
            message_type: message.kind,
            media_url: message.media_url,
            created_at: row.try_get("created_at")?,
            is_read: false,
            read_at: None,
        })
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        actor_id: UserId,
        message_ids: &[MessageId],
        read_at: DateTime<Utc>,
    ) -> AppResult<()> {
        // Single statement, so the batch is all-or-nothing. IS DISTINCT FROM
        // keeps messages from deleted senders markable.
        sqlx::query(
            "UPDATE messages SET is_read = TRUE, read_at = $4 \
             WHERE conversation_id = $1 AND id = ANY($3) AND sender_id IS DISTINCT FROM $2",
        )
        .bind(conversation_id)
        .bind(actor_id)
        .bind(message_ids)
        .bind(read_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
