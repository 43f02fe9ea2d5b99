use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{AppError, Result};

use super::message_models::{Message, MessageRow, NewMessage, ReadStatus};
use super::message_store::{MessageQuery, MessageStore, StoreChange, CHANGE_FEED_CAPACITY};

/// Postgres channel the table triggers publish to.
pub const CHANGE_CHANNEL: &str = "chat_changes";

const MESSAGE_COLUMNS: &str =
    "id, sender_id, recipient_id, text, image_url, image_file_name, message_type, created_at";

#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
    changes: broadcast::Sender<StoreChange>,
}

impl MessageRepository {
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { pool, changes }
    }

    /// Forwards trigger notifications from Postgres into the change feed.
    /// Runs until the listener connection cannot be re-established.
    pub async fn listen_for_changes(&self) -> Result<()> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        tracing::info!("Listening for store changes on '{}'", CHANGE_CHANNEL);

        loop {
            let notification = listener.recv().await?;
            match serde_json::from_str::<StoreChange>(notification.payload()) {
                Ok(change) => {
                    let _ = self.changes.send(change);
                }
                Err(e) => {
                    tracing::warn!(
                        "Ignoring malformed change notification '{}': {}",
                        notification.payload(),
                        e
                    );
                }
            }
        }
    }

    async fn fetch_messages(&self, sql: &str, binds: &[&str]) -> Result<Vec<Message>> {
        let mut query = sqlx::query_as::<_, MessageRow>(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().filter_map(MessageRow::into_message).collect())
    }
}

#[async_trait]
impl MessageStore for MessageRepository {
    async fn query_messages_by_sender(&self, user_id: &str) -> Result<Vec<Message>> {
        let sql = format!("SELECT {} FROM messages WHERE sender_id = $1", MESSAGE_COLUMNS);
        self.fetch_messages(&sql, &[user_id]).await
    }

    async fn query_messages_by_recipient(&self, user_id: &str) -> Result<Vec<Message>> {
        let sql = format!("SELECT {} FROM messages WHERE recipient_id = $1", MESSAGE_COLUMNS);
        self.fetch_messages(&sql, &[user_id]).await
    }

    async fn query_messages_between(
        &self,
        sender_id: &str,
        recipient_id: &str,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE sender_id = $1 AND recipient_id = $2",
            MESSAGE_COLUMNS
        );
        self.fetch_messages(&sql, &[sender_id, recipient_id]).await
    }

    async fn query_messages(&self, query: &MessageQuery) -> Result<Vec<Message>> {
        match query {
            MessageQuery::All => {
                let sql = format!(
                    "SELECT {} FROM messages ORDER BY created_at ASC NULLS FIRST",
                    MESSAGE_COLUMNS
                );
                self.fetch_messages(&sql, &[]).await
            }
            MessageQuery::Involving(user_id) => {
                let sql = format!(
                    "SELECT {} FROM messages
                     WHERE sender_id = $1 OR recipient_id = $1
                     ORDER BY created_at ASC NULLS FIRST",
                    MESSAGE_COLUMNS
                );
                self.fetch_messages(&sql, &[user_id.as_str()]).await
            }
            MessageQuery::Between(a, b) => {
                let sql = format!(
                    "SELECT {} FROM messages
                     WHERE (sender_id = $1 AND recipient_id = $2)
                        OR (sender_id = $2 AND recipient_id = $1)
                     ORDER BY created_at ASC NULLS FIRST",
                    MESSAGE_COLUMNS
                );
                self.fetch_messages(&sql, &[a.as_str(), b.as_str()]).await
            }
        }
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<Message>> {
        let sql = format!("SELECT {} FROM messages WHERE id = $1", MESSAGE_COLUMNS);
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(MessageRow::into_message))
    }

    async fn query_read_statuses_for_user(&self, user_id: &str) -> Result<Vec<ReadStatus>> {
        let statuses = sqlx::query_as::<_, ReadStatus>(
            "SELECT user_id, conversation_id, last_read
             FROM read_statuses
             WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(statuses)
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        let sql = format!(
            "INSERT INTO messages (sender_id, recipient_id, text, image_url, image_file_name, message_type)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            MESSAGE_COLUMNS
        );

        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(&message.sender_id)
            .bind(&message.recipient_id)
            .bind(&message.text)
            .bind(message.image_url.as_deref())
            .bind(message.image_file_name.as_deref())
            .bind(message.message_type.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::WriteFailed(e.to_string()))?;

        row.into_message()
            .ok_or_else(|| AppError::BadRequest("Message is missing a participant".to_string()))
    }

    async fn upsert_read_status(
        &self,
        user_id: &str,
        partner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO read_statuses (id, user_id, conversation_id, last_read)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET last_read = EXCLUDED.last_read",
        )
        .bind(ReadStatus::key(user_id, partner_id))
        .bind(user_id)
        .bind(partner_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::WriteFailed(e.to_string()))?;

        Ok(())
    }

    async fn delete_message(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::WriteFailed(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Message not found".to_string()));
        }

        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
