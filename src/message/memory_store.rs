use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::error::{AppError, Result};

use super::message_models::{Message, MessageRow, NewMessage, ReadStatus};
use super::message_store::{
    sort_by_created_at, MessageQuery, MessageStore, StoreChange, CHANGE_FEED_CAPACITY,
};

/// Process-local message store. Documents are kept in insertion order, so
/// queries return them in arrival order like an unindexed collection would.
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<Message>>,
    read_statuses: DashMap<String, ReadStatus>,
    changes: broadcast::Sender<StoreChange>,
    fail_message_queries: AtomicBool,
    fail_sender_queries: AtomicBool,
    fail_recipient_queries: AtomicBool,
    fail_read_status_queries: AtomicBool,
    fail_writes: AtomicBool,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            messages: RwLock::new(Vec::new()),
            read_statuses: DashMap::new(),
            changes,
            fail_message_queries: AtomicBool::new(false),
            fail_sender_queries: AtomicBool::new(false),
            fail_recipient_queries: AtomicBool::new(false),
            fail_read_status_queries: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every message query fail until reset.
    #[cfg(test)]
    pub fn set_fail_message_queries(&self, fail: bool) {
        self.fail_message_queries.store(fail, Ordering::SeqCst);
    }

    /// Fails only `query_messages_by_sender`.
    #[cfg(test)]
    pub fn set_fail_sender_queries(&self, fail: bool) {
        self.fail_sender_queries.store(fail, Ordering::SeqCst);
    }

    /// Fails only `query_messages_by_recipient`.
    #[cfg(test)]
    pub fn set_fail_recipient_queries(&self, fail: bool) {
        self.fail_recipient_queries.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn set_fail_read_status_queries(&self, fail: bool) {
        self.fail_read_status_queries.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stores a raw document as-is, normalizing it the way a read would.
    /// Malformed documents are kept out, mirroring what queries would skip.
    pub async fn insert_row(&self, row: MessageRow) -> Option<Message> {
        let message = row.into_message()?;
        self.messages.write().await.push(message.clone());
        self.publish(StoreChange::Message {
            sender_id: Some(message.sender_id.clone()),
            recipient_id: Some(message.recipient_id.clone()),
        });
        Some(message)
    }

    fn publish(&self, change: StoreChange) {
        // No receivers simply means nobody is watching.
        let _ = self.changes.send(change);
    }

    fn check_message_queries(&self) -> Result<()> {
        if self.fail_message_queries.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable(
                "message queries are failing".to_string(),
            ));
        }
        Ok(())
    }

    fn check_flag(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable(format!("{} are failing", what)));
        }
        Ok(())
    }

    fn check_writes(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::WriteFailed("writes are failing".to_string()));
        }
        Ok(())
    }

    async fn filter_messages<F>(&self, predicate: F) -> Result<Vec<Message>>
    where
        F: Fn(&Message) -> bool + Send,
    {
        self.check_message_queries()?;
        let messages = self.messages.read().await;
        Ok(messages.iter().filter(|m| predicate(m)).cloned().collect())
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn query_messages_by_sender(&self, user_id: &str) -> Result<Vec<Message>> {
        Self::check_flag(&self.fail_sender_queries, "sender queries")?;
        self.filter_messages(|m| m.sender_id == user_id).await
    }

    async fn query_messages_by_recipient(&self, user_id: &str) -> Result<Vec<Message>> {
        Self::check_flag(&self.fail_recipient_queries, "recipient queries")?;
        self.filter_messages(|m| m.recipient_id == user_id).await
    }

    async fn query_messages_between(
        &self,
        sender_id: &str,
        recipient_id: &str,
    ) -> Result<Vec<Message>> {
        self.filter_messages(|m| m.sender_id == sender_id && m.recipient_id == recipient_id)
            .await
    }

    async fn query_messages(&self, query: &MessageQuery) -> Result<Vec<Message>> {
        let mut messages = self.filter_messages(|m| query.matches(m)).await?;
        sort_by_created_at(&mut messages);
        Ok(messages)
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.check_message_queries()?;
        let messages = self.messages.read().await;
        Ok(messages.iter().find(|m| m.id == id).cloned())
    }

    async fn query_read_statuses_for_user(&self, user_id: &str) -> Result<Vec<ReadStatus>> {
        if self.fail_read_status_queries.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable(
                "read status queries are failing".to_string(),
            ));
        }
        Ok(self
            .read_statuses
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        self.check_writes()?;

        let row = MessageRow {
            id: Uuid::new_v4(),
            sender_id: Some(message.sender_id),
            recipient_id: Some(message.recipient_id),
            text: Some(message.text),
            image_url: message.image_url,
            image_file_name: message.image_file_name,
            message_type: Some(message.message_type.as_str().to_string()),
            created_at: Some(Utc::now()),
        };

        self.insert_row(row)
            .await
            .ok_or_else(|| AppError::BadRequest("Message is missing a participant".to_string()))
    }

    async fn upsert_read_status(
        &self,
        user_id: &str,
        partner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writes()?;

        self.read_statuses.insert(
            ReadStatus::key(user_id, partner_id),
            ReadStatus {
                user_id: user_id.to_string(),
                conversation_id: partner_id.to_string(),
                last_read: now,
            },
        );
        self.publish(StoreChange::ReadStatus {
            user_id: user_id.to_string(),
            partner_id: partner_id.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, id: Uuid) -> Result<()> {
        self.check_writes()?;

        let removed = {
            let mut messages = self.messages.write().await;
            let position = messages.iter().position(|m| m.id == id);
            position.map(|index| messages.remove(index))
        };

        let removed = removed.ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;
        self.publish(StoreChange::Message {
            sender_id: Some(removed.sender_id),
            recipient_id: Some(removed.recipient_id),
        });
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
