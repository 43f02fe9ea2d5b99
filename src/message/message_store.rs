use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;

use super::message_models::{Message, NewMessage, ReadStatus};
use super::message_subscription::Subscription;

/// Capacity of the in-process change feed.
pub const CHANGE_FEED_CAPACITY: usize = 256;

/// Result sets a subscription can watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageQuery {
    /// Every message, ordered by `created_at`.
    All,
    /// Messages the user sent or received.
    Involving(String),
    /// Messages exchanged between two users, in either direction.
    Between(String, String),
}

impl MessageQuery {
    pub fn matches(&self, message: &Message) -> bool {
        match self {
            MessageQuery::All => true,
            MessageQuery::Involving(user_id) => message.involves(user_id),
            MessageQuery::Between(a, b) => message.is_between(a, b),
        }
    }
}

/// Change notification published by a store after a write lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreChange {
    #[serde(rename_all = "camelCase")]
    Message {
        sender_id: Option<String>,
        recipient_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ReadStatus { user_id: String, partner_id: String },
}

impl StoreChange {
    pub fn affects(&self, query: &MessageQuery) -> bool {
        match (self, query) {
            (StoreChange::Message { .. }, MessageQuery::All) => true,
            (
                StoreChange::Message {
                    sender_id,
                    recipient_id,
                },
                MessageQuery::Involving(user_id),
            ) => {
                // A notification without participants could be anyone's.
                if sender_id.is_none() && recipient_id.is_none() {
                    return true;
                }
                sender_id.as_deref() == Some(user_id.as_str())
                    || recipient_id.as_deref() == Some(user_id.as_str())
            }
            (
                StoreChange::Message {
                    sender_id,
                    recipient_id,
                },
                MessageQuery::Between(a, b),
            ) => match (sender_id.as_deref(), recipient_id.as_deref()) {
                (Some(sender), Some(recipient)) => {
                    (sender == a && recipient == b) || (sender == b && recipient == a)
                }
                (Some(one), None) | (None, Some(one)) => one == a || one == b,
                (None, None) => true,
            },
            (StoreChange::ReadStatus { .. }, MessageQuery::All | MessageQuery::Between(..)) => {
                false
            }
            (StoreChange::ReadStatus { user_id, .. }, MessageQuery::Involving(owner)) => {
                user_id == owner
            }
        }
    }
}

/// Query contract of the document store holding messages and read
/// watermarks. Results carry no ordering guarantee unless stated.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    async fn query_messages_by_sender(&self, user_id: &str) -> Result<Vec<Message>>;

    async fn query_messages_by_recipient(&self, user_id: &str) -> Result<Vec<Message>>;

    /// Messages sent from `sender_id` to `recipient_id` (one direction).
    async fn query_messages_between(
        &self,
        sender_id: &str,
        recipient_id: &str,
    ) -> Result<Vec<Message>>;

    /// Current result set of a subscribable query, ascending by `created_at`.
    async fn query_messages(&self, query: &MessageQuery) -> Result<Vec<Message>>;

    async fn find_message(&self, id: Uuid) -> Result<Option<Message>>;

    async fn query_read_statuses_for_user(&self, user_id: &str) -> Result<Vec<ReadStatus>>;

    async fn append_message(&self, message: NewMessage) -> Result<Message>;

    async fn upsert_read_status(
        &self,
        user_id: &str,
        partner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn delete_message(&self, id: Uuid) -> Result<()>;

    fn changes(&self) -> broadcast::Receiver<StoreChange>;
}

pub type SharedMessageStore = Arc<dyn MessageStore>;

/// Creates a stopped subscription on `query`. Call `start` to receive
/// snapshots.
pub fn subscribe(store: &SharedMessageStore, query: MessageQuery) -> Subscription {
    Subscription::new(store.clone(), query)
}

/// Stable ascending sort on `created_at`; equal timestamps keep their
/// arrival order.
pub fn sort_by_created_at(messages: &mut [Message]) {
    messages.sort_by_key(Message::sort_key);
}
