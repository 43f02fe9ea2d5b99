use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;

use crate::error::Result;
use crate::message::message_dto::{ConversationSummary, LastMessage};
use crate::message::message_models::{Message, ReadStatus};
use crate::message::message_store::SharedMessageStore;
use crate::profile::{resolve_partner, ProfileLookup};

use super::read_tracker::ReadTracker;

/// Per-partner aggregate before profile resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PartnerAggregate {
    pub partner_id: String,
    pub last_message: Message,
    pub unread_count: u32,
}

/// Latest read watermark per partner. Duplicate rows for the same pair keep
/// the greatest timestamp.
pub fn latest_read_by_partner(statuses: &[ReadStatus]) -> HashMap<String, DateTime<Utc>> {
    let mut last_read: HashMap<String, DateTime<Utc>> = HashMap::new();
    for status in statuses {
        last_read
            .entry(status.conversation_id.clone())
            .and_modify(|current| {
                if status.last_read > *current {
                    *current = status.last_read;
                }
            })
            .or_insert(status.last_read);
    }
    last_read
}

/// Whether `candidate` should replace `current` as the last message. Equal
/// timestamps go to the greater id so the pick does not depend on the
/// order the store returned documents in.
pub fn is_more_recent(candidate: &Message, current: &Message) -> bool {
    (candidate.sort_key(), candidate.id) > (current.sort_key(), current.id)
}

/// Groups `messages` by conversation partner of `user_id`, picking the last
/// message and counting unread incoming messages against `last_read`.
pub fn aggregate_conversations<I>(
    user_id: &str,
    messages: I,
    last_read: &HashMap<String, DateTime<Utc>>,
) -> Vec<PartnerAggregate>
where
    I: IntoIterator<Item = Message>,
{
    let mut seen = HashSet::new();
    let mut by_partner: HashMap<String, PartnerAggregate> = HashMap::new();

    for message in messages {
        // Both directional queries return a message sent to oneself.
        if !seen.insert(message.id) {
            continue;
        }

        let other = message.other_party(user_id).to_string();
        if other.is_empty() {
            continue;
        }

        let incoming = message.recipient_id == user_id && message.sender_id == other;
        let unread = incoming
            && last_read
                .get(&other)
                .map_or(true, |watermark| message.sort_key() > *watermark);

        match by_partner.get_mut(&other) {
            Some(aggregate) => {
                if unread {
                    aggregate.unread_count += 1;
                }
                if is_more_recent(&message, &aggregate.last_message) {
                    aggregate.last_message = message;
                }
            }
            None => {
                by_partner.insert(
                    other.clone(),
                    PartnerAggregate {
                        partner_id: other,
                        last_message: message,
                        unread_count: u32::from(unread),
                    },
                );
            }
        }
    }

    let mut aggregates: Vec<PartnerAggregate> = by_partner.into_values().collect();
    aggregates.sort_by(|a, b| {
        b.last_message
            .sort_key()
            .cmp(&a.last_message.sort_key())
            .then_with(|| a.partner_id.cmp(&b.partner_id))
    });
    aggregates
}

#[derive(Clone)]
pub struct ConversationService {
    store: SharedMessageStore,
    profiles: Arc<dyn ProfileLookup>,
    read_tracker: ReadTracker,
    media_base_url: Arc<str>,
}

impl ConversationService {
    pub fn new(
        store: SharedMessageStore,
        profiles: Arc<dyn ProfileLookup>,
        read_tracker: ReadTracker,
        media_base_url: &str,
    ) -> Self {
        Self {
            store,
            profiles,
            read_tracker,
            media_base_url: Arc::from(media_base_url),
        }
    }

    pub fn read_tracker(&self) -> &ReadTracker {
        &self.read_tracker
    }

    pub fn store(&self) -> &SharedMessageStore {
        &self.store
    }

    /// Builds one summary per partner `user_id` has exchanged messages with,
    /// newest conversation first.
    pub async fn build_conversation_list(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let last_read = match self.store.query_read_statuses_for_user(user_id).await {
            Ok(statuses) => latest_read_by_partner(&statuses),
            Err(e) => {
                tracing::warn!(
                    "Read statuses unavailable for {}, counting everything unread: {}",
                    user_id,
                    e
                );
                HashMap::new()
            }
        };

        let (sent, received) = tokio::try_join!(
            self.store.query_messages_by_sender(user_id),
            self.store.query_messages_by_recipient(user_id),
        )?;

        let aggregates =
            aggregate_conversations(user_id, sent.into_iter().chain(received), &last_read);

        let partners = join_all(aggregates.iter().map(|aggregate| {
            resolve_partner(
                self.profiles.as_ref(),
                &aggregate.partner_id,
                &self.media_base_url,
            )
        }))
        .await;

        let mut summaries: Vec<ConversationSummary> = aggregates
            .into_iter()
            .zip(partners)
            .map(|(aggregate, partner)| ConversationSummary {
                id: aggregate.partner_id,
                partner,
                last_message: LastMessage::from(&aggregate.last_message),
                unread_count: aggregate.unread_count,
            })
            .collect();

        self.read_tracker.apply(user_id, &mut summaries);

        tracing::debug!("Built {} conversations for {}", summaries.len(), user_id);
        Ok(summaries)
    }

    /// Sum of unread counts across all conversations of `user_id`.
    pub async fn total_unread(&self, user_id: &str) -> Result<u32> {
        let summaries = self.build_conversation_list(user_id).await?;
        Ok(summaries.iter().map(|s| s.unread_count).sum())
    }
}
