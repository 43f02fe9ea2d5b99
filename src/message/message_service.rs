use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::message::message_dto::SendMessageRequest;
use crate::message::message_models::Message;
use crate::message::message_store::{sort_by_created_at, SharedMessageStore};

#[derive(Clone)]
pub struct MessageService {
    store: SharedMessageStore,
}

impl MessageService {
    pub fn new(store: SharedMessageStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SharedMessageStore {
        &self.store
    }

    /// All messages between `user_id` and `partner_id`, oldest first.
    /// Messages with equal timestamps keep the order the store returned them.
    pub async fn load_thread(&self, user_id: &str, partner_id: &str) -> Result<Vec<Message>> {
        let (outgoing, incoming) = tokio::try_join!(
            self.store.query_messages_between(user_id, partner_id),
            self.store.query_messages_between(partner_id, user_id),
        )?;

        let mut thread: Vec<Message> = outgoing
            .into_iter()
            .chain(incoming)
            .filter(|m| m.is_between(user_id, partner_id))
            .collect();

        // A self-conversation comes back from both directions.
        if user_id == partner_id {
            let mut seen = std::collections::HashSet::new();
            thread.retain(|m| seen.insert(m.id));
        }

        sort_by_created_at(&mut thread);
        Ok(thread)
    }

    pub async fn send_message(
        &self,
        sender_id: &str,
        payload: SendMessageRequest,
    ) -> Result<Message> {
        payload.validate()?;

        if payload.recipient_id == sender_id {
            return Err(AppError::BadRequest(
                "Cannot send a message to yourself".to_string(),
            ));
        }

        let message = self
            .store
            .append_message(payload.into_new_message(sender_id))
            .await?;

        tracing::info!(
            "Message {} sent from {} to {} ({})",
            message.id,
            message.sender_id,
            message.recipient_id,
            message.message_type
        );
        Ok(message)
    }

    /// Hard-deletes a message. Only its sender may delete it.
    pub async fn delete_message(&self, user_id: &str, message_id: Uuid) -> Result<()> {
        let message = self
            .store
            .find_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;

        if message.sender_id != user_id {
            return Err(AppError::Forbidden(
                "Only the sender can delete this message".to_string(),
            ));
        }

        self.store.delete_message(message_id).await?;
        tracing::info!("Message {} deleted by {}", message_id, user_id);
        Ok(())
    }
}
