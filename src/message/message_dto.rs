use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use super::message_models::{Message, MessageType, NewMessage};

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_send_message"))]
pub struct SendMessageRequest {
    #[validate(length(min = 1))]
    pub recipient_id: String,
    #[serde(default)]
    pub text: String,
    pub image_url: Option<String>,
    pub image_file_name: Option<String>,
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

fn validate_send_message(req: &SendMessageRequest) -> Result<(), ValidationError> {
    let has_image = req.image_url.as_deref().is_some_and(|url| !url.trim().is_empty());
    match req.message_type {
        MessageType::Text if req.text.trim().is_empty() => {
            Err(ValidationError::new("text_message_requires_text"))
        }
        MessageType::Text if req.image_url.is_some() => {
            Err(ValidationError::new("text_message_with_image_url"))
        }
        MessageType::Image if !has_image => Err(ValidationError::new("image_message_requires_url")),
        _ => Ok(()),
    }
}

impl SendMessageRequest {
    pub fn into_new_message(self, sender_id: &str) -> NewMessage {
        match self.message_type {
            MessageType::Text => NewMessage::text(sender_id, &self.recipient_id, &self.text),
            MessageType::Image => NewMessage::image(
                sender_id,
                &self.recipient_id,
                self.image_url.as_deref().unwrap_or_default(),
                self.image_file_name.as_deref(),
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct PartnerProfile {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub text: String,
    pub message_type: MessageType,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<&Message> for LastMessage {
    fn from(message: &Message) -> Self {
        Self {
            text: message.text.clone(),
            message_type: message.message_type,
            created_at: message.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// Partner user id.
    pub id: String,
    pub partner: PartnerProfile,
    pub last_message: LastMessage,
    pub unread_count: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UnreadTotalResponse {
    pub total: u32,
}
