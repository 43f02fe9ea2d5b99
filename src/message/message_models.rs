use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
}

impl MessageType {
    /// Unknown or missing values are treated as plain text.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("image") => MessageType::Image,
            _ => MessageType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message as the rest of the crate sees it. Built only through
/// [`MessageRow::into_message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: String,
    pub recipient_id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub image_file_name: Option<String>,
    pub message_type: MessageType,
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Ordering key. A missing timestamp compares as the Unix epoch.
    pub fn sort_key(&self) -> DateTime<Utc> {
        self.created_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// The participant of this message that is not `user_id`.
    pub fn other_party(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.recipient_id
        } else {
            &self.sender_id
        }
    }

    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.recipient_id == b)
            || (self.sender_id == b && self.recipient_id == a)
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.recipient_id == user_id
    }
}

/// Loosely-typed message document as stored.
#[derive(Debug, Clone, Default, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub sender_id: Option<String>,
    pub recipient_id: Option<String>,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub image_file_name: Option<String>,
    pub message_type: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl MessageRow {
    /// Normalizes a stored document. Returns `None` for records missing a
    /// participant id.
    pub fn into_message(self) -> Option<Message> {
        let sender_id = self.sender_id.filter(|id| !id.is_empty());
        let recipient_id = self.recipient_id.filter(|id| !id.is_empty());

        let (sender_id, recipient_id) = match (sender_id, recipient_id) {
            (Some(s), Some(r)) => (s, r),
            _ => {
                tracing::warn!("Skipping malformed message {}: missing participant id", self.id);
                return None;
            }
        };

        let message_type = MessageType::parse_lenient(self.message_type.as_deref());
        let image_url = self.image_url.filter(|url| !url.is_empty());

        Some(Message {
            id: self.id,
            sender_id,
            recipient_id,
            text: self.text.unwrap_or_default(),
            image_url,
            image_file_name: self.image_file_name,
            message_type,
            created_at: self.created_at,
        })
    }
}

/// Input to `MessageStore::append_message`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender_id: String,
    pub recipient_id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub image_file_name: Option<String>,
    pub message_type: MessageType,
}

impl NewMessage {
    pub fn text(sender_id: &str, recipient_id: &str, text: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            text: text.to_string(),
            image_url: None,
            image_file_name: None,
            message_type: MessageType::Text,
        }
    }

    pub fn image(
        sender_id: &str,
        recipient_id: &str,
        image_url: &str,
        image_file_name: Option<&str>,
    ) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            text: String::new(),
            image_url: Some(image_url.to_string()),
            image_file_name: image_file_name.map(str::to_string),
            message_type: MessageType::Image,
        }
    }
}

/// Per (user, partner) read watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadStatus {
    pub user_id: String,
    pub conversation_id: String,
    pub last_read: DateTime<Utc>,
}

impl ReadStatus {
    pub fn key(user_id: &str, partner_id: &str) -> String {
        format!("{}-{}", user_id, partner_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> MessageRow {
        MessageRow {
            id: Uuid::new_v4(),
            sender_id: Some("alice".to_string()),
            recipient_id: Some("bob".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_fields_are_defaulted() {
        let message = row().into_message().unwrap();
        assert_eq!(message.message_type, MessageType::Text);
        assert_eq!(message.text, "");
        assert_eq!(message.created_at, None);
        assert_eq!(message.sort_key(), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_missing_participant_is_dropped() {
        let mut missing = row();
        missing.recipient_id = Some(String::new());
        assert!(missing.into_message().is_none());

        let mut missing = row();
        missing.sender_id = None;
        assert!(missing.into_message().is_none());
    }

    #[test]
    fn test_message_type_parse_lenient() {
        assert_eq!(MessageType::parse_lenient(Some("image")), MessageType::Image);
        assert_eq!(MessageType::parse_lenient(Some("IMAGE")), MessageType::Image);
        assert_eq!(MessageType::parse_lenient(Some("sticker")), MessageType::Text);
        assert_eq!(MessageType::parse_lenient(None), MessageType::Text);
    }

    #[test]
    fn test_other_party_and_pair() {
        let message = row().into_message().unwrap();
        assert_eq!(message.other_party("alice"), "bob");
        assert_eq!(message.other_party("bob"), "alice");
        assert!(message.is_between("bob", "alice"));
        assert!(!message.is_between("alice", "carol"));
    }

    #[test]
    fn test_read_status_key() {
        assert_eq!(ReadStatus::key("alice", "bob"), "alice-bob");
    }
}
