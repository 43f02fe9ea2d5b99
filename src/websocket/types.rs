use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::message::message_models::{Message, MessageType};
use crate::realtime::SessionState;

/// Frames pushed by the server on the conversation socket.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    ThreadSnapshot(ThreadSnapshotPayload),
    MessageSent(MessageSentPayload),
    Error(ErrorPayload),
    Ping,
    Pong,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ThreadSnapshotPayload {
    pub partner_id: String,
    pub live: bool,
    pub messages: Vec<Message>,
}

impl ThreadSnapshotPayload {
    pub fn new(partner_id: &str, state: SessionState, messages: Vec<Message>) -> Self {
        Self {
            partner_id: partner_id.to_string(),
            live: state == SessionState::Live,
            messages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageSentPayload {
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorPayload {
    pub message: String,
}

/// Frames accepted from the client.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SendMessage {
        #[serde(default)]
        text: String,
        image_url: Option<String>,
        image_file_name: Option<String>,
        #[serde(default)]
        message_type: MessageType,
    },
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_send_message_defaults_to_text() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"send_message","text":"hi"}"#).unwrap();
        match msg {
            ClientMessage::SendMessage {
                text,
                image_url,
                message_type,
                ..
            } => {
                assert_eq!(text, "hi");
                assert!(image_url.is_none());
                assert_eq!(message_type, MessageType::Text);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_server_frames_are_tagged() {
        let json = serde_json::to_value(WsMessage::ThreadSnapshot(ThreadSnapshotPayload::new(
            "bob",
            SessionState::Live,
            Vec::new(),
        )))
        .unwrap();
        assert_eq!(json["type"], "thread_snapshot");
        assert_eq!(json["partner_id"], "bob");
        assert_eq!(json["live"], true);

        let json = serde_json::to_value(WsMessage::Pong).unwrap();
        assert_eq!(json["type"], "pong");
    }
}
