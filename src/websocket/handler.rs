use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use crate::{
    error::{AppError, Result},
    message::message_dto::SendMessageRequest,
    middleware::AuthUser,
    realtime::{ConversationSession, ConversationView, SessionState},
    state::AppState,
    websocket::types::{
        ClientMessage, ErrorPayload, MessageSentPayload, ThreadSnapshotPayload, WsMessage,
    },
};

pub type WsSender = mpsc::UnboundedSender<WsMessage>;

#[derive(Debug, Deserialize)]
pub struct ConversationSocketParams {
    pub partner_id: String,
    /// Sent once if the conversation turns out to be empty.
    pub initial_message: Option<String>,
}

/// Conversation WebSocket.
///
/// Opens a live session on the thread with `partner_id` and pushes a
/// `thread_snapshot` frame with the full thread whenever it changes. The
/// session is closed when the socket goes away.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<ConversationSocketParams>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, params, state))
}

async fn handle_socket(
    socket: WebSocket,
    user_id: String,
    params: ConversationSocketParams,
    state: AppState,
) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    let mut session = ConversationSession::new(
        &user_id,
        &params.partner_id,
        state.message_service.clone(),
        state.conversation_service.read_tracker().clone(),
    );

    let opened = match session.open().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                "Initial thread load failed for {} <-> {}: {}",
                user_id,
                params.partner_id,
                e
            );
            let _ = tx.send(WsMessage::Error(ErrorPayload {
                message: e.to_string(),
            }));
            false
        }
    };

    if opened {
        if let Some(text) = params
            .initial_message
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
        {
            if let Err(e) = session.send_initial_message(text).await {
                let _ = tx.send(WsMessage::Error(ErrorPayload {
                    message: e.to_string(),
                }));
            }
        }
    }

    let session = Arc::new(session);

    // Task: forward thread snapshots
    let mut snapshot_task = tokio::spawn(forward_snapshots(
        session.watch(),
        params.partner_id.clone(),
        tx.clone(),
    ));

    // Task: send messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    // Task: receive messages from WebSocket
    let session_clone = session.clone();
    let tx_clone = tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Err(e) = process_client_message(&text, &session_clone, &tx_clone).await {
                    tracing::error!("Error processing conversation message: {:?}", e);
                    let _ = tx_clone.send(WsMessage::Error(ErrorPayload {
                        message: e.to_string(),
                    }));
                }
            } else if let Message::Close(_) = msg {
                break;
            }
        }
    });

    // Heartbeat task
    let tx_heartbeat = tx.clone();
    let mut heartbeat_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            if tx_heartbeat.send(WsMessage::Ping).is_err() {
                break;
            }
        }
    });

    // Stop all tasks when any one finishes
    tokio::select! {
        _ = &mut send_task => {},
        _ = &mut recv_task => {},
        _ = &mut heartbeat_task => {},
        _ = &mut snapshot_task => {},
    }
    send_task.abort();
    recv_task.abort();
    heartbeat_task.abort();
    snapshot_task.abort();

    // The session closes once the last handle is dropped.
    drop(session);

    tracing::info!(
        "Conversation WebSocket closed for {} <-> {}",
        user_id,
        params.partner_id
    );
}

async fn forward_snapshots(
    mut views: watch::Receiver<ConversationView>,
    partner_id: String,
    tx: WsSender,
) {
    loop {
        let payload = {
            let view = views.borrow_and_update();
            if view.state == SessionState::Closed {
                break;
            }
            ThreadSnapshotPayload::new(&partner_id, view.state, view.messages.clone())
        };

        if tx.send(WsMessage::ThreadSnapshot(payload)).is_err() {
            break;
        }
        if views.changed().await.is_err() {
            break;
        }
    }
}

async fn process_client_message(
    text: &str,
    session: &ConversationSession,
    tx: &WsSender,
) -> Result<()> {
    let client_msg: ClientMessage = serde_json::from_str(text)
        .map_err(|e| AppError::BadRequest(format!("Invalid message format: {}", e)))?;

    match client_msg {
        ClientMessage::SendMessage {
            text,
            image_url,
            image_file_name,
            message_type,
        } => {
            let message = session
                .send_message(SendMessageRequest {
                    recipient_id: session.partner_id().to_string(),
                    text,
                    image_url,
                    image_file_name,
                    message_type,
                })
                .await?;
            let _ = tx.send(WsMessage::MessageSent(MessageSentPayload { message }));
        }

        ClientMessage::Ping => {
            let _ = tx.send(WsMessage::Pong);
        }
    }

    Ok(())
}
