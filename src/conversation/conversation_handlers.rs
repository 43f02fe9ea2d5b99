use std::future;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::WatchStream;
use utoipa::ToSchema;

use crate::{
    error::Result,
    message::{
        message_dto::{ConversationSummary, UnreadTotalResponse},
        message_models::Message,
    },
    middleware::AuthUser,
    realtime::ConversationListSession,
    state::AppState,
};

/// Payload of each `conversations` event on the list stream.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationListEvent {
    pub conversations: Vec<ConversationSummary>,
    pub total_unread: u32,
}

/// List conversations of the authenticated user, newest first
#[utoipa::path(
    get,
    path = "/api/conversations",
    tag = "conversations",
    responses(
        (status = 200, description = "Conversation summaries", body = Vec<ConversationSummary>),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Message store unavailable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_conversations(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<ConversationSummary>>> {
    let conversations = state
        .conversation_service
        .build_conversation_list(&user_id)
        .await?;

    Ok(Json(conversations))
}

/// Total unread messages across all conversations
#[utoipa::path(
    get,
    path = "/api/conversations/unread",
    tag = "conversations",
    responses(
        (status = 200, description = "Unread total", body = UnreadTotalResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_unread_total(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UnreadTotalResponse>> {
    let total = state.conversation_service.total_unread(&user_id).await?;

    Ok(Json(UnreadTotalResponse { total }))
}

/// Messages exchanged with a partner, oldest first
#[utoipa::path(
    get,
    path = "/api/conversations/{partner_id}/messages",
    tag = "conversations",
    params(
        ("partner_id" = String, Path, description = "Conversation partner ID")
    ),
    responses(
        (status = 200, description = "Conversation thread", body = Vec<Message>),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Message store unavailable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_thread(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(partner_id): Path<String>,
) -> Result<Json<Vec<Message>>> {
    let thread = state
        .message_service
        .load_thread(&user_id, &partner_id)
        .await?;

    Ok(Json(thread))
}

/// Mark a conversation read
///
/// The watermark is written in the background; the partner's unread count
/// reports zero from this point on.
#[utoipa::path(
    post,
    path = "/api/conversations/{partner_id}/read",
    tag = "conversations",
    params(
        ("partner_id" = String, Path, description = "Conversation partner ID")
    ),
    responses(
        (status = 202, description = "Read mark accepted"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn mark_conversation_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(partner_id): Path<String>,
) -> StatusCode {
    state
        .conversation_service
        .read_tracker()
        .spawn_mark_read(&user_id, &partner_id);

    StatusCode::ACCEPTED
}

/// Subscribe to the live conversation list via Server-Sent Events
#[utoipa::path(
    get,
    path = "/api/conversations/stream",
    tag = "conversations",
    responses(
        (status = 200, description = "SSE stream of conversation lists"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn conversation_stream(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let mut session = ConversationListSession::new(
        &user_id,
        state.conversation_service.clone(),
        state.config.refresh_debounce,
    );
    let views = session.watch();
    session.start();

    let stream = WatchStream::new(views)
        .filter(|view| future::ready(view.revision > 0 && view.error.is_none()))
        .map(move |view| {
            // Dropping the stream drops the session and stops its refresh task.
            let _ = &session;
            Event::default()
                .event("conversations")
                .json_data(ConversationListEvent {
                    total_unread: view.total_unread(),
                    conversations: view.conversations,
                })
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
