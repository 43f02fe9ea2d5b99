use crate::{
    conversation::conversation_handlers::{self, ConversationListEvent},
    message::{
        message_dto::{
            ConversationSummary, LastMessage, PartnerProfile, SendMessageRequest,
            UnreadTotalResponse,
        },
        message_handlers,
        message_models::{Message, MessageType},
    },
    middleware::auth_middleware,
    state::AppState,
    websocket::types::{
        ErrorPayload, MessageSentPayload, ThreadSnapshotPayload, WsMessage,
    },
};
use axum::http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::conversation::conversation_handlers::get_conversations,
        crate::conversation::conversation_handlers::get_unread_total,
        crate::conversation::conversation_handlers::get_thread,
        crate::conversation::conversation_handlers::mark_conversation_read,
        crate::conversation::conversation_handlers::conversation_stream,
        crate::message::message_handlers::send_message,
        crate::message::message_handlers::delete_message,
    ),
    components(
        schemas(
            SendMessageRequest,
            Message,
            MessageType,
            ConversationSummary,
            PartnerProfile,
            LastMessage,
            UnreadTotalResponse,
            ConversationListEvent,
            WsMessage,
            ThreadSnapshotPayload,
            MessageSentPayload,
            ErrorPayload,
        )
    ),
    tags(
        (name = "conversations", description = "Conversation list and thread endpoints"),
        (name = "messages", description = "Sending and deleting messages")
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::Http::new(
                        utoipa::openapi::security::HttpAuthScheme::Bearer,
                    ),
                ),
            )
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    let conversation_routes = Router::new()
        .route("/", get(conversation_handlers::get_conversations))
        .route("/unread", get(conversation_handlers::get_unread_total))
        .route("/stream", get(conversation_handlers::conversation_stream))
        .route("/:partner_id/messages", get(conversation_handlers::get_thread))
        .route(
            "/:partner_id/read",
            post(conversation_handlers::mark_conversation_read),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let message_routes = Router::new()
        .route("/", post(message_handlers::send_message))
        .route("/:id", delete(message_handlers::delete_message))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // WebSocket route
    let ws_routes = Router::new()
        .route("/ws", get(crate::websocket::ws_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api_routes = Router::new()
        .nest("/conversations", conversation_routes)
        .nest("/messages", message_routes)
        .merge(ws_routes);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::auth::jwt::create_jwt;
    use crate::conversation::conversation_service::tests::{message, seed, StubProfiles};
    use crate::message::memory_store::InMemoryMessageStore;
    use crate::state::tests::test_config;

    fn app(store: Arc<InMemoryMessageStore>) -> Router {
        let state = AppState::new(
            Arc::new(test_config()),
            store,
            Arc::new(StubProfiles { failing: vec![] }),
        );
        create_router(state)
    }

    fn bearer(user_id: &str) -> String {
        let token = create_jwt(user_id, &test_config().jwt_secret, 1).unwrap();
        format!("Bearer {}", token)
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requests_without_token_are_rejected() {
        let response = app(Arc::new(InMemoryMessageStore::new()))
            .oneshot(
                Request::builder()
                    .uri("/api/conversations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_list_conversations() {
        let store = Arc::new(InMemoryMessageStore::new());
        seed(&store, &message("bob", "alice", "hey", 100)).await;

        let response = app(store)
            .oneshot(
                Request::builder()
                    .uri("/api/conversations")
                    .header("Authorization", bearer("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body[0]["id"], "bob");
        assert_eq!(body[0]["unreadCount"], 1);
        assert_eq!(body[0]["partner"]["name"], "bob Name");
        assert_eq!(
            body[0]["partner"]["avatar"],
            "https://media.example.com/avatars/bob.png"
        );
    }

    #[tokio::test]
    async fn test_send_then_read_thread() {
        let store = Arc::new(InMemoryMessageStore::new());
        let router = app(store);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/messages")
                    .header("Authorization", bearer("alice"))
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"recipientId":"bob","text":"hello"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/conversations/alice/messages")
                    .header("Authorization", bearer("bob"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(body[0]["text"], "hello");
        assert_eq!(body[0]["messageType"], "text");
    }

    #[tokio::test]
    async fn test_invalid_send_is_bad_request() {
        let response = app(Arc::new(InMemoryMessageStore::new()))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/messages")
                    .header("Authorization", bearer("alice"))
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"recipientId":"bob","messageType":"image"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_mark_read_then_unread_total() {
        let store = Arc::new(InMemoryMessageStore::new());
        seed(&store, &message("bob", "alice", "one", 100)).await;
        seed(&store, &message("carol", "alice", "two", 200)).await;
        let router = app(store);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/conversations/bob/read")
                    .header("Authorization", bearer("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/conversations/unread")
                    .header("Authorization", bearer("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["total"], 1);
    }

    #[tokio::test]
    async fn test_delete_message_of_someone_else_is_forbidden() {
        let store = Arc::new(InMemoryMessageStore::new());
        let theirs = message("bob", "alice", "not yours", 100);
        seed(&store, &theirs).await;

        let response = app(store)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/messages/{}", theirs.id))
                    .header("Authorization", bearer("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
