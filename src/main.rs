mod auth;
mod conversation;
mod db;
mod error;
mod message;
mod middleware;
mod profile;
mod realtime;
mod routes;
mod state;
mod websocket;

use std::sync::Arc;

use anyhow::Context;
use db::{create_pool, run_migrations};
use message::{InMemoryMessageStore, MessageRepository, SharedMessageStore};
use profile::ProfileClient;
use routes::create_router;
use state::{AppState, Config, StoreBackend};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chat_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env().context("Invalid configuration")?);

    let store: SharedMessageStore = match config.message_store {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is not set")?;

            // Sanitize URL for logging (hide password)
            let url_for_logging = database_url
                .split('@')
                .next()
                .map(|part| format!("{}@<hidden>", part))
                .unwrap_or_else(|| "<invalid format>".to_string());

            tracing::info!("Connecting to database at {}...", url_for_logging);
            let pool = create_pool(database_url)
                .await
                .with_context(|| format!("Failed to connect to database at {}", url_for_logging))?;

            tracing::info!("Running migrations...");
            run_migrations(&pool).await?;

            let repository = MessageRepository::new(pool);
            let listener = repository.clone();
            tokio::spawn(async move {
                if let Err(e) = listener.listen_for_changes().await {
                    tracing::error!("Change listener stopped: {:?}", e);
                }
            });
            Arc::new(repository)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory message store; messages are lost on restart");
            Arc::new(InMemoryMessageStore::new())
        }
    };

    let profiles = ProfileClient::new(&config.profile_api_url, config.profile_timeout)
        .context("Failed to build profile client")?;

    // Create application state
    let state = AppState::new(config.clone(), store, Arc::new(profiles));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
