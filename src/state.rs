use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::{
    conversation::{ConversationService, ReadTracker},
    message::{MessageService, SharedMessageStore},
    profile::ProfileLookup,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub message_service: MessageService,
    pub conversation_service: ConversationService,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: SharedMessageStore,
        profiles: Arc<dyn ProfileLookup>,
    ) -> Self {
        let read_tracker = ReadTracker::new(store.clone(), config.read_suppression);
        let message_service = MessageService::new(store.clone());
        let conversation_service = ConversationService::new(
            store,
            profiles,
            read_tracker,
            &config.media_base_url,
        );

        Self {
            config,
            message_service,
            conversation_service,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub message_store: StoreBackend,
    pub database_url: Option<String>,
    pub media_base_url: String,
    pub profile_api_url: String,
    pub profile_timeout: Duration,
    pub read_suppression: Duration,
    pub refresh_debounce: Duration,
    pub cors_allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("{} must be set", key))
        };
        let millis = |key: &str, default: u64| -> anyhow::Result<Duration> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .with_context(|| format!("{} must be a number of milliseconds", key)),
                None => Ok(Duration::from_millis(default)),
            }
        };

        let message_store = match lookup("MESSAGE_STORE").as_deref().map(str::trim) {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => bail!("MESSAGE_STORE must be 'postgres' or 'memory', got '{}'", other),
        };
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if message_store == StoreBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL must be set when MESSAGE_STORE=postgres");
        }

        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse().context("PORT must be a port number")?,
            None => 3000,
        };

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://localhost:8080".to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            jwt_secret: required("JWT_SECRET")?,
            message_store,
            database_url,
            media_base_url: required("MEDIA_BASE_URL")?,
            profile_api_url: required("PROFILE_API_URL")?,
            profile_timeout: millis("PROFILE_TIMEOUT_MS", 5000)?,
            read_suppression: millis("READ_SUPPRESSION_MS", 2000)?,
            refresh_debounce: millis("REFRESH_DEBOUNCE_MS", 300)?,
            cors_allowed_origins,
        })
    }
}
