//! Portcullis - An OAuth2 login gateway
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - /oauth/:provider/{auth,callback}                         │
//! │  - /users/current, /logout                                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Auth + Service Layer                         │
//! │  - OAuth2 client and identity providers                     │
//! │  - Session cipher and resolution                            │
//! │  - Identity merge                                           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - Keyed record store (SQLite via sqlx, or in-memory)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `auth`: Session cipher, sessions, OAuth2 and providers
//! - `service`: Identity merge and session revocation
//! - `data`: Records and the keyed record store
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod service;

use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Keyed record store
    pub store: Arc<dyn data::KeyValueStore>,

    /// Configured identity providers
    pub providers: Arc<auth::ProviderRegistry>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Build the HTTP client used for provider calls
    /// 2. Register configured identity providers
    /// 3. Open the record store
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let store: Arc<dyn data::KeyValueStore> = match config.store.backend {
            config::StoreBackend::Sqlite => {
                let store = data::SqliteStore::connect(&config.store.path).await?;
                tracing::info!(path = %config.store.path.display(), "SQLite store connected");
                Arc::new(store)
            }
            config::StoreBackend::Memory => {
                tracing::warn!("Using in-memory store; users are lost on restart");
                Arc::new(data::MemoryStore::new())
            }
        };

        let state = Self::with_store(config, store)?;
        tracing::info!(
            providers = ?state.providers.kinds(),
            "Application state initialized successfully"
        );
        Ok(state)
    }

    /// Build state around an existing store.
    pub fn with_store(
        config: config::AppConfig,
        store: Arc<dyn data::KeyValueStore>,
    ) -> Result<Self, error::AppError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("Portcullis/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;

        let providers = auth::ProviderRegistry::from_config(&config.providers, &http_client);

        Ok(Self {
            config: Arc::new(config),
            store,
            providers: Arc::new(providers),
        })
    }

    pub fn users(&self) -> data::Repository<data::User> {
        data::Repository::new(self.store.clone())
    }

    pub fn accounts(&self) -> service::AccountService {
        service::AccountService::new(
            self.store.clone(),
            self.config.auth.link_to_current_session,
        )
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::trace::TraceLayer;

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::oauth_router())
        .merge(api::users_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

/// CORS for the configured browser origins.
///
/// Credentials are allowed so the session cookie is sent cross-site; with
/// no origins configured, cross-origin requests are denied.
fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::{HeaderValue, Method, header};
    use tower_http::cors::CorsLayer;

    let origins: Vec<HeaderValue> = server
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::error!(%error, %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn health_check() -> &'static str {
    "OK"
}
