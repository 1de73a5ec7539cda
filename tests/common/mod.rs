//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use portcullis::{
    AppState, config,
    data::SqliteStore,
};
use serde::Deserialize;
use serde_json::json;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const SESSION_PASSWORD: &str = "e2e-session-password-at-least-32-bytes";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub provider: FakeProvider,
    pub _temp_dir: TempDir,
    /// Client that does not follow redirects
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_linking(false).await
    }

    /// Create a test server with `auth.link_to_current_session` set
    pub async fn with_linking(link_to_current_session: bool) -> Self {
        let provider = FakeProvider::spawn().await;

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let provider_config = |name: &str, profile_path: &str| config::ProviderConfig {
            client_id: format!("{name}-client-id"),
            client_secret: format!("{name}-client-secret"),
            scopes: None,
            authorize_url: Some(format!("{}/{name}/authorize", provider.addr)),
            token_url: Some(format!("{}/{name}/token", provider.addr)),
            profile_url: Some(format!("{}{profile_path}", provider.addr)),
        };

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: "gateway.test.example.com".to_string(),
                protocol: "https".to_string(),
                cors_allowed_origins: vec!["https://app.test.example.com".to_string()],
            },
            auth: config::AuthConfig {
                session_password: SESSION_PASSWORD.to_string(),
                session_iterations: 1_000,
                link_to_current_session,
                state_cookie_max_age: 600,
            },
            providers: config::ProvidersConfig {
                discord: Some(provider_config("discord", "/discord/users/@me")),
                github: Some(provider_config("github", "/github/user")),
            },
            store: config::StoreConfig {
                backend: config::StoreBackend::Sqlite,
                path: db_path.clone(),
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: config::LogFormat::Pretty,
            },
        };

        let store = SqliteStore::connect(&db_path).await.unwrap();
        let state = AppState::with_store(config, Arc::new(store)).unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = portcullis::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            provider,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Start the flow and return the issued `state`.
    pub async fn start_login(&self, provider: &str) -> String {
        let response = self
            .client
            .get(self.url(&format!("/oauth/{provider}/auth")))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 307);
        cookie_value(&response, "oauth_state").expect("state cookie is set")
    }

    /// Run the full flow; `code` drives the fake provider's behaviour.
    pub async fn login(&self, provider: &str, code: &str) -> reqwest::Response {
        self.login_with_session(provider, code, None).await
    }

    /// Run the full flow while presenting an existing session cookie.
    pub async fn login_with_session(
        &self,
        provider: &str,
        code: &str,
        session: Option<&str>,
    ) -> reqwest::Response {
        let state = self.start_login(provider).await;

        let mut cookie = format!("oauth_state={state}");
        if let Some(session) = session {
            cookie.push_str(&format!("; session={session}"));
        }

        self.client
            .get(self.url(&format!("/oauth/{provider}/callback")))
            .query(&[("code", code), ("state", state.as_str())])
            .header(header::COOKIE, cookie)
            .send()
            .await
            .unwrap()
    }

    /// Log in and return the session token.
    pub async fn session_for(&self, provider: &str, code: &str) -> String {
        let response = self.login(provider, code).await;
        assert_eq!(response.status(), 200);
        cookie_value(&response, "session").expect("session cookie is set")
    }

    /// GET /users/current with an optional session token.
    pub async fn current_user(&self, session: Option<&str>) -> serde_json::Value {
        let mut request = self.client.get(self.url("/users/current"));
        if let Some(session) = session {
            request = request.header(header::COOKIE, format!("session={session}"));
        }
        let response = request.send().await.unwrap();
        assert_eq!(response.status(), 200);
        response.json().await.unwrap()
    }

    /// Raw stored record, if any.
    pub async fn stored(&self, key: &str) -> Option<serde_json::Value> {
        self.state
            .store
            .get(key)
            .await
            .unwrap()
            .map(|bytes| serde_json::from_slice(&bytes).unwrap())
    }
}

/// All `Set-Cookie` header values of a response.
pub fn set_cookies(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().to_string())
        .collect()
}

/// The `Set-Cookie` header for `name`, if present.
pub fn set_cookie(response: &reqwest::Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    set_cookies(response)
        .into_iter()
        .find(|cookie| cookie.starts_with(&prefix))
}

/// Value of the cookie `name` set by a response.
pub fn cookie_value(response: &reqwest::Response, name: &str) -> Option<String> {
    let cookie = set_cookie(response, name)?;
    let pair = cookie.split(';').next()?;
    pair.split_once('=').map(|(_, value)| value.to_string())
}

// =============================================================================
// Fake identity provider
// =============================================================================

/// In-process provider serving token and profile endpoints for both
/// Discord and GitHub shapes.
///
/// Token endpoint: code `fail` answers 400, code `notoken` answers `{}`,
/// any other code yields access token `token-<code>`. The profile endpoint
/// reports the account ID encoded in the token.
pub struct FakeProvider {
    pub addr: String,
    pub token_requests: Arc<AtomicUsize>,
}

impl FakeProvider {
    async fn spawn() -> Self {
        let token_requests = Arc::new(AtomicUsize::new(0));

        let app = Router::new()
            .route("/discord/token", post(token))
            .route("/github/token", post(token))
            .route("/discord/users/@me", get(discord_profile))
            .route("/github/user", get(github_profile))
            .with_state(token_requests.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            token_requests,
        }
    }

    pub fn token_request_count(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }
}

#[derive(Deserialize)]
struct TokenForm {
    grant_type: String,
    code: String,
    client_id: String,
    client_secret: String,
}

async fn token(State(counter): State<Arc<AtomicUsize>>, Form(form): Form<TokenForm>) -> Response {
    counter.fetch_add(1, Ordering::SeqCst);

    if form.grant_type != "authorization_code"
        || form.client_id.is_empty()
        || form.client_secret.is_empty()
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_request"})),
        )
            .into_response();
    }

    match form.code.as_str() {
        "fail" => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant", "error_description": "Invalid code"})),
        )
            .into_response(),
        "notoken" => Json(json!({})).into_response(),
        code => Json(json!({
            "access_token": format!("token-{code}"),
            "token_type": "Bearer",
        }))
        .into_response(),
    }
}

fn bearer_account_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer token-")
        .map(str::to_string)
}

async fn discord_profile(headers: HeaderMap) -> Response {
    match bearer_account_id(&headers) {
        Some(id) if id == "badprofile" => Json(json!({"username": "no-id"})).into_response(),
        Some(id) => Json(json!({
            "id": id,
            "username": format!("discord-{id}"),
            "discriminator": "0",
            "global_name": null,
            "avatar": null,
        }))
        .into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn github_profile(headers: HeaderMap) -> Response {
    match bearer_account_id(&headers).and_then(|id| id.parse::<u64>().ok()) {
        Some(id) => Json(json!({
            "id": id,
            "login": format!("octo-{id}"),
            "name": "Octo Cat",
            "avatar_url": null,
        }))
        .into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}
