//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf};

use crate::auth::cipher::{DEFAULT_ITERATIONS, MAX_ITERATIONS};
use crate::data::IdentityProvider;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "auth.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
    /// Browser origins allowed to call the API with credentials
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

impl ServerConfig {
    /// Get the base URL for the gateway
    ///
    /// # Returns
    /// Full URL like "https://auth.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }

    /// Redirect URI registered with a provider.
    pub fn redirect_uri(&self, provider: IdentityProvider) -> String {
        format!("{}/oauth/{}/callback", self.base_url(), provider)
    }
}

/// Session and OAuth flow configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Server-held password the session cipher derives its keys from (32+ bytes)
    pub session_password: String,
    /// PBKDF2 rounds used for newly issued tokens (1..=99999)
    #[serde(default = "default_session_iterations")]
    pub session_iterations: u32,
    /// Link a newly verified provider account to the user of the current session
    #[serde(default)]
    pub link_to_current_session: bool,
    /// Lifetime of the OAuth state cookie in seconds
    #[serde(default = "default_state_cookie_max_age")]
    pub state_cookie_max_age: i64,
}

fn default_session_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

fn default_state_cookie_max_age() -> i64 {
    600
}

/// Identity provider credentials
///
/// A provider without a section is not registered.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProvidersConfig {
    pub discord: Option<ProviderConfig>,
    pub github: Option<ProviderConfig>,
}

impl ProvidersConfig {
    /// Configured providers with their settings.
    pub fn configured(&self) -> Vec<(IdentityProvider, &ProviderConfig)> {
        [
            (IdentityProvider::Discord, self.discord.as_ref()),
            (IdentityProvider::GitHub, self.github.as_ref()),
        ]
        .into_iter()
        .filter_map(|(provider, config)| config.map(|config| (provider, config)))
        .collect()
    }
}

/// OAuth2 client configuration for one provider
///
/// Endpoints and scopes fall back to the provider's public defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Option<Vec<String>>,
    pub authorize_url: Option<String>,
    pub token_url: Option<String>,
    pub profile_url: Option<String>,
}

/// Keyed record store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Store backend
    #[serde(default)]
    pub backend: StoreBackend,
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Store backend selector
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub fn filter_directives(&self) -> String {
        format!(
            "portcullis={},tower_http=debug",
            self.level.trim().to_ascii_lowercase()
        )
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (PORTCULLIS_*)
    ///
    /// The result is not validated yet; call [`Self::validate`] once
    /// logging is up so its warnings are recorded.
    ///
    /// # Errors
    /// Returns error if a source cannot be read or deserialized
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("auth.session_iterations", i64::from(DEFAULT_ITERATIONS))?
            .set_default("auth.link_to_current_session", false)?
            .set_default("auth.state_cookie_max_age", 600)?
            .set_default("store.backend", "sqlite")?
            .set_default("store.path", "data/portcullis.db")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (PORTCULLIS_*)
            .add_source(
                Environment::with_prefix("PORTCULLIS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))
    }

    /// Whether short-lived flow cookies carry the `Secure` attribute.
    ///
    /// The session cookie is always `Secure`.
    pub fn should_use_secure_cookies(&self) -> bool {
        self.server.protocol.eq_ignore_ascii_case("https")
            || !is_local_server_domain(&self.server.domain)
    }

    /// Check cross-field constraints of a loaded configuration.
    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_SESSION_PASSWORD_BYTES: usize = 32;

        if self.logging.level.trim().parse::<tracing::Level>().is_err() {
            return Err(crate::error::AppError::Config(format!(
                "logging.level must be one of trace, debug, info, warn, error (got {:?})",
                self.logging.level
            )));
        }

        if self.auth.session_password.len() < MIN_SESSION_PASSWORD_BYTES {
            return Err(crate::error::AppError::Config(format!(
                "auth.session_password must be at least {} bytes",
                MIN_SESSION_PASSWORD_BYTES
            )));
        }

        if self.auth.session_iterations == 0 || self.auth.session_iterations > MAX_ITERATIONS {
            return Err(crate::error::AppError::Config(format!(
                "auth.session_iterations must be between 1 and {}",
                MAX_ITERATIONS
            )));
        }

        if self.auth.state_cookie_max_age <= 0 {
            return Err(crate::error::AppError::Config(
                "auth.state_cookie_max_age must be greater than 0".to_string(),
            ));
        }

        for (provider, provider_config) in self.providers.configured() {
            if provider_config.client_id.trim().is_empty()
                || provider_config.client_secret.trim().is_empty()
            {
                return Err(crate::error::AppError::Config(format!(
                    "providers.{provider}.client_id and client_secret must not be empty"
                )));
            }
        }

        if self.providers.configured().is_empty() {
            tracing::warn!("No identity providers configured; every OAuth route will answer 404");
        }

        if !self.should_use_secure_cookies() {
            let host = normalized_server_host(&self.server.domain);
            tracing::warn!(
                host = %host,
                protocol = %self.server.protocol,
                "Using insecure OAuth state cookies for local development"
            );
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(crate::error::AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
