//! Identity provider registry
//!
//! Pairs each configured provider's OAuth2 client with its profile
//! endpoint, and turns an authorization code into a verified identity.

use std::collections::HashMap;
use std::time::Instant;

use super::oauth::{OAuth2Client, OAuth2ClientOptions};
use crate::config::{ProviderConfig, ProvidersConfig};
use crate::data::{IdentityPayload, IdentityProvider};
use crate::error::AppError;

/// Public endpoints and default scopes of a provider
struct ProviderDefaults {
    authorize_url: &'static str,
    token_url: &'static str,
    profile_url: &'static str,
    scopes: &'static [&'static str],
}

fn defaults(provider: IdentityProvider) -> ProviderDefaults {
    match provider {
        IdentityProvider::Discord => ProviderDefaults {
            authorize_url: "https://discord.com/api/oauth2/authorize",
            token_url: "https://discord.com/api/oauth2/token",
            profile_url: "https://discord.com/api/users/@me",
            scopes: &["identify"],
        },
        IdentityProvider::GitHub => ProviderDefaults {
            authorize_url: "https://github.com/login/oauth/authorize",
            token_url: "https://github.com/login/oauth/access_token",
            profile_url: "https://api.github.com/user",
            scopes: &["read:user"],
        },
    }
}

/// OAuth2 client plus profile endpoint for one provider
#[derive(Debug, Clone)]
pub struct ProviderClient {
    kind: IdentityProvider,
    oauth: OAuth2Client,
    profile_url: String,
    http_client: reqwest::Client,
}

impl ProviderClient {
    pub fn new(
        kind: IdentityProvider,
        config: &ProviderConfig,
        http_client: reqwest::Client,
    ) -> Self {
        let defaults = defaults(kind);
        let options = OAuth2ClientOptions {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes: config.scopes.clone().unwrap_or_else(|| {
                defaults.scopes.iter().map(|scope| scope.to_string()).collect()
            }),
            authorize_url: config
                .authorize_url
                .clone()
                .unwrap_or_else(|| defaults.authorize_url.to_string()),
            token_url: config
                .token_url
                .clone()
                .unwrap_or_else(|| defaults.token_url.to_string()),
        };

        Self {
            kind,
            oauth: OAuth2Client::new(kind.as_str(), options, http_client.clone()),
            profile_url: config
                .profile_url
                .clone()
                .unwrap_or_else(|| defaults.profile_url.to_string()),
            http_client,
        }
    }

    pub fn kind(&self) -> IdentityProvider {
        self.kind
    }

    pub fn oauth(&self) -> &OAuth2Client {
        &self.oauth
    }

    /// Fetch the authenticated principal's profile.
    ///
    /// # Errors
    /// Returns `Provider` on transport failure, non-2xx status, or a body
    /// that does not decode as this provider's profile
    pub async fn fetch_profile(&self, access_token: &str) -> Result<IdentityPayload, AppError> {
        let started = Instant::now();
        let response = self
            .http_client
            .get(&self.profile_url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await;
        crate::metrics::observe_provider_call(self.kind.as_str(), "profile", started.elapsed());

        let response = response.map_err(|e| {
            AppError::Provider(format!("{} profile request failed: {e}", self.kind))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Provider(format!(
                "{} profile endpoint returned {}",
                self.kind, status
            )));
        }

        let raw: serde_json::Value = response.json().await.map_err(|e| {
            AppError::Provider(format!("{} profile is not valid JSON: {e}", self.kind))
        })?;

        self.kind.decode_profile(raw)
    }

    /// Exchange `code` and fetch the resulting profile.
    pub async fn verify(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<IdentityPayload, AppError> {
        let access_token = self
            .oauth
            .exchange_code_for_token(code, Some(redirect_uri))
            .await?;
        self.fetch_profile(&access_token).await
    }
}

/// Configured providers keyed by kind
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<IdentityProvider, ProviderClient>,
}

impl ProviderRegistry {
    /// Register every provider that has credentials configured.
    pub fn from_config(config: &ProvidersConfig, http_client: &reqwest::Client) -> Self {
        let clients = config
            .configured()
            .into_iter()
            .map(|(kind, provider_config)| {
                (
                    kind,
                    ProviderClient::new(kind, provider_config, http_client.clone()),
                )
            })
            .collect();

        Self { clients }
    }

    /// Look up a provider by kind.
    ///
    /// # Errors
    /// Returns `NotFound` if the provider is not configured
    pub fn get(&self, kind: IdentityProvider) -> Result<&ProviderClient, AppError> {
        self.clients.get(&kind).ok_or(AppError::NotFound)
    }

    pub fn kinds(&self) -> Vec<IdentityProvider> {
        IdentityProvider::ALL
            .into_iter()
            .filter(|kind| self.clients.contains_key(kind))
            .collect()
    }
}
