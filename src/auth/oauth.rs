//! OAuth2 authorization code client
//!
//! Provider-agnostic: builds the authorization redirect and exchanges a
//! returned code for an access token.

use axum::response::Redirect;
use serde::Deserialize;
use std::time::Instant;
use url::Url;

use crate::error::AppError;

/// Static settings for one OAuth2 client registration
#[derive(Debug, Clone)]
pub struct OAuth2ClientOptions {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub authorize_url: String,
    pub token_url: String,
}

/// Token endpoint response
///
/// Providers report failures either with a non-2xx status or with an
/// `error` field on a 200 response (GitHub does the latter).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth2 client for one provider
#[derive(Debug, Clone)]
pub struct OAuth2Client {
    name: &'static str,
    options: OAuth2ClientOptions,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a client
    ///
    /// # Arguments
    /// * `name` - Provider name used in errors and metrics
    /// * `options` - Registration settings
    /// * `http_client` - Shared HTTP client
    pub fn new(name: &'static str, options: OAuth2ClientOptions, http_client: reqwest::Client) -> Self {
        Self {
            name,
            options,
            http_client,
        }
    }

    pub fn options(&self) -> &OAuth2ClientOptions {
        &self.options
    }

    /// Authorization endpoint URL with the code-flow query parameters.
    ///
    /// # Errors
    /// Returns `Config` if the configured authorization endpoint is not a URL
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.options.authorize_url).map_err(|e| {
            AppError::Config(format!(
                "{} authorization endpoint is not a valid URL: {e}",
                self.name
            ))
        })?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.options.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.options.scopes.join(" "))
            .append_pair("state", state);

        Ok(url)
    }

    /// 307 redirect to the provider's authorization page.
    pub fn build_authorization_redirect(
        &self,
        redirect_uri: &str,
        state: &str,
    ) -> Result<Redirect, AppError> {
        let url = self.authorization_url(redirect_uri, state)?;
        Ok(Redirect::temporary(url.as_str()))
    }

    /// Exchange an authorization code for an access token.
    ///
    /// # Errors
    /// Returns `Provider` if the request fails, the endpoint answers with a
    /// non-2xx status, or the response carries no `access_token`
    pub async fn exchange_code_for_token(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<String, AppError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.options.client_id.as_str()),
            ("client_secret", self.options.client_secret.as_str()),
        ];
        if let Some(redirect_uri) = redirect_uri {
            form.push(("redirect_uri", redirect_uri));
        }

        let started = Instant::now();
        let response = self
            .http_client
            .post(&self.options.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await;
        crate::metrics::observe_provider_call(self.name, "token", started.elapsed());

        let response = response.map_err(|e| {
            AppError::Provider(format!("{} token request failed: {e}", self.name))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "{} token endpoint returned {}: {}",
                self.name,
                status,
                truncate(&body, 200)
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            AppError::Provider(format!("{} token response is not valid JSON: {e}", self.name))
        })?;

        match token.access_token.filter(|token| !token.is_empty()) {
            Some(access_token) => Ok(access_token),
            None => Err(AppError::Provider(format!(
                "{} token response has no access_token ({})",
                self.name,
                token
                    .error_description
                    .or(token.error)
                    .unwrap_or_else(|| "no error reported".to_string())
            ))),
        }
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
