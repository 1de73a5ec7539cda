//! OAuth endpoints
//!
//! `GET /oauth/:provider/auth` starts the authorization code flow and
//! `GET /oauth/:provider/callback` completes it with a session cookie.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::Engine as _;
use rand::RngCore;
use serde::Deserialize;

use super::dto::CurrentUserResponse;
use crate::AppState;
use crate::auth::{
    build_session_cookie, create_session_token, resolve_session, session_cookie_header,
};
use crate::data::IdentityProvider;
use crate::error::AppError;
use crate::metrics::{OAUTH_CALLBACKS_TOTAL, SESSIONS_ISSUED_TOTAL};

const OAUTH_STATE_COOKIE: &str = "oauth_state";

/// Create OAuth router
///
/// These routes do NOT require authentication (they provide authentication).
pub fn oauth_router() -> Router<AppState> {
    Router::new()
        .route("/oauth/:provider/auth", get(start_authorization))
        .route("/oauth/:provider/callback", get(complete_authorization))
}

/// Query parameters a provider appends to the redirect URI
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// GET /oauth/:provider/auth
///
/// Redirects to the provider's authorization page with a fresh `state`,
/// which is also stored in a short-lived cookie scoped to this provider.
async fn start_authorization(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let provider: IdentityProvider = provider.parse()?;
    let client = state.providers.get(provider)?;

    let csrf_state = generate_state();
    let redirect = client.oauth().build_authorization_redirect(
        &state.config.server.redirect_uri(provider),
        &csrf_state,
    )?;

    let jar = jar.add(build_state_cookie(provider, csrf_state, &state));

    tracing::debug!(%provider, "Redirecting to identity provider");
    Ok((jar, redirect).into_response())
}

/// GET /oauth/:provider/callback
///
/// # Steps
/// 1. Reject provider errors and missing `code`/`state` (400)
/// 2. Compare `state` with the state cookie (401)
/// 3. Exchange the code and fetch the profile
/// 4. Merge the identity into its user and persist it
/// 5. Issue the session cookie
async fn complete_authorization(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, AppError> {
    let provider: IdentityProvider = provider.parse()?;

    let result = handle_callback(&state, provider, &headers, jar, query).await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(error) => error.error_type(),
    };
    OAUTH_CALLBACKS_TOTAL
        .with_label_values(&[provider.as_str(), outcome])
        .inc();

    result
}

async fn handle_callback(
    state: &AppState,
    provider: IdentityProvider,
    headers: &HeaderMap,
    jar: CookieJar,
    query: CallbackQuery,
) -> Result<Response, AppError> {
    let client = state.providers.get(provider)?;

    if let Some(error) = query.error {
        let detail = query.error_description.unwrap_or_default();
        tracing::info!(%provider, %error, %detail, "Provider denied authorization");
        return Err(AppError::Validation(format!(
            "{provider} authorization failed: {error}"
        )));
    }

    let (Some(code), Some(csrf_state)) = (query.code, query.state) else {
        return Err(AppError::Validation(
            "Missing code or state parameter".to_string(),
        ));
    };
    if code.is_empty() || csrf_state.is_empty() {
        return Err(AppError::Validation(
            "Missing code or state parameter".to_string(),
        ));
    }

    verify_csrf_state(&csrf_state, &jar)?;

    let payload = client
        .verify(&code, &state.config.server.redirect_uri(provider))
        .await?;

    let session_user = if state.config.auth.link_to_current_session {
        resolve_session(headers, &state.config.auth.session_password, &state.users()).await?
    } else {
        None
    };

    let outcome = state
        .accounts()
        .link_identity(payload, session_user.as_ref())
        .await?;

    let token = create_session_token(
        &outcome.user,
        &state.config.auth.session_password,
        state.config.auth.session_iterations,
    )?;
    SESSIONS_ISSUED_TOTAL
        .with_label_values(&[provider.as_str()])
        .inc();

    let jar = jar.add(clear_state_cookie(provider));

    Ok((
        jar,
        session_cookie_header(build_session_cookie(token)),
        Json(CurrentUserResponse::from(&outcome.user)),
    )
        .into_response())
}

fn verify_csrf_state(csrf_state: &str, jar: &CookieJar) -> Result<(), AppError> {
    match jar.get(OAUTH_STATE_COOKIE) {
        Some(cookie) if cookie.value() == csrf_state => Ok(()),
        _ => {
            tracing::warn!("OAuth state does not match state cookie");
            Err(AppError::Unauthorized)
        }
    }
}

fn generate_state() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn state_cookie_path(provider: IdentityProvider) -> String {
    format!("/oauth/{provider}")
}

fn build_state_cookie(
    provider: IdentityProvider,
    csrf_state: String,
    state: &AppState,
) -> Cookie<'static> {
    Cookie::build((OAUTH_STATE_COOKIE, csrf_state))
        .path(state_cookie_path(provider))
        .http_only(true)
        .secure(state.config.should_use_secure_cookies())
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(
            state.config.auth.state_cookie_max_age,
        ))
        .build()
}

fn clear_state_cookie(provider: IdentityProvider) -> Cookie<'static> {
    let mut cookie = Cookie::build((OAUTH_STATE_COOKIE, ""))
        .path(state_cookie_path(provider))
        .http_only(true)
        .build();
    cookie.make_removal();
    cookie
}
