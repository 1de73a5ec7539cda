//! Session management
//!
//! The session cookie carries `{sessionKey, userId}` sealed with the
//! session cipher. No server-side session storage needed: a token is valid
//! while it decrypts and its `sessionKey` equals the user's current secret.

use axum::http::{HeaderMap, HeaderName, header::SET_COOKIE};
use axum::response::AppendHeaders;
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};

use super::cipher;
use crate::data::{Repository, User};
use crate::error::AppError;
use crate::metrics::SESSION_RESOLUTIONS_TOTAL;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session";

/// Claims sealed inside a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub session_key: String,
    pub user_id: String,
}

impl SessionClaims {
    pub fn for_user(user: &User) -> Self {
        Self {
            session_key: user.session_secret.clone(),
            user_id: user.id.clone(),
        }
    }
}

/// Create a session token for `user`
///
/// # Arguments
/// * `user` - User the session authenticates
/// * `password` - Server session password
/// * `iterations` - PBKDF2 rounds
pub fn create_session_token(
    user: &User,
    password: &str,
    iterations: u32,
) -> Result<String, AppError> {
    let payload = serde_json::to_string(&SessionClaims::for_user(user))
        .map_err(|e| AppError::Internal(e.into()))?;
    cipher::encrypt(&payload, password, iterations)
}

/// Decrypt and decode a session token.
///
/// # Errors
/// Returns `Authentication` if the token fails its integrity check or does
/// not contain session claims
pub fn open_session_token(token: &str, password: &str) -> Result<SessionClaims, AppError> {
    let payload = cipher::decrypt(token, password)?;
    serde_json::from_str(&payload).map_err(|_| AppError::Authentication)
}

/// Resolve the user authenticated by the request's `session` cookie.
///
/// Returns `Ok(None)` when there is no cookie, the token is rejected, the
/// user no longer exists, or the user's secret has been rotated. These
/// cases are deliberately indistinguishable. Only store failures are
/// returned as errors.
pub async fn resolve_session(
    headers: &HeaderMap,
    password: &str,
    users: &Repository<User>,
) -> Result<Option<User>, AppError> {
    let jar = CookieJar::from_headers(headers);
    let Some(token) = jar.get(SESSION_COOKIE).map(|cookie| cookie.value().to_owned()) else {
        record_resolution("absent");
        return Ok(None);
    };

    let claims = match open_session_token(&token, password) {
        Ok(claims) => claims,
        Err(AppError::Authentication) => {
            record_resolution("rejected");
            return Ok(None);
        }
        Err(error) => return Err(error),
    };

    let Some(user) = users.get(&claims.user_id).await? else {
        record_resolution("unknown_user");
        return Ok(None);
    };

    if user.session_secret != claims.session_key {
        record_resolution("revoked");
        return Ok(None);
    }

    record_resolution("authenticated");
    Ok(Some(user))
}

fn record_resolution(outcome: &str) {
    SESSION_RESOLUTIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Session cookie: `Secure; SameSite=None; Path=/`
///
/// Always `Secure`, since `SameSite=None` cookies are rejected otherwise.
pub fn build_session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::None)
        .build()
}

/// `Set-Cookie` header carrying `cookie` verbatim.
///
/// `CookieJar` percent-encodes values on the way out; the session token must
/// reach the client as plain base64.
pub fn session_cookie_header(cookie: Cookie<'static>) -> AppendHeaders<[(HeaderName, String); 1]> {
    AppendHeaders([(SET_COOKIE, cookie.to_string())])
}

/// Removal cookie for the session.
pub fn clear_session_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::None)
        .build();
    cookie.make_removal();
    cookie
}
