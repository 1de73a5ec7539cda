//! User endpoints

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use super::dto::CurrentUserResponse;
use crate::AppState;
use crate::auth::{CurrentUser, MaybeUser, clear_session_cookie, session_cookie_header};
use crate::error::AppError;

pub fn users_router() -> Router<AppState> {
    Router::new()
        .route("/users/current", get(current_user))
        .route("/users/current/sessions/revoke", post(revoke_sessions))
        .route("/logout", post(logout))
}

/// GET /users/current
///
/// Returns `null` for anonymous callers.
async fn current_user(MaybeUser(user): MaybeUser) -> Json<Option<CurrentUserResponse>> {
    Json(user.as_ref().map(CurrentUserResponse::from))
}

/// POST /logout
///
/// Only clears the cookie; tokens already issued stay valid until the
/// user's sessions are revoked.
async fn logout() -> impl IntoResponse {
    (
        session_cookie_header(clear_session_cookie()),
        StatusCode::NO_CONTENT,
    )
}

/// POST /users/current/sessions/revoke
async fn revoke_sessions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    state.accounts().revoke_sessions(&user.id).await?;
    Ok((
        session_cookie_header(clear_session_cookie()),
        StatusCode::NO_CONTENT,
    ))
}
