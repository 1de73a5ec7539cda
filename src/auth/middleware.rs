//! Session extractors
//!
//! Resolve the `session` cookie into a [`User`] for handlers.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use super::session::resolve_session;
use crate::AppState;
use crate::data::User;
use crate::error::AppError;

/// Optional current user extractor
///
/// Holds `None` for anonymous requests and for sessions that fail
/// validation. Rejects only when the record store is unavailable.
///
/// # Usage
/// ```ignore
/// async fn handler(MaybeUser(user): MaybeUser) -> impl IntoResponse {
///     Json(user.map(|user| user.id))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<User>().cloned() {
            return Ok(MaybeUser(Some(user)));
        }

        let app_state = AppState::from_ref(state);
        let user = resolve_session(
            &parts.headers,
            &app_state.config.auth.session_password,
            &app_state.users(),
        )
        .await?;

        if let Some(user) = &user {
            parts.extensions.insert(user.clone());
        }

        Ok(MaybeUser(user))
    }
}

/// Extractor for current authenticated user
///
/// Rejects with `Unauthorized` when no valid session is present.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let MaybeUser(user) = MaybeUser::from_request_parts(parts, state).await?;
        user.map(CurrentUser).ok_or(AppError::Unauthorized)
    }
}
