//! Authentication
//!
//! Handles:
//! - Session cipher (password-derived AES-256-GCM tokens)
//! - Session claims, cookies and resolution
//! - OAuth2 authorization code client
//! - Identity provider registry
//! - Session extractors

pub mod cipher;
mod middleware;
mod oauth;
mod providers;
pub mod session;

pub use middleware::{CurrentUser, MaybeUser};
pub use oauth::{OAuth2Client, OAuth2ClientOptions};
pub use providers::{ProviderClient, ProviderRegistry};
pub use session::{
    SESSION_COOKIE, SessionClaims, build_session_cookie, clear_session_cookie,
    create_session_token, open_session_token, resolve_session, session_cookie_header,
};
