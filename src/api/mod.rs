//! API layer
//!
//! HTTP handlers for:
//! - OAuth authorization code flow
//! - Current user and session management
//! - Metrics (Prometheus)

mod dto;
pub mod metrics;
mod oauth;
mod users;

pub use dto::*;

pub use metrics::metrics_router;
pub use oauth::oauth_router;
pub use users::users_router;
