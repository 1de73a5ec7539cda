//! Service layer
//!
//! Contains business logic separated from HTTP handlers.

mod account;

pub use account::{AccountService, LinkOutcome};
