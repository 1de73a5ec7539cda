//! Data layer module
//!
//! Handles user persistence:
//! - Identity model (users, linked identities, provider payloads)
//! - Keyed record store backends (SQLite, memory)
//! - Typed repositories over the store

mod models;
mod repository;
mod store;

pub use models::*;
pub use repository::{Repository, Snapshot};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};

#[cfg(test)]
pub use store::MockKeyValueStore;
