//! Keyed record store
//!
//! A flat `key -> bytes` store. Keys are namespaced by the caller
//! (`"<prefix>:<id>"`); the store itself knows nothing about record types.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::metrics::STORE_OPERATIONS_TOTAL;

/// Keyed record store backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError>;

    /// Unconditionally write `value` under `key`.
    ///
    /// # Returns
    /// `true` if the store accepted the write
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<bool, AppError>;

    /// Write `value` only if the current value equals `expected`
    /// (`None` meaning "key absent").
    ///
    /// Backends without a conditional primitive fall back to `put`, i.e.
    /// last write wins.
    ///
    /// # Returns
    /// `true` if the write happened, `false` if the current value differed
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        value: Vec<u8>,
    ) -> Result<bool, AppError> {
        let _ = expected;
        self.put(key, value).await
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// SQLite-backed store
///
/// One row per key in `kv_records`.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Record store connected and migrated successfully");

        Ok(Self { pool })
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        STORE_OPERATIONS_TOTAL
            .with_label_values(&["get", "sqlite"])
            .inc();

        let value = sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM kv_records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<bool, AppError> {
        STORE_OPERATIONS_TOTAL
            .with_label_values(&["put", "sqlite"])
            .inc();

        let result = sqlx::query(
            r#"
            INSERT INTO kv_records (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        value: Vec<u8>,
    ) -> Result<bool, AppError> {
        STORE_OPERATIONS_TOTAL
            .with_label_values(&["compare_and_swap", "sqlite"])
            .inc();

        let result = match expected {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO kv_records (key, value, updated_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(key) DO NOTHING
                    "#,
                )
                .bind(key)
                .bind(value)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?
            }
            Some(expected) => {
                sqlx::query(
                    r#"
                    UPDATE kv_records
                    SET value = ?, updated_at = ?
                    WHERE key = ? AND value = ?
                    "#,
                )
                .bind(value)
                .bind(Utc::now())
                .bind(key)
                .bind(expected)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Volatile in-process store
///
/// Contents are lost on restart. Intended for development and tests.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        STORE_OPERATIONS_TOTAL
            .with_label_values(&["get", "memory"])
            .inc();
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<bool, AppError> {
        STORE_OPERATIONS_TOTAL
            .with_label_values(&["put", "memory"])
            .inc();
        self.records.write().await.insert(key.to_string(), value);
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        value: Vec<u8>,
    ) -> Result<bool, AppError> {
        STORE_OPERATIONS_TOTAL
            .with_label_values(&["compare_and_swap", "memory"])
            .inc();

        let mut records = self.records.write().await;
        if records.get(key) != expected.as_ref() {
            return Ok(false);
        }
        records.insert(key.to_string(), value);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_sqlite_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("records.db");
        let store = SqliteStore::connect(&db_path).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn sqlite_put_then_get() {
        let (store, _temp_dir) = create_sqlite_store().await;

        assert!(store.get("user:123").await.unwrap().is_none());
        assert!(store.put("user:123", b"first".to_vec()).await.unwrap());
        assert!(store.put("user:123", b"second".to_vec()).await.unwrap());
        assert_eq!(
            store.get("user:123").await.unwrap(),
            Some(b"second".to_vec())
        );
    }

    #[tokio::test]
    async fn sqlite_compare_and_swap_rejects_stale_expectation() {
        let (store, _temp_dir) = create_sqlite_store().await;

        assert!(
            store
                .compare_and_swap("user:123", None, b"v1".to_vec())
                .await
                .unwrap()
        );
        // Creating again must fail: the key is no longer absent.
        assert!(
            !store
                .compare_and_swap("user:123", None, b"v1-again".to_vec())
                .await
                .unwrap()
        );
        assert!(
            store
                .compare_and_swap("user:123", Some(b"v1".to_vec()), b"v2".to_vec())
                .await
                .unwrap()
        );
        assert!(
            !store
                .compare_and_swap("user:123", Some(b"v1".to_vec()), b"v3".to_vec())
                .await
                .unwrap()
        );
        assert_eq!(store.get("user:123").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn sqlite_store_persists_across_connections() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("records.db");

        let store = SqliteStore::connect(&db_path).await.unwrap();
        store.put("user:1", b"kept".to_vec()).await.unwrap();
        drop(store);

        let reopened = SqliteStore::connect(&db_path).await.unwrap();
        assert_eq!(reopened.get("user:1").await.unwrap(), Some(b"kept".to_vec()));
    }

    #[tokio::test]
    async fn memory_compare_and_swap_matches_sqlite_semantics() {
        let store = MemoryStore::new();

        assert!(store.compare_and_swap("k", None, b"a".to_vec()).await.unwrap());
        assert!(!store.compare_and_swap("k", None, b"b".to_vec()).await.unwrap());
        assert!(
            !store
                .compare_and_swap("k", Some(b"x".to_vec()), b"b".to_vec())
                .await
                .unwrap()
        );
        assert!(
            store
                .compare_and_swap("k", Some(b"a".to_vec()), b"b".to_vec())
                .await
                .unwrap()
        );
        assert_eq!(store.get("k").await.unwrap(), Some(b"b".to_vec()));
        assert_eq!(store.len().await, 1);
    }
}
