//! Typed access to the keyed record store

use std::marker::PhantomData;
use std::sync::Arc;

use super::models::Record;
use super::store::KeyValueStore;
use crate::error::AppError;

/// A record together with the exact bytes it was decoded from
///
/// The bytes are the expectation for a later optimistic write.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub record: T,
    raw: Vec<u8>,
}

impl<T> Snapshot<T> {
    pub fn into_parts(self) -> (T, Vec<u8>) {
        (self.record, self.raw)
    }
}

/// Repository for one record type
pub struct Repository<T> {
    store: Arc<dyn KeyValueStore>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _record: PhantomData,
        }
    }
}

impl<T: Record> Repository<T> {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            _record: PhantomData,
        }
    }

    /// Full store key for a record key.
    pub fn storage_key(key: &str) -> String {
        format!("{}:{}", T::PREFIX, key)
    }

    /// Load a record by key.
    pub async fn get(&self, key: &str) -> Result<Option<T>, AppError> {
        Ok(self.snapshot(key).await?.map(|snapshot| snapshot.record))
    }

    /// Load a record together with its stored bytes.
    ///
    /// # Errors
    /// Returns `Store` if the stored bytes do not decode as `T`
    pub async fn snapshot(&self, key: &str) -> Result<Option<Snapshot<T>>, AppError> {
        let storage_key = Self::storage_key(key);
        let Some(raw) = self.store.get(&storage_key).await? else {
            return Ok(None);
        };

        let record = serde_json::from_slice(&raw).map_err(|e| {
            AppError::Store(format!("record {storage_key} could not be decoded: {e}"))
        })?;

        Ok(Some(Snapshot { record, raw }))
    }

    /// Overwrite a record.
    pub async fn save(&self, record: &T) -> Result<(), AppError> {
        let storage_key = Self::storage_key(&record.key());
        let value = encode(record)?;

        if !self.store.put(&storage_key, value).await? {
            return Err(AppError::Store(format!(
                "store rejected write for {storage_key}"
            )));
        }
        Ok(())
    }

    /// Write a record only if the stored bytes still equal `expected`
    /// (`None`: the record must not exist yet).
    ///
    /// # Errors
    /// Returns `Conflict` if another writer got there first
    pub async fn save_if_unchanged(
        &self,
        record: &T,
        expected: Option<Vec<u8>>,
    ) -> Result<(), AppError> {
        let storage_key = Self::storage_key(&record.key());
        let value = encode(record)?;

        if !self
            .store
            .compare_and_swap(&storage_key, expected, value)
            .await?
        {
            return Err(AppError::Conflict(format!(
                "{storage_key} was modified concurrently"
            )));
        }
        Ok(())
    }
}

fn encode<T: Record>(record: &T) -> Result<Vec<u8>, AppError> {
    serde_json::to_vec(record).map_err(|e| AppError::Internal(e.into()))
}
