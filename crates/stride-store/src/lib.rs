//! Persistent key-value store adapter for Stride.
//!
//! The sync engine keeps everything it owns (cache entries, version records,
//! the storage index) as serialized documents under namespaced string keys.
//! This crate defines the store contract and two backends.
//!
//! ```text
//! PersistentStore (trait)   - get / set / remove / keys / remove_many
//!     └── SqliteStore       - durable single-table SQLite backend
//!     └── MemoryStore       - in-memory backend with failure injection
//! StoreExt                  - JSON helpers available on every store
//! ```
//!
//! There are no transactions. A failed `set` leaves the previous value in
//! place and callers are expected to tolerate partial failure.

pub mod error;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Shared handle to a store backend.
pub type SharedStore = Arc<dyn PersistentStore>;

/// Durable string key to serialized document mapping.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Read the raw value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// All keys currently stored, in ascending order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Remove several keys. Stops at the first failure.
    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }
}

/// JSON convenience methods for any [`PersistentStore`].
#[async_trait]
pub trait StoreExt: PersistentStore {
    /// Read and deserialize the document under `key`.
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Serialize `value` and store it under `key`.
    async fn set_json<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw).await
    }

    /// All keys beginning with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

impl<S: PersistentStore + ?Sized> StoreExt for S {}
