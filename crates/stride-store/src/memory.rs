//! In-memory store backend.
//!
//! Used for tests and for ephemeral engines. Supports failure injection so
//! callers can exercise their partial-failure paths.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{PersistentStore, Result, StoreError};

/// Mock store that keeps every value in a sorted map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, String>>,
    fail_writes: RwLock<bool>,
    failing_removals: RwLock<HashSet<String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.write() = fail;
    }

    /// Make removal of one specific key fail.
    pub fn fail_removal_of(&self, key: impl Into<String>) {
        self.failing_removals.write().insert(key.into());
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Synchronous peek, for assertions.
    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if *self.fail_writes.read() {
            return Err(StoreError::Unavailable(format!("write to {key} rejected")));
        }
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if self.failing_removals.read().contains(key) {
            return Err(StoreError::Unavailable(format!("removal of {key} rejected")));
        }
        self.values.write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.values.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStore::new();
        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);

        // Removing again is fine
        store.remove("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_value() {
        let store = MemoryStore::new();
        store.set("a", "old").await.unwrap();

        store.set_fail_writes(true);
        assert!(store.set("a", "new").await.is_err());
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_remove_many_stops_at_failure() {
        let store = MemoryStore::new();
        for key in ["a", "b", "c"] {
            store.set(key, "x").await.unwrap();
        }
        store.fail_removal_of("b");

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(store.remove_many(&keys).await.is_err());

        assert!(!store.contains("a"));
        assert!(store.contains("b"));
        assert!(store.contains("c"));
    }
}
