//! Persistent storage for credentials
//!
//! The store is an opaque key to string mapping. How values are encoded and
//! where they live is up to the implementation.

use std::{collections::HashMap, error};

use async_trait::async_trait;
use parking_lot::Mutex;

/// Errors reported by a [`PersistentStore`]
pub type StoreError = Box<dyn error::Error + Send + Sync + 'static>;

/// An asynchronous key to string store that outlives the process
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Reads the value stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes the value stored under `key`
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// A store held entirely in memory
///
/// Nothing survives a restart, which makes this mostly useful for tests and
/// for hosts that opt out of persistence.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    /// Constructs an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_can_be_set_read_and_removed() {
        let store = InMemoryStore::new();

        assert_eq!(store.get("token").await.unwrap(), None);

        store.set("token", "a").await.unwrap();
        store.set("token", "b").await.unwrap();
        assert_eq!(store.get("token").await.unwrap().as_deref(), Some("b"));

        store.remove("token").await.unwrap();
        assert_eq!(store.get("token").await.unwrap(), None);
    }
}
