//! Durable client-side key-value storage backing the trust record.
//!
//! The browser keeps the token and its grant timestamp in local storage. On the
//! server side that storage is represented by [`ClientStorage`], a request-scoped
//! snapshot whose changes are echoed back to the client.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("invalid cookie value for {name}")]
    InvalidCookie { name: String },
}

/// Fallible string key-value store.
pub trait DurableStore {
    /// # Errors
    /// Returns [`StorageError`] when the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// # Errors
    /// Returns [`StorageError`] when the backend rejects the write.
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// # Errors
    /// Returns [`StorageError`] when the backend rejects the removal.
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    unavailable: bool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every operation fails, like a browser with storage disabled.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            entries: HashMap::new(),
            unavailable: true,
        }
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable {
            Err(StorageError::Unavailable("storage disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries.remove(key);
        Ok(())
    }
}

/// Request-scoped view of the browser's local storage.
///
/// Seeded from the snapshot the client sent; every write is recorded so the
/// handler can return the delta (`None` means remove the key).
#[derive(Clone, Debug, Default)]
pub struct ClientStorage {
    snapshot: BTreeMap<String, String>,
    changes: BTreeMap<String, Option<String>>,
}

impl ClientStorage {
    #[must_use]
    pub fn new(snapshot: BTreeMap<String, String>) -> Self {
        Self {
            snapshot,
            changes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn changes(&self) -> &BTreeMap<String, Option<String>> {
        &self.changes
    }

    #[must_use]
    pub fn into_changes(self) -> BTreeMap<String, Option<String>> {
        self.changes
    }
}

impl DurableStore for ClientStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if let Some(change) = self.changes.get(key) {
            return Ok(change.clone());
        }
        Ok(self.snapshot.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.changes
            .insert(key.to_string(), Some(value.to_string()));
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.changes.insert(key.to_string(), None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() -> Result<(), StorageError> {
        let mut store = MemoryStore::new();
        store.set("k", "v")?;
        assert_eq!(store.get("k")?, Some("v".to_string()));
        store.remove("k")?;
        assert_eq!(store.get("k")?, None);
        Ok(())
    }

    #[test]
    fn unavailable_store_fails_every_operation() {
        let mut store = MemoryStore::unavailable();
        assert!(store.get("k").is_err());
        assert!(store.set("k", "v").is_err());
        assert!(store.remove("k").is_err());
    }

    #[test]
    fn client_storage_overlays_changes_on_snapshot() -> Result<(), StorageError> {
        let snapshot = BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        let mut storage = ClientStorage::new(snapshot);
        storage.remove("a")?;
        storage.set("c", "3")?;

        assert_eq!(storage.get("a")?, None);
        assert_eq!(storage.get("b")?, Some("2".to_string()));
        assert_eq!(storage.get("c")?, Some("3".to_string()));

        let changes = storage.into_changes();
        assert_eq!(changes.get("a"), Some(&None));
        assert_eq!(changes.get("c"), Some(&Some("3".to_string())));
        assert!(!changes.contains_key("b"));
        Ok(())
    }
}
