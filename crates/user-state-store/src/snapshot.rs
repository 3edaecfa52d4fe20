//! Cached user snapshot.
//!
//! The snapshot is overwritten wholesale on every write and has no schema
//! versioning. [`SnapshotCache`] is the only type that can write it; it is
//! not `Clone`, so exactly one owner holds write access. Any number of
//! [`SnapshotReader`]s can be handed out.

use crate::{StateStorage, StorageKeys, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Single-writer handle over the persisted user snapshot.
pub struct SnapshotCache {
    storage: Arc<dyn StateStorage>,
}

impl SnapshotCache {
    /// Create the writer over a storage backend.
    pub fn new(storage: Arc<dyn StateStorage>) -> Self {
        Self { storage }
    }

    /// Replace the persisted snapshot.
    pub fn write<T: Serialize + ?Sized>(&self, snapshot: &T) -> StorageResult<()> {
        let json = serde_json::to_string(snapshot)?;
        self.storage.set(StorageKeys::CURRENT_USER, &json)
    }

    /// Remove the persisted snapshot.
    pub fn clear(&self) -> StorageResult<bool> {
        self.storage.delete(StorageKeys::CURRENT_USER)
    }

    /// A read-only handle over the same snapshot.
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl std::fmt::Debug for SnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache").finish_non_exhaustive()
    }
}

/// Read-only handle over the persisted user snapshot.
#[derive(Clone)]
pub struct SnapshotReader {
    storage: Arc<dyn StateStorage>,
}

impl SnapshotReader {
    /// Raw JSON of the snapshot, if one is stored.
    pub fn read_raw(&self) -> StorageResult<Option<String>> {
        self.storage.get(StorageKeys::CURRENT_USER)
    }

    /// Decode the snapshot.
    pub fn read<T: DeserializeOwned>(&self) -> StorageResult<Option<T>> {
        match self.read_raw()? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Decode the snapshot, treating a corrupt value as absent.
    pub fn read_lossy<T: DeserializeOwned>(&self) -> Option<T> {
        match self.read() {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable user snapshot");
                None
            }
        }
    }
}

impl std::fmt::Debug for SnapshotReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotReader").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStateStorage;
    use serde_json::json;

    #[test]
    fn test_write_then_read_through_reader() {
        let cache = SnapshotCache::new(Arc::new(MemoryStateStorage::new()));
        let reader = cache.reader();

        assert_eq!(reader.read::<serde_json::Value>().unwrap(), None);

        cache.write(&json!({"id": "42", "nom": "Dupont"})).unwrap();

        let value: serde_json::Value = reader.read().unwrap().unwrap();
        assert_eq!(value, json!({"id": "42", "nom": "Dupont"}));
    }

    #[test]
    fn test_write_replaces_rather_than_merges() {
        let cache = SnapshotCache::new(Arc::new(MemoryStateStorage::new()));

        cache.write(&json!({"id": "1", "weight": 70})).unwrap();
        cache.write(&json!({"id": "1", "height": 180})).unwrap();

        let value: serde_json::Value = cache.reader().read().unwrap().unwrap();
        assert_eq!(value, json!({"id": "1", "height": 180}));
    }

    #[test]
    fn test_corrupt_snapshot() {
        let storage = Arc::new(MemoryStateStorage::new());
        storage.set(StorageKeys::CURRENT_USER, "{not json").unwrap();
        let reader = SnapshotCache::new(storage).reader();

        assert!(reader.read::<serde_json::Value>().is_err());
        assert_eq!(reader.read_lossy::<serde_json::Value>(), None);
    }

    #[test]
    fn test_clear() {
        let cache = SnapshotCache::new(Arc::new(MemoryStateStorage::new()));
        cache.write(&json!({"id": "1"})).unwrap();

        assert!(cache.clear().unwrap());
        assert_eq!(cache.reader().read_raw().unwrap(), None);
    }
}
