//! Persisted user state for Healthdash.
//!
//! This crate provides:
//! - A small key/value storage abstraction ([`StateStorage`])
//! - A file-backed implementation (one JSON document per key)
//! - An in-memory implementation for tests and ephemeral sessions
//! - [`SnapshotCache`], the single writer of the cached user snapshot, and
//!   [`SnapshotReader`], the read-only handle handed to the rest of the UI

mod file;
mod keys;
mod memory;
mod snapshot;
mod traits;

pub use file::FileStateStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStateStorage;
pub use snapshot::{SnapshotCache, SnapshotReader};
pub use traits::StateStorage;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Key is not usable as a storage key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
