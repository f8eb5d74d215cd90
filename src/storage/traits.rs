//! Storage traits and error types

use super::{FileStorage, StorageId};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage not found: {0}")]
    NotFound(StorageId),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Lookup of registered storage areas
///
/// The recrawl actor only ever reads the registry; registering areas is the
/// business of whoever prepares the crawl.
pub trait FileStorageService: Send + Sync {
    /// Looks up a storage area by id
    ///
    /// # Returns
    ///
    /// * `Ok(Some(storage))` - The area exists
    /// * `Ok(None)` - No area has this id
    fn get_storage(&self, id: StorageId) -> StorageResult<Option<FileStorage>>;

    /// Returns the areas `storage` was declared to be produced from
    fn get_source_of(&self, storage: &FileStorage) -> StorageResult<Vec<FileStorage>>;
}
