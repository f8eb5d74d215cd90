//! Control database and storage registry
//!
//! This module handles the SQLite control database shared by the supervisor
//! and the crawl worker:
//! - connection setup and schema management
//! - the registry of storage areas (crawl specs and crawl data) and the
//!   relation recording which area was produced from which

mod schema;
mod sqlite;
mod traits;

pub use schema::initialize_schema;
pub use sqlite::{Database, SqliteFileStorage};
pub use traits::{FileStorageService, StorageError, StorageResult};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identifier of a registered storage area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(pub i64);

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for StorageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Kind of content a storage area holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStorageType {
    /// The list of domains and seed URLs to crawl
    CrawlSpec,
    /// Fetch logs written by the crawler
    CrawlData,
    ProcessedData,
    Other,
}

impl FileStorageType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::CrawlSpec => "crawl_spec",
            Self::CrawlData => "crawl_data",
            Self::ProcessedData => "processed_data",
            Self::Other => "other",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "crawl_spec" => Some(Self::CrawlSpec),
            "crawl_data" => Some(Self::CrawlData),
            "processed_data" => Some(Self::ProcessedData),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl fmt::Display for FileStorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// A registered storage area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStorage {
    pub id: StorageId,
    pub kind: FileStorageType,
    pub path: PathBuf,
    pub description: String,
}
