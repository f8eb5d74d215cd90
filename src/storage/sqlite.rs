//! SQLite control database and storage registry

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{FileStorageService, StorageError, StorageResult};
use crate::storage::{FileStorage, FileStorageType, StorageId};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Shared handle to the control database
///
/// Cloning the handle shares the connection. Callers lock it for the length
/// of one statement or transaction and never across an `.await`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (creating if needed) the control database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(Database)` - Successfully opened database with schema in place
    /// * `Err(StorageError)` - Failed to open database
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
        ",
        )?;
        // Supervisor and crawler share the file from separate processes
        conn.busy_timeout(Duration::from_secs(5))?;

        initialize_schema(&conn)?;

        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory database (for tests and dry runs)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Locks the connection
    pub fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
    }
}

/// Storage registry backed by the control database
#[derive(Clone)]
pub struct SqliteFileStorage {
    db: Database,
}

impl SqliteFileStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers a storage area
    pub fn register(
        &self,
        kind: FileStorageType,
        path: &Path,
        description: &str,
    ) -> StorageResult<FileStorage> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO file_storage (kind, path, description, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                kind.to_db_string(),
                path.to_string_lossy(),
                description,
                Utc::now().to_rfc3339()
            ],
        )?;

        Ok(FileStorage {
            id: StorageId(conn.last_insert_rowid()),
            kind,
            path: path.to_path_buf(),
            description: description.to_string(),
        })
    }

    /// Declares that `target` was produced from `source`
    pub fn relate(&self, source: StorageId, target: StorageId) -> StorageResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO file_storage_relation (source_id, target_id) VALUES (?1, ?2)",
            params![source.0, target.0],
        )?;
        Ok(())
    }

    /// Lists every registered storage area
    pub fn list(&self) -> StorageResult<Vec<FileStorage>> {
        let conn = self.db.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, kind, path, description FROM file_storage ORDER BY id")?;

        let rows = stmt.query_map([], storage_from_row)?;
        let mut storages = Vec::new();
        for row in rows {
            storages.push(row?);
        }
        Ok(storages)
    }
}

impl FileStorageService for SqliteFileStorage {
    fn get_storage(&self, id: StorageId) -> StorageResult<Option<FileStorage>> {
        let conn = self.db.lock()?;
        let storage = conn
            .query_row(
                "SELECT id, kind, path, description FROM file_storage WHERE id = ?1",
                params![id.0],
                storage_from_row,
            )
            .optional()?;
        Ok(storage)
    }

    fn get_source_of(&self, storage: &FileStorage) -> StorageResult<Vec<FileStorage>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.kind, s.path, s.description
             FROM file_storage_relation r
             JOIN file_storage s ON s.id = r.source_id
             WHERE r.target_id = ?1
             ORDER BY s.id",
        )?;

        let rows = stmt.query_map(params![storage.id.0], storage_from_row)?;
        let mut sources = Vec::new();
        for row in rows {
            sources.push(row?);
        }
        Ok(sources)
    }
}

fn storage_from_row(row: &Row<'_>) -> rusqlite::Result<FileStorage> {
    let kind: String = row.get(1)?;
    let path: String = row.get(2)?;

    Ok(FileStorage {
        id: StorageId(row.get(0)?),
        kind: FileStorageType::from_db_string(&kind).unwrap_or(FileStorageType::Other),
        path: PathBuf::from(path),
        description: row.get(3)?,
    })
}
