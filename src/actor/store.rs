//! Actor checkpoint persistence

use crate::storage::{Database, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Lifecycle of an actor as recorded in its checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorStatus {
    Running,
    Finished,
    Failed,
}

impl ActorStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Latest durable position of one actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorCheckpoint {
    pub actor_name: String,
    /// State to run next, or the state that failed
    pub state_name: String,
    pub message_json: String,
    pub status: ActorStatus,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Durable home of actor checkpoints
///
/// One checkpoint per actor name; saving replaces the previous one.
pub trait ActorStateStore: Send + Sync {
    fn load(&self, actor_name: &str) -> StorageResult<Option<ActorCheckpoint>>;

    fn save(&self, checkpoint: &ActorCheckpoint) -> StorageResult<()>;
}

/// In-memory checkpoint store
///
/// Clones share their contents, so a test can hand one clone to a runner and
/// inspect the other. Every save is also kept in [`MemoryActorStore::history`].
#[derive(Debug, Clone, Default)]
pub struct MemoryActorStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    latest: HashMap<String, ActorCheckpoint>,
    history: Vec<ActorCheckpoint>,
}

impl MemoryActorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every checkpoint saved so far, oldest first
    pub fn history(&self) -> Vec<ActorCheckpoint> {
        self.inner
            .lock()
            .map(|inner| inner.history.clone())
            .unwrap_or_default()
    }
}

impl ActorStateStore for MemoryActorStore {
    fn load(&self, actor_name: &str) -> StorageResult<Option<ActorCheckpoint>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StorageError::Database("checkpoint store lock poisoned".to_string()))?;
        Ok(inner.latest.get(actor_name).cloned())
    }

    fn save(&self, checkpoint: &ActorCheckpoint) -> StorageResult<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StorageError::Database("checkpoint store lock poisoned".to_string()))?;
        inner
            .latest
            .insert(checkpoint.actor_name.clone(), checkpoint.clone());
        inner.history.push(checkpoint.clone());
        Ok(())
    }
}

/// Checkpoint store backed by the `actor_state` table
#[derive(Clone)]
pub struct SqliteActorStore {
    db: Database,
}

impl SqliteActorStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Checkpoints of every actor, by name
    pub fn list(&self) -> StorageResult<Vec<ActorCheckpoint>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT actor_name, state_name, message_json, status, error, updated_at
             FROM actor_state ORDER BY actor_name",
        )?;

        let rows = stmt.query_map([], checkpoint_from_row)?;
        let mut checkpoints = Vec::new();
        for row in rows {
            checkpoints.push(row?);
        }
        Ok(checkpoints)
    }
}

impl ActorStateStore for SqliteActorStore {
    fn load(&self, actor_name: &str) -> StorageResult<Option<ActorCheckpoint>> {
        let conn = self.db.lock()?;
        let checkpoint = conn
            .query_row(
                "SELECT actor_name, state_name, message_json, status, error, updated_at
                 FROM actor_state WHERE actor_name = ?1",
                params![actor_name],
                checkpoint_from_row,
            )
            .optional()?;
        Ok(checkpoint)
    }

    fn save(&self, checkpoint: &ActorCheckpoint) -> StorageResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO actor_state (actor_name, state_name, message_json, status, error, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(actor_name) DO UPDATE SET
                 state_name = excluded.state_name,
                 message_json = excluded.message_json,
                 status = excluded.status,
                 error = excluded.error,
                 updated_at = excluded.updated_at",
            params![
                checkpoint.actor_name,
                checkpoint.state_name,
                checkpoint.message_json,
                checkpoint.status.to_db_string(),
                checkpoint.error,
                checkpoint.updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

fn checkpoint_from_row(row: &Row<'_>) -> rusqlite::Result<ActorCheckpoint> {
    let status: String = row.get(3)?;
    let updated_at: String = row.get(5)?;

    Ok(ActorCheckpoint {
        actor_name: row.get(0)?,
        state_name: row.get(1)?,
        message_json: row.get(2)?,
        // An unknown status is treated as a failure so it is never resumed blindly
        status: ActorStatus::from_db_string(&status).unwrap_or(ActorStatus::Failed),
        error: row.get(4)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(name: &str, state: &str, status: ActorStatus) -> ActorCheckpoint {
        ActorCheckpoint {
            actor_name: name.to_string(),
            state_name: state.to_string(),
            message_json: "{}".to_string(),
            status,
            error: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_sqlite_upsert() {
        let store = SqliteActorStore::new(Database::open_in_memory().unwrap());
        assert!(store.load("recrawl").unwrap().is_none());

        store
            .save(&checkpoint("recrawl", "INITIAL", ActorStatus::Running))
            .unwrap();
        let mut failed = checkpoint("recrawl", "CRAWL", ActorStatus::Failed);
        failed.error = Some("boom".to_string());
        store.save(&failed).unwrap();

        let loaded = store.load("recrawl").unwrap().unwrap();
        assert_eq!(loaded.state_name, "CRAWL");
        assert_eq!(loaded.status, ActorStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("boom"));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_store_history() {
        let store = MemoryActorStore::new();
        let shared = store.clone();

        store
            .save(&checkpoint("a", "INITIAL", ActorStatus::Running))
            .unwrap();
        store.save(&checkpoint("a", "END", ActorStatus::Finished)).unwrap();

        assert_eq!(shared.load("a").unwrap().unwrap().state_name, "END");
        let states: Vec<_> = shared.history().into_iter().map(|c| c.state_name).collect();
        assert_eq!(states, vec!["INITIAL", "END"]);
    }

    #[test]
    fn test_status_db_strings() {
        for status in [ActorStatus::Running, ActorStatus::Finished, ActorStatus::Failed] {
            assert_eq!(ActorStatus::from_db_string(status.to_db_string()), Some(status));
        }
    }
}
