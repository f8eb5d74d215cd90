use super::heartbeat::{ProcessHeartbeat, DEFAULT_STALENESS, STATUS_RUNNING, STATUS_STOPPED};
use super::LivenessProbe;
use crate::storage::{Database, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Reads process heartbeats from the control database
#[derive(Clone)]
pub struct ProcessService {
    db: Database,
    staleness: Duration,
}

impl ProcessService {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            staleness: DEFAULT_STALENESS,
        }
    }

    /// Overrides the age after which a heartbeat counts as missing
    pub fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    /// Latest heartbeat of every known process instance
    pub fn heartbeats(&self) -> StorageResult<Vec<ProcessHeartbeat>> {
        self.query_heartbeats(None)
    }

    /// Latest heartbeats of the instances of one process class
    pub fn heartbeats_for(&self, process_base: &str) -> StorageResult<Vec<ProcessHeartbeat>> {
        self.query_heartbeats(Some(process_base))
    }

    fn query_heartbeats(&self, process_base: Option<&str>) -> StorageResult<Vec<ProcessHeartbeat>> {
        let now = Utc::now();
        let conn = self.db.lock()?;

        let mut heartbeats = Vec::new();
        match process_base {
            Some(base) => {
                let mut stmt = conn.prepare(
                    "SELECT instance_id, process_name, process_base, heartbeat_time, progress, status
                     FROM process_heartbeat WHERE process_base = ?1 ORDER BY process_name",
                )?;
                for row in stmt.query_map(params![base], |row| heartbeat_from_row(row, now))? {
                    heartbeats.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT instance_id, process_name, process_base, heartbeat_time, progress, status
                     FROM process_heartbeat ORDER BY process_base, process_name",
                )?;
                for row in stmt.query_map([], |row| heartbeat_from_row(row, now))? {
                    heartbeats.push(row?);
                }
            }
        }

        Ok(heartbeats)
    }
}

#[async_trait]
impl LivenessProbe for ProcessService {
    async fn is_running(&self, process_base: &str) -> bool {
        match self.heartbeats_for(process_base) {
            Ok(heartbeats) => heartbeats.iter().any(|hb| hb.is_running(self.staleness)),
            Err(e) => {
                tracing::warn!("Failed to read heartbeats for {}: {}", process_base, e);
                false
            }
        }
    }
}

fn heartbeat_from_row(row: &Row<'_>, now: DateTime<Utc>) -> rusqlite::Result<ProcessHeartbeat> {
    let heartbeat_time: String = row.get(3)?;
    // An unreadable timestamp is as good as no heartbeat at all
    let last_seen_millis = DateTime::parse_from_rfc3339(&heartbeat_time)
        .map(|t| (now - t.with_timezone(&Utc)).num_milliseconds())
        .unwrap_or(i64::MAX);
    let progress: Option<i64> = row.get(4)?;

    Ok(ProcessHeartbeat {
        uuid: row.get(0)?,
        process_id: row.get(1)?,
        process_base: row.get(2)?,
        last_seen_millis,
        progress: progress.map(|p| p.clamp(0, 100) as u8),
        status: row.get(5)?,
    })
}

/// Writes heartbeats for the current process
///
/// Cloning shares the instance identity and progress counter.
#[derive(Clone)]
pub struct ProcessHeartbeater {
    inner: Arc<HeartbeaterInner>,
}

struct HeartbeaterInner {
    db: Database,
    instance_id: Uuid,
    process_name: String,
    process_base: String,
    /// Percent, or -1 when no progress is known
    progress: AtomicI32,
}

impl ProcessHeartbeater {
    pub fn new(db: Database, process_base: &str) -> Self {
        let instance_id = Uuid::new_v4();
        let short_id: String = instance_id.simple().to_string().chars().take(8).collect();

        Self {
            inner: Arc::new(HeartbeaterInner {
                db,
                instance_id,
                process_name: format!("{}:{}", process_base, short_id),
                process_base: process_base.to_string(),
                progress: AtomicI32::new(-1),
            }),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    pub fn process_name(&self) -> &str {
        &self.inner.process_name
    }

    pub fn set_progress(&self, progress: Option<u8>) {
        let value = progress.map(|p| p.min(100) as i32).unwrap_or(-1);
        self.inner.progress.store(value, Ordering::Relaxed);
    }

    /// Writes one heartbeat with the given status and the current progress
    pub fn beat(&self, status: &str) -> StorageResult<()> {
        let inner = &self.inner;
        let progress = match inner.progress.load(Ordering::Relaxed) {
            p if p < 0 => None,
            p => Some(p),
        };

        let conn = inner.db.lock()?;
        conn.execute(
            "INSERT INTO process_heartbeat
                 (instance_id, process_name, process_base, heartbeat_time, progress, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(instance_id) DO UPDATE SET
                 heartbeat_time = excluded.heartbeat_time,
                 progress = excluded.progress,
                 status = excluded.status",
            params![
                inner.instance_id.to_string(),
                inner.process_name,
                inner.process_base,
                Utc::now().to_rfc3339(),
                progress,
                status
            ],
        )?;
        Ok(())
    }

    /// Starts beating `RUNNING` every `interval` on a background task
    pub fn start(&self, interval: Duration) -> HeartbeatTask {
        let heartbeater = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = heartbeater.beat(STATUS_RUNNING) {
                    tracing::warn!("Failed to write heartbeat: {}", e);
                }
            }
        });

        HeartbeatTask {
            handle,
            heartbeater: self.clone(),
        }
    }
}

/// A running background heartbeat
pub struct HeartbeatTask {
    handle: JoinHandle<()>,
    heartbeater: ProcessHeartbeater,
}

impl HeartbeatTask {
    /// Stops beating and records the process as stopped
    pub fn stop(self) -> StorageResult<()> {
        self.handle.abort();
        self.heartbeater.beat(STATUS_STOPPED)
    }
}
