//! Database schema definitions
//!
//! One control database is shared by the supervisor and the crawl worker.
//! It holds the storage registry, actor checkpoints, the message queue and
//! process heartbeats.

/// SQL schema for the control database
pub const SCHEMA_SQL: &str = r#"
-- Registered storage areas (crawl specs, crawl data, ...)
CREATE TABLE IF NOT EXISTS file_storage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    path TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_file_storage_kind ON file_storage(kind);

-- Which storage area another one was produced from
CREATE TABLE IF NOT EXISTS file_storage_relation (
    source_id INTEGER NOT NULL REFERENCES file_storage(id),
    target_id INTEGER NOT NULL REFERENCES file_storage(id),
    PRIMARY KEY (source_id, target_id)
);

CREATE INDEX IF NOT EXISTS idx_file_storage_relation_target ON file_storage_relation(target_id);

-- Latest checkpoint of every actor
CREATE TABLE IF NOT EXISTS actor_state (
    actor_name TEXT PRIMARY KEY,
    state_name TEXT NOT NULL,
    message_json TEXT NOT NULL,
    status TEXT NOT NULL,
    error TEXT,
    updated_at TEXT NOT NULL
);

-- Requests and replies between processes
CREATE TABLE IF NOT EXISTS message_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    related_id INTEGER NOT NULL DEFAULT -1,
    sender_inbox TEXT,
    recipient_inbox TEXT NOT NULL,
    function TEXT NOT NULL,
    payload TEXT NOT NULL,
    state TEXT NOT NULL,
    -- Process instance holding an ACK request
    claimed_by TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_message_queue_recipient ON message_queue(recipient_inbox, state);
CREATE INDEX IF NOT EXISTS idx_message_queue_related ON message_queue(related_id);

-- Latest heartbeat of every process instance
CREATE TABLE IF NOT EXISTS process_heartbeat (
    instance_id TEXT PRIMARY KEY,
    process_name TEXT NOT NULL,
    process_base TEXT NOT NULL,
    heartbeat_time TEXT NOT NULL,
    progress INTEGER,
    status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_process_heartbeat_base ON process_heartbeat(process_base);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    add_column_if_missing(conn, "message_queue", "claimed_by", "TEXT")?;
    Ok(())
}

/// Brings tables created by older versions up to date
fn add_column_if_missing(
    conn: &rusqlite::Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<(), rusqlite::Error> {
    let present: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |row| row.get(0),
    )?;
    if present == 0 {
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            table, column, definition
        ))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in [
            "file_storage",
            "file_storage_relation",
            "actor_state",
            "message_queue",
            "process_heartbeat",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_old_message_queue_gains_claim_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE message_queue (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 related_id INTEGER NOT NULL DEFAULT -1,
                 sender_inbox TEXT,
                 recipient_inbox TEXT NOT NULL,
                 function TEXT NOT NULL,
                 payload TEXT NOT NULL,
                 state TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );",
        )
        .unwrap();

        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('message_queue') WHERE name = 'claimed_by'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
