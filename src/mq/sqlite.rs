use super::{MqError, MqMessage, MqMessageState, Outbox};
use crate::process::STATUS_STOPPED;
use crate::storage::Database;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::time::Duration;
use tokio::time::Instant;

const MESSAGE_COLUMNS: &str = "id, related_id, sender_inbox, function, payload, state";

/// How often a waiting outbox looks for a reply
const REPLY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outbox sending requests to one recipient inbox
#[derive(Clone)]
pub struct MqOutbox {
    db: Database,
    recipient_inbox: String,
    reply_inbox: String,
}

impl MqOutbox {
    /// # Arguments
    ///
    /// * `db` - Control database
    /// * `recipient_inbox` - Inbox requests are addressed to
    /// * `reply_inbox` - Inbox the recipient should answer to
    pub fn new(db: Database, recipient_inbox: &str, reply_inbox: &str) -> Self {
        Self {
            db,
            recipient_inbox: recipient_inbox.to_string(),
            reply_inbox: reply_inbox.to_string(),
        }
    }

    /// Number of requests this outbox has sent
    pub fn sent_count(&self) -> Result<i64, MqError> {
        let conn = self.db.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM message_queue WHERE recipient_inbox = ?1 AND sender_inbox = ?2 AND related_id = -1",
            params![self.recipient_inbox, self.reply_inbox],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn find_reply(&self, msg_id: i64) -> Result<Option<MqMessage>, MqError> {
        let conn = self.db.lock()?;

        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM message_queue WHERE id = ?1",
                params![msg_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(MqError::NotFound(msg_id));
        }

        let reply = conn
            .query_row(
                &format!(
                    "SELECT {} FROM message_queue
                     WHERE related_id = ?1 AND recipient_inbox = ?2
                     ORDER BY id LIMIT 1",
                    MESSAGE_COLUMNS
                ),
                params![msg_id, self.reply_inbox],
                message_from_row,
            )
            .optional()?;
        Ok(reply)
    }
}

#[async_trait]
impl Outbox for MqOutbox {
    async fn send_async(&self, function: &str, payload: &str) -> Result<i64, MqError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO message_queue
                 (related_id, sender_inbox, recipient_inbox, function, payload, state, created_at, updated_at)
             VALUES (-1, ?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                self.reply_inbox,
                self.recipient_inbox,
                function,
                payload,
                MqMessageState::New.to_db_string(),
                now
            ],
        )?;

        let id = conn.last_insert_rowid();
        tracing::debug!("Sent {} #{} to {}", function, id, self.recipient_inbox);
        Ok(id)
    }

    async fn wait_response(&self, msg_id: i64, timeout: Duration) -> Result<MqMessage, MqError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(reply) = self.find_reply(msg_id)? {
                return Ok(reply);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(MqError::Timeout(msg_id));
            }
            tokio::time::sleep(REPLY_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

/// Receiving side: claims requests addressed to one inbox and answers them
///
/// An inbox with an owner stamps the owner's process instance id on every
/// request it claims, so the claim can be taken back if that process dies.
#[derive(Clone)]
pub struct MqInbox {
    db: Database,
    inbox: String,
    owner: Option<String>,
}

impl MqInbox {
    pub fn new(db: Database, inbox: &str) -> Self {
        Self {
            db,
            inbox: inbox.to_string(),
            owner: None,
        }
    }

    /// Claims on behalf of the process instance `owner`
    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.inbox
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Claims every new request in this inbox, oldest first
    ///
    /// Claimed requests move to `ACK` and are not returned again unless
    /// [`MqInbox::reclaim_abandoned`] hands them back.
    pub fn poll_new(&self) -> Result<Vec<MqMessage>, MqError> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let messages = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM message_queue
                 WHERE recipient_inbox = ?1 AND state = ?2 AND related_id = -1
                 ORDER BY id",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![self.inbox, MqMessageState::New.to_db_string()],
                message_from_row,
            )?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            messages
        };

        let now = Utc::now().to_rfc3339();
        for message in &messages {
            tx.execute(
                "UPDATE message_queue SET state = ?1, claimed_by = ?2, updated_at = ?3 WHERE id = ?4",
                params![MqMessageState::Ack.to_db_string(), self.owner, now, message.id],
            )?;
        }
        tx.commit()?;

        Ok(messages
            .into_iter()
            .map(|m| MqMessage {
                state: MqMessageState::Ack,
                ..m
            })
            .collect())
    }

    /// Returns requests held by dead claimers to `NEW`
    ///
    /// A claimer is dead once its heartbeat is gone or older than
    /// `staleness`; a `STOPPED` heartbeat counts at any age. Requests claimed
    /// without an owner cannot prove a live claimer and are taken back too.
    /// Claims of this inbox's own owner are left alone.
    ///
    /// # Returns
    ///
    /// The number of requests handed back
    pub fn reclaim_abandoned(&self, staleness: Duration) -> Result<usize, MqError> {
        let now = Utc::now();
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let abandoned = {
            let mut stmt = tx.prepare(
                "SELECT m.id, m.claimed_by, h.heartbeat_time, h.status
                 FROM message_queue m
                 LEFT JOIN process_heartbeat h ON h.instance_id = m.claimed_by
                 WHERE m.recipient_inbox = ?1 AND m.state = ?2 AND m.related_id = -1
                 ORDER BY m.id",
            )?;
            let rows = stmt.query_map(
                params![self.inbox, MqMessageState::Ack.to_db_string()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )?;

            let mut abandoned = Vec::new();
            for row in rows {
                let (id, claimed_by, heartbeat_time, status) = row?;
                if claimed_by.is_some() && claimed_by == self.owner {
                    continue;
                }
                if claimer_is_dead(heartbeat_time.as_deref(), status.as_deref(), staleness, now) {
                    abandoned.push((id, claimed_by));
                }
            }
            abandoned
        };

        let stamp = now.to_rfc3339();
        for (id, claimed_by) in &abandoned {
            tx.execute(
                "UPDATE message_queue SET state = ?1, claimed_by = NULL, updated_at = ?2
                 WHERE id = ?3 AND state = ?4",
                params![
                    MqMessageState::New.to_db_string(),
                    stamp,
                    id,
                    MqMessageState::Ack.to_db_string()
                ],
            )?;
            tracing::warn!(
                "Taking back request #{} from {}, which is no longer running",
                id,
                claimed_by.as_deref().unwrap_or("an unknown claimer")
            );
        }
        tx.commit()?;

        Ok(abandoned.len())
    }

    /// Answers a claimed request
    ///
    /// The request takes the reply's terminal state. If the sender asked for
    /// a reply, a reply row is queued to its inbox and its id returned.
    pub fn reply(
        &self,
        request: &MqMessage,
        state: MqMessageState,
        payload: &str,
    ) -> Result<Option<i64>, MqError> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE message_queue SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state.to_db_string(), now, request.id],
        )?;
        if updated == 0 {
            return Err(MqError::NotFound(request.id));
        }

        let reply_id = match &request.sender_inbox {
            Some(sender) => {
                tx.execute(
                    "INSERT INTO message_queue
                         (related_id, sender_inbox, recipient_inbox, function, payload, state, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                    params![
                        request.id,
                        self.inbox,
                        sender,
                        request.function,
                        payload,
                        state.to_db_string(),
                        now
                    ],
                )?;
                Some(tx.last_insert_rowid())
            }
            None => None,
        };

        tx.commit()?;
        Ok(reply_id)
    }
}

fn claimer_is_dead(
    heartbeat_time: Option<&str>,
    status: Option<&str>,
    staleness: Duration,
    now: DateTime<Utc>,
) -> bool {
    let (Some(heartbeat_time), Some(status)) = (heartbeat_time, status) else {
        return true;
    };
    if status == STATUS_STOPPED {
        return true;
    }
    match DateTime::parse_from_rfc3339(heartbeat_time) {
        Ok(seen) => {
            (now - seen.with_timezone(&Utc)).num_milliseconds() > staleness.as_millis() as i64
        }
        Err(_) => true,
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MqMessage> {
    let state: String = row.get(5)?;
    Ok(MqMessage {
        id: row.get(0)?,
        related_id: row.get(1)?,
        sender_inbox: row.get(2)?,
        function: row.get(3)?,
        payload: row.get(4)?,
        state: MqMessageState::from_db_string(&state).unwrap_or(MqMessageState::Dead),
    })
}
