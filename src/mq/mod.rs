//! Database-backed message queue
//!
//! Processes talk to each other through the `message_queue` table of the
//! control database. A request is a row addressed to a recipient inbox; the
//! recipient claims it, does the work, and answers with a reply row whose
//! `related_id` is the request's id. The sender correlates replies by id
//! alone, so a reply written while nobody was waiting is picked up by the
//! next wait.

mod api;
mod sqlite;
mod wait;

pub use api::{CrawlRequest, CRAWL_REQUEST};
pub use sqlite::{MqInbox, MqOutbox};
pub use wait::{wait_for_response, WaitError, WaitPolicy};

use crate::storage::StorageError;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from message queue operations
#[derive(Debug, Error)]
pub enum MqError {
    #[error("No reply to message {0} yet")]
    Timeout(i64),

    #[error("Message {0} not found")]
    NotFound(i64),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Lifecycle state of a queued message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MqMessageState {
    /// Waiting to be claimed
    New,
    /// Claimed by the recipient
    Ack,
    /// Handled successfully
    Ok,
    /// Handling failed
    Err,
    /// Abandoned
    Dead,
}

impl MqMessageState {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Ack => "ACK",
            Self::Ok => "OK",
            Self::Err => "ERR",
            Self::Dead => "DEAD",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(Self::New),
            "ACK" => Some(Self::Ack),
            "OK" => Some(Self::Ok),
            "ERR" => Some(Self::Err),
            "DEAD" => Some(Self::Dead),
            _ => None,
        }
    }

    /// True once nothing more will happen to the message
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Err | Self::Dead)
    }
}

/// A message as stored in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqMessage {
    pub id: i64,
    /// Id of the request this message answers, or -1
    pub related_id: i64,
    /// Inbox replies should go to, if the sender expects one
    pub sender_inbox: Option<String>,
    pub function: String,
    pub payload: String,
    pub state: MqMessageState,
}

/// Sending side of a request/reply exchange with one remote inbox
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Queues a request and returns its id without waiting for the reply
    async fn send_async(&self, function: &str, payload: &str) -> Result<i64, MqError>;

    /// Waits up to `timeout` for the reply to `msg_id`
    ///
    /// Returns [`MqError::Timeout`] if no reply arrived in time. Waiting
    /// again later is always safe.
    async fn wait_response(&self, msg_id: i64, timeout: Duration) -> Result<MqMessage, MqError>;
}
