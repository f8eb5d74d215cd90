//! The recrawl actor
//!
//! Re-crawls an existing crawl data area: validates the storage handles,
//! sends one crawl request to the crawler and waits for it to finish.
//!
//! ```text
//! INITIAL ──> CRAWL ──> CRAWL-WAIT ──> END
//!             (no resume) (resumable)
//! ```
//!
//! `CRAWL` must never run twice, since a second request would crawl the
//! same domains again. `CRAWL-WAIT` only waits, so a restarted supervisor
//! simply waits for the same request again.

use crate::actor::{ActorError, GraphState, ResumeBehavior, StateGraph, END, INITIAL};
use crate::mq::{wait_for_response, CrawlRequest, MqMessageState, Outbox, WaitPolicy, CRAWL_REQUEST};
use crate::process::{LivenessProbe, CRAWLER_PROCESS};
use crate::storage::{FileStorage, FileStorageService, FileStorageType, StorageId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::sync::Arc;

pub const CRAWL: &str = "CRAWL";
pub const CRAWL_WAIT: &str = "CRAWL-WAIT";

/// Stale log of a previous crawler run, removed before a new one starts
pub const CRAWLER_LOG_FILE: &str = "crawler.log";

const STATES: [GraphState; 3] = [
    GraphState::new(INITIAL, CRAWL, "Validate the input and transition to CRAWL"),
    GraphState::new(
        CRAWL,
        CRAWL_WAIT,
        "Send a crawl request to the crawler and transition to CRAWL-WAIT",
    )
    .resume(ResumeBehavior::Error),
    GraphState::new(
        CRAWL_WAIT,
        END,
        "Wait for the crawler to finish retrieving the data",
    )
    .resume(ResumeBehavior::Retry),
];

/// Message carried through the recrawl states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecrawlMessage {
    /// Resolved from the crawl data's source during `INITIAL` if absent
    pub crawl_spec_id: Option<StorageId>,
    pub crawl_storage_id: StorageId,
    /// Id of the crawl request, once sent
    pub crawler_msg_id: i64,
}

impl RecrawlMessage {
    pub fn with_crawl_spec_id(self, crawl_spec_id: StorageId) -> Self {
        Self {
            crawl_spec_id: Some(crawl_spec_id),
            ..self
        }
    }

    pub fn with_crawl_storage_id(self, crawl_storage_id: StorageId) -> Self {
        Self {
            crawl_storage_id,
            ..self
        }
    }

    pub fn with_crawler_msg_id(self, crawler_msg_id: i64) -> Self {
        Self {
            crawler_msg_id,
            ..self
        }
    }
}

/// Recrawl of `crawl_data`, using the crawl spec it was produced from
pub fn recrawl_from_crawl_data(crawl_data: StorageId) -> RecrawlMessage {
    RecrawlMessage {
        crawl_spec_id: None,
        crawl_storage_id: crawl_data,
        crawler_msg_id: 0,
    }
}

/// Recrawl of `crawl_data` with an explicit crawl spec
pub fn recrawl_from_crawl_data_and_spec(
    crawl_data: StorageId,
    crawl_spec: StorageId,
) -> RecrawlMessage {
    RecrawlMessage {
        crawl_spec_id: Some(crawl_spec),
        crawl_storage_id: crawl_data,
        crawler_msg_id: 0,
    }
}

/// Name under which the recrawl of one crawl data area is checkpointed
pub fn actor_name(crawl_storage: StorageId) -> String {
    format!("recrawl-{}", crawl_storage)
}

/// State graph of a recrawl
pub struct RecrawlActor {
    outbox: Arc<dyn Outbox>,
    processes: Arc<dyn LivenessProbe>,
    storage: Arc<dyn FileStorageService>,
    wait_policy: WaitPolicy,
}

impl RecrawlActor {
    /// # Arguments
    ///
    /// * `outbox` - Outbox addressed to the crawler's inbox
    /// * `processes` - Liveness of the crawler process
    /// * `storage` - Storage registry
    pub fn new(
        outbox: Arc<dyn Outbox>,
        processes: Arc<dyn LivenessProbe>,
        storage: Arc<dyn FileStorageService>,
    ) -> Self {
        Self {
            outbox,
            processes,
            storage,
            wait_policy: WaitPolicy::default(),
        }
    }

    pub fn with_wait_policy(mut self, wait_policy: WaitPolicy) -> Self {
        self.wait_policy = wait_policy;
        self
    }

    async fn init(&self, message: RecrawlMessage) -> Result<RecrawlMessage, ActorError> {
        let crawl_storage = self.require_storage(message.crawl_storage_id)?;
        if crawl_storage.kind != FileStorageType::CrawlData {
            return Err(ActorError::Validation(format!(
                "Bad storage type {} for crawl data {}",
                crawl_storage.kind, crawl_storage.id
            )));
        }

        let spec_storage = match message.crawl_spec_id {
            Some(id) => self.require_storage(id)?,
            None => self.find_spec(&crawl_storage)?,
        };
        if spec_storage.kind != FileStorageType::CrawlSpec {
            return Err(ActorError::Validation(format!(
                "Bad storage type {} for crawl spec {}",
                spec_storage.kind, spec_storage.id
            )));
        }

        match tokio::fs::remove_file(crawl_storage.path.join(CRAWLER_LOG_FILE)).await {
            Ok(()) => tracing::debug!("Removed stale {} in {}", CRAWLER_LOG_FILE, crawl_storage.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            "Recrawling {} from spec {}",
            crawl_storage.path.display(),
            spec_storage.path.display()
        );

        Ok(message.with_crawl_spec_id(spec_storage.id))
    }

    async fn crawl(&self, message: RecrawlMessage) -> Result<RecrawlMessage, ActorError> {
        let crawl_spec = message
            .crawl_spec_id
            .ok_or_else(|| ActorError::Validation("No crawl spec resolved".to_string()))?;

        let request = CrawlRequest {
            crawl_spec,
            crawl_storage: message.crawl_storage_id,
        };
        let id = self
            .outbox
            .send_async(CRAWL_REQUEST, &serde_json::to_string(&request)?)
            .await?;

        tracing::info!("Sent crawl request #{} for storage {}", id, message.crawl_storage_id);
        Ok(message.with_crawler_msg_id(id))
    }

    async fn crawl_wait(&self, message: RecrawlMessage) -> Result<RecrawlMessage, ActorError> {
        let reply = wait_for_response(
            self.outbox.as_ref(),
            self.processes.as_ref(),
            CRAWLER_PROCESS,
            message.crawler_msg_id,
            &self.wait_policy,
        )
        .await?;

        if reply.state != MqMessageState::Ok {
            return Err(ActorError::RemoteTaskFailed(format!(
                "Crawler failed ({}): {}",
                reply.state.to_db_string(),
                reply.payload
            )));
        }

        Ok(message)
    }

    fn require_storage(&self, id: StorageId) -> Result<FileStorage, ActorError> {
        self.storage
            .get_storage(id)?
            .ok_or_else(|| ActorError::Validation(format!("Bad storage id {}", id)))
    }

    fn find_spec(&self, crawl_storage: &FileStorage) -> Result<FileStorage, ActorError> {
        self.storage
            .get_source_of(crawl_storage)?
            .into_iter()
            .find(|s| s.kind == FileStorageType::CrawlSpec)
            .ok_or_else(|| {
                ActorError::Validation(format!(
                    "No crawl spec among the sources of storage {}",
                    crawl_storage.id
                ))
            })
    }
}

#[async_trait]
impl StateGraph for RecrawlActor {
    type Message = RecrawlMessage;

    fn states(&self) -> &[GraphState] {
        &STATES
    }

    async fn transition(
        &self,
        state: &str,
        message: RecrawlMessage,
    ) -> Result<RecrawlMessage, ActorError> {
        match state {
            INITIAL => self.init(message).await,
            CRAWL => self.crawl(message).await,
            CRAWL_WAIT => self.crawl_wait(message).await,
            other => Err(ActorError::UnknownState(other.to_string())),
        }
    }
}
