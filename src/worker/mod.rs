//! Crawl worker
//!
//! The worker is the process on the other end of the recrawl actor's
//! `CrawlRequest`. It claims requests from the `crawler` inbox, crawls every
//! domain of the named crawl spec into per-domain fetch logs in the crawl
//! data area, and replies `OK` or `ERR`. While it runs it keeps a heartbeat
//! so supervisors can tell it is alive, and takes back requests left claimed
//! by crawler instances that died mid-crawl.

mod domain;
mod fetcher;
mod spec;

pub use domain::{log_path, prepare_domain, CrawlOutcome, DomainCrawler, PreparedDomain, LOG_EXTENSION};
pub use fetcher::{build_http_client, FetchError, FetchedDocument, Fetcher, HttpFetcher};
pub use spec::{read_crawl_spec, write_crawl_spec, CrawlSpecRecord, CRAWL_SPEC_FILE};

use crate::config::Config;
use crate::mq::{CrawlRequest, MqError, MqInbox, MqMessage, MqMessageState, CRAWL_REQUEST};
use crate::process::ProcessHeartbeater;
use crate::recrawl::CRAWLER_LOG_FILE;
use crate::storage::{FileStorage, FileStorageService, FileStorageType, StorageId};
use anyhow::{anyhow, bail, Context};
use serde::Serialize;
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Tunables of the worker loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub max_pages_per_domain: usize,
    pub max_known_urls: usize,
    pub inbox_poll: Duration,
    pub heartbeat_interval: Duration,
    /// Heartbeat age after which another crawler's claim is taken back
    pub claim_staleness: Duration,
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_pages_per_domain: config.crawler.max_pages_per_domain as usize,
            max_known_urls: config.crawler.max_known_urls,
            inbox_poll: Duration::from_millis(config.crawler.inbox_poll_ms),
            heartbeat_interval: Duration::from_millis(config.liveness.heartbeat_interval_ms),
            claim_staleness: Duration::from_millis(config.liveness.heartbeat_staleness_ms),
        }
    }
}

/// Totals of one crawl request, sent back as the reply payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSummary {
    pub domains: usize,
    pub fetched: usize,
    pub failed: usize,
}

impl CrawlSummary {
    fn add(&mut self, outcome: &CrawlOutcome) {
        self.domains += 1;
        self.fetched += outcome.fetched;
        self.failed += outcome.failed;
    }
}

/// Serves crawl requests from the `crawler` inbox
pub struct CrawlWorker {
    inbox: MqInbox,
    storage: Arc<dyn FileStorageService>,
    fetcher: Arc<dyn Fetcher>,
    heartbeater: ProcessHeartbeater,
    settings: WorkerSettings,
}

impl CrawlWorker {
    /// The inbox claims on behalf of the heartbeater's process instance.
    pub fn new(
        inbox: MqInbox,
        storage: Arc<dyn FileStorageService>,
        fetcher: Arc<dyn Fetcher>,
        heartbeater: ProcessHeartbeater,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            inbox: inbox.with_owner(&heartbeater.instance_id().to_string()),
            storage,
            fetcher,
            heartbeater,
            settings,
        }
    }

    /// Serves requests until `shutdown` completes
    ///
    /// A request being handled when shutdown is signalled is finished first.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), MqError> {
        tracing::info!(
            "Crawler {} listening on inbox {}",
            self.heartbeater.process_name(),
            self.inbox.name()
        );
        let heartbeat = self.heartbeater.start(self.settings.heartbeat_interval);
        tokio::pin!(shutdown);

        let result = loop {
            if let Err(e) = self.inbox.reclaim_abandoned(self.settings.claim_staleness) {
                break Err(e);
            }
            let requests = match self.inbox.poll_new() {
                Ok(requests) => requests,
                Err(e) => break Err(e),
            };
            if let Err(e) = self.serve_all(requests).await {
                break Err(e);
            }

            tokio::select! {
                _ = &mut shutdown => break Ok(()),
                _ = tokio::time::sleep(self.settings.inbox_poll) => {}
            }
        };

        if let Err(e) = heartbeat.stop() {
            tracing::warn!("Failed to record crawler stop: {}", e);
        }
        tracing::info!("Crawler {} stopped", self.heartbeater.process_name());
        result
    }

    async fn serve_all(&self, requests: Vec<MqMessage>) -> Result<(), MqError> {
        for request in requests {
            self.serve(&request).await?;
        }
        Ok(())
    }

    /// Handles one claimed request and writes its reply
    pub async fn serve(&self, request: &MqMessage) -> Result<(), MqError> {
        tracing::info!("Handling {} #{}", request.function, request.id);

        let (state, payload) = match self.handle(request).await {
            Ok(summary) => (
                MqMessageState::Ok,
                serde_json::to_string(&summary).unwrap_or_default(),
            ),
            Err(e) => {
                tracing::error!("Request #{} failed: {:#}", request.id, e);
                (MqMessageState::Err, format!("{:#}", e))
            }
        };

        self.heartbeater.set_progress(None);
        self.inbox.reply(request, state, &payload)?;
        Ok(())
    }

    async fn handle(&self, request: &MqMessage) -> anyhow::Result<CrawlSummary> {
        if request.function != CRAWL_REQUEST {
            bail!("Unknown function {:?}", request.function);
        }

        let crawl: CrawlRequest =
            serde_json::from_str(&request.payload).context("Malformed crawl request")?;
        let spec = self.require_storage(crawl.crawl_spec, FileStorageType::CrawlSpec)?;
        let data = self.require_storage(crawl.crawl_storage, FileStorageType::CrawlData)?;

        let spec_path = spec.path.join(CRAWL_SPEC_FILE);
        let records = read_crawl_spec(&spec_path)
            .with_context(|| format!("Cannot read {}", spec_path.display()))?;
        tokio::fs::create_dir_all(&data.path)
            .await
            .with_context(|| format!("Cannot create {}", data.path.display()))?;

        let mut summary = CrawlSummary::default();
        for (index, record) in records.iter().enumerate() {
            self.heartbeater
                .set_progress(Some((index * 100 / records.len()) as u8));

            let outcome = self.crawl_domain(&data.path, record).await?;
            append_crawler_log(&data.path, &record.domain, &outcome)?;
            summary.add(&outcome);
        }
        self.heartbeater.set_progress(Some(100));

        tracing::info!(
            "Crawl of {} finished: {} domains, {} fetched, {} failed",
            data.path.display(),
            summary.domains,
            summary.fetched,
            summary.failed
        );
        Ok(summary)
    }

    async fn crawl_domain(
        &self,
        data_dir: &Path,
        record: &CrawlSpecRecord,
    ) -> anyhow::Result<CrawlOutcome> {
        let dir = data_dir.to_path_buf();
        let owned = record.clone();
        let max_known = self.settings.max_known_urls;

        let prepared = tokio::task::spawn_blocking(move || prepare_domain(&dir, &owned, max_known))
            .await
            .context("Domain preparation panicked")?
            .with_context(|| format!("Cannot prepare {}", record.domain))?;

        DomainCrawler::new(
            self.fetcher.as_ref(),
            prepared,
            self.settings.max_pages_per_domain,
        )
        .crawl()
        .await
        .with_context(|| format!("Crawl of {} failed", record.domain))
    }

    fn require_storage(&self, id: StorageId, kind: FileStorageType) -> anyhow::Result<FileStorage> {
        let storage = self
            .storage
            .get_storage(id)?
            .ok_or_else(|| anyhow!("Bad storage id {}", id))?;
        if storage.kind != kind {
            bail!("Storage {} is {}, expected {}", id, storage.kind, kind);
        }
        Ok(storage)
    }
}

/// One line per finished domain
fn append_crawler_log(data_dir: &Path, domain: &str, outcome: &CrawlOutcome) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_dir.join(CRAWLER_LOG_FILE))?;
    writeln!(
        file,
        "{} {} fetched={} failed={} pending={}",
        chrono::Utc::now().to_rfc3339(),
        domain,
        outcome.fetched,
        outcome.failed,
        outcome.pending
    )
}
