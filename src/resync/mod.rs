//! Crawl state recovery from an existing fetch log
//!
//! When a crawl worker dies mid-crawl it leaves a fetch log behind whose
//! tail may be half written. Before crawling that domain again, the next
//! worker replays the log twice:
//!
//! 1. **Frontier pass**: every request marks its URL visited; every response
//!    (and every revisit under the unchanged-content profile) also marks its
//!    URL visited and, if the stored body is a readable HTML document, queues
//!    the document's in-scope links.
//! 2. **Copy pass**: the log is read again from the start and every record
//!    that reads cleanly is copied, re-verified, into a fresh log.
//!
//! Both passes stop quietly at the first unreadable record. The frontier is
//! only ever derived from cleanly read records, and the damaged tail never
//! reaches the new log.

use crate::fetchlog::{
    extract_body, DocumentBody, FetchRecord, LogError, LogReader, LogRecorder, LogResult,
};
use crate::frontier::DomainCrawlFrontier;
use crate::url::CrawlScope;
use scraper::Html;
use std::path::Path;
use url::Url;

/// What the frontier pass made of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The record was applied to the frontier; `links` new URLs were queued
    Accepted { links: usize },

    /// The record could not be applied in full and was skipped
    Skipped { reason: String },
}

/// Counters from one resynchronization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Records read cleanly during the frontier pass
    pub records_read: usize,
    /// Records the frontier pass skipped (bad target or body)
    pub records_skipped: usize,
    /// Records copied into the new log
    pub records_copied: usize,
    /// URLs queued from stored documents
    pub links_enqueued: usize,
    /// True if reading ended on a damaged record instead of a clean end of log
    pub truncated: bool,
}

/// Replays one existing log into a frontier and a recorder
pub struct LogResynchronizer<'a> {
    frontier: &'a mut DomainCrawlFrontier,
    recorder: &'a mut LogRecorder,
}

impl<'a> LogResynchronizer<'a> {
    pub fn new(frontier: &'a mut DomainCrawlFrontier, recorder: &'a mut LogRecorder) -> Self {
        Self { frontier, recorder }
    }

    /// Runs both passes over the log at `existing`
    ///
    /// Only failing to open the log is an error. Damage inside the log ends
    /// the affected pass and is reported through [`ResyncReport::truncated`].
    pub fn run(&mut self, existing: &Path) -> LogResult<ResyncReport> {
        let mut report = ResyncReport::default();

        self.frontier_pass(existing, &mut report)?;
        self.copy_pass(existing, &mut report)?;
        self.recorder.flush()?;

        tracing::info!(
            "Resynchronized {}: {} records read, {} skipped, {} copied, {} links queued{}",
            existing.display(),
            report.records_read,
            report.records_skipped,
            report.records_copied,
            report.links_enqueued,
            if report.truncated { " (log was truncated)" } else { "" }
        );

        Ok(report)
    }

    fn frontier_pass(&mut self, existing: &Path, report: &mut ResyncReport) -> LogResult<()> {
        let reader = LogReader::open(existing)?;

        for item in reader {
            let record = match item {
                Ok(record) => record,
                Err(e) => {
                    tracing::info!("Frontier pass over {} ended early: {}", existing.display(), e);
                    report.truncated = true;
                    break;
                }
            };

            report.records_read += 1;
            match self.accept(&record) {
                RecordOutcome::Accepted { links } => report.links_enqueued += links,
                RecordOutcome::Skipped { reason } => {
                    tracing::info!("Skipping record for {}: {}", record.target_uri(), reason);
                    report.records_skipped += 1;
                }
            }
        }

        Ok(())
    }

    fn copy_pass(&mut self, existing: &Path, report: &mut ResyncReport) -> LogResult<()> {
        let reader = LogReader::open(existing)?;

        for item in reader {
            let record = match item {
                Ok(record) => record,
                Err(e) => {
                    tracing::info!("Copy pass over {} ended early: {}", existing.display(), e);
                    break;
                }
            };

            if let Err(e) = self.recorder.resync(&record) {
                tracing::info!(
                    "Copy pass over {} stopped at {}: {}",
                    existing.display(),
                    record.target_uri(),
                    e
                );
                break;
            }
            report.records_copied += 1;
        }

        Ok(())
    }

    /// Applies one record to the frontier
    pub fn accept(&mut self, record: &FetchRecord) -> RecordOutcome {
        let url = match Url::parse(record.target_uri()) {
            Ok(url) => url,
            Err(e) => {
                return RecordOutcome::Skipped {
                    reason: format!("bad target URI: {}", e),
                }
            }
        };

        self.frontier.mark_visited(&url);

        let http = match record {
            FetchRecord::Request(_) => return RecordOutcome::Accepted { links: 0 },
            FetchRecord::Response(response) => response.http(),
            FetchRecord::Revisit(revisit) if revisit.is_unchanged() => revisit.http(),
            FetchRecord::Revisit(_) => return RecordOutcome::Accepted { links: 0 },
        };

        let body = match http.and_then(|response| extract_body(&response)) {
            Ok(DocumentBody::Ok { body, .. }) => body,
            Ok(_) => return RecordOutcome::Accepted { links: 0 },
            Err(e) => {
                return RecordOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
        };

        let document = Html::parse_document(&body);
        let links = self.frontier.enqueue_links_from_document(&url, &document);
        RecordOutcome::Accepted { links }
    }
}

/// Rebuilds a frontier and a clean log from the log at `existing`
///
/// The new log is written to `new_log`, which must not be the same file.
/// The returned recorder stays open so the caller can keep appending.
pub fn resynchronize(
    existing: &Path,
    new_log: &Path,
    scope: CrawlScope,
) -> Result<(DomainCrawlFrontier, LogRecorder, ResyncReport), LogError> {
    if existing == new_log {
        return Err(LogError::Malformed(format!(
            "cannot resynchronize {} onto itself",
            existing.display()
        )));
    }

    let mut frontier = DomainCrawlFrontier::new(scope);
    let mut recorder = LogRecorder::create(new_log)?;

    let report = LogResynchronizer::new(&mut frontier, &mut recorder).run(existing)?;

    Ok((frontier, recorder, report))
}
