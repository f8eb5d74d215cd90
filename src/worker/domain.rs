//! Crawling a single domain into its fetch log

use super::fetcher::{FetchedDocument, Fetcher};
use super::spec::CrawlSpecRecord;
use crate::fetchlog::{extract_body, DocumentBody, HttpResponse, LogResult};
use crate::frontier::DomainCrawlFrontier;
use crate::resync::{LogResynchronizer, ResyncReport};
use crate::url::{normalize_url, CrawlScope};
use crate::{LogError, LogRecorder};
use scraper::Html;
use serde::Serialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Extension of per-domain fetch logs
pub const LOG_EXTENSION: &str = "tlog";

/// Path of the fetch log for `domain` inside a crawl data area
pub fn log_path(data_dir: &Path, domain: &str) -> PathBuf {
    let name = domain.strip_prefix("*.").unwrap_or(domain);
    data_dir.join(format!("{}.{}", name, LOG_EXTENSION))
}

/// A domain ready to be crawled
pub struct PreparedDomain {
    pub frontier: DomainCrawlFrontier,
    pub recorder: LogRecorder,
    /// Present when an earlier log was replayed
    pub resync: Option<ResyncReport>,
}

/// Builds the frontier and log for one domain of a crawl spec
///
/// When a log from an earlier crawl exists, it is replayed into a fresh log
/// next to it, which then replaces it; the frontier comes out of the replay.
/// Otherwise an empty log is created. In both cases the seed URLs are
/// queued unless already visited.
///
/// # Arguments
///
/// * `data_dir` - Crawl data area holding the logs
/// * `record` - The domain and its seeds
/// * `max_known` - Cap on distinct URLs tracked for the domain
pub fn prepare_domain(
    data_dir: &Path,
    record: &CrawlSpecRecord,
    max_known: usize,
) -> LogResult<PreparedDomain> {
    let scope = CrawlScope::for_domain(&record.domain);
    let path = log_path(data_dir, &record.domain);
    let mut frontier = DomainCrawlFrontier::new(scope).with_max_known(max_known);

    let (recorder, resync) = if path.exists() {
        let rebuilt = path.with_extension(format!("{}.new", LOG_EXTENSION));
        let mut recorder = LogRecorder::create(&rebuilt)?;
        let report = LogResynchronizer::new(&mut frontier, &mut recorder).run(&path)?;
        let rebuilt = recorder.finish()?;
        std::fs::rename(&rebuilt, &path)?;
        (LogRecorder::open_append(&path)?, Some(report))
    } else {
        (LogRecorder::create(&path)?, None)
    };

    for seed in &record.urls {
        match normalize_url(seed) {
            Ok(url) if !frontier.is_visited(&url) => {
                frontier.add_to_queue(url);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Skipping seed {:?} of {}: {}", seed, record.domain, e),
        }
    }

    Ok(PreparedDomain {
        frontier,
        recorder,
        resync,
    })
}

/// What one domain crawl did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlOutcome {
    pub fetched: usize,
    pub failed: usize,
    pub links_found: usize,
    pub pending: usize,
}

/// Fetches the pending URLs of one domain until the budget runs out
///
/// The budget counts visited URLs, including those visited by earlier
/// crawls whose records survived resynchronization.
pub struct DomainCrawler<'a> {
    fetcher: &'a dyn Fetcher,
    frontier: DomainCrawlFrontier,
    recorder: LogRecorder,
    budget: usize,
}

impl<'a> DomainCrawler<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, prepared: PreparedDomain, budget: usize) -> Self {
        Self {
            fetcher,
            frontier: prepared.frontier,
            recorder: prepared.recorder,
            budget,
        }
    }

    pub fn frontier(&self) -> &DomainCrawlFrontier {
        &self.frontier
    }

    /// Runs the crawl and closes the log
    pub async fn crawl(mut self) -> Result<CrawlOutcome, LogError> {
        let mut outcome = CrawlOutcome::default();

        while self.frontier.visited_len() < self.budget {
            let Some(url) = self.frontier.take_next() else {
                break;
            };
            self.frontier.mark_visited(&url);

            // Request record is on disk before the fetch starts
            self.recorder.record_request(&url)?;
            self.recorder.flush()?;

            match self.fetcher.fetch(&url).await {
                Ok(document) => {
                    self.recorder.record_response(
                        &url,
                        document.status,
                        &document.headers,
                        &document.body,
                    )?;
                    outcome.fetched += 1;
                    outcome.links_found += enqueue_links(&mut self.frontier, &url, document);
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    outcome.failed += 1;
                }
            }
        }

        outcome.pending = self.frontier.pending_len();
        let path = self.recorder.finish()?;
        tracing::info!(
            "Crawled {}: {} fetched, {} failed, {} left pending",
            path.display(),
            outcome.fetched,
            outcome.failed,
            outcome.pending
        );

        Ok(outcome)
    }
}

/// Queues the links a response leads to
///
/// Redirects contribute their target. HTML documents are parsed here, in a
/// synchronous scope, since the parsed tree cannot cross an await.
fn enqueue_links(frontier: &mut DomainCrawlFrontier, url: &Url, document: FetchedDocument) -> usize {
    if document.is_redirect() {
        return match document.header("location").and_then(|l| url.join(l).ok()) {
            Some(target) => usize::from(frontier.add_to_queue(target)),
            None => 0,
        };
    }

    let response = HttpResponse {
        status: document.status,
        headers: document.headers,
        body: document.body,
    };

    match extract_body(&response) {
        Ok(DocumentBody::Ok { body, .. }) => {
            let html = Html::parse_document(&body);
            frontier.enqueue_links_from_document(url, &html)
        }
        Ok(_) => 0,
        Err(e) => {
            tracing::debug!("Not extracting links from {}: {}", url, e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetchlog::{FetchRecord, LogReader};
    use crate::worker::fetcher::FetchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves canned pages and remembers what was asked for
    #[derive(Default)]
    struct FakeFetcher {
        pages: HashMap<String, (u16, Vec<(String, String)>, String)>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn html(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(
                url.to_string(),
                (
                    200,
                    vec![("content-type".to_string(), "text/html".to_string())],
                    body.to_string(),
                ),
            );
            self
        }

        fn redirect(mut self, url: &str, location: &str) -> Self {
            self.pages.insert(
                url.to_string(),
                (301, vec![("location".to_string(), location.to_string())], String::new()),
            );
            self
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, url: &Url) -> Result<FetchedDocument, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            match self.pages.get(url.as_str()) {
                Some((status, headers, body)) => Ok(FetchedDocument {
                    final_url: url.clone(),
                    status: *status,
                    headers: headers.clone(),
                    body: body.as_bytes().to_vec(),
                }),
                None => Err(FetchError::Network {
                    url: url.to_string(),
                    message: "connection refused".to_string(),
                }),
            }
        }
    }

    fn spec(urls: &[&str]) -> CrawlSpecRecord {
        CrawlSpecRecord {
            domain: "example.com".to_string(),
            urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    fn site() -> FakeFetcher {
        FakeFetcher::default()
            .html(
                "https://example.com/",
                r#"<a href="/a">a</a><a href="/b">b</a><a href="https://other.org/">x</a>"#,
            )
            .html("https://example.com/a", r#"<a href="/">home</a><a href="/c">c</a>"#)
            .redirect("https://example.com/b", "/c")
            .html("https://example.com/c", "<p>leaf</p>")
    }

    fn responses(path: &Path) -> Vec<String> {
        LogReader::open(path)
            .unwrap()
            .filter_map(|r| match r.unwrap() {
                FetchRecord::Response(rsp) => Some(rsp.header.target_uri),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fresh_crawl_follows_links_in_scope() {
        let dir = TempDir::new().unwrap();
        let fetcher = site();

        let prepared = prepare_domain(dir.path(), &spec(&["https://example.com/"]), 1000).unwrap();
        assert!(prepared.resync.is_none());

        let outcome = DomainCrawler::new(&fetcher, prepared, 100).crawl().await.unwrap();

        assert_eq!(outcome.fetched, 4);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.pending, 0);
        assert!(!fetcher.requested().iter().any(|u| u.contains("other.org")));

        let logged = responses(&log_path(dir.path(), "example.com"));
        assert_eq!(logged.len(), 4);
        assert_eq!(logged[0], "https://example.com/");
    }

    #[tokio::test]
    async fn test_budget_limits_fetches() {
        let dir = TempDir::new().unwrap();
        let fetcher = site();

        let prepared = prepare_domain(dir.path(), &spec(&["https://example.com/"]), 1000).unwrap();
        let outcome = DomainCrawler::new(&fetcher, prepared, 2).crawl().await.unwrap();

        assert_eq!(outcome.fetched, 2);
        assert_eq!(outcome.pending, 2);
        assert_eq!(fetcher.requested().len(), 2);
    }

    #[tokio::test]
    async fn test_second_crawl_resumes_from_log() {
        let dir = TempDir::new().unwrap();

        let first = site();
        let prepared = prepare_domain(dir.path(), &spec(&["https://example.com/"]), 1000).unwrap();
        DomainCrawler::new(&first, prepared, 2).crawl().await.unwrap();

        let second = site();
        let prepared = prepare_domain(dir.path(), &spec(&["https://example.com/"]), 1000).unwrap();
        let report = prepared.resync.as_ref().unwrap();
        assert_eq!(report.records_copied, 4);
        assert!(prepared.frontier.is_visited(&Url::parse("https://example.com/").unwrap()));

        let outcome = DomainCrawler::new(&second, prepared, 100).crawl().await.unwrap();

        // The seed was visited already; only the remaining pages are fetched
        assert!(!second.requested().contains(&"https://example.com/".to_string()));
        assert_eq!(outcome.fetched, 2);
        assert!(!log_path(dir.path(), "example.com")
            .with_extension("tlog.new")
            .exists());
        assert_eq!(responses(&log_path(dir.path(), "example.com")).len(), 4);
    }

    #[tokio::test]
    async fn test_crawl_after_cut_off_last_record() {
        let dir = TempDir::new().unwrap();
        let path = log_path(dir.path(), "example.com");

        let first = site();
        let prepared = prepare_domain(dir.path(), &spec(&["https://example.com/"]), 1000).unwrap();
        DomainCrawler::new(&first, prepared, 2).crawl().await.unwrap();
        assert_eq!(
            responses(&path),
            vec!["https://example.com/", "https://example.com/a"]
        );

        // Crash while the response for /a was being written
        let len = std::fs::metadata(&path).unwrap().len();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 10)
            .unwrap();

        let second = site();
        let prepared = prepare_domain(dir.path(), &spec(&["https://example.com/"]), 1000).unwrap();
        let report = prepared.resync.clone().unwrap();
        assert!(report.truncated);
        assert_eq!(report.records_copied, 3);

        let outcome = DomainCrawler::new(&second, prepared, 100).crawl().await.unwrap();
        assert_eq!(outcome.failed, 0);

        // /a was attempted before the crash, so only /b and its redirect target are fetched
        assert_eq!(
            second.requested(),
            vec!["https://example.com/b", "https://example.com/c"]
        );
        assert_eq!(
            responses(&path),
            vec![
                "https://example.com/",
                "https://example.com/b",
                "https://example.com/c"
            ]
        );

        let requests_for_a = LogReader::open(&path)
            .unwrap()
            .map(|r| r.unwrap())
            .filter(|r| {
                matches!(r, FetchRecord::Request(_)) && r.target_uri() == "https://example.com/a"
            })
            .count();
        assert_eq!(requests_for_a, 1);
        assert!(!path.with_extension("tlog.new").exists());
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_request_record() {
        let dir = TempDir::new().unwrap();
        let fetcher = FakeFetcher::default();

        let prepared = prepare_domain(dir.path(), &spec(&["https://example.com/gone"]), 10).unwrap();
        let outcome = DomainCrawler::new(&fetcher, prepared, 10).crawl().await.unwrap();
        assert_eq!(outcome.failed, 1);

        let records: Vec<_> = LogReader::open(&log_path(dir.path(), "example.com"))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], FetchRecord::Request(_)));
    }

    #[test]
    fn test_log_path_strips_wildcard() {
        let dir = Path::new("/data");
        assert_eq!(log_path(dir, "*.example.com"), Path::new("/data/example.com.tlog"));
        assert_eq!(log_path(dir, "example.com"), Path::new("/data/example.com.tlog"));
    }
}
