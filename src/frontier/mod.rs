//! Per-domain crawl frontier
//!
//! The frontier tracks, for one crawl target, which URLs have been visited
//! and which have been discovered but not fetched yet. It is owned by a
//! single worker task and never shared.

mod links;

pub use links::extract_links;

use crate::url::{normalize_parsed, CrawlScope};
use scraper::Html;
use std::collections::{HashSet, VecDeque};
use url::Url;

/// Default cap on how many distinct URLs one frontier will track
pub const DEFAULT_MAX_KNOWN: usize = 100_000;

/// Visited set and pending queue for one crawl target
///
/// Visiting is monotonic: once a URL is marked visited it is never handed
/// out by [`DomainCrawlFrontier::take_next`] again, and rediscovering it is
/// a no-op.
#[derive(Debug, Clone)]
pub struct DomainCrawlFrontier {
    scope: CrawlScope,
    visited: HashSet<String>,
    /// URLs currently pending; authoritative over `queue`
    queued: HashSet<String>,
    queue: VecDeque<Url>,
    max_known: usize,
}

impl DomainCrawlFrontier {
    pub fn new(scope: CrawlScope) -> Self {
        Self {
            scope,
            visited: HashSet::new(),
            queued: HashSet::new(),
            queue: VecDeque::new(),
            max_known: DEFAULT_MAX_KNOWN,
        }
    }

    /// Caps the number of distinct URLs (visited plus pending) the frontier accepts
    pub fn with_max_known(mut self, max_known: usize) -> Self {
        self.max_known = max_known;
        self
    }

    pub fn scope(&self) -> &CrawlScope {
        &self.scope
    }

    /// Marks a URL as visited
    ///
    /// Returns true if the URL was not visited before. A pending entry for the
    /// same URL is withdrawn.
    pub fn mark_visited(&mut self, url: &Url) -> bool {
        let Some(key) = frontier_key(url) else {
            return false;
        };

        self.queued.remove(&key);
        self.visited.insert(key)
    }

    pub fn is_visited(&self, url: &Url) -> bool {
        frontier_key(url).is_some_and(|key| self.visited.contains(&key))
    }

    /// True if the URL lies inside this frontier's crawl scope
    pub fn is_in_scope(&self, url: &Url) -> bool {
        self.scope.contains(url)
    }

    /// Adds a URL to the pending queue
    ///
    /// Returns false (and does nothing) if the URL is out of scope, already
    /// visited, already pending, or the frontier is full.
    pub fn add_to_queue(&mut self, url: Url) -> bool {
        if !self.scope.contains(&url) {
            return false;
        }

        let Ok(url) = normalize_parsed(url) else {
            return false;
        };
        let key = url.to_string();

        if self.visited.contains(&key) || self.queued.contains(&key) {
            return false;
        }

        if self.known_len() >= self.max_known {
            tracing::debug!(
                "Frontier for {} is full, dropping {}",
                self.scope.domain(),
                key
            );
            return false;
        }

        self.queued.insert(key);
        self.queue.push_back(url);
        true
    }

    /// Extracts the links of a parsed document and queues the in-scope, unseen ones
    ///
    /// Returns the number of URLs newly queued.
    pub fn enqueue_links_from_document(&mut self, source: &Url, document: &Html) -> usize {
        extract_links(document, source)
            .into_iter()
            .filter(|link| self.add_to_queue(link.clone()))
            .count()
    }

    /// Pops the next pending URL
    ///
    /// URLs that were marked visited while waiting in the queue are skipped.
    pub fn take_next(&mut self) -> Option<Url> {
        while let Some(url) = self.queue.pop_front() {
            if self.queued.remove(url.as_str()) {
                return Some(url);
            }
        }
        None
    }

    /// Pending URLs in queue order
    pub fn pending(&self) -> impl Iterator<Item = &Url> {
        self.queue
            .iter()
            .filter(|url| self.queued.contains(url.as_str()))
    }

    pub fn pending_len(&self) -> usize {
        self.queued.len()
    }

    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }

    pub fn known_len(&self) -> usize {
        self.visited.len() + self.queued.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.queued.is_empty()
    }
}

fn frontier_key(url: &Url) -> Option<String> {
    normalize_parsed(url.clone()).ok().map(|u| u.to_string())
}
