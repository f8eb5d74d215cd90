//! URL handling for the crawl frontier
//!
//! This module provides URL normalization, host extraction and the crawl
//! scope test that decides which discovered links belong to a crawl target.

mod domain;
mod matcher;
mod normalize;

pub use domain::extract_domain;
pub use matcher::matches_scope;
pub use normalize::{normalize_parsed, normalize_url};

use url::Url;

/// The set of hosts one crawl target is allowed to visit
///
/// A scope is built from the crawl target's domain. A bare domain
/// (`example.com`) also admits its `www.` twin, since sites routinely serve
/// from both; an explicit wildcard (`*.example.com`) admits every subdomain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlScope {
    patterns: Vec<String>,
}

impl CrawlScope {
    /// Builds the scope for a crawl target domain
    ///
    /// # Examples
    ///
    /// ```
    /// use tidewater::url::CrawlScope;
    /// use url::Url;
    ///
    /// let scope = CrawlScope::for_domain("Example.com");
    /// assert!(scope.contains(&Url::parse("https://www.example.com/a").unwrap()));
    /// assert!(!scope.contains(&Url::parse("https://other.com/").unwrap()));
    /// ```
    pub fn for_domain(domain: &str) -> Self {
        let domain = domain.trim().to_lowercase();

        let patterns = if domain.starts_with("*.") {
            vec![domain]
        } else {
            let bare = domain.strip_prefix("www.").unwrap_or(&domain).to_string();
            let www = format!("www.{}", bare);
            vec![bare, www]
        };

        Self { patterns }
    }

    /// Returns true if the URL's host is inside this scope
    pub fn contains(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }

        match extract_domain(url) {
            Some(host) => self.patterns.iter().any(|p| matches_scope(p, &host)),
            None => false,
        }
    }

    /// The primary domain of this scope, as used for log file names
    pub fn domain(&self) -> &str {
        self.patterns
            .first()
            .map(|p| p.strip_prefix("*.").unwrap_or(p))
            .unwrap_or_default()
    }
}
