//! Crawl spec files
//!
//! A crawl spec storage area holds `crawl-spec.jsonl`, one JSON object per
//! line naming a domain and its seed URLs:
//!
//! ```text
//! {"domain":"example.com","urls":["https://example.com/"]}
//! ```

use crate::LogError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// File name of the spec inside a crawl spec storage area
pub const CRAWL_SPEC_FILE: &str = "crawl-spec.jsonl";

/// One domain to crawl
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSpecRecord {
    pub domain: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Reads every valid record of a spec file
///
/// Blank lines are ignored. Lines that do not parse, or that name an
/// unusable domain, are logged and skipped.
pub fn read_crawl_spec(path: &Path) -> std::io::Result<Vec<CrawlSpecRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<CrawlSpecRecord>(&line) {
            Ok(record) if is_valid_domain(&record.domain) => records.push(record),
            Ok(record) => {
                tracing::warn!("{}:{}: bad domain {:?}", path.display(), number + 1, record.domain)
            }
            Err(e) => tracing::warn!("{}:{}: {}", path.display(), number + 1, e),
        }
    }

    Ok(records)
}

/// Writes a spec file (used when preparing crawls)
pub fn write_crawl_spec(path: &Path, records: &[CrawlSpecRecord]) -> Result<(), LogError> {
    let mut out = String::new();
    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| LogError::Malformed(format!("unserializable spec record: {}", e)))?;
        out.push_str(&line);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

/// Domains become file names, so only host characters are accepted
fn is_valid_domain(domain: &str) -> bool {
    let bare = domain.strip_prefix("*.").unwrap_or(domain);
    !bare.is_empty()
        && !bare.starts_with('.')
        && bare
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}
