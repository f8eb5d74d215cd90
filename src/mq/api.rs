use crate::storage::StorageId;
use serde::{Deserialize, Serialize};

/// Function name of a crawl request
pub const CRAWL_REQUEST: &str = "CrawlRequest";

/// Asks the crawler to crawl the domains in `crawl_spec` into `crawl_storage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRequest {
    pub crawl_spec: StorageId,
    pub crawl_storage: StorageId,
}
