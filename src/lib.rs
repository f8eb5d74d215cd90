//! Tidewater: fault-tolerant crawl execution and orchestration
//!
//! This crate holds the pieces of a crawler pipeline that have to survive
//! crashes:
//! - an append-only fetch log and the resynchronizer that rebuilds a crawl
//!   frontier (and a clean log) from a log left behind by a dead worker
//! - a durable, checkpointed state machine ("actor") that drives a crawl
//!   worker to completion over a message queue, watching the worker's
//!   heartbeats to tell a slow worker from a dead one

pub mod actor;
pub mod config;
pub mod fetchlog;
pub mod frontier;
pub mod mq;
pub mod process;
pub mod recrawl;
pub mod resync;
pub mod storage;
pub mod url;
pub mod worker;

use thiserror::Error;

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Home directory {0} does not exist")]
    MissingHome(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use fetchlog::{FetchRecord, LogError, LogReader, LogRecorder};
pub use frontier::DomainCrawlFrontier;
pub use resync::{resynchronize, LogResynchronizer, ResyncReport};
pub use url::{extract_domain, normalize_url, CrawlScope};
