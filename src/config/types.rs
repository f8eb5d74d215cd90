use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure for Tidewater
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub control: ControlConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
}

/// Control database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Path to the SQLite control database, relative to the config file
    #[serde(rename = "database-path")]
    pub database_path: PathBuf,
}

/// Timing of heartbeats and of the supervisor's liveness checks
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// How long a worker may take to show up before it counts as dead (seconds)
    #[serde(rename = "launch-window-secs")]
    pub launch_window_secs: u64,

    /// Sleep between liveness checks (milliseconds)
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Length of one wait for a worker's reply (milliseconds)
    #[serde(rename = "response-timeout-ms")]
    pub response_timeout_ms: u64,

    /// Age after which a heartbeat counts as missing (milliseconds)
    #[serde(rename = "heartbeat-staleness-ms")]
    pub heartbeat_staleness_ms: u64,

    /// How often workers write a heartbeat (milliseconds)
    #[serde(rename = "heartbeat-interval-ms")]
    pub heartbeat_interval_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            launch_window_secs: 30,
            poll_interval_ms: 1000,
            response_timeout_ms: 1000,
            heartbeat_staleness_ms: 10_000,
            heartbeat_interval_ms: 1000,
        }
    }
}

/// Crawl worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of fetches per domain and crawl
    #[serde(rename = "max-pages-per-domain")]
    pub max_pages_per_domain: u32,

    /// Maximum number of distinct URLs tracked per domain
    #[serde(rename = "max-known-urls", default = "default_max_known_urls")]
    pub max_known_urls: usize,

    /// Timeout for a single HTTP request (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How often the worker checks its inbox (milliseconds)
    #[serde(rename = "inbox-poll-ms", default = "default_inbox_poll_ms")]
    pub inbox_poll_ms: u64,
}

fn default_max_known_urls() -> usize {
    100_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_inbox_poll_ms() -> u64 {
    1000
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header: `Name/Version (+ContactURL; ContactEmail)`
    pub fn user_agent_string(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}
