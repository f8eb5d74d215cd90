//! Process liveness
//!
//! Worker processes write a heartbeat to the control database every few
//! seconds. The supervisor reads them back to tell a busy worker from a dead
//! one: a process class is running if any of its instances has a recent
//! heartbeat that does not say `STOPPED`.

mod heartbeat;
mod service;

pub use heartbeat::{ProcessHeartbeat, DEFAULT_STALENESS, STATUS_RUNNING, STATUS_STOPPED};
pub use service::{HeartbeatTask, ProcessHeartbeater, ProcessService};

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Process class of the crawl worker
pub const CRAWLER_PROCESS: &str = "crawler";

/// Answers whether some instance of a process class is alive
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_running(&self, process_base: &str) -> bool;
}

/// Polls `probe` until `process_base` is running or `window` has passed
///
/// # Arguments
///
/// * `probe` - Liveness source
/// * `process_base` - Process class to wait for
/// * `window` - How long to keep polling
/// * `poll_interval` - Sleep between polls
///
/// # Returns
///
/// `true` as soon as the process is seen running, `false` if it never was
/// within the window.
pub async fn wait_for_process(
    probe: &dyn LivenessProbe,
    process_base: &str,
    window: Duration,
    poll_interval: Duration,
) -> bool {
    let deadline = Instant::now() + window;

    loop {
        if probe.is_running(process_base).await {
            return true;
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::debug!("{} not seen running within {:?}", process_base, window);
            return false;
        }

        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}
