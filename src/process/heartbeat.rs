//! Heartbeat records

use std::time::Duration;

/// Status a process reports while it is working
pub const STATUS_RUNNING: &str = "RUNNING";

/// Status a process reports as its last heartbeat before exiting
pub const STATUS_STOPPED: &str = "STOPPED";

/// A heartbeat older than this marks the process as missing
pub const DEFAULT_STALENESS: Duration = Duration::from_millis(10_000);

/// Latest heartbeat of one process instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHeartbeat {
    /// Human readable instance name, e.g. `crawler:3f2a9c1e`
    pub process_id: String,
    /// Process class, e.g. `crawler`
    pub process_base: String,
    pub uuid: String,
    /// Milliseconds since the heartbeat was written
    pub last_seen_millis: i64,
    /// Progress in percent, if the process reports one
    pub progress: Option<u8>,
    pub status: String,
}

impl ProcessHeartbeat {
    /// True if the heartbeat is older than the default staleness threshold
    pub fn is_missing(&self) -> bool {
        self.is_missing_after(DEFAULT_STALENESS)
    }

    pub fn is_missing_after(&self, staleness: Duration) -> bool {
        self.last_seen_millis > staleness.as_millis() as i64
    }

    pub fn is_stopped(&self) -> bool {
        self.status == STATUS_STOPPED
    }

    /// True if the process is neither missing nor stopped
    pub fn is_running(&self, staleness: Duration) -> bool {
        !self.is_missing_after(staleness) && !self.is_stopped()
    }

    /// Renders progress as a fixed-width bar, e.g. `[#####.....]  50%`
    pub fn progress_bar(&self, width: usize) -> String {
        match self.progress {
            Some(progress) => {
                let progress = progress.min(100) as usize;
                let filled = progress * width / 100;
                format!(
                    "[{}{}] {:>3}%",
                    "#".repeat(filled),
                    ".".repeat(width - filled),
                    progress
                )
            }
            None => format!("[{}]    -", " ".repeat(width)),
        }
    }
}
