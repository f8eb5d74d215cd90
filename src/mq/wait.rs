//! Waiting for a remote worker's reply while watching that it stays alive

use super::{MqError, MqMessage, Outbox};
use crate::config::LivenessConfig;
use crate::process::{wait_for_process, LivenessProbe};
use std::time::Duration;
use thiserror::Error;

/// Timing of the wait protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// How long the worker may take to show up, at first and after a timeout
    pub launch_window: Duration,
    /// Sleep between liveness checks
    pub liveness_poll: Duration,
    /// How long one reply wait lasts before liveness is checked again
    pub response_timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            launch_window: Duration::from_secs(30),
            liveness_poll: Duration::from_secs(1),
            response_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&LivenessConfig> for WaitPolicy {
    fn from(config: &LivenessConfig) -> Self {
        Self {
            launch_window: Duration::from_secs(config.launch_window_secs),
            liveness_poll: Duration::from_millis(config.poll_interval_ms),
            response_timeout: Duration::from_millis(config.response_timeout_ms),
        }
    }
}

/// Ways the wait protocol can fail
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("Process {0} did not launch")]
    DidNotLaunch(String),

    #[error("Process {0} died and did not re-launch")]
    DiedWithoutRelaunch(String),

    #[error(transparent)]
    Mq(#[from] MqError),
}

/// Waits for the reply to `msg_id` from a worker of class `process_base`
///
/// The worker must be seen running within the launch window before any
/// reply wait starts. After that, reply waits of `response_timeout` each
/// alternate with liveness checks; if the worker is gone for a whole launch
/// window, the wait fails. Whatever state the reply carries is returned
/// as-is.
pub async fn wait_for_response(
    outbox: &dyn Outbox,
    probe: &dyn LivenessProbe,
    process_base: &str,
    msg_id: i64,
    policy: &WaitPolicy,
) -> Result<MqMessage, WaitError> {
    if !wait_for_process(
        probe,
        process_base,
        policy.launch_window,
        policy.liveness_poll,
    )
    .await
    {
        return Err(WaitError::DidNotLaunch(process_base.to_string()));
    }

    loop {
        match outbox.wait_response(msg_id, policy.response_timeout).await {
            Ok(reply) => return Ok(reply),
            Err(MqError::Timeout(_)) => {
                if !wait_for_process(
                    probe,
                    process_base,
                    policy.launch_window,
                    policy.liveness_poll,
                )
                .await
                {
                    return Err(WaitError::DiedWithoutRelaunch(process_base.to_string()));
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}
