//! Durable, checkpointed state machines
//!
//! An actor walks a fixed graph of named states, from `INITIAL` to `END`.
//! Each state is an async function from message to message. After every
//! state the runner checkpoints the next state name and the returned message,
//! so a restarted process picks the actor up at the last completed step.
//!
//! Whether a state may run again after a restart is declared per state:
//! [`ResumeBehavior::Retry`] states re-run with the checkpointed message,
//! [`ResumeBehavior::Error`] states refuse, because they have side effects
//! that must not happen twice.

mod runner;
mod store;

pub use runner::{validate_graph, ActorRunner};
pub use store::{ActorCheckpoint, ActorStateStore, ActorStatus, MemoryActorStore, SqliteActorStore};

use crate::mq::{MqError, WaitError};
use crate::storage::StorageError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Name of the state every actor starts in
pub const INITIAL: &str = "INITIAL";

/// Name of the implicit terminal state
pub const END: &str = "END";

/// Errors that end an actor
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Resumed in state {0}, which must not be re-run")]
    ResumeForbidden(String),

    #[error("Invalid state graph: {0}")]
    InvalidGraph(String),

    #[error("Unknown state: {0}")]
    UnknownState(String),

    #[error("Remote task failed: {0}")]
    RemoteTaskFailed(String),

    #[error("Process {0} did not launch")]
    ProcessDidNotLaunch(String),

    #[error("Process {0} died and did not re-launch")]
    ProcessDiedWithoutRelaunch(String),

    #[error("Actor {0} is already running")]
    AlreadyRunning(String),

    #[error("Actor {0} has no checkpoint")]
    NoCheckpoint(String),

    #[error("Actor previously failed in state {state}: {error}")]
    PreviouslyFailed { state: String, error: String },

    #[error("Checkpoint store error: {0}")]
    Store(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message queue error: {0}")]
    Mq(#[from] MqError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<WaitError> for ActorError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::DidNotLaunch(process) => Self::ProcessDidNotLaunch(process),
            WaitError::DiedWithoutRelaunch(process) => Self::ProcessDiedWithoutRelaunch(process),
            WaitError::Mq(e) => Self::Mq(e),
        }
    }
}

/// What to do when a restart finds an actor checkpointed at a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumeBehavior {
    /// Fail the actor instead of running the state again
    Error,
    /// Run the state again with the checkpointed message
    #[default]
    Retry,
}

/// Declaration of one state in a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphState {
    pub name: &'static str,
    /// State to enter after this one succeeds; [`END`] finishes the actor
    pub next: &'static str,
    pub resume: ResumeBehavior,
    pub description: &'static str,
}

impl GraphState {
    pub const fn new(name: &'static str, next: &'static str, description: &'static str) -> Self {
        Self {
            name,
            next,
            resume: ResumeBehavior::Retry,
            description,
        }
    }

    pub const fn resume(mut self, resume: ResumeBehavior) -> Self {
        self.resume = resume;
        self
    }
}

/// A state graph an [`ActorRunner`] can drive
#[async_trait]
pub trait StateGraph: Send + Sync {
    /// Message carried from state to state and stored in checkpoints
    type Message: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Every state of the graph except the implicit `END`
    fn states(&self) -> &[GraphState];

    /// Runs the logic of `state`, returning the message for the next state
    async fn transition(
        &self,
        state: &str,
        message: Self::Message,
    ) -> Result<Self::Message, ActorError>;
}
