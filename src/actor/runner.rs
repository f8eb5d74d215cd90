use super::store::{ActorCheckpoint, ActorStateStore, ActorStatus};
use super::{ActorError, GraphState, ResumeBehavior, StateGraph, END, INITIAL};
use chrono::Utc;
use std::collections::HashSet;

/// Checks that a state graph is well formed
///
/// `INITIAL` must be declared, names must be unique, `END` must not be
/// declared, and every `next` must name a declared state or `END`.
pub fn validate_graph(states: &[GraphState]) -> Result<(), ActorError> {
    let mut names = HashSet::new();
    for state in states {
        if state.name == END {
            return Err(ActorError::InvalidGraph(format!(
                "{} is implicit and cannot be declared",
                END
            )));
        }
        if !names.insert(state.name) {
            return Err(ActorError::InvalidGraph(format!(
                "state {} declared twice",
                state.name
            )));
        }
    }

    if !names.contains(INITIAL) {
        return Err(ActorError::InvalidGraph(format!("no {} state", INITIAL)));
    }

    for state in states {
        if state.next != END && !names.contains(state.next) {
            return Err(ActorError::InvalidGraph(format!(
                "state {} leads to undeclared state {}",
                state.name, state.next
            )));
        }
    }

    Ok(())
}

/// Drives one named actor through its state graph
pub struct ActorRunner<G, S> {
    name: String,
    graph: G,
    store: S,
}

impl<G, S> ActorRunner<G, S>
where
    G: StateGraph,
    S: ActorStateStore,
{
    /// Creates a runner after validating the graph
    pub fn new(name: &str, graph: G, store: S) -> Result<Self, ActorError> {
        validate_graph(graph.states())?;

        Ok(Self {
            name: name.to_string(),
            graph,
            store,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    /// The actor's current checkpoint, if it ever ran
    pub fn status(&self) -> Result<Option<ActorCheckpoint>, ActorError> {
        Ok(self.store.load(&self.name)?)
    }

    /// Starts the actor at `INITIAL` and runs it to the end
    ///
    /// Refuses to start over an actor that is still checkpointed as running;
    /// use [`ActorRunner::resume`] for that.
    pub async fn start(&self, message: G::Message) -> Result<G::Message, ActorError> {
        if let Some(checkpoint) = self.store.load(&self.name)? {
            if checkpoint.status == ActorStatus::Running {
                return Err(ActorError::AlreadyRunning(self.name.clone()));
            }
        }

        let message_json = serde_json::to_string(&message)?;
        self.checkpoint(INITIAL, message_json, ActorStatus::Running, None)?;

        tracing::info!("Starting actor {}", self.name);
        self.run_from(INITIAL, message).await
    }

    /// Picks the actor up from its checkpoint
    ///
    /// A finished actor returns its final message without running anything.
    /// A failed actor returns its recorded failure. A running actor resumes
    /// at the checkpointed state if that state's [`ResumeBehavior`] allows it;
    /// otherwise the actor is marked failed and
    /// [`ActorError::ResumeForbidden`] is returned.
    pub async fn resume(&self) -> Result<G::Message, ActorError> {
        let checkpoint = self
            .store
            .load(&self.name)?
            .ok_or_else(|| ActorError::NoCheckpoint(self.name.clone()))?;

        match checkpoint.status {
            ActorStatus::Finished => {
                tracing::info!("Actor {} already finished", self.name);
                return Ok(serde_json::from_str(&checkpoint.message_json)?);
            }
            ActorStatus::Failed => {
                return Err(ActorError::PreviouslyFailed {
                    state: checkpoint.state_name,
                    error: checkpoint.error.unwrap_or_default(),
                })
            }
            ActorStatus::Running => {}
        }

        let message: G::Message = serde_json::from_str(&checkpoint.message_json)?;

        if checkpoint.state_name == END {
            self.checkpoint(END, checkpoint.message_json, ActorStatus::Finished, None)?;
            return Ok(message);
        }

        let state = self.state(&checkpoint.state_name)?;
        if state.resume == ResumeBehavior::Error {
            let err = ActorError::ResumeForbidden(state.name.to_string());
            tracing::error!("Actor {}: {}", self.name, err);
            self.checkpoint(
                state.name,
                checkpoint.message_json,
                ActorStatus::Failed,
                Some(err.to_string()),
            )?;
            return Err(err);
        }

        tracing::info!("Resuming actor {} at {}", self.name, state.name);
        self.run_from(state.name, message).await
    }

    async fn run_from(
        &self,
        state_name: &str,
        mut message: G::Message,
    ) -> Result<G::Message, ActorError> {
        let mut state = self.state(state_name)?;

        loop {
            tracing::debug!("Actor {} entering {}: {}", self.name, state.name, state.description);
            let message_json = serde_json::to_string(&message)?;

            let next_message = match self.graph.transition(state.name, message).await {
                Ok(next_message) => next_message,
                Err(e) => {
                    tracing::error!("Actor {} failed in {}: {}", self.name, state.name, e);
                    self.checkpoint(
                        state.name,
                        message_json,
                        ActorStatus::Failed,
                        Some(e.to_string()),
                    )?;
                    return Err(e);
                }
            };

            let next_json = serde_json::to_string(&next_message)?;

            if state.next == END {
                self.checkpoint(END, next_json, ActorStatus::Finished, None)?;
                tracing::info!("Actor {} finished", self.name);
                return Ok(next_message);
            }

            self.checkpoint(state.next, next_json, ActorStatus::Running, None)?;
            state = self.state(state.next)?;
            message = next_message;
        }
    }

    fn state(&self, name: &str) -> Result<GraphState, ActorError> {
        self.graph
            .states()
            .iter()
            .find(|s| s.name == name)
            .copied()
            .ok_or_else(|| ActorError::UnknownState(name.to_string()))
    }

    fn checkpoint(
        &self,
        state_name: &str,
        message_json: String,
        status: ActorStatus,
        error: Option<String>,
    ) -> Result<(), ActorError> {
        self.store.save(&ActorCheckpoint {
            actor_name: self.name.clone(),
            state_name: state_name.to_string(),
            message_json,
            status,
            error,
            updated_at: Utc::now(),
        })?;
        Ok(())
    }
}
