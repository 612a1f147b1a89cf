//! Session API over a set of named graphs
//!
//! [`SessionService`] is the outer surface: callers start sessions by graph
//! id and resume them by session id alone. Every registered graph shares one
//! checkpointer, and the graph id recorded on a session's checkpoints picks
//! the graph that resumes it.
//!
//! Execution errors do not surface as `Err`. They come back as a
//! [`SessionStatus::Failed`] reply holding the error text and the last
//! committed state, since the session itself is still there to resume.

use crate::compiled::{CompiledGraph, RunOutcome, RunStatus, StateSnapshot};
use crate::error::{GraphError, Result};
use crate::runtime::RunConfig;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stategraph_checkpoint::CheckpointSaver;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// How a session call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Completed,
    Interrupted,
    Failed,
}

/// Reply to `start` and `resume`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReply {
    pub session_id: String,
    pub status: SessionStatus,
    pub state: Value,

    /// Node the session is parked at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionReply {
    fn from_outcome(outcome: RunOutcome) -> Self {
        let (status, interrupted_at) = match outcome.status {
            RunStatus::Completed => (SessionStatus::Completed, None),
            RunStatus::Interrupted { node, .. } => (SessionStatus::Interrupted, Some(node)),
        };
        Self {
            session_id: outcome.session_id,
            status,
            state: outcome.state,
            interrupted_at,
            error: None,
        }
    }

    fn failed(session_id: &str, state: Value, error: &GraphError) -> Self {
        Self {
            session_id: session_id.to_string(),
            status: SessionStatus::Failed,
            state,
            interrupted_at: None,
            error: Some(error.to_string()),
        }
    }
}

/// Starts and resumes sessions of registered graphs
#[derive(Clone)]
pub struct SessionService {
    graphs: HashMap<String, CompiledGraph>,
    checkpointer: Arc<dyn CheckpointSaver>,
}

impl SessionService {
    pub fn new(checkpointer: Arc<dyn CheckpointSaver>) -> Self {
        Self {
            graphs: HashMap::new(),
            checkpointer,
        }
    }

    /// Register a graph under `graph_id`, rebinding it to the shared checkpointer
    pub fn register(&mut self, graph_id: impl Into<String>, graph: CompiledGraph) -> &mut Self {
        let graph_id = graph_id.into();
        let graph = graph
            .with_checkpointer(self.checkpointer.clone())
            .with_graph_id(graph_id.clone());
        self.graphs.insert(graph_id, graph);
        self
    }

    pub fn graph(&self, graph_id: &str) -> Option<&CompiledGraph> {
        self.graphs.get(graph_id)
    }

    /// Registered graph ids, sorted
    pub fn graph_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.graphs.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Start a session of `graph_id` from `initial_state`
    ///
    /// # Errors
    ///
    /// `Err` only when no session came into being: an unknown graph id or an
    /// initial state the schema rejects.
    pub async fn start(&self, graph_id: &str, initial_state: Value) -> Result<SessionReply> {
        self.start_with_config(graph_id, initial_state, RunConfig::default())
            .await
    }

    /// Start a session whose nodes see `config`
    pub async fn start_with_config(
        &self,
        graph_id: &str,
        initial_state: Value,
        config: RunConfig,
    ) -> Result<SessionReply> {
        let graph = self.graphs.get(graph_id).ok_or_else(|| {
            GraphError::Configuration(format!("no graph registered as '{}'", graph_id))
        })?;

        let session_id = Uuid::new_v4().to_string();
        match graph.start_with_config(&session_id, initial_state, config).await {
            Ok(outcome) => Ok(SessionReply::from_outcome(outcome)),
            Err(err) => self.failure(&session_id, err).await,
        }
    }

    /// Resume a session, merging `patch` first
    ///
    /// # Errors
    ///
    /// [`GraphError::SessionNotFound`] for an unknown session and
    /// [`GraphError::SessionFinished`] for a completed one.
    pub async fn resume(&self, session_id: &str, patch: Value) -> Result<SessionReply> {
        self.resume_with_config(session_id, patch, RunConfig::default())
            .await
    }

    /// Resume a session with some configurable values replaced
    pub async fn resume_with_config(
        &self,
        session_id: &str,
        patch: Value,
        config: RunConfig,
    ) -> Result<SessionReply> {
        let graph = self.graph_for(session_id).await?;
        match graph.resume_with_config(session_id, patch, config).await {
            Ok(outcome) => Ok(SessionReply::from_outcome(outcome)),
            Err(err @ (GraphError::SessionNotFound(_) | GraphError::SessionFinished(_))) => Err(err),
            Err(err) => self.failure(session_id, err).await,
        }
    }

    /// Latest snapshot of a session
    pub async fn state(&self, session_id: &str) -> Result<StateSnapshot> {
        self.checkpointer
            .get(session_id)
            .await?
            .map(StateSnapshot::from)
            .ok_or_else(|| GraphError::SessionNotFound(session_id.to_string()))
    }

    /// All snapshots of a session, newest first
    pub async fn history(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<StateSnapshot>> {
        let graph = self.graph_for(session_id).await?;
        graph
            .get_state_history(session_id, limit)
            .await?
            .try_collect()
            .await
    }

    /// Drop a session and its checkpoints
    pub async fn abandon(&self, session_id: &str) -> Result<()> {
        match self.graph_for(session_id).await {
            Ok(graph) => graph.abandon(session_id).await,
            Err(GraphError::SessionNotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn graph_for(&self, session_id: &str) -> Result<&CompiledGraph> {
        let checkpoint = self
            .checkpointer
            .get(session_id)
            .await?
            .ok_or_else(|| GraphError::SessionNotFound(session_id.to_string()))?;

        let graph_id = checkpoint.metadata.graph_id.ok_or_else(|| {
            GraphError::Configuration(format!("session '{}' records no graph id", session_id))
        })?;
        self.graphs.get(&graph_id).ok_or_else(|| {
            GraphError::Configuration(format!(
                "session '{}' belongs to unregistered graph '{}'",
                session_id, graph_id
            ))
        })
    }

    /// Turn an execution error into a failed reply if the session has a checkpoint
    async fn failure(&self, session_id: &str, err: GraphError) -> Result<SessionReply> {
        match self.checkpointer.get(session_id).await? {
            Some(checkpoint) => Ok(SessionReply::failed(session_id, checkpoint.state, &err)),
            None => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AppendReducer, StateSchema};
    use crate::StateGraph;
    use serde_json::json;
    use stategraph_checkpoint::InMemoryCheckpointSaver;

    fn echo_graph() -> CompiledGraph {
        let mut graph = StateGraph::new(StateSchema::new().with_field("log", Box::new(AppendReducer)));
        graph
            .add_node("echo", |_| Box::pin(async move { Ok(json!({"log": ["echo"]})) }))
            .set_entry_point("echo")
            .set_finish_point("echo");
        graph.compile().unwrap()
    }

    #[tokio::test]
    async fn test_start_completes() {
        let mut service = SessionService::new(Arc::new(InMemoryCheckpointSaver::new()));
        service.register("echo", echo_graph());

        let reply = service.start("echo", json!({})).await.unwrap();
        assert_eq!(reply.status, SessionStatus::Completed);
        assert_eq!(reply.state, json!({"log": ["echo"]}));

        let snapshot = service.state(&reply.session_id).await.unwrap();
        assert_eq!(snapshot.metadata.graph_id.as_deref(), Some("echo"));
        assert!(snapshot.is_done());
    }

    #[tokio::test]
    async fn test_unknown_graph_and_session() {
        let service = SessionService::new(Arc::new(InMemoryCheckpointSaver::new()));
        assert!(matches!(
            service.start("missing", json!({})).await,
            Err(GraphError::Configuration(_))
        ));
        assert!(matches!(
            service.resume("nope", json!({})).await,
            Err(GraphError::SessionNotFound(_))
        ));
        service.abandon("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_input_rejected_before_session_exists() {
        let mut service = SessionService::new(Arc::new(InMemoryCheckpointSaver::new()));
        service.register("echo", echo_graph());

        let err = service.start("echo", json!({"bogus": 1})).await.unwrap_err();
        assert!(matches!(err, GraphError::UnknownField { ref field, .. } if field == "bogus"));
    }

    fn configured(key: &str) -> String {
        crate::runtime::get_runtime()
            .and_then(|runtime| runtime.config().get_str(key).map(str::to_string))
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_config_recorded_and_overridden() {
        let mut graph = StateGraph::new(StateSchema::new().with_field("log", Box::new(AppendReducer)));
        graph
            .add_node("who", |_| {
                Box::pin(async move {
                    let user = configured("user_id");
                    Ok(json!({"log": [user]}))
                })
            })
            .add_edge(crate::START, "who")
            .add_edge("who", "who_again")
            .add_node("who_again", |_| {
                Box::pin(async move {
                    let category = configured("todo_category");
                    Ok(json!({"log": [category]}))
                })
            })
            .add_edge("who_again", crate::END)
            .interrupt_before(["who_again"]);

        let mut service = SessionService::new(Arc::new(InMemoryCheckpointSaver::new()));
        service.register("who", graph.compile().unwrap());

        let config = RunConfig::new().with("user_id", "u1").with("todo_category", "work");
        let parked = service.start_with_config("who", json!({}), config).await.unwrap();
        assert_eq!(parked.status, SessionStatus::Interrupted);

        let snapshot = service.state(&parked.session_id).await.unwrap();
        assert_eq!(snapshot.metadata.configurable["user_id"], "u1");

        // user_id comes from the recorded config, the category from this call
        let done = service
            .resume_with_config(
                &parked.session_id,
                Value::Null,
                RunConfig::new().with("todo_category", "home"),
            )
            .await
            .unwrap();
        assert_eq!(done.state["log"], json!(["u1", "home"]));
        let snapshot = service.state(&parked.session_id).await.unwrap();
        assert_eq!(snapshot.metadata.configurable["todo_category"], "home");
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_value(SessionStatus::Interrupted).unwrap(), json!("INTERRUPTED"));
    }
}
