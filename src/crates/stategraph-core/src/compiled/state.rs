//! State management methods (get_state, update_state, etc.)
//!
//! This module contains methods for inspecting and amending sessions between runs.

use super::execution::has_content;
use super::{CompiledGraph, StateSnapshot, StateSnapshotStream};
use crate::error::{GraphError, Result};
use futures::StreamExt;
use serde_json::Value;
use stategraph_checkpoint::{CheckpointId, CheckpointSource};

impl CompiledGraph {
    /// Latest snapshot of a session, or `None` if it has no checkpoint
    pub async fn get_state(&self, session_id: &str) -> Result<Option<StateSnapshot>> {
        let checkpoint = self.checkpointer.get(session_id).await?;
        Ok(checkpoint.map(StateSnapshot::from))
    }

    /// Snapshot of a session at one checkpoint id
    pub async fn get_state_at(
        &self,
        session_id: &str,
        checkpoint_id: CheckpointId,
    ) -> Result<Option<StateSnapshot>> {
        let checkpoint = self
            .checkpointer
            .load_version(session_id, checkpoint_id)
            .await?;
        Ok(checkpoint.map(StateSnapshot::from))
    }

    /// Every checkpoint of a session, newest first
    ///
    /// An unknown session yields an empty stream.
    pub async fn get_state_history(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<StateSnapshotStream> {
        let checkpoints = self.checkpointer.list(session_id, limit).await?;
        let snapshots = checkpoints.map(|result| {
            result
                .map(StateSnapshot::from)
                .map_err(GraphError::Checkpoint)
        });
        Ok(Box::pin(snapshots))
    }

    /// Merge `patch` into a session without running anything
    ///
    /// The patch goes through the reducers like a node update and is
    /// committed as an update checkpoint. The pending step and any interrupt
    /// marker carry over, so a later [`resume`](Self::resume) continues
    /// exactly where the session was.
    #[tracing::instrument(skip(self, patch), fields(graph_id = %self.graph_id))]
    pub async fn update_state(&self, session_id: &str, patch: Value) -> Result<CheckpointId> {
        let _guard = self.lock_session(session_id).await;

        let checkpoint = self
            .checkpointer
            .get(session_id)
            .await?
            .ok_or_else(|| GraphError::SessionNotFound(session_id.to_string()))?;

        if !has_content(&patch) {
            return Ok(checkpoint.id);
        }

        let state = self
            .schema
            .merge(&checkpoint.state, &patch)
            .map_err(|e| GraphError::from_state("<patch>", e))?;

        let mut metadata = self.metadata(
            CheckpointSource::Update,
            checkpoint.metadata.step.unwrap_or(-1),
        );
        metadata.interrupt = checkpoint.metadata.interrupt;
        metadata.configurable = checkpoint.metadata.configurable;

        let id = self
            .checkpointer
            .save(session_id, state, checkpoint.pending, metadata)
            .await?;
        tracing::debug!(session_id, checkpoint_id = id, "State updated");
        Ok(id)
    }

    /// Drop a session and its whole checkpoint history
    ///
    /// Abandoning an unknown session is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn abandon(&self, session_id: &str) -> Result<()> {
        let _guard = self.lock_session(session_id).await;
        self.checkpointer.delete_session(session_id).await?;
        tracing::info!(session_id, "Session abandoned");
        Ok(())
    }
}
