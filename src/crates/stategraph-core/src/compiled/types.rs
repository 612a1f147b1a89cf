//! Outcomes and snapshots returned by compiled graphs

use crate::error::Result;
use crate::graph::NodeId;
use crate::interrupt::InterruptWhen;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stategraph_checkpoint::{Checkpoint, CheckpointId, CheckpointMetadata};
use std::pin::Pin;

/// How a call to `start` or `resume` ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// The flow reached a terminal route
    Completed,
    /// The session is parked at an interrupt point
    Interrupted { node: NodeId, when: InterruptWhen },
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, RunStatus::Interrupted { .. })
    }
}

/// Result of a successful `start` or `resume`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub session_id: String,
    pub status: RunStatus,
    /// Session state as of the last checkpoint
    pub state: Value,
    /// Id of the last checkpoint written for the session
    pub checkpoint_id: CheckpointId,
}

/// Snapshot of a session at one checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub session_id: String,
    pub checkpoint_id: CheckpointId,

    /// Current state values
    pub values: Value,

    /// Nodes that run next; empty once the session has completed
    pub next: Vec<NodeId>,

    /// Join node of a pending fan-out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join: Option<NodeId>,

    pub metadata: CheckpointMetadata,
    pub created_at: DateTime<Utc>,

    /// Parent checkpoint id
    pub parent: Option<CheckpointId>,
}

impl StateSnapshot {
    pub fn is_done(&self) -> bool {
        self.next.is_empty() && self.join.is_none()
    }

    /// Interrupt the session is parked at, if any
    pub fn interrupted_at(&self) -> Option<&str> {
        self.metadata.interrupt.as_ref().map(|m| m.node.as_str())
    }
}

impl From<Checkpoint> for StateSnapshot {
    fn from(checkpoint: Checkpoint) -> Self {
        let next = checkpoint
            .pending
            .node_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let join = checkpoint.pending.join().map(str::to_string);
        Self {
            session_id: checkpoint.session_id,
            checkpoint_id: checkpoint.id,
            values: checkpoint.state,
            next,
            join,
            parent: checkpoint.metadata.parent,
            metadata: checkpoint.metadata,
            created_at: checkpoint.created_at,
        }
    }
}

/// Stream of state snapshots, newest first
pub type StateSnapshotStream = Pin<Box<dyn Stream<Item = Result<StateSnapshot>> + Send>>;
