//! Core checkpoint data structures for resumable graph sessions
//!
//! A [`Checkpoint`] is an immutable snapshot of one session: the full state
//! after a step boundary plus the [`Pending`] position the scheduler will run
//! next. Checkpoints are append-only; superseded snapshots stay available as
//! history while only the latest one drives a resume.
//!
//! # Layout
//!
//! ```text
//! Checkpoint
//!   session_id : "c0ffee..."
//!   id         : 4                  (monotonic per session, starts at 1)
//!   created_at : 2024-01-01T12:00:00Z
//!   state      : {"topic": "...", "sections": [...]}
//!   pending    : {"kind": "node", "node": "human_feedback"}
//!   metadata   : {source: loop, step: 2, graph_id: "research", interrupt: ...}
//! ```
//!
//! # Checkpoint Sources
//!
//! | Source | When Created |
//! |--------|--------------|
//! | `Input` | Session start, before the first node runs |
//! | `Loop` | After a node completes or a fan-out batch joins |
//! | `Update` | External amendment (resume patch or `update_state`) |
//! | `Fork` | Copied from another session |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Checkpoint ID type, monotonically increasing within a session
pub type CheckpointId = u64;

/// Metadata source type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Checkpoint created from the initial input of a session
    Input,
    /// Checkpoint created from inside the execution loop
    Loop,
    /// Checkpoint created from a manual state update
    Update,
    /// Checkpoint created as a copy of another checkpoint
    Fork,
}

/// Whether a session was parked before or after the named node ran
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InterruptWhen {
    Before,
    After,
}

/// Recorded when a session stops at an interrupt point
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterruptMarker {
    pub node: String,
    pub when: InterruptWhen,
}

/// A fan-out branch that failed but was tolerated by the join
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchFailure {
    /// Position of the branch in the router's output
    pub index: usize,
    /// Entry node of the branch
    pub node: String,
    pub error: String,
}

/// One branch of a persisted fan-out: its entry node and private input state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingBranch {
    pub node: String,
    pub state: Value,
}

/// What the scheduler runs next for a session
///
/// Fan-out routers are evaluated once and their branch list stored here, so a
/// resumed session replays exactly the same branches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pending {
    /// A single node on the parent flow
    Node { node: String },
    /// A fan-out batch that converges on `join`
    Branches {
        branches: Vec<PendingBranch>,
        join: String,
    },
    /// Nodes that run side by side on the parent state, then `join`
    Parallel { nodes: Vec<String>, join: String },
    /// The session reached a terminal route
    Done,
}

impl Pending {
    pub fn node(name: impl Into<String>) -> Self {
        Pending::Node { node: name.into() }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Pending::Done)
    }

    /// Where the parent continues after a fan-out or parallel step
    pub fn join(&self) -> Option<&str> {
        match self {
            Pending::Branches { join, .. } | Pending::Parallel { join, .. } => Some(join),
            _ => None,
        }
    }

    /// Names of the nodes that will run next, in branch order for fan-outs
    pub fn node_names(&self) -> Vec<&str> {
        match self {
            Pending::Node { node } => vec![node.as_str()],
            Pending::Branches { branches, .. } => {
                branches.iter().map(|b| b.node.as_str()).collect()
            }
            Pending::Parallel { nodes, .. } => nodes.iter().map(String::as_str).collect(),
            Pending::Done => Vec::new(),
        }
    }
}

/// Metadata associated with a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckpointMetadata {
    /// The source of the checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// The step number of the checkpoint
    /// -1 for the first "input" checkpoint
    /// n for the nth node or batch executed afterwards
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i32>,

    /// Graph that owns the session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,

    /// Set when the session is parked at an interrupt point
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<InterruptMarker>,

    /// Branches dropped by a tolerant join
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_branches: Vec<BranchFailure>,

    /// Per-run values the session was started or resumed with
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub configurable: Map<String, Value>,

    /// Previous checkpoint of the same session, filled in by the saver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<CheckpointId>,

    /// Additional custom metadata
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointMetadata {
    /// Create a new checkpoint metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source
    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the step number
    pub fn with_step(mut self, step: i32) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_graph_id(mut self, graph_id: impl Into<String>) -> Self {
        self.graph_id = Some(graph_id.into());
        self
    }

    pub fn with_interrupt(mut self, node: impl Into<String>, when: InterruptWhen) -> Self {
        self.interrupt = Some(InterruptMarker {
            node: node.into(),
            when,
        });
        self
    }

    pub fn with_configurable(mut self, configurable: Map<String, Value>) -> Self {
        self.configurable = configurable;
        self
    }

    pub fn with_failed_branches(mut self, failures: Vec<BranchFailure>) -> Self {
        self.failed_branches = failures;
        self
    }

    /// Add custom metadata
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// State snapshot of a session at a step boundary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// The version of the checkpoint format (currently 1)
    pub v: i32,

    pub session_id: String,

    /// Assigned by the saver; unique and increasing within the session
    pub id: CheckpointId,

    pub created_at: DateTime<Utc>,

    /// Full state, every declared field present
    pub state: Value,

    pub pending: Pending,

    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Current checkpoint format version
    pub const CURRENT_VERSION: i32 = 1;

    /// Create a new checkpoint
    pub fn new(
        session_id: impl Into<String>,
        id: CheckpointId,
        state: Value,
        pending: Pending,
        metadata: CheckpointMetadata,
    ) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            session_id: session_id.into(),
            id,
            created_at: Utc::now(),
            state,
            pending,
            metadata,
        }
    }

    /// Whether the session reached a terminal route at this checkpoint
    pub fn is_done(&self) -> bool {
        self.pending.is_done()
    }
}
