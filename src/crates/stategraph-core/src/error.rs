//! Error types and error handling for graph operations
//!
//! This module defines all error types that can occur during graph construction,
//! validation, and execution. All errors implement `std::error::Error` via the
//! `thiserror` crate.
//!
//! # Error Hierarchy
//!
//! ```text
//! GraphError
//! ├── Validation         - Graph structure errors, raised by compile()
//! ├── UnknownField       - Update or input names an undeclared state field
//! ├── InvalidRoute       - Router returned a target it did not declare
//! ├── NodeExecution      - Node failed; session resumable from last checkpoint
//! ├── JoinFailure        - Fan-out branches failed; parent stays before the fan-out
//! ├── ConflictingUpdate  - Two nodes of a parallel step wrote the same field
//! ├── Interrupted        - Ephemeral run reached an interrupt point
//! ├── RecursionLimit     - Too many steps in one call
//! ├── SessionNotFound    - No checkpoint for the session
//! ├── SessionFinished    - Session already reached a terminal route
//! ├── State              - Reducer or state shape errors
//! ├── Checkpoint         - Persistence errors
//! ├── Serialization/Yaml - Encoding errors
//! ├── Io                 - Filesystem errors
//! └── Configuration      - Invalid execution settings
//! ```
//!
//! # Recovering From Failures
//!
//! Only [`GraphError::NodeExecution`] and [`GraphError::JoinFailure`] leave a
//! session in a resumable position. Nothing is retried automatically; the
//! caller decides whether to `resume`:
//!
//! ```rust,ignore
//! match graph.resume(&session_id, Value::Null).await {
//!     Ok(outcome) => println!("{:?}", outcome.status),
//!     Err(err) if err.is_recoverable() => schedule_retry(&session_id),
//!     Err(err) => return Err(err),
//! }
//! ```

use crate::state::StateError;
use stategraph_checkpoint::{BranchFailure, InterruptWhen};
use thiserror::Error;

/// Result type alias for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Error type returned by node functions and collaborators
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Comprehensive error type for all graph operations
///
/// # Examples
///
/// ```rust
/// use stategraph_core::error::GraphError;
///
/// let err = GraphError::node_execution("s-1", "llm_call", "API timeout");
/// assert_eq!(
///     format!("{}", err),
///     "Node 'llm_call' execution failed in session s-1: API timeout"
/// );
/// assert!(err.is_recoverable());
/// ```
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph structure validation failed
    ///
    /// Occurs during graph compilation when the graph structure is invalid:
    /// an edge names an unregistered node, a node has two outgoing edges, the
    /// entry edge is missing, or a reserved name is used.
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// A node update, session input or resume patch wrote an undeclared field
    ///
    /// `node` is the node that produced the update, or `"<input>"` /
    /// `"<patch>"` for caller-supplied values.
    #[error("Unknown state field '{field}' written by '{node}'")]
    UnknownField { node: String, field: String },

    /// A router returned a target outside its declared candidate set
    #[error("Router of '{node}' returned undeclared target '{target}' (declared: {candidates:?})")]
    InvalidRoute {
        node: String,
        target: String,
        candidates: Vec<String>,
    },

    /// Node execution failed
    ///
    /// The session stays at its last checkpoint; `resume` re-runs the node.
    #[error("Node '{node}' execution failed in session {session_id}: {error}")]
    NodeExecution {
        session_id: String,
        /// Name of the node that failed
        node: String,
        /// Error message from node execution
        error: String,
    },

    /// One or more fan-out branches failed and the join aborted
    ///
    /// No checkpoint is written for the batch; the session stays at the
    /// checkpoint taken before the fan-out and `resume` replays every branch.
    #[error("{} of {total} branches failed joining at '{join}' in session {session_id}", failures.len())]
    JoinFailure {
        session_id: String,
        join: String,
        total: usize,
        failures: Vec<BranchFailure>,
    },

    /// Two nodes of one parallel step wrote the same non-accumulating field
    ///
    /// Nothing is committed for the step. Give the field an accumulating
    /// reducer or let only one of the nodes write it.
    #[error("Field '{field}' written by more than one node of a parallel step: {nodes:?}")]
    ConflictingUpdate { field: String, nodes: Vec<String> },

    /// An ephemeral run reached an interrupt point
    ///
    /// Only [`invoke`](crate::CompiledGraph::invoke) reports interrupts as
    /// errors; session runs return them as a status.
    #[error("Graph execution interrupted {when:?} node '{node}'")]
    Interrupted { node: String, when: InterruptWhen },

    /// More node executions than `max_steps` within one call
    #[error("Recursion limit of {limit} steps reached without hitting a terminal route")]
    RecursionLimit { limit: usize },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already finished: {0}")]
    SessionFinished(String),

    /// State management error with optional node context
    #[error("State error{}: {error}", node.as_ref().map(|n| format!(" in node '{}'", n)).unwrap_or_default())]
    State {
        /// Optional node context where error occurred
        node: Option<String>,
        error: String,
    },

    /// Checkpoint persistence error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] stategraph_checkpoint::CheckpointError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Execution settings or graph usage that cannot work
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GraphError {
    /// Create a node execution error with context
    pub fn node_execution(
        session_id: impl Into<String>,
        node: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::NodeExecution {
            session_id: session_id.into(),
            node: node.into(),
            error: error.into(),
        }
    }

    /// Attribute a state error to the node (or caller) whose update caused it
    pub fn from_state(node: impl Into<String>, err: StateError) -> Self {
        let node = node.into();
        match err {
            StateError::UnknownField(field) => Self::UnknownField { node, field },
            other => Self::State {
                node: Some(node),
                error: other.to_string(),
            },
        }
    }

    /// Whether `resume` can pick the session up again after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NodeExecution { .. } | Self::JoinFailure { .. })
    }

    /// Node the error is attributed to, when there is one
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::UnknownField { node, .. }
            | Self::InvalidRoute { node, .. }
            | Self::NodeExecution { node, .. }
            | Self::Interrupted { node, .. } => Some(node),
            Self::JoinFailure { join, .. } => Some(join),
            Self::State { node, .. } => node.as_deref(),
            _ => None,
        }
    }
}

impl From<StateError> for GraphError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::UnknownField(field) => Self::UnknownField {
                node: "<input>".to_string(),
                field,
            },
            other => Self::State {
                node: None,
                error: other.to_string(),
            },
        }
    }
}
