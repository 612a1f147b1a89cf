//! Fan-out messages and routing decisions
//!
//! A fan-out router returns a list of [`Send`]s. Each one starts an
//! independent branch at `node` whose private input is `arg`; the branches
//! never see each other's state and only their accumulator fields flow back
//! into the parent once every branch has reached the join node.
//!
//! ```rust
//! use stategraph_core::Send;
//! use serde_json::json;
//!
//! let analysts = json!(["economist", "historian"]);
//! let sends: Vec<Send> = analysts
//!     .as_array()
//!     .into_iter()
//!     .flatten()
//!     .map(|analyst| Send::new("conduct_interview", json!({"analyst": analyst})))
//!     .collect();
//!
//! assert_eq!(sends.len(), 2);
//! assert_eq!(sends[0].node(), "conduct_interview");
//! ```

use crate::graph::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stategraph_checkpoint::PendingBranch;

/// A message to start a fan-out branch at a node with its own input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Send {
    /// Target node to invoke
    node: NodeId,

    /// Input state of the branch
    arg: Value,
}

impl Send {
    /// Create a new Send command
    pub fn new(node: impl Into<NodeId>, arg: Value) -> Self {
        Self {
            node: node.into(),
            arg,
        }
    }

    /// Get the target node name
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Get the argument/state for the node
    pub fn arg(&self) -> &Value {
        &self.arg
    }

    /// Consume the Send and return its parts
    pub fn into_parts(self) -> (NodeId, Value) {
        (self.node, self.arg)
    }
}

impl From<Send> for PendingBranch {
    fn from(send: Send) -> Self {
        let (node, state) = send.into_parts();
        PendingBranch { node, state }
    }
}

/// Answer of a conditional fan-out router: one node, or a set of branches
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Continue with this node (or [`END`](crate::END))
    Node(NodeId),
    /// Run one branch per send
    Sends(Vec<Send>),
}

impl From<Vec<Send>> for Route {
    fn from(sends: Vec<Send>) -> Self {
        Route::Sends(sends)
    }
}

impl From<&str> for Route {
    fn from(node: &str) -> Self {
        Route::Node(node.to_string())
    }
}

impl From<String> for Route {
    fn from(node: String) -> Self {
        Route::Node(node)
    }
}

/// Where execution goes after a node completes
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    /// Continue with exactly one node
    Single(NodeId),
    /// The flow ends here
    Terminal,
    /// Run one branch per send, then continue at `join`
    FanOut { sends: Vec<Send>, join: NodeId },
    /// Run `nodes` side by side on the current state, then continue at `join`
    Parallel { nodes: Vec<NodeId>, join: NodeId },
}

impl RoutingDecision {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoutingDecision::Terminal)
    }
}
