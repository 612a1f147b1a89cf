//! Node registry: named units of work
//!
//! A node is an async function from the current state to a partial update.
//! It may call out to collaborators (models, search) but only changes the
//! session through the update it returns.

use crate::error::{BoxError, GraphError, Result};
use crate::graph::{NodeId, END, START};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by a node
pub type NodeFuture = Pin<Box<dyn Future<Output = std::result::Result<Value, BoxError>> + Send>>;

/// Node executor function type
///
/// Takes the full current state by value and returns the node's partial update.
pub type NodeExecutor = Arc<dyn Fn(Value) -> NodeFuture + Send + Sync>;

/// A registered node
#[derive(Clone)]
pub struct NodeSpec {
    pub name: NodeId,
    pub executor: NodeExecutor,
    /// Set for nodes that wrap another compiled graph
    pub subgraph: bool,
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("executor", &"<function>")
            .field("subgraph", &self.subgraph)
            .finish()
    }
}

/// Registry of every node a graph can execute
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: HashMap<NodeId, NodeSpec>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node under a unique, non-reserved name
    pub fn register(&mut self, spec: NodeSpec) -> Result<()> {
        if spec.name == START || spec.name == END {
            return Err(GraphError::Validation(format!(
                "'{}' is a reserved node name",
                spec.name
            )));
        }
        if spec.name.is_empty() {
            return Err(GraphError::Validation("node name is empty".to_string()));
        }
        if self.nodes.contains_key(&spec.name) {
            return Err(GraphError::Validation(format!(
                "node '{}' is registered twice",
                spec.name
            )));
        }
        self.nodes.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.get(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Registered node names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run a node against `state` and return its partial update
    ///
    /// Node failures become [`GraphError::NodeExecution`] tagged with the
    /// session. A node returning `null` made no update.
    pub async fn invoke(&self, session_id: &str, name: &str, state: Value) -> Result<Value> {
        let spec = self.nodes.get(name).ok_or_else(|| {
            GraphError::Validation(format!("node '{}' is not registered", name))
        })?;

        (spec.executor)(state)
            .await
            .map_err(|err| GraphError::node_execution(session_id, name, err.to_string()))
    }
}
