//! StateGraph builder API for constructing resumable workflows
//!
//! [`StateGraph`] collects nodes, edges and interrupt points against a
//! [`StateSchema`], then compiles into a [`CompiledGraph`]. Builder calls
//! return `&mut Self` for chaining; mistakes such as a duplicate node name
//! are collected and reported together by [`compile`](StateGraph::compile).
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use stategraph_core::{AppendReducer, OverwriteReducer, StateGraph, StateSchema, END, START};
//! use serde_json::json;
//!
//! # async fn example() -> stategraph_core::Result<()> {
//! let schema = StateSchema::new()
//!     .with_field("topic", Box::new(OverwriteReducer))
//!     .with_field("notes", Box::new(AppendReducer));
//!
//! let mut graph = StateGraph::new(schema);
//! graph.add_node("research", |state| {
//!     Box::pin(async move {
//!         let topic = state["topic"].as_str().unwrap_or_default().to_string();
//!         Ok(json!({"notes": [format!("read about {}", topic)]}))
//!     })
//! });
//! graph.add_edge(START, "research");
//! graph.add_edge("research", END);
//!
//! let compiled = graph.compile()?;
//! let outcome = compiled.start(json!({"topic": "tides"})).await?;
//! assert!(outcome.status.is_completed());
//! # Ok(())
//! # }
//! ```
//!
//! # Fan-out
//!
//! ```rust,no_run
//! use stategraph_core::{AppendReducer, Send, StateGraph, StateSchema, END, START};
//! use serde_json::json;
//!
//! let schema = StateSchema::new()
//!     .with_field("items", Box::new(AppendReducer))
//!     .with_field("item", Box::new(stategraph_core::OverwriteReducer))
//!     .with_field("results", Box::new(AppendReducer));
//!
//! let mut graph = StateGraph::new(schema);
//! graph
//!     .add_node("split", |_| Box::pin(async move { Ok(json!(null)) }))
//!     .add_node("work", |state| {
//!         Box::pin(async move { Ok(json!({"results": [state["item"].clone()]})) })
//!     })
//!     .add_node("report", |_| Box::pin(async move { Ok(json!(null)) }))
//!     .add_edge(START, "split")
//!     .add_fan_out(
//!         "split",
//!         |state| {
//!             state["items"]
//!                 .as_array()
//!                 .into_iter()
//!                 .flatten()
//!                 .map(|item| Send::new("work", json!({"item": item})))
//!                 .collect()
//!         },
//!         ["work"],
//!         "report",
//!     )
//!     .add_edge("report", END);
//! ```

use crate::compiled::CompiledGraph;
use crate::config::ExecutionConfig;
use crate::error::{BoxError, GraphError, Result};
use crate::graph::{Edge, Graph, NodeId, END, START};
use crate::interrupt::InterruptConfig;
use crate::registry::{NodeExecutor, NodeFuture, NodeSpec};
use crate::send::Route;
use crate::state::StateSchema;
use serde_json::{Map, Value};
use stategraph_checkpoint::CheckpointSaver;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builder for a graph over a shared state schema
pub struct StateGraph {
    graph: Graph,
    schema: StateSchema,
    interrupt_config: InterruptConfig,
    config: ExecutionConfig,
    graph_id: Option<String>,
    /// Subgraph node name and the fields it writes back
    subgraph_outputs: Vec<(NodeId, Vec<String>)>,
    errors: Vec<String>,
}

impl StateGraph {
    /// Create an empty graph over `schema`
    pub fn new(schema: StateSchema) -> Self {
        Self {
            graph: Graph::new(),
            schema,
            interrupt_config: InterruptConfig::default(),
            config: ExecutionConfig::default(),
            graph_id: None,
            subgraph_outputs: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Add a node
    ///
    /// The executor receives the full current state and returns a partial
    /// update; `null` means no update.
    ///
    /// ```rust,no_run
    /// # use stategraph_core::{StateGraph, StateSchema};
    /// # use serde_json::json;
    /// let mut graph = StateGraph::new(StateSchema::new());
    /// graph.add_node("validate", |state| {
    ///     Box::pin(async move {
    ///         if state["value"].as_i64().unwrap_or(0) < 0 {
    ///             return Err("value cannot be negative".into());
    ///         }
    ///         Ok(json!(null))
    ///     })
    /// });
    /// ```
    pub fn add_node<F>(&mut self, id: impl Into<NodeId>, executor: F) -> &mut Self
    where
        F: Fn(Value) -> NodeFuture + Send + Sync + 'static,
    {
        self.add_node_with_executor(id, Arc::new(executor))
    }

    /// Add a node with a pre-built executor
    pub fn add_node_with_executor(&mut self, id: impl Into<NodeId>, executor: NodeExecutor) -> &mut Self {
        self.add_node_spec(NodeSpec {
            name: id.into(),
            executor,
            subgraph: false,
        })
    }

    fn add_node_spec(&mut self, spec: NodeSpec) -> &mut Self {
        if let Err(e) = self.graph.add_node(spec) {
            self.errors.push(e.to_string());
        }
        self
    }

    /// Add a compiled graph as a single node
    ///
    /// The subgraph starts from the parent state projected onto its own
    /// schema and runs to completion as a throwaway session. Only the
    /// `outputs` fields of its final state flow back, through the parent's
    /// reducers. A subgraph that reaches an interrupt point fails the node.
    pub fn add_subgraph<I, S>(&mut self, id: impl Into<NodeId>, subgraph: CompiledGraph, outputs: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        let outputs: Vec<String> = outputs.into_iter().map(Into::into).collect();
        let subgraph = Arc::new(subgraph);

        let fields = outputs.clone();
        let executor: NodeExecutor = Arc::new(move |state| {
            let subgraph = subgraph.clone();
            let fields = fields.clone();
            Box::pin(async move {
                let input = subgraph.schema().project(&state);
                let result = subgraph
                    .invoke(input.clone())
                    .await
                    .map_err(|e| Box::new(e) as BoxError)?;
                Ok::<_, BoxError>(written_back(&input, &result, &fields))
            })
        });

        self.subgraph_outputs.push((id.clone(), outputs));
        self.add_node_spec(NodeSpec {
            name: id,
            executor,
            subgraph: true,
        })
    }

    /// Add a direct edge from one node to another
    ///
    /// `from` may be [`START`] and `to` may be [`END`]. Several direct edges
    /// out of one node form a parallel step: the targets run side by side on
    /// the same state and each must have a single direct edge to a common
    /// join node. Their updates merge through the reducers; two targets
    /// writing the same non-accumulating field is an error.
    ///
    /// ```rust,no_run
    /// # use stategraph_core::{StateGraph, StateSchema, END};
    /// # fn build(graph: &mut StateGraph) {
    /// graph
    ///     .add_edge("research", "summary")
    ///     .add_edge("research", "keywords")
    ///     .add_edge("summary", "publish")
    ///     .add_edge("keywords", "publish")
    ///     .add_edge("publish", END);
    /// # }
    /// ```
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> &mut Self {
        self.graph.add_edge(from.into(), Edge::Direct(to.into()));
        self
    }

    /// Add a conditional edge whose router returns a node name
    ///
    /// `candidates` is the declared set of nodes the router may pick; it may
    /// always answer [`END`] as well.
    pub fn add_conditional_edge<F, I, S>(&mut self, from: impl Into<NodeId>, router: F, candidates: I) -> &mut Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let branches = candidates
            .into_iter()
            .map(|c| {
                let node: NodeId = c.into();
                (node.clone(), node)
            })
            .collect();
        self.graph.add_edge(
            from.into(),
            Edge::Conditional {
                router: Arc::new(router),
                branches,
            },
        );
        self
    }

    /// Add a conditional edge whose router returns a branch key
    ///
    /// `branches` maps each key to its target node.
    pub fn add_conditional_edge_with_map<F, I, K, V>(
        &mut self,
        from: impl Into<NodeId>,
        router: F,
        branches: I,
    ) -> &mut Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<NodeId>,
    {
        let branches: BTreeMap<String, NodeId> = branches
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.graph.add_edge(
            from.into(),
            Edge::Conditional {
                router: Arc::new(router),
                branches,
            },
        );
        self
    }

    /// Add a fan-out edge
    ///
    /// The router returns one [`Send`](crate::Send) per branch; each must
    /// target one of `targets`. Once every branch has reached `join` (or
    /// ended), the parent continues at `join`.
    pub fn add_fan_out<F, I, S>(
        &mut self,
        from: impl Into<NodeId>,
        router: F,
        targets: I,
        join: impl Into<NodeId>,
    ) -> &mut Self
    where
        F: Fn(&Value) -> Vec<crate::send::Send> + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.add_conditional_fan_out(from, move |state: &Value| Route::Sends(router(state)), targets, join)
    }

    /// Add a fan-out edge whose router may also pick a single node
    ///
    /// The router answers a [`Route`]: [`Route::Sends`] fans out as in
    /// [`add_fan_out`](Self::add_fan_out), [`Route::Node`] continues at one
    /// of `targets` (or [`END`]). When `join` is itself one of `targets`,
    /// each branch runs just that node and the parent then follows the
    /// node's outgoing edge.
    pub fn add_conditional_fan_out<F, R, I, S>(
        &mut self,
        from: impl Into<NodeId>,
        router: F,
        targets: I,
        join: impl Into<NodeId>,
    ) -> &mut Self
    where
        F: Fn(&Value) -> R + Send + Sync + 'static,
        R: Into<Route>,
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.graph.add_edge(
            from.into(),
            Edge::FanOut {
                router: Arc::new(move |state: &Value| router(state).into()),
                targets: targets.into_iter().map(Into::into).collect(),
                join: join.into(),
            },
        );
        self
    }

    /// Set the entry point of the graph (an edge from [`START`])
    pub fn set_entry_point(&mut self, node: impl Into<NodeId>) -> &mut Self {
        self.add_edge(START, node)
    }

    /// Add a finish point (edge to [`END`])
    pub fn set_finish_point(&mut self, node: impl Into<NodeId>) -> &mut Self {
        self.add_edge(node, END)
    }

    /// Pause sessions before these nodes run
    pub fn interrupt_before<I, S>(&mut self, nodes: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupt_config
            .interrupt_before
            .extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Pause sessions right after these nodes commit
    pub fn interrupt_after<I, S>(&mut self, nodes: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupt_config
            .interrupt_after
            .extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn with_config(&mut self, config: ExecutionConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn with_graph_id(&mut self, graph_id: impl Into<String>) -> &mut Self {
        self.graph_id = Some(graph_id.into());
        self
    }

    /// Get a reference to the underlying graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// Compile the graph into an executable form
    ///
    /// # Errors
    ///
    /// [`GraphError::Validation`] if:
    /// - A node was added twice or under a reserved name
    /// - Edges are inconsistent (see [`Graph::validate`])
    /// - An interrupt point is not a registered node, or runs in a parallel step
    /// - A subgraph writes back a field the schema does not declare
    /// - The execution config is invalid
    pub fn compile(self) -> Result<CompiledGraph> {
        if let Some(first) = self.errors.first() {
            return Err(GraphError::Validation(first.clone()));
        }

        self.graph.validate().map_err(GraphError::Validation)?;

        for node in self.interrupt_config.nodes() {
            if !self.graph.nodes.contains(node) {
                return Err(GraphError::Validation(format!(
                    "Interrupt node {} does not exist",
                    node
                )));
            }
            if self.graph.is_parallel_target(node) {
                return Err(GraphError::Validation(format!(
                    "interrupt point {} cannot run inside a parallel step",
                    node
                )));
            }
        }

        for (node, outputs) in &self.subgraph_outputs {
            if let Some(field) = outputs.iter().find(|f| !self.schema.contains(f)) {
                return Err(GraphError::Validation(format!(
                    "subgraph {} writes back undeclared field {}",
                    node, field
                )));
            }
        }

        self.config
            .validate()
            .map_err(|e| GraphError::Validation(e.to_string()))?;

        tracing::debug!(
            nodes = self.graph.nodes.len(),
            fields = self.schema.fields().len(),
            "Graph compiled"
        );

        let compiled = CompiledGraph::new(self.graph, self.schema, self.interrupt_config, self.config);
        Ok(match self.graph_id {
            Some(graph_id) => compiled.with_graph_id(graph_id),
            None => compiled,
        })
    }

    /// Compile and attach a checkpointer in one step
    pub fn compile_with_checkpointer(self, saver: Arc<dyn CheckpointSaver>) -> Result<CompiledGraph> {
        Ok(self.compile()?.with_checkpointer(saver))
    }
}

/// Subgraph outputs as a parent update
///
/// An array output that still starts with the array the subgraph was given
/// contributes only the items appended after it, so append fields are not
/// doubled by the parent's reducer.
fn written_back(input: &Value, result: &Value, fields: &[String]) -> Value {
    let mut out = Map::new();
    for field in fields {
        let Some(value) = result.get(field) else { continue };
        let value = match (input.get(field), value) {
            (Some(Value::Array(before)), Value::Array(after)) if after.starts_with(before) => {
                Value::Array(after[before.len()..].to_vec())
            }
            _ => value.clone(),
        };
        out.insert(field.clone(), value);
    }
    Value::Object(out)
}
