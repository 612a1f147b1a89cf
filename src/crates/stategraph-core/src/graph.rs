//! Core graph structure: nodes, edges and routing
//!
//! A [`Graph`] pairs a [`NodeRegistry`] with an edge table. A node has one
//! outgoing [`Edge`], or several [`Edge::Direct`] ones forming a parallel
//! step; a node without any ends the flow it runs in.
//!
//! # Edge Kinds
//!
//! | Edge | Router returns | Next step |
//! |------|----------------|-----------|
//! | [`Edge::Direct`] | - | the target, or terminal for [`END`] |
//! | several [`Edge::Direct`] | - | every target side by side, then their common successor |
//! | [`Edge::Conditional`] | a branch key | the node mapped to that key |
//! | [`Edge::FanOut`] | a [`Route`] | every send in parallel, then `join`; or one node |
//!
//! Routers are pure functions of state. A router answer outside its declared
//! set is a [`GraphError::InvalidRoute`], never a silent default.
//!
//! A fan-out whose `join` is one of its own targets runs that node once per
//! branch; the parent then continues with the node's outgoing edge instead
//! of running it again.
//!
//! ```text
//! __start__ ──► create_analysts ──► human_feedback ──┬─► create_analysts   (feedback given)
//!                                                    └─► conduct_interview × N ──┬─► write_report ───────┐
//!                                                                                ├─► write_introduction ─┼─► finalize_report
//!                                                                                └─► write_conclusion ───┘
//! ```

use crate::error::{GraphError, Result};
use crate::registry::{NodeRegistry, NodeSpec};
use crate::send::{Route, RoutingDecision};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Node identifier - unique name for each node in the graph
pub type NodeId = String;

/// Virtual entry node; its outgoing edge picks the first node of a session
pub const START: &str = "__start__";

/// Virtual exit node; routing here ends the flow
pub const END: &str = "__end__";

/// Conditional router: state in, branch key out
pub type RouterFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Fan-out router: state in, a [`Route`] out
pub type FanOutFn = Arc<dyn Fn(&Value) -> Route + Send + Sync>;

/// Outgoing edge of a node
#[derive(Clone)]
pub enum Edge {
    /// Unconditional edge to a specific node (or [`END`])
    Direct(NodeId),

    /// Route chosen by a router at runtime
    Conditional {
        router: RouterFn,

        /// Branch key to target node; the declared candidate set
        ///
        /// A router may also return [`END`] to end the flow.
        branches: BTreeMap<String, NodeId>,
    },

    /// Parallel branches converging on a join node
    FanOut {
        router: FanOutFn,
        /// Nodes a send or a single-node route may target
        targets: Vec<NodeId>,
        /// Where the parent continues once every branch finished
        join: NodeId,
    },
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Direct(node_id) => f.debug_tuple("Direct").field(node_id).finish(),
            Edge::Conditional { branches, .. } => f
                .debug_struct("Conditional")
                .field("router", &"<function>")
                .field("branches", branches)
                .finish(),
            Edge::FanOut { targets, join, .. } => f
                .debug_struct("FanOut")
                .field("router", &"<function>")
                .field("targets", targets)
                .field("join", join)
                .finish(),
        }
    }
}

/// Nodes plus the edge table
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: NodeRegistry,

    /// Source node to outgoing edges, in the order they were added
    ///
    /// More than one edge per source is only valid as a parallel step.
    pub edges: HashMap<NodeId, Vec<Edge>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, spec: NodeSpec) -> Result<()> {
        self.nodes.register(spec)
    }

    pub fn add_edge(&mut self, from: NodeId, edge: Edge) {
        self.edges.entry(from).or_default().push(edge);
    }

    fn is_node_or_end(&self, name: &str) -> bool {
        name == END || self.nodes.contains(name)
    }

    /// Validate the graph structure for correctness
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - There is no edge out of [`START`]
    /// - Any edge source is neither [`START`] nor a registered node
    /// - A node has more than one outgoing edge that do not form a parallel step
    /// - A direct target, branch target or join node is not registered (and isn't [`END`])
    /// - A fan-out target is not a registered node
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.edges.contains_key(START) {
            return Err(format!("no entry edge from {}", START));
        }

        let mut sources: Vec<&NodeId> = self.edges.keys().collect();
        sources.sort();

        for from in sources {
            let edges = &self.edges[from];
            if from == END {
                return Err(format!("{} cannot have outgoing edges", END));
            }
            if from != START && !self.nodes.contains(from) {
                return Err(format!("Edge source {} does not exist", from));
            }
            if edges.len() > 1 {
                self.parallel_step(from)?;
            }

            for edge in edges {
                match edge {
                    Edge::Direct(to) => {
                        if !self.is_node_or_end(to) {
                            return Err(format!("Edge target {} does not exist", to));
                        }
                    }
                    Edge::Conditional { branches, .. } => {
                        if branches.is_empty() {
                            return Err(format!("conditional edge of {} declares no branches", from));
                        }
                        for to in branches.values() {
                            if !self.is_node_or_end(to) {
                                return Err(format!("Branch target {} does not exist", to));
                            }
                        }
                    }
                    Edge::FanOut { targets, join, .. } => {
                        if targets.is_empty() {
                            return Err(format!("fan-out edge of {} declares no targets", from));
                        }
                        for to in targets {
                            if !self.nodes.contains(to) {
                                return Err(format!("Fan-out target {} does not exist", to));
                            }
                        }
                        if !self.is_node_or_end(join) {
                            return Err(format!("Join node {} does not exist", join));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Targets and join of the parallel step out of `from`
    ///
    /// Every outgoing edge must be direct, to distinct registered nodes, and
    /// each target's only edge must lead to the same join node (or [`END`]).
    fn parallel_step(&self, from: &str) -> std::result::Result<(Vec<NodeId>, NodeId), String> {
        let edges = self.edges.get(from).map(Vec::as_slice).unwrap_or_default();
        let mut targets: Vec<NodeId> = Vec::with_capacity(edges.len());
        for edge in edges {
            let Edge::Direct(to) = edge else {
                return Err(format!(
                    "node {} has {} outgoing edges; only direct edges can run in parallel",
                    from,
                    edges.len()
                ));
            };
            if !self.nodes.contains(to) {
                return Err(format!("Parallel target {} of {} does not exist", to, from));
            }
            if targets.contains(to) {
                return Err(format!("node {} has two edges to {}", from, to));
            }
            targets.push(to.clone());
        }

        let mut join: Option<&NodeId> = None;
        for target in &targets {
            let next = match self.edges.get(target).map(Vec::as_slice) {
                Some([Edge::Direct(next)]) => next,
                _ => {
                    return Err(format!(
                        "parallel target {} of {} needs exactly one direct edge to the join node",
                        target, from
                    ))
                }
            };
            match join {
                Some(join) if join != next => {
                    return Err(format!(
                        "parallel targets of {} lead to both {} and {}",
                        from, join, next
                    ))
                }
                _ => join = Some(next),
            }
        }

        let join = join.cloned().unwrap_or_else(|| END.to_string());
        Ok((targets, join))
    }

    /// Whether `node` is one of the targets of a parallel step
    pub fn is_parallel_target(&self, node: &str) -> bool {
        self.edges
            .values()
            .filter(|edges| edges.len() > 1)
            .flatten()
            .any(|edge| matches!(edge, Edge::Direct(to) if to == node))
    }

    /// Whether a fan-out names `join` both as a target and as its join
    fn joins_on_target(&self, join: &str) -> bool {
        self.edges.values().flatten().any(|edge| {
            matches!(edge, Edge::FanOut { targets, join: j, .. } if j == join && targets.iter().any(|t| t == join))
        })
    }

    /// Where the parent continues once a fan-out joined at `join`
    pub fn after_join(&self, join: &str, state: &Value) -> Result<RoutingDecision> {
        if join == END {
            Ok(RoutingDecision::Terminal)
        } else if self.joins_on_target(join) {
            self.next(join, state)
        } else {
            Ok(RoutingDecision::Single(join.to_string()))
        }
    }

    /// Decide where execution goes after `from`, given the state it produced
    ///
    /// # Errors
    ///
    /// [`GraphError::InvalidRoute`] when a router answers outside its declared set.
    pub fn next(&self, from: &str, state: &Value) -> Result<RoutingDecision> {
        let edges = self.edges.get(from).map(Vec::as_slice).unwrap_or_default();
        let edge = match edges {
            [] => return Ok(RoutingDecision::Terminal),
            [edge] => edge,
            _ => {
                let (nodes, join) = self.parallel_step(from).map_err(GraphError::Validation)?;
                return Ok(RoutingDecision::Parallel { nodes, join });
            }
        };

        match edge {
            Edge::Direct(to) if to == END => Ok(RoutingDecision::Terminal),
            Edge::Direct(to) => Ok(RoutingDecision::Single(to.clone())),
            Edge::Conditional { router, branches } => {
                let key = router(state);
                if key == END {
                    return Ok(RoutingDecision::Terminal);
                }
                match branches.get(&key) {
                    Some(to) if to == END => Ok(RoutingDecision::Terminal),
                    Some(to) => Ok(RoutingDecision::Single(to.clone())),
                    None => Err(GraphError::InvalidRoute {
                        node: from.to_string(),
                        target: key,
                        candidates: branches.keys().cloned().collect(),
                    }),
                }
            }
            Edge::FanOut {
                router,
                targets,
                join,
            } => {
                let invalid = |target: &str| GraphError::InvalidRoute {
                    node: from.to_string(),
                    target: target.to_string(),
                    candidates: targets.clone(),
                };
                match router(state) {
                    Route::Node(to) if to == END => Ok(RoutingDecision::Terminal),
                    Route::Node(to) if targets.contains(&to) => Ok(RoutingDecision::Single(to)),
                    Route::Node(to) => Err(invalid(&to)),
                    Route::Sends(sends) => {
                        if let Some(bad) = sends.iter().find(|s| !targets.iter().any(|t| t == s.node())) {
                            return Err(invalid(bad.node()));
                        }
                        Ok(RoutingDecision::FanOut {
                            sends,
                            join: join.clone(),
                        })
                    }
                }
            }
        }
    }
}
