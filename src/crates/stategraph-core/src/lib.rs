//! # stategraph-core - Resumable Graph Execution
//!
//! Run multi-step workflows as a directed graph of async nodes over a shared,
//! reducer-merged state. Every step is checkpointed, so a session can stop at
//! a human review point, sit for days, and resume in another process exactly
//! where it left off.
//!
//! ## Core Concepts
//!
//! ### 1. State and Reducers
//!
//! A [`StateSchema`] declares every state field with a [`Reducer`] that
//! decides how updates combine: [`OverwriteReducer`] replaces,
//! [`AppendReducer`] concatenates, [`MergeReducer`] merges objects and
//! [`SumReducer`] adds. Updates touching undeclared fields are rejected.
//!
//! ### 2. Nodes and Edges
//!
//! Nodes are async functions from state to a partial update. Edges:
//! - **Direct**: always continue at one node (or [`END`])
//! - **Parallel**: several direct edges out of one node run their targets
//!   side by side on the same state; they meet at their common successor
//! - **Conditional**: a router picks one of a declared set of nodes
//! - **Fan-out**: a router returns a list of [`Send`]s (or a single node,
//!   see [`Route`]); each send runs as an independent branch and the parent
//!   continues at the join node once all of them finished
//!
//! ### 3. Checkpoints and Interrupts
//!
//! After every node on the parent flow, the merged state and the pending next
//! step are committed through a
//! [`CheckpointSaver`](stategraph_checkpoint::CheckpointSaver). Interrupt
//! points pause a session before (or after) a node; [`CompiledGraph::resume`]
//! merges a patch and continues.
//!
//! ### 4. Run Config and Store
//!
//! A [`RunConfig`] passed to `start_with_config` / `resume_with_config`
//! carries per-call values such as a user id; a [`Store`](store::Store)
//! attached with [`CompiledGraph::with_store`] keeps namespaced memories
//! across sessions. Nodes read both through [`runtime::get_runtime`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stategraph_core::{AppendReducer, OverwriteReducer, RunStatus, StateGraph, StateSchema, END, START};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> stategraph_core::Result<()> {
//!     let schema = StateSchema::new()
//!         .with_field("draft", Box::new(OverwriteReducer))
//!         .with_field("feedback", Box::new(AppendReducer));
//!
//!     let mut graph = StateGraph::new(schema);
//!     graph
//!         .add_node("write", |state| {
//!             Box::pin(async move {
//!                 let notes = state["feedback"].as_array().map(|f| f.len()).unwrap_or(0);
//!                 Ok(json!({"draft": format!("draft revised {} times", notes)}))
//!             })
//!         })
//!         .add_node("review", |_| Box::pin(async move { Ok(json!(null)) }))
//!         .add_edge(START, "write")
//!         .add_edge("write", "review")
//!         .add_edge("review", END)
//!         .interrupt_before(["review"]);
//!
//!     let compiled = graph.compile()?;
//!     let outcome = compiled.start(json!({})).await?;
//!     assert!(matches!(outcome.status, RunStatus::Interrupted { .. }));
//!
//!     let done = compiled
//!         .resume(&outcome.session_id, json!({"feedback": ["looks good"]}))
//!         .await?;
//!     assert!(done.status.is_completed());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`state`] - Schema and reducers
//! - [`graph`] / [`registry`] - Edge table, routing, node registry
//! - [`compiled`] - Scheduler, checkpointing, resume
//! - [`session`] - Session API over named graphs
//! - [`collaborators`] - Model and search interfaces nodes call out to
//! - [`config`] - Execution limits and join policy
//! - [`runtime`] / [`store`] - Per-run values and long-term memory

pub mod builder;
pub mod collaborators;
pub mod compiled;
pub mod config;
pub mod error;
pub mod graph;
pub mod interrupt;
pub mod registry;
pub mod runtime;
pub mod send;
pub mod session;
pub mod state;
pub mod store;

// Re-export main types
pub use builder::StateGraph;
pub use compiled::{CompiledGraph, RunOutcome, RunStatus, StateSnapshot, StateSnapshotStream};
pub use config::{ExecutionConfig, JoinPolicy, DEFAULT_MAX_STEPS};
pub use error::{BoxError, GraphError, Result};
pub use graph::{Edge, Graph, NodeId, END, START};
pub use interrupt::{InterruptConfig, InterruptMarker, InterruptWhen};
pub use registry::{NodeExecutor, NodeFuture, NodeRegistry, NodeSpec};
pub use runtime::{get_runtime, get_store, RunConfig, Runtime};
pub use send::{Route, RoutingDecision, Send};
pub use session::{SessionReply, SessionService, SessionStatus};
pub use state::{
    AppendReducer, MergeReducer, OverwriteReducer, Reducer, StateError, StateSchema, SumReducer,
};
pub use store::{InMemoryStore, Item, Namespace, Store, StoreError};

pub use stategraph_checkpoint as checkpoint;
