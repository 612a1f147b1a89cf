//! CompiledGraph struct and builder methods

use crate::config::ExecutionConfig;
use crate::graph::Graph;
use crate::interrupt::InterruptConfig;
use crate::state::StateSchema;
use crate::store::Store;
use stategraph_checkpoint::{CheckpointSaver, InMemoryCheckpointSaver};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Graph id recorded on checkpoints when none was set
pub const DEFAULT_GRAPH_ID: &str = "graph";

/// Compiled graph ready for execution
///
/// Cloning is cheap and clones share the checkpointer and session locks.
#[derive(Clone)]
pub struct CompiledGraph {
    pub(crate) graph: Arc<Graph>,
    pub(crate) schema: Arc<StateSchema>,
    pub(crate) checkpointer: Arc<dyn CheckpointSaver>,
    pub(crate) interrupt_config: InterruptConfig,
    pub(crate) config: ExecutionConfig,
    pub(crate) graph_id: String,
    pub(crate) store: Option<Arc<dyn Store>>,
    session_locks: Arc<Mutex<HashMap<String, Weak<Mutex<()>>>>>,
}

impl fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("graph_id", &self.graph_id)
            .field("nodes", &self.graph.nodes.names())
            .field("schema", &self.schema)
            .field("interrupt_config", &self.interrupt_config)
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

impl CompiledGraph {
    pub(crate) fn new(
        graph: Graph,
        schema: StateSchema,
        interrupt_config: InterruptConfig,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            graph: Arc::new(graph),
            schema: Arc::new(schema),
            checkpointer: Arc::new(InMemoryCheckpointSaver::new()),
            interrupt_config,
            config,
            graph_id: DEFAULT_GRAPH_ID.to_string(),
            store: None,
            session_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Set the checkpoint saver
    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = saver;
        self
    }

    /// Name recorded as `graph_id` on every checkpoint
    pub fn with_graph_id(mut self, graph_id: impl Into<String>) -> Self {
        self.graph_id = graph_id.into();
        self
    }

    /// Long-term store shared by every session of this graph
    ///
    /// Nodes reach it through [`get_store`](crate::runtime::get_store).
    /// Subgraphs without a store of their own use the parent's.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Get a reference to the underlying graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    /// Get the interrupt configuration
    pub fn interrupt_config(&self) -> &InterruptConfig {
        &self.interrupt_config
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn checkpointer(&self) -> Arc<dyn CheckpointSaver> {
        self.checkpointer.clone()
    }

    pub fn store(&self) -> Option<Arc<dyn Store>> {
        self.store.clone()
    }

    /// Serialize calls that touch one session
    ///
    /// The map only holds weak handles; a session's lock lives as long as a
    /// call holds or waits for it, and dead entries are pruned here.
    pub(crate) async fn lock_session(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.session_locks.lock().await;
            locks.retain(|_, lock| lock.strong_count() > 0);
            match locks.get(session_id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(session_id.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    /// Sessions with a call in flight
    #[cfg(test)]
    pub(crate) async fn locked_sessions(&self) -> usize {
        let mut locks = self.session_locks.lock().await;
        locks.retain(|_, lock| lock.strong_count() > 0);
        locks.len()
    }
}
