//! Per-run context visible to nodes
//!
//! Nodes only receive the state. Values that belong to the call rather than
//! the state, such as the user a session runs for, travel in a [`RunConfig`]
//! and are read from inside a node with [`get_runtime`]:
//!
//! ```rust,no_run
//! use stategraph_core::runtime::get_runtime;
//! use stategraph_core::StateGraph;
//! use serde_json::json;
//!
//! # fn build(graph: &mut StateGraph) {
//! graph.add_node("greet", |_| {
//!     Box::pin(async move {
//!         let user = get_runtime()
//!             .and_then(|runtime| runtime.config().get_str("user_id").map(str::to_string))
//!             .unwrap_or_else(|| "default-user".to_string());
//!         Ok(json!({"greeting": format!("hello {}", user)}))
//!     })
//! });
//! # }
//! ```
//!
//! The configurable values a session was started with are recorded on its
//! checkpoints; a resume reuses them and may override single keys.

use crate::store::Store;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
    static RUNTIME: Runtime;
}

/// Caller-supplied values for one start or resume call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub configurable: Map<String, Value>,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one configurable value
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.configurable.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.configurable.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// This config with `newer`'s keys replacing its own
    pub fn overlaid(&self, newer: &RunConfig) -> RunConfig {
        let mut configurable = self.configurable.clone();
        for (key, value) in &newer.configurable {
            configurable.insert(key.clone(), value.clone());
        }
        RunConfig { configurable }
    }
}

/// Context of the session a node is running in
#[derive(Clone)]
pub struct Runtime {
    session_id: String,
    config: RunConfig,
    store: Option<Arc<dyn Store>>,
}

impl Runtime {
    pub fn new(session_id: impl Into<String>, config: RunConfig) -> Self {
        Self {
            session_id: session_id.into(),
            config,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Option<Arc<dyn Store>>) -> Self {
        self.store = store;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("session_id", &self.session_id)
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

/// Runtime of the session the current task runs for
///
/// `None` outside graph execution.
pub fn get_runtime() -> Option<Runtime> {
    RUNTIME.try_with(Runtime::clone).ok()
}

/// Store of the graph the current task runs in
pub fn get_store() -> Option<Arc<dyn Store>> {
    RUNTIME.try_with(|runtime| runtime.store.clone()).ok().flatten()
}

/// Run `future` with `runtime` visible to the nodes it invokes
///
/// Spawned tasks do not inherit the runtime and must be scoped again.
pub(crate) async fn scoped<F: Future>(runtime: Option<Runtime>, future: F) -> F::Output {
    match runtime {
        Some(runtime) => RUNTIME.scope(runtime, future).await,
        None => future.await,
    }
}
