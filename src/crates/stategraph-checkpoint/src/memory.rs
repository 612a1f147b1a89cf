//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointSaver`] keeps every session's checkpoints in a
//! `Arc<RwLock<HashMap>>`. Clones share the same storage, so a graph and a
//! test can hold the same saver. Data is lost when the process exits; use
//! [`FileCheckpointSaver`](crate::FileCheckpointSaver) for sessions that must
//! survive a restart.
//!
//! ```text
//! Arc<RwLock<HashMap>>
//!   "session-1"
//!     ├─ [0] Checkpoint id=1 (input)
//!     ├─ [1] Checkpoint id=2 (loop, step 0)
//!     └─ [2] Checkpoint id=3 (loop, step 1)
//!   "session-2"
//!     └─ [0] Checkpoint id=1 (input)
//! ```

use crate::{
    checkpoint::{Checkpoint, CheckpointId, CheckpointMetadata, Pending},
    error::Result,
    traits::{CheckpointSaver, CheckpointStream},
};
use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe in-memory checkpoint storage
type CheckpointStorage = Arc<RwLock<HashMap<String, Vec<Checkpoint>>>>;

/// In-memory checkpoint saver implementation
///
/// # Example
///
/// ```rust
/// use stategraph_checkpoint::{CheckpointMetadata, CheckpointSaver, InMemoryCheckpointSaver, Pending};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let saver = InMemoryCheckpointSaver::new();
///     let id = saver
///         .save("s-1", json!({"n": 1}), Pending::node("a"), CheckpointMetadata::new())
///         .await?;
///     assert_eq!(id, 1);
///     assert_eq!(saver.load("s-1").await?.state, json!({"n": 1}));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointSaver {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointSaver {
    /// Create a new in-memory checkpoint saver
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of sessions being tracked
    pub async fn session_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Get the total number of checkpoints across all sessions
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Deep copy of the current contents, detached from this saver
    pub async fn snapshot(&self) -> Self {
        let storage = self.storage.read().await.clone();
        Self {
            storage: Arc::new(RwLock::new(storage)),
        }
    }

    /// Clear all checkpoints (useful for testing)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn save(
        &self,
        session_id: &str,
        state: Value,
        pending: Pending,
        mut metadata: CheckpointMetadata,
    ) -> Result<CheckpointId> {
        let mut storage = self.storage.write().await;
        let entries = storage.entry(session_id.to_string()).or_default();

        let parent = entries.last().map(|c| c.id);
        let id = parent.map_or(1, |p| p + 1);
        metadata.parent = parent;

        entries.push(Checkpoint::new(session_id, id, state, pending, metadata));
        Ok(id)
    }

    async fn get(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        Ok(storage
            .get(session_id)
            .and_then(|entries| entries.last())
            .cloned())
    }

    async fn load_version(
        &self,
        session_id: &str,
        id: CheckpointId,
    ) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        Ok(storage
            .get(session_id)
            .and_then(|entries| entries.iter().find(|c| c.id == id))
            .cloned())
    }

    async fn list(&self, session_id: &str, limit: Option<usize>) -> Result<CheckpointStream> {
        let storage = self.storage.read().await;
        let results: Vec<Result<Checkpoint>> = storage
            .get(session_id)
            .map(|entries| {
                entries
                    .iter()
                    .rev()
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .map(Ok)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Box::pin(stream::iter(results)))
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage.remove(session_id);
        Ok(())
    }
}
