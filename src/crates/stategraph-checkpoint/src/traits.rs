//! The [`CheckpointSaver`] trait implemented by storage backends
//!
//! The engine calls [`CheckpointSaver::save`] after every step boundary and
//! [`CheckpointSaver::load`] at the start of every resume. Backends only need
//! to keep an append-only list of checkpoints per session; the engine never
//! rewrites a stored checkpoint.
//!
//! # Implementation Requirements
//!
//! 1. Ids are assigned by the saver, start at 1 and increase by one per save.
//! 2. `metadata.parent` is set to the id of the previous checkpoint.
//! 3. `get` returns the latest checkpoint, `None` for an unknown session.
//! 4. Two reads without an intervening save return identical checkpoints.
//! 5. `list` yields newest first.
//!
//! # Example: Custom Backend
//!
//! ```rust,ignore
//! use stategraph_checkpoint::{
//!     Checkpoint, CheckpointId, CheckpointMetadata, CheckpointSaver, CheckpointStream,
//!     Pending, Result,
//! };
//! use async_trait::async_trait;
//!
//! struct PostgresCheckpointSaver {
//!     pool: sqlx::PgPool,
//! }
//!
//! #[async_trait]
//! impl CheckpointSaver for PostgresCheckpointSaver {
//!     async fn save(
//!         &self,
//!         session_id: &str,
//!         state: serde_json::Value,
//!         pending: Pending,
//!         metadata: CheckpointMetadata,
//!     ) -> Result<CheckpointId> {
//!         // INSERT ... SELECT COALESCE(MAX(id), 0) + 1 ... RETURNING id
//!         todo!()
//!     }
//!
//!     // get, load_version, list, delete_session ...
//! }
//! ```

use crate::{
    checkpoint::{Checkpoint, CheckpointId, CheckpointMetadata, Pending},
    error::{CheckpointError, Result},
};
use async_trait::async_trait;
use futures::stream::Stream;
use serde_json::Value;
use std::pin::Pin;

/// Type alias for async stream of checkpoints
pub type CheckpointStream = Pin<Box<dyn Stream<Item = Result<Checkpoint>> + Send + 'static>>;

/// Core trait for implementing checkpoint storage backends
///
/// Implementations must be thread-safe (`Send + Sync`): sessions run
/// concurrently and share one saver.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Append a checkpoint for `session_id` and return its id
    async fn save(
        &self,
        session_id: &str,
        state: Value,
        pending: Pending,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointId>;

    /// Latest checkpoint of the session, `None` when it has none
    async fn get(&self, session_id: &str) -> Result<Option<Checkpoint>>;

    /// Latest checkpoint of the session
    ///
    /// # Errors
    ///
    /// [`CheckpointError::NotFound`] when the session has no checkpoint.
    async fn load(&self, session_id: &str) -> Result<Checkpoint> {
        self.get(session_id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(session_id.to_string()))
    }

    /// A specific checkpoint of the session
    async fn load_version(&self, session_id: &str, id: CheckpointId)
        -> Result<Option<Checkpoint>>;

    /// Checkpoint history of the session, newest first
    async fn list(&self, session_id: &str, limit: Option<usize>) -> Result<CheckpointStream>;

    /// Drop every checkpoint of the session
    async fn delete_session(&self, session_id: &str) -> Result<()>;
}
