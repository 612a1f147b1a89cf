//! # stategraph-checkpoint - Durable Session Snapshots
//!
//! **Trait-based checkpoint abstractions and implementations** for persisting
//! and restoring graph sessions. Checkpoints are what let a session pause at an
//! interrupt point for an arbitrary amount of time and resume exactly where it
//! stopped, or recover from a failed node by re-running it.
//!
//! ## Core Concepts
//!
//! ### 1. Checkpoint
//!
//! A [`Checkpoint`] holds the full state of a session after a step boundary,
//! the [`Pending`] position (next node, or the persisted branch list of a
//! fan-out) and [`CheckpointMetadata`] (source, step, interrupt marker,
//! tolerated branch failures).
//!
//! ### 2. CheckpointSaver Trait
//!
//! [`CheckpointSaver`] is the storage interface:
//!
//! - **`save()`** - Append a checkpoint, returning its monotonic id
//! - **`load()`** - Latest checkpoint of a session
//! - **`load_version()`** - A specific historical checkpoint
//! - **`list()`** - History stream, newest first
//! - **`delete_session()`** - Forget an abandoned session
//!
//! ### 3. Implementations
//!
//! - [`InMemoryCheckpointSaver`] - Process-local, for tests and short-lived runs
//! - [`FileCheckpointSaver`] - One JSON-lines file per session
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stategraph_checkpoint::{
//!     CheckpointMetadata, CheckpointSaver, CheckpointSource, FileCheckpointSaver, Pending,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = FileCheckpointSaver::new("./sessions");
//!
//!     let id = saver
//!         .save(
//!             "session-123",
//!             json!({"topic": "graph engines"}),
//!             Pending::node("create_analysts"),
//!             CheckpointMetadata::new().with_source(CheckpointSource::Input).with_step(-1),
//!         )
//!         .await?;
//!
//!     let latest = saver.load("session-123").await?;
//!     assert_eq!(latest.id, id);
//!     Ok(())
//! }
//! ```
//!
//! ## See Also
//!
//! - `stategraph_core` - The execution engine that writes these checkpoints

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

// Re-export main types
pub use checkpoint::{
    BranchFailure, Checkpoint, CheckpointId, CheckpointMetadata, CheckpointSource,
    InterruptMarker, InterruptWhen, Pending, PendingBranch,
};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointSaver;
pub use memory::InMemoryCheckpointSaver;
pub use traits::{CheckpointSaver, CheckpointStream};
