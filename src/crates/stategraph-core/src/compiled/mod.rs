//! Runtime for compiled graphs
//!
//! A [`CompiledGraph`] is a validated graph plus its state schema, interrupt
//! points, execution limits and checkpointer. It can run any number of
//! sessions; each session is nothing but its checkpoint history, so a parked
//! session can be resumed by another process pointing at the same store.
//!
//! # Execution Model
//!
//! ```text
//! start(input) ──► [input checkpoint] ──► node ──► [loop checkpoint] ──► node ──► ...
//!                                                         │
//!                                      interrupt point ◄──┘   resume(patch) picks up here
//! ```
//!
//! Every node execution on the parent flow is followed by exactly one
//! checkpoint holding the merged state and the pending next step. Fan-out
//! branches run concurrently; the parent commits once, after the join.
//!
//! # Key Types
//!
//! - [`CompiledGraph`] - The executable graph runtime
//! - [`RunOutcome`] - Result of `start` / `resume`
//! - [`StateSnapshot`] - A checkpoint as seen from outside

mod types;
mod graph;
mod execution;
mod state;
#[cfg(test)]
mod tests;

pub use graph::CompiledGraph;
pub use types::{RunOutcome, RunStatus, StateSnapshot, StateSnapshotStream};
