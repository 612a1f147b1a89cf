//! Interrupt points: where a session pauses for outside input
//!
//! An interrupt point is a node name. Before entering an interrupt-before
//! node the scheduler stops, records an [`InterruptMarker`] on the checkpoint
//! and returns [`RunStatus::Interrupted`](crate::RunStatus::Interrupted). The
//! session then holds nothing but its checkpoint until someone calls
//! [`resume`](crate::CompiledGraph::resume) with a patch, possibly days later.
//!
//! Interrupt-after points stop right after the node's checkpoint is written;
//! resuming continues with whatever was routed next.
//!
//! ```rust
//! use stategraph_core::InterruptConfig;
//!
//! let config = InterruptConfig::new().with_interrupt_before(["human_feedback"]);
//! assert!(config.is_interrupt_point("human_feedback"));
//! assert!(!config.should_interrupt_after("human_feedback"));
//! ```

use crate::graph::NodeId;
use serde::{Deserialize, Serialize};
pub use stategraph_checkpoint::{InterruptMarker, InterruptWhen};

/// Configuration for graph interrupts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptConfig {
    /// Nodes to interrupt before execution
    #[serde(default)]
    pub interrupt_before: Vec<NodeId>,

    /// Nodes to interrupt after execution
    #[serde(default)]
    pub interrupt_after: Vec<NodeId>,
}

impl InterruptConfig {
    /// Create a new interrupt configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set nodes to interrupt before
    pub fn with_interrupt_before<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupt_before = nodes.into_iter().map(Into::into).collect();
        self
    }

    /// Set nodes to interrupt after
    pub fn with_interrupt_after<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupt_after = nodes.into_iter().map(Into::into).collect();
        self
    }

    /// Check if should interrupt before a specific node
    pub fn should_interrupt_before(&self, node: &str) -> bool {
        self.interrupt_before.iter().any(|n| n == node)
    }

    /// Check if should interrupt after a specific node
    pub fn should_interrupt_after(&self, node: &str) -> bool {
        self.interrupt_after.iter().any(|n| n == node)
    }

    /// Whether the node pauses the session on either side
    pub fn is_interrupt_point(&self, node: &str) -> bool {
        self.should_interrupt_before(node) || self.should_interrupt_after(node)
    }

    pub fn is_empty(&self) -> bool {
        self.interrupt_before.is_empty() && self.interrupt_after.is_empty()
    }

    /// All declared interrupt nodes, for validation
    pub(crate) fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.interrupt_before.iter().chain(self.interrupt_after.iter())
    }
}

/// Whether the pending node must pause before running
///
/// `resumed_from` is the marker of the checkpoint a resume started from: a
/// session parked before `node` runs it instead of parking again.
pub(crate) fn should_pause_before(
    config: &InterruptConfig,
    node: &str,
    resumed_from: Option<&InterruptMarker>,
) -> bool {
    if !config.should_interrupt_before(node) {
        return false;
    }
    !matches!(
        resumed_from,
        Some(InterruptMarker { node: parked, when: InterruptWhen::Before }) if parked == node
    )
}
