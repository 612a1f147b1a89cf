//! # stategraph-cli
//!
//! The research assistant graph and the offline collaborators the
//! `stategraph` binary runs it with.

pub mod offline;
pub mod prompts;
pub mod research;

pub use offline::{connectors, default_corpus, OfflineModel};
pub use research::{initial_state, research_graph, Analyst, GRAPH_ID};
