//! # Node Error Types

use thiserror::Error;

use crate::node::NodeHandle;

/// Errors that can occur in the node table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The handle refers to a node that was destroyed (or never existed).
    #[error("stale node handle: {0}")]
    StaleHandle(NodeHandle),

    /// Every slot in the table is in use.
    #[error("node table full: capacity {capacity}")]
    TableFull {
        /// Table capacity.
        capacity: usize,
    },
}

/// Result type for node table operations.
pub type NodeResult<T> = Result<T, NodeError>;
