//! # Scene Nodes
//!
//! Instance pools refer to scene nodes through handles into an external
//! table (arena + index), never through pointers:
//! - A destroyed node cannot leave a pool with a dangling reference
//! - The pool only ever asks "what is this node's transform right now"

mod handle;
mod table;

pub use handle::NodeHandle;
pub use table::{NodeSource, NodeTable, NodeTracker, Untracked};
