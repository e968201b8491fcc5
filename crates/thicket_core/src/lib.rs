//! # Thicket Core
//!
//! Scene-node plumbing for the thicket instancing core:
//! - Generation-checked node handles (arena + index)
//! - A node table holding world matrices
//! - Collaborator traits the instancing pools read nodes through
//!
//! ## Example
//!
//! ```rust
//! use glam::Mat4;
//! use thicket_core::{NodeSource, NodeTable};
//!
//! let mut nodes = NodeTable::new(1_000);
//! let tree = nodes.insert(Mat4::IDENTITY).unwrap();
//! assert!(nodes.world_matrix(tree).is_some());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod node;
pub mod transform;

pub use error::{NodeError, NodeResult};
pub use node::{NodeHandle, NodeSource, NodeTable, NodeTracker, Untracked};
pub use transform::{is_defunct, max_axis_scale, translation, DEFUNCT_MATRIX};
