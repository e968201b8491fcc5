//! Culling and asynchronous visibility.
//!
//! Visibility per camera is computed off the frame thread over a snapshot
//! of a group's matrices and polled for completion at draw time.

mod frustum;
mod visibility;

pub use frustum::{Frustum, FrustumCuller, Plane};
pub use visibility::{LodBucket, TaskPoll, VisibilityRequest, VisibilityResult, VisibilityTask};
