//! # Asynchronous Visibility
//!
//! For one camera and one group, visibility is a list of instance indices
//! bucketed by LOD, once for the color pass and once for the shadow pass:
//!
//! ```text
//! indices: [ color LOD0 | color LOD1 | color LOD2 | shadow LOD0 | shadow LOD1 | ... ]
//!            ^offset     ^offset                    ^offset
//! ```
//!
//! The job runs on the rayon pool over an immutable snapshot of the
//! group's matrices and reports back on a bounded channel. The frame
//! thread polls with `try_recv`; it never blocks on a job except through
//! [`VisibilityTask::join`], which is reserved for teardown.
//!
//! Each result carries the layout epoch of the snapshot it was computed
//! from. A result whose epoch no longer matches the group was computed
//! against slots that have since moved and must be discarded.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use glam::{Mat4, Vec3};
use thicket_core::{is_defunct, translation};

use super::FrustumCuller;
use crate::instancing::Prototype;

/// Camera parameters captured when a job is scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilityRequest {
    /// Layout epoch of the matrix snapshot.
    pub epoch: u64,
    /// Camera view-projection.
    pub view_proj: Mat4,
    /// Camera world position.
    pub position: Vec3,
    /// Multiplier applied to distances before LOD lookup.
    pub lod_bias: f32,
    /// Finest LOD allowed.
    pub min_lod: usize,
    /// Camera culling distance.
    pub max_distance: f32,
    /// Whether shadow casters are collected.
    pub render_shadows: bool,
}

/// One LOD's slice of [`VisibilityResult::indices`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LodBucket {
    /// First entry in the index list.
    pub offset: u32,
    /// Number of entries.
    pub count: u32,
}

/// Visible instances of one group for one camera.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibilityResult {
    /// Layout epoch the indices refer to.
    pub epoch: u64,
    /// Instance indices, color buckets first, then shadow buckets.
    pub indices: Vec<u32>,
    /// Color bucket per LOD.
    pub color: Vec<LodBucket>,
    /// Shadow bucket per LOD.
    pub shadow: Vec<LodBucket>,
}

impl VisibilityResult {
    /// Computes visibility synchronously.
    #[must_use]
    pub fn compute(prototype: &Prototype, matrices: &[Mat4], request: &VisibilityRequest) -> Self {
        let lod_count = prototype.lod_count();
        let culler = FrustumCuller::new(&request.view_proj);
        let (center, radius) = prototype.bounds();
        let shadows = prototype.shadows();
        let collect_shadows = request.render_shadows && shadows.cast_shadows;
        let max_distance = request.max_distance.min(prototype.max_distance());

        let mut color: Vec<Vec<u32>> = vec![Vec::new(); lod_count];
        let mut shadow: Vec<Vec<u32>> = vec![Vec::new(); lod_count];

        for (index, world) in matrices.iter().enumerate() {
            if is_defunct(world) {
                continue;
            }
            let distance = translation(world).distance(request.position);
            if distance > max_distance {
                continue;
            }
            let Some(lod) = prototype.select_lod(distance, request.lod_bias, request.min_lod)
            else {
                continue;
            };

            if culler.test_instance(world, center, radius) {
                color[lod].push(index as u32);
            }
            // Off-screen instances still cast shadows into view.
            if collect_shadows
                && distance <= shadows.shadow_distance
                && prototype.lods()[lod].cast_shadows
            {
                shadow[lod].push(index as u32);
            }
        }

        let total: usize = color.iter().chain(&shadow).map(Vec::len).sum();
        let mut indices = Vec::with_capacity(total);
        let mut flatten = |lists: Vec<Vec<u32>>| -> Vec<LodBucket> {
            lists
                .into_iter()
                .map(|list| {
                    let bucket = LodBucket {
                        offset: indices.len() as u32,
                        count: list.len() as u32,
                    };
                    indices.extend(list);
                    bucket
                })
                .collect()
        };
        let color = flatten(color);
        let shadow = flatten(shadow);

        Self {
            epoch: request.epoch,
            indices,
            color,
            shadow,
        }
    }

    /// Color bucket of a LOD.
    #[must_use]
    pub fn color_bucket(&self, lod: usize) -> LodBucket {
        self.color.get(lod).copied().unwrap_or_default()
    }

    /// Shadow bucket of a LOD.
    #[must_use]
    pub fn shadow_bucket(&self, lod: usize) -> LodBucket {
        self.shadow.get(lod).copied().unwrap_or_default()
    }

    /// Number of color-visible instances across LODs.
    #[must_use]
    pub fn visible_count(&self) -> u32 {
        self.color.iter().map(|b| b.count).sum()
    }

    /// Number of shadow casters across LODs.
    #[must_use]
    pub fn shadow_count(&self) -> u32 {
        self.shadow.iter().map(|b| b.count).sum()
    }
}

/// State of an in-flight job.
#[derive(Debug)]
pub enum TaskPoll {
    /// Still running.
    Pending,
    /// Finished.
    Ready(VisibilityResult),
    /// The job died without a result.
    Lost,
}

/// Handle to a visibility job running on the rayon pool.
#[derive(Debug)]
pub struct VisibilityTask {
    epoch: u64,
    receiver: Receiver<VisibilityResult>,
}

impl VisibilityTask {
    /// Schedules a job over a matrix snapshot.
    #[must_use]
    pub fn spawn(
        prototype: Arc<Prototype>,
        matrices: Arc<[Mat4]>,
        request: VisibilityRequest,
    ) -> Self {
        let (sender, receiver) = bounded(1);
        let epoch = request.epoch;
        rayon::spawn(move || {
            let result = VisibilityResult::compute(&prototype, &matrices, &request);
            // The receiver is gone if the camera or group was disposed.
            let _ = sender.send(result);
        });
        Self { epoch, receiver }
    }

    /// Epoch of the snapshot the job runs on.
    #[inline]
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Checks for completion without blocking.
    #[must_use]
    pub fn poll(&self) -> TaskPoll {
        match self.receiver.try_recv() {
            Ok(result) => TaskPoll::Ready(result),
            Err(TryRecvError::Empty) => TaskPoll::Pending,
            Err(TryRecvError::Disconnected) => TaskPoll::Lost,
        }
    }

    /// Blocks until the job finishes.
    #[must_use]
    pub fn join(self) -> Option<VisibilityResult> {
        self.receiver.recv().ok()
    }
}
