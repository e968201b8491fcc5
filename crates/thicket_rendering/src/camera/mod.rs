//! # Cameras
//!
//! Per-camera visibility state, kept per group:
//!
//! ```text
//!  Unculled ──schedule──> Pending ──poll: ready──> Ready ──draw──> Drawn
//!      ^                     │                                    │
//!      │                     └──poll: stale epoch / lost──┐       │
//!      └──────────────────────────────────────────────────┴───────┘
//! ```
//!
//! A group whose result is not ready at draw time is skipped for that
//! camera and frame; nothing ever waits on a job during rendering.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use glam::{Mat4, Vec3};
use tracing::debug;

use crate::buffer::{BufferSurface, SurfaceOptions};
use crate::config::DEFAULT_POOL_INCREMENT;
use crate::culling::{TaskPoll, VisibilityResult, VisibilityTask};
use crate::gpu::{BufferUsage, GpuDevice};
use crate::ids::{CameraId, GroupKey};
use crate::instancing::DrawIndexedIndirectArgs;

/// Everything the core needs to know about a camera for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraView {
    /// View-projection matrix (wgpu clip space).
    pub view_proj: Mat4,
    /// World position.
    pub position: Vec3,
    /// Render layers this camera draws (bit per layer).
    pub culling_mask: u32,
    /// Layers allowed to cast shadows for this camera.
    pub shadow_layer_mask: u32,
    /// Distance multiplier for LOD lookup.
    pub lod_bias: f32,
    /// Coarsest-detail floor requested by the camera's render profile.
    pub profile_max_lod: u8,
    /// Culling distance.
    pub max_distance: f32,
    /// Whether the shadow pass runs for this camera.
    pub render_shadows: bool,
}

impl Default for CameraView {
    fn default() -> Self {
        Self {
            view_proj: Mat4::IDENTITY,
            position: Vec3::ZERO,
            culling_mask: u32::MAX,
            shadow_layer_mask: u32::MAX,
            lod_bias: 1.0,
            profile_max_lod: 0,
            max_distance: f32::INFINITY,
            render_shadows: true,
        }
    }
}

/// Visibility state of one group for one camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisibilityPhase {
    /// No job has run yet.
    #[default]
    Unculled,
    /// A job is in flight.
    Pending,
    /// A result is waiting to be drawn.
    Ready,
    /// The last result was drawn.
    Drawn,
}

/// Per-camera, per-group culling state and GPU buffers.
pub struct CameraGroupState {
    phase: VisibilityPhase,
    pending: Option<VisibilityTask>,
    ready: Option<VisibilityResult>,
    visible_indices: Option<BufferSurface<u32>>,
    indirect: Option<BufferSurface<DrawIndexedIndirectArgs>>,
}

impl CameraGroupState {
    fn new() -> Self {
        Self {
            phase: VisibilityPhase::Unculled,
            pending: None,
            ready: None,
            visible_indices: None,
            indirect: None,
        }
    }

    /// Current phase.
    #[inline]
    #[must_use]
    pub const fn phase(&self) -> VisibilityPhase {
        self.phase
    }

    /// Returns true if a job is in flight.
    #[inline]
    #[must_use]
    pub const fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Collects a finished job without blocking.
    ///
    /// Results computed for another layout epoch are dropped, both the
    /// waiting one and a freshly collected one. Returns how many were
    /// dropped.
    pub fn poll(&mut self, epoch: u64) -> u32 {
        let mut dropped = 0;
        if self.ready.as_ref().is_some_and(|ready| ready.epoch != epoch) {
            debug!(epoch, "discarding stale visibility");
            self.ready = None;
            self.phase = VisibilityPhase::Unculled;
            dropped += 1;
        }

        let Some(task) = &self.pending else {
            return dropped;
        };
        match task.poll() {
            TaskPoll::Pending => {}
            TaskPoll::Ready(result) => {
                self.pending = None;
                if self.accept(result, epoch) {
                    dropped += 1;
                }
            }
            TaskPoll::Lost => {
                self.pending = None;
                self.phase = VisibilityPhase::Unculled;
            }
        }
        dropped
    }

    /// Takes the ready result if it still matches the layout epoch.
    pub fn take_ready(&mut self, epoch: u64) -> Option<VisibilityResult> {
        let result = self.ready.take()?;
        if result.epoch == epoch {
            Some(result)
        } else {
            debug!(result_epoch = result.epoch, epoch, "discarding stale visibility");
            None
        }
    }

    /// Stores a newly scheduled job.
    pub fn schedule(&mut self, task: VisibilityTask) {
        self.pending = Some(task);
        self.phase = VisibilityPhase::Pending;
    }

    /// Marks the current result as drawn.
    pub fn mark_drawn(&mut self) {
        if self.pending.is_none() {
            self.phase = VisibilityPhase::Drawn;
        }
    }

    /// Blocks until the in-flight job (if any) finishes.
    pub fn join(&mut self, epoch: u64) {
        if let Some(task) = self.pending.take() {
            match task.join() {
                Some(result) => {
                    self.accept(result, epoch);
                }
                None => self.phase = VisibilityPhase::Unculled,
            }
        }
    }

    /// Visible-index and indirect-argument buffers, created on first use.
    pub fn buffers(
        &mut self,
        device: &Arc<dyn GpuDevice>,
        label: &str,
        max_instances: usize,
    ) -> (&mut BufferSurface<u32>, &mut BufferSurface<DrawIndexedIndirectArgs>) {
        let indices = self.visible_indices.get_or_insert_with(|| {
            BufferSurface::new(
                Arc::clone(device),
                format!("{label} visible"),
                BufferUsage::Storage,
                SurfaceOptions {
                    double_buffered: false,
                    shrink_hysteresis: usize::MAX,
                    max_elements: max_instances.saturating_mul(2),
                    growth_increment: DEFAULT_POOL_INCREMENT,
                },
            )
        });
        let indirect = self.indirect.get_or_insert_with(|| {
            BufferSurface::new(
                Arc::clone(device),
                format!("{label} indirect"),
                BufferUsage::Indirect,
                SurfaceOptions {
                    double_buffered: false,
                    shrink_hysteresis: usize::MAX,
                    max_elements: max_instances.saturating_mul(2),
                    growth_increment: 1,
                },
            )
        });
        (indices, indirect)
    }

    fn accept(&mut self, result: VisibilityResult, epoch: u64) -> bool {
        if result.epoch == epoch {
            self.ready = Some(result);
            self.phase = VisibilityPhase::Ready;
            false
        } else {
            self.phase = VisibilityPhase::Unculled;
            true
        }
    }
}

/// One camera participating in rendering.
pub struct CameraData {
    id: CameraId,
    view: CameraView,
    groups: HashMap<GroupKey, CameraGroupState>,
}

impl CameraData {
    fn new(id: CameraId, view: CameraView) -> Self {
        Self {
            id,
            view,
            groups: HashMap::new(),
        }
    }

    /// Camera id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> CameraId {
        self.id
    }

    /// Current view.
    #[inline]
    #[must_use]
    pub const fn view(&self) -> &CameraView {
        &self.view
    }

    /// State of a group, if the camera has seen it.
    #[must_use]
    pub fn group_state(&self, group: GroupKey) -> Option<&CameraGroupState> {
        self.groups.get(&group)
    }

    /// State of a group, created on first use.
    pub fn group_state_mut(&mut self, group: GroupKey) -> &mut CameraGroupState {
        self.groups.entry(group).or_insert_with(CameraGroupState::new)
    }

    /// Joins every in-flight job of this camera.
    ///
    /// `epoch_of` maps a group to its current layout epoch.
    pub fn join_pending(&mut self, epoch_of: impl Fn(GroupKey) -> Option<u64>) {
        for (key, state) in &mut self.groups {
            state.join(epoch_of(*key).unwrap_or(u64::MAX));
        }
    }

    fn forget_group(&mut self, group: GroupKey) {
        if let Some(mut state) = self.groups.remove(&group) {
            state.join(u64::MAX);
        }
    }
}

/// All cameras, keyed by id.
#[derive(Default)]
pub struct CameraRegistry {
    cameras: BTreeMap<CameraId, CameraData>,
}

impl CameraRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a camera or replaces its view. Returns true if it was new.
    pub fn add_camera(&mut self, id: CameraId, view: CameraView) -> bool {
        match self.cameras.get_mut(&id) {
            Some(camera) => {
                camera.view = view;
                false
            }
            None => {
                debug!(camera = %id, "camera registered");
                self.cameras.insert(id, CameraData::new(id, view));
                true
            }
        }
    }

    /// Replaces a camera's view. Returns false for unknown cameras.
    pub fn update_camera(&mut self, id: CameraId, view: CameraView) -> bool {
        self.cameras
            .get_mut(&id)
            .map(|camera| camera.view = view)
            .is_some()
    }

    /// Removes a camera after joining its in-flight jobs.
    pub fn remove_camera(&mut self, id: CameraId) -> bool {
        let Some(mut camera) = self.cameras.remove(&id) else {
            return false;
        };
        camera.join_pending(|_| None);
        debug!(camera = %id, "camera removed");
        true
    }

    /// Looks up a camera.
    #[must_use]
    pub fn get(&self, id: CameraId) -> Option<&CameraData> {
        self.cameras.get(&id)
    }

    /// Looks up a camera mutably.
    pub fn get_mut(&mut self, id: CameraId) -> Option<&mut CameraData> {
        self.cameras.get_mut(&id)
    }

    /// Number of cameras.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    /// Returns true if no camera is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    /// Blocks until every camera's in-flight visibility jobs finish.
    pub fn join_pending(&mut self, epoch_of: impl Fn(GroupKey) -> Option<u64>) {
        for camera in self.cameras.values_mut() {
            camera.join_pending(&epoch_of);
        }
    }

    /// Drops every camera's state for a group, joining its jobs first.
    pub fn forget_group(&mut self, group: GroupKey) {
        for camera in self.cameras.values_mut() {
            camera.forget_group(group);
        }
    }

    /// Joins all jobs and drops every camera.
    pub fn clear(&mut self) {
        self.join_pending(|_| None);
        self.cameras.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PrototypeKey;

    #[test]
    fn test_add_update_remove() {
        let mut cameras = CameraRegistry::new();
        let id = CameraId(1);
        assert!(cameras.add_camera(id, CameraView::default()));

        let moved = CameraView {
            position: Vec3::X,
            ..CameraView::default()
        };
        assert!(!cameras.add_camera(id, moved));
        assert_eq!(cameras.get(id).unwrap().view().position, Vec3::X);

        assert!(cameras.update_camera(id, CameraView::default()));
        assert!(!cameras.update_camera(CameraId(2), CameraView::default()));
        assert!(cameras.remove_camera(id));
        assert!(!cameras.remove_camera(id));
        assert!(cameras.is_empty());
    }

    #[test]
    fn test_group_state_starts_unculled() {
        let mut cameras = CameraRegistry::new();
        cameras.add_camera(CameraId(0), CameraView::default());
        let camera = cameras.get_mut(CameraId(0)).unwrap();
        let key = GroupKey::new(PrototypeKey(1), 0);

        assert!(camera.group_state(key).is_none());
        let state = camera.group_state_mut(key);
        assert_eq!(state.phase(), VisibilityPhase::Unculled);
        assert!(state.take_ready(0).is_none());
    }

    #[test]
    fn test_stale_result_is_discarded() {
        let mut state = CameraGroupState::new();
        assert!(state.accept(VisibilityResult { epoch: 1, ..Default::default() }, 2));
        assert_eq!(state.phase(), VisibilityPhase::Unculled);

        assert!(!state.accept(VisibilityResult { epoch: 2, ..Default::default() }, 2));
        assert_eq!(state.phase(), VisibilityPhase::Ready);
        assert!(state.take_ready(3).is_none());
    }

    #[test]
    fn test_poll_counts_waiting_result_gone_stale() {
        let mut state = CameraGroupState::new();
        state.accept(VisibilityResult { epoch: 4, ..Default::default() }, 4);
        assert_eq!(state.poll(4), 0);
        assert_eq!(state.phase(), VisibilityPhase::Ready);

        assert_eq!(state.poll(5), 1);
        assert_eq!(state.phase(), VisibilityPhase::Unculled);
        assert!(state.take_ready(5).is_none());
        assert_eq!(state.poll(5), 0);
    }
}
