//! # Render Source Groups
//!
//! A group binds one prototype to the render sources that draw it under
//! the same group id. Every source owns a dense pool segment; the group
//! lays the segments out back to back in one shared transform buffer:
//!
//! ```text
//! transforms: [ source A: 0..120 | source B: 120..125 | source C: 125..400 ]
//!               start 0            start 120            start 125
//! ```
//!
//! When a segment changes length, every segment after it moves and is
//! uploaded in full. Instance indices seen by shaders and visibility jobs
//! are group-global (`buffer_start_index + local index`).
//!
//! The layout epoch only advances when an existing index stops naming the
//! same instance (swap-remove, a moved segment, a dropped source). Appends
//! keep it: an older visibility result stays drawable and just misses the
//! new tail.

mod activation;
mod capability;

pub use activation::ActivationController;
pub use capability::{CapabilityFlags, FlagVariantResolver, VariantCache, VariantResolver};

use std::sync::Arc;

use glam::Mat4;
use parking_lot::Mutex;
use thicket_core::{NodeSource, NodeTracker};
use tracing::{debug, error, info};

use crate::buffer::{BufferSurface, SurfaceOptions};
use crate::config::InstancingConfig;
use crate::error::InstancingError;
use crate::gpu::{BufferId, BufferUsage, GpuDevice};
use crate::ids::{GroupKey, OwnerId, RenderKey, VariantId};
use crate::instancing::{InstancePool, Prototype};
use crate::sync::{SyncStats, TransformSynchronizer, TransformTarget};

/// One registration inside a group.
#[derive(Debug)]
pub struct RenderSource {
    key: RenderKey,
    owner: OwnerId,
    pool: InstancePool,
    buffer_start_index: usize,
    buffer_size: usize,
    /// Pool layout epoch at the last relayout.
    seen_epoch: u64,
}

impl RenderSource {
    /// Registration key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> RenderKey {
        self.key
    }

    /// Caller that registered the source.
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> OwnerId {
        self.owner
    }

    /// The source's instance pool.
    #[inline]
    #[must_use]
    pub const fn pool(&self) -> &InstancePool {
        &self.pool
    }

    /// First slot of this source in the group's transform buffer.
    #[inline]
    #[must_use]
    pub const fn buffer_start_index(&self) -> usize {
        self.buffer_start_index
    }

    /// Number of slots this source occupies.
    #[inline]
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// A prototype plus the render sources drawing it.
pub struct RenderSourceGroup {
    key: GroupKey,
    prototype: Arc<Prototype>,
    sources: Vec<RenderSource>,
    transforms: BufferSurface<Mat4>,
    capabilities: CapabilityFlags,
    variant: VariantId,
    activation: ActivationController,
    auto_sync: bool,
    update_requested: bool,
    last_synced_frame: Option<u64>,
    disabled: Option<String>,
    layout_epoch: u64,
    /// Group-global matrix copy handed to visibility jobs.
    snapshot: Mutex<Option<Arc<[Mat4]>>>,
    pool_increment: usize,
    max_instances: usize,
}

impl RenderSourceGroup {
    /// Creates an empty group.
    #[must_use]
    pub fn new(
        key: GroupKey,
        prototype: Arc<Prototype>,
        device: Arc<dyn GpuDevice>,
        config: &InstancingConfig,
        capabilities: CapabilityFlags,
        variant: VariantId,
    ) -> Self {
        let transforms = BufferSurface::new(
            device,
            format!("thicket transforms {key}"),
            BufferUsage::Storage,
            SurfaceOptions {
                double_buffered: config.double_buffer_transforms,
                shrink_hysteresis: config.buffer_shrink_hysteresis,
                max_elements: config.max_instance_count,
                growth_increment: config.pool_increment,
            },
        );
        Self {
            key,
            prototype,
            sources: Vec::new(),
            transforms,
            capabilities,
            variant,
            activation: ActivationController::new(config.activation),
            auto_sync: true,
            update_requested: false,
            last_synced_frame: None,
            disabled: None,
            layout_epoch: 0,
            snapshot: Mutex::new(None),
            pool_increment: config.pool_increment,
            max_instances: config.max_instance_count,
        }
    }

    /// Group key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> GroupKey {
        self.key
    }

    /// Drawn prototype.
    #[inline]
    #[must_use]
    pub fn prototype(&self) -> &Arc<Prototype> {
        &self.prototype
    }

    /// Render sources in layout order.
    #[inline]
    #[must_use]
    pub fn sources(&self) -> &[RenderSource] {
        &self.sources
    }

    /// Looks up a source.
    #[must_use]
    pub fn source(&self, key: RenderKey) -> Option<&RenderSource> {
        self.sources.iter().find(|s| s.key == key)
    }

    /// Mutable access to a source's pool.
    pub fn pool_mut(&mut self, key: RenderKey) -> Option<&mut InstancePool> {
        self.sources
            .iter_mut()
            .find(|s| s.key == key)
            .map(|s| &mut s.pool)
    }

    /// Returns true if no source is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Live instances across all sources.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.sources.iter().map(|s| s.pool.len()).sum()
    }

    /// Counter bumped whenever an existing slot moves or is dropped.
    #[inline]
    #[must_use]
    pub const fn layout_epoch(&self) -> u64 {
        self.layout_epoch
    }

    /// Returns true if the group is switched on by activation.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.activation.is_active()
    }

    /// Reason the group stopped rendering, if it did.
    #[inline]
    #[must_use]
    pub fn disabled_reason(&self) -> Option<&str> {
        self.disabled.as_deref()
    }

    /// Returns true if the group syncs, uploads and draws this frame.
    #[inline]
    #[must_use]
    pub fn is_drawable(&self) -> bool {
        self.disabled.is_none() && self.activation.is_active()
    }

    /// Current capability set.
    #[inline]
    #[must_use]
    pub const fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    /// Shader variant for the current capability set.
    #[inline]
    #[must_use]
    pub const fn variant(&self) -> VariantId {
        self.variant
    }

    /// Replaces the capability set and its resolved variant.
    pub fn set_capabilities(&mut self, capabilities: CapabilityFlags, variant: VariantId) {
        self.capabilities = capabilities;
        self.variant = variant;
    }

    /// Enables or disables per-frame transform sync.
    pub fn set_auto_sync(&mut self, enabled: bool) {
        self.auto_sync = enabled;
    }

    /// Forces a full transform rewrite on the next sync.
    pub fn request_transform_update(&mut self) {
        self.update_requested = true;
    }

    /// Buffer holding this frame's transforms.
    #[inline]
    #[must_use]
    pub fn transforms_buffer(&self) -> Option<BufferId> {
        self.transforms.active_buffer()
    }

    /// Buffer holding last frame's transforms (double-buffered groups).
    #[inline]
    #[must_use]
    pub fn previous_transforms_buffer(&self) -> Option<BufferId> {
        self.transforms.previous_buffer()
    }

    /// The transform surface.
    #[inline]
    #[must_use]
    pub const fn transforms(&self) -> &BufferSurface<Mat4> {
        &self.transforms
    }

    /// Adds a render source at the end of the layout.
    pub fn add_source(&mut self, key: RenderKey, owner: OwnerId) {
        let start = self.instance_count();
        self.sources.push(RenderSource {
            key,
            owner,
            pool: InstancePool::new(key.raw(), self.pool_increment, self.max_instances),
            buffer_start_index: start,
            buffer_size: 0,
            seen_epoch: 0,
        });
    }

    /// Removes a render source, reporting its nodes as gone.
    ///
    /// Returns false if the source is not in this group.
    pub fn remove_source(&mut self, key: RenderKey, tracker: &mut dyn NodeTracker) -> bool {
        let Some(position) = self.sources.iter().position(|s| s.key == key) else {
            return false;
        };
        let mut source = self.sources.remove(position);
        source.pool.clear(tracker);
        if source.buffer_size > 0 {
            self.layout_epoch += 1;
            self.relayout();
        }
        true
    }

    /// Applies every source's queued adds/removes and lays segments out again.
    ///
    /// Returns true if any slot moved.
    pub fn apply_batches<N>(&mut self, nodes: &mut N) -> bool
    where
        N: NodeSource + NodeTracker + ?Sized,
    {
        let mut changed = false;
        for source in &mut self.sources {
            changed |= source.pool.apply_pending(nodes).changed_layout();
        }
        if changed {
            self.relayout();
        }
        changed
    }

    /// Recomputes segment starts; moved segments are marked for full upload.
    pub fn relayout(&mut self) {
        let mut start = 0;
        let mut moved = false;
        for source in &mut self.sources {
            if source.buffer_start_index != start {
                source.buffer_start_index = start;
                source.pool.mark_full_dirty();
                moved |= source.buffer_size > 0;
            }
            if source.seen_epoch != source.pool.layout_epoch() {
                source.seen_epoch = source.pool.layout_epoch();
                moved = true;
            }
            source.buffer_size = source.pool.len();
            start += source.buffer_size;
        }
        if moved {
            self.layout_epoch += 1;
        }
        *self.snapshot.lock() = None;
    }

    /// Runs auto activation for this frame. Returns the new state if it flipped.
    pub fn update_activation(&mut self, frame: u64) -> Option<bool> {
        let flipped = self.activation.update(self.instance_count(), frame)?;
        info!(group = %self.key, active = flipped, instances = self.instance_count(), "group activation changed");
        Some(flipped)
    }

    /// Uploads every source's dirty span to the shared transform buffer.
    ///
    /// Returns the number of matrices sent. A device failure disables the
    /// group; a capacity error skips this frame's upload.
    pub fn upload(&mut self) -> usize {
        if !self.is_drawable() {
            return 0;
        }
        let total = self.instance_count();
        if total == 0 && !self.transforms.is_allocated() {
            return 0;
        }

        // Device storage follows pool capacity, not the live count.
        let reserved = self.sources.iter().map(|s| s.pool.capacity()).sum::<usize>();
        match self.transforms.reserve(total, reserved, true) {
            Ok(_) => {}
            Err(InstancingError::Gpu(e)) => {
                self.disable(format!("transform buffer allocation failed: {e}"));
                return 0;
            }
            Err(e) => {
                error!(group = %self.key, error = %e, "transform upload skipped");
                return 0;
            }
        }

        let force_full = self.transforms.take_needs_full_write();
        let mut uploaded = 0;
        for index in 0..self.sources.len() {
            let source = &mut self.sources[index];
            let mut dirty = source.pool.take_dirty();
            if force_full {
                dirty.mark_full();
            }
            let start = source.buffer_start_index;
            match self
                .transforms
                .upload_dirty(source.pool.matrices(), dirty, start)
            {
                Ok(n) => uploaded += n,
                Err(e) => {
                    self.disable(format!("transform upload failed: {e}"));
                    return uploaded;
                }
            }
        }
        uploaded
    }

    /// Stops the group from rendering until it is unregistered.
    pub fn disable(&mut self, reason: String) {
        error!(group = %self.key, reason = %reason, "group disabled");
        self.disabled = Some(reason);
    }

    /// Group-global copy of all live matrices, in layout order.
    ///
    /// Cached until the next sync or layout change.
    #[must_use]
    pub fn matrix_snapshot(&self) -> Arc<[Mat4]> {
        let mut cached = self.snapshot.lock();
        if let Some(snapshot) = cached.as_ref() {
            return Arc::clone(snapshot);
        }
        let mut all = Vec::with_capacity(self.instance_count());
        for source in &self.sources {
            all.extend_from_slice(source.pool.matrices());
        }
        let snapshot: Arc<[Mat4]> = Arc::from(all);
        *cached = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// Ends the frame: swaps double-buffered transforms.
    pub fn end_frame(&mut self) {
        self.transforms.swap();
    }

    /// Group-global slot range of a source.
    #[must_use]
    pub fn source_range(&self, key: RenderKey) -> Option<(usize, usize)> {
        self.source(key)
            .map(|s| (s.buffer_start_index, s.buffer_size))
    }
}

impl TransformTarget for RenderSourceGroup {
    fn wants_sync(&self) -> bool {
        self.is_drawable() && (self.auto_sync || self.update_requested)
    }

    fn sync_transforms(
        &mut self,
        synchronizer: &TransformSynchronizer,
        source: &dyn NodeSource,
        frame: u64,
    ) -> SyncStats {
        // A pool that missed last frame's sync cannot trust change detection.
        let missed = self
            .last_synced_frame
            .map_or(true, |last| last + 1 != frame);
        let force_full = self.update_requested || missed;
        if force_full {
            debug!(group = %self.key, frame, missed, "full transform rewrite");
        }

        let stats = self
            .sources
            .iter_mut()
            .map(|s| synchronizer.sync_pool(&mut s.pool, source, force_full))
            .fold(SyncStats::default(), SyncStats::merge);

        self.update_requested = false;
        self.last_synced_frame = Some(frame);
        if stats.entries_changed > 0 || force_full {
            *self.snapshot.get_mut() = None;
        }
        stats
    }
}
