//! # Instancing Context
//!
//! The one object that owns every prototype, group, camera and GPU
//! buffer of the instancing core. Create it before the first frame and
//! dispose it after the last; there is no global instance.
//!
//! ## Frame order
//!
//! ```text
//! begin_frame ──> sync_transforms ──> upload ──> render_camera (per camera) ──> end_frame
//!  batches         parallel, joined    dirty      poll / draw / schedule         swap buffers
//!  activation                          ranges
//! ```
//!
//! Uploading before the batches are applied would draw stale indices, so
//! [`InstancingContext::run_frame`] chains the first three phases.
//!
//! ## Indices
//!
//! `add_instance` returns an index local to the render source. Shaders
//! and visibility jobs see group-global indices:
//! `buffer_start_index + local` (see [`InstancingContext::buffer_index`]).

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thicket_core::{NodeHandle, NodeSource, NodeTracker};
use tracing::{debug, info, warn};

use crate::camera::{CameraRegistry, CameraView};
use crate::config::InstancingConfig;
use crate::dispatch::{Dispatcher, DrawSink, RenderStats};
use crate::error::{InstancingError, InstancingResult};
use crate::gpu::GpuDevice;
use crate::group::{
    CapabilityFlags, FlagVariantResolver, RenderSourceGroup, VariantCache, VariantResolver,
};
use crate::ids::{CameraId, GroupKey, OwnerId, PrototypeKey, RenderKey};
use crate::instancing::{InstancePool, Prototype, PrototypeDescriptor, PrototypeRegistry};
use crate::sync::{SyncStats, TransformSynchronizer};

/// Owner of the whole instancing core.
pub struct InstancingContext {
    config: InstancingConfig,
    device: Arc<dyn GpuDevice>,
    prototypes: PrototypeRegistry,
    groups: BTreeMap<GroupKey, RenderSourceGroup>,
    sources: HashMap<RenderKey, GroupKey>,
    cameras: CameraRegistry,
    synchronizer: TransformSynchronizer,
    dispatcher: Dispatcher,
    resolver: Box<dyn VariantResolver>,
    variants: VariantCache,
    next_render_key: u64,
    frame: u64,
}

impl InstancingContext {
    /// Creates a context on a GPU device.
    ///
    /// # Errors
    ///
    /// Returns [`InstancingError::InvalidConfig`] if the configuration
    /// does not validate.
    pub fn new(config: InstancingConfig, device: Arc<dyn GpuDevice>) -> InstancingResult<Self> {
        config.validate()?;
        info!(
            pool_increment = config.pool_increment,
            max_instances = config.max_instance_count,
            batch = config.sync_batch_size,
            "instancing context created"
        );
        Ok(Self {
            synchronizer: TransformSynchronizer::new(config.sync_batch_size),
            dispatcher: Dispatcher::new(config.quality_max_lod, config.max_instance_count),
            config,
            device,
            prototypes: PrototypeRegistry::new(),
            groups: BTreeMap::new(),
            sources: HashMap::new(),
            cameras: CameraRegistry::new(),
            resolver: Box::new(FlagVariantResolver),
            variants: VariantCache::new(),
            next_render_key: 1,
            frame: 0,
        })
    }

    /// Replaces the shader variant resolver.
    #[must_use]
    pub fn with_variant_resolver(mut self, resolver: Box<dyn VariantResolver>) -> Self {
        self.resolver = resolver;
        self.variants = VariantCache::new();
        for group in self.groups.values_mut() {
            let variant = self.variants.get_or_resolve(
                self.resolver.as_ref(),
                group.key().prototype,
                group.capabilities(),
            );
            group.set_capabilities(group.capabilities(), variant);
        }
        self
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    /// Registers a render source drawing `descriptor` in group `group_id`.
    ///
    /// # Errors
    ///
    /// Returns [`InstancingError::InvalidDescriptor`] if the prototype is
    /// new and cannot be rendered.
    pub fn register(
        &mut self,
        owner: OwnerId,
        descriptor: &PrototypeDescriptor,
        group_id: u32,
    ) -> InstancingResult<RenderKey> {
        let prototype = match self.prototypes.acquire(descriptor) {
            Ok(prototype) => prototype,
            Err(e) => {
                warn!(owner = owner.0, error = %e, "registration rejected");
                return Err(e);
            }
        };
        let group_key = GroupKey::new(prototype.key(), group_id);
        let render_key = RenderKey(self.next_render_key);
        self.next_render_key += 1;

        let group = match self.groups.entry(group_key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let capabilities = default_capabilities(&self.config, &prototype);
                let variant = self.variants.get_or_resolve(
                    self.resolver.as_ref(),
                    group_key.prototype,
                    capabilities,
                );
                debug!(group = %group_key, variant = variant.0, "group created");
                entry.insert(RenderSourceGroup::new(
                    group_key,
                    prototype,
                    Arc::clone(&self.device),
                    &self.config,
                    capabilities,
                    variant,
                ))
            }
        };
        group.add_source(render_key, owner);
        self.sources.insert(render_key, group_key);
        info!(render_key = %render_key, group = %group_key, owner = owner.0, "render source registered");
        Ok(render_key)
    }

    /// Unregisters a render source, reporting its nodes to `tracker`.
    ///
    /// The group is dropped with its last source and the prototype with
    /// its last reference. Returns false for unknown keys.
    pub fn unregister(&mut self, key: RenderKey, tracker: &mut dyn NodeTracker) -> bool {
        let Some(group_key) = self.sources.remove(&key) else {
            warn!(render_key = %key, "unregister of unknown render key");
            return false;
        };
        if let Some(group) = self.groups.get_mut(&group_key) {
            group.remove_source(key, tracker);
            if group.is_empty() {
                self.cameras.forget_group(group_key);
                self.groups.remove(&group_key);
                debug!(group = %group_key, "group dropped");
            }
        }
        if self.prototypes.release(group_key.prototype) {
            self.variants.forget(group_key.prototype);
        }
        info!(render_key = %key, "render source unregistered");
        true
    }

    // ========================================================================
    // INSTANCES
    // ========================================================================

    fn pool_mut(&mut self, key: RenderKey) -> Option<&mut InstancePool> {
        let group = self.group_of_mut(key)?;
        group.pool_mut(key)
    }

    fn group_of_mut(&mut self, key: RenderKey) -> Option<&mut RenderSourceGroup> {
        let group = self
            .sources
            .get(&key)
            .and_then(|group_key| self.groups.get_mut(group_key));
        if group.is_none() {
            warn!(render_key = %key, "unknown render key");
        }
        group
    }

    /// Queues a node for the next batch. Returns its provisional local index.
    pub fn add_instance(&mut self, key: RenderKey, node: NodeHandle) -> Option<u32> {
        self.pool_mut(key)?.add(node)
    }

    /// Adds a node and applies the source's queue inline.
    ///
    /// Bypasses batching; every call pays for a batch and a relayout.
    pub fn add_instance_immediate<N>(
        &mut self,
        key: RenderKey,
        node: NodeHandle,
        nodes: &mut N,
    ) -> Option<u32>
    where
        N: NodeSource + NodeTracker + ?Sized,
    {
        let group = self.group_of_mut(key)?;
        let index = group.pool_mut(key)?.add_immediate(node, nodes);
        group.relayout();
        index
    }

    /// Queues removal of a local index. Double removal is a no-op.
    pub fn remove_instance(&mut self, key: RenderKey, index: u32) -> bool {
        self.pool_mut(key).is_some_and(|pool| pool.remove(index))
    }

    /// Removes a local index and applies the source's queue inline.
    pub fn remove_instance_immediate<N>(&mut self, key: RenderKey, index: u32, nodes: &mut N) -> bool
    where
        N: NodeSource + NodeTracker + ?Sized,
    {
        let Some(group) = self.group_of_mut(key) else {
            return false;
        };
        let removed = group
            .pool_mut(key)
            .is_some_and(|pool| pool.remove_immediate(index, nodes));
        if removed {
            group.relayout();
        }
        removed
    }

    /// Queues removal of a node wherever it sits in the source.
    pub fn remove_node(&mut self, key: RenderKey, node: NodeHandle) -> bool {
        self.pool_mut(key).is_some_and(|pool| pool.remove_node(node))
    }

    /// Forces a full transform rewrite of the source's group next sync.
    pub fn require_transform_update(&mut self, key: RenderKey) -> bool {
        self.group_of_mut(key)
            .map(RenderSourceGroup::request_transform_update)
            .is_some()
    }

    /// Enables or disables per-frame transform sync for the source's group.
    pub fn set_auto_sync(&mut self, key: RenderKey, enabled: bool) -> bool {
        self.group_of_mut(key)
            .map(|group| group.set_auto_sync(enabled))
            .is_some()
    }

    /// Changes the capability set of the source's group.
    ///
    /// The shader variant is resolved once per distinct flag set.
    pub fn set_capabilities(&mut self, key: RenderKey, flags: CapabilityFlags) -> bool {
        let Some(&group_key) = self.sources.get(&key) else {
            warn!(render_key = %key, "unknown render key");
            return false;
        };
        let variant =
            self.variants
                .get_or_resolve(self.resolver.as_ref(), group_key.prototype, flags);
        self.groups
            .get_mut(&group_key)
            .map(|group| group.set_capabilities(flags, variant))
            .is_some()
    }

    /// Group-global buffer index of a node (the slot shaders read).
    #[must_use]
    pub fn buffer_index(&self, key: RenderKey, node: NodeHandle) -> Option<u32> {
        let source = self.group_of(key)?.source(key)?;
        let local = source.pool().index_of(node)?;
        Some(source.buffer_start_index() as u32 + local)
    }

    /// Live instances of a source.
    #[must_use]
    pub fn instance_count(&self, key: RenderKey) -> usize {
        self.group_of(key)
            .and_then(|group| group.source(key))
            .map_or(0, |source| source.pool().len())
    }

    /// `(buffer_start_index, buffer_size)` of a source.
    #[must_use]
    pub fn source_range(&self, key: RenderKey) -> Option<(usize, usize)> {
        self.group_of(key)?.source_range(key)
    }

    /// Checks that a source is registered and its group can render.
    ///
    /// # Errors
    ///
    /// [`InstancingError::UnknownRenderKey`] or
    /// [`InstancingError::GroupDisabled`].
    pub fn status(&self, key: RenderKey) -> InstancingResult<()> {
        let group = self
            .group_of(key)
            .ok_or(InstancingError::UnknownRenderKey(key))?;
        match group.disabled_reason() {
            Some(reason) => Err(InstancingError::GroupDisabled {
                group: group.key(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    // ========================================================================
    // LOOKUP
    // ========================================================================

    /// The group a source belongs to.
    #[must_use]
    pub fn group_of(&self, key: RenderKey) -> Option<&RenderSourceGroup> {
        self.groups.get(self.sources.get(&key)?)
    }

    /// Looks up a group.
    #[must_use]
    pub fn group(&self, key: GroupKey) -> Option<&RenderSourceGroup> {
        self.groups.get(&key)
    }

    /// All groups, in key order.
    pub fn groups(&self) -> impl Iterator<Item = &RenderSourceGroup> {
        self.groups.values()
    }

    /// Looks up a registered prototype.
    ///
    /// # Errors
    ///
    /// [`InstancingError::UnknownPrototype`] if nothing uses it.
    pub fn prototype(&self, key: PrototypeKey) -> InstancingResult<&Arc<Prototype>> {
        self.prototypes
            .get(key)
            .ok_or(InstancingError::UnknownPrototype(key))
    }

    /// Prototype registry.
    #[inline]
    #[must_use]
    pub const fn prototypes(&self) -> &PrototypeRegistry {
        &self.prototypes
    }

    /// Camera registry.
    #[inline]
    #[must_use]
    pub const fn cameras(&self) -> &CameraRegistry {
        &self.cameras
    }

    /// Active configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &InstancingConfig {
        &self.config
    }

    /// Current frame number.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Changes the global quality LOD floor.
    pub fn set_quality_max_lod(&mut self, lod: u8) {
        self.config.quality_max_lod = lod;
        self.dispatcher.set_quality_max_lod(lod);
    }

    // ========================================================================
    // FRAME PHASES
    // ========================================================================

    /// Applies queued adds/removes and runs auto activation.
    pub fn begin_frame<N>(&mut self, nodes: &mut N)
    where
        N: NodeSource + NodeTracker + ?Sized,
    {
        let frame = self.frame;
        for group in self.groups.values_mut() {
            group.apply_batches(nodes);
            group.update_activation(frame);
        }
    }

    /// Copies world matrices into every synced group. Returns after the join.
    pub fn sync_transforms(&mut self, source: &dyn NodeSource) -> SyncStats {
        let targets: Vec<&mut RenderSourceGroup> = self.groups.values_mut().collect();
        self.synchronizer.run(targets, source, self.frame)
    }

    /// Uploads dirty transform ranges. Returns the number of matrices sent.
    pub fn upload(&mut self) -> usize {
        self.groups.values_mut().map(RenderSourceGroup::upload).sum()
    }

    /// Runs batches, transform sync and upload in order.
    pub fn run_frame<N>(&mut self, nodes: &mut N) -> SyncStats
    where
        N: NodeSource + NodeTracker,
    {
        self.begin_frame(nodes);
        let stats = self.sync_transforms(&*nodes);
        self.upload();
        stats
    }

    /// Ends the frame: swaps double-buffered transforms.
    pub fn end_frame(&mut self) {
        for group in self.groups.values_mut() {
            group.end_frame();
        }
        self.frame += 1;
    }

    // ========================================================================
    // CAMERAS
    // ========================================================================

    /// Adds a camera or replaces its view.
    pub fn add_camera(&mut self, id: CameraId, view: CameraView) -> bool {
        self.cameras.add_camera(id, view)
    }

    /// Replaces a camera's view.
    pub fn update_camera(&mut self, id: CameraId, view: CameraView) -> bool {
        self.cameras.update_camera(id, view)
    }

    /// Removes a camera, joining its visibility jobs first.
    pub fn remove_camera(&mut self, id: CameraId) -> bool {
        self.cameras.remove_camera(id)
    }

    /// Blocks until every in-flight visibility job has finished.
    pub fn join_visibility(&mut self) {
        let groups = &self.groups;
        self.cameras
            .join_pending(|key| groups.get(&key).map(RenderSourceGroup::layout_epoch));
    }

    /// Issues this frame's draws for one camera.
    ///
    /// Never fails: groups that cannot draw are logged and counted.
    pub fn render_camera(&mut self, id: CameraId, sink: &mut dyn DrawSink) -> RenderStats {
        let Some(camera) = self.cameras.get_mut(id) else {
            warn!(camera = %id, "render of unknown camera");
            return RenderStats::default();
        };
        self.dispatcher.render(camera, &self.groups, &self.device, sink)
    }

    /// Tears everything down, reporting every node as removed.
    pub fn dispose(&mut self, tracker: &mut dyn NodeTracker) {
        self.cameras.clear();
        let keys: Vec<RenderKey> = self.sources.keys().copied().collect();
        for key in keys {
            self.unregister(key, tracker);
        }
        info!(frame = self.frame, "instancing context disposed");
    }
}

fn default_capabilities(config: &InstancingConfig, prototype: &Prototype) -> CapabilityFlags {
    let mut flags = CapabilityFlags::INSTANCING;
    flags.set(CapabilityFlags::SHADOWS, prototype.shadows().cast_shadows);
    flags.set(CapabilityFlags::MOTION_VECTORS, config.double_buffer_transforms);
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessDevice;
    use crate::ids::{MaterialId, MeshId};
    use crate::instancing::{LodDescriptor, RendererDescriptor, ShadowSettings, SubMesh};
    use glam::{Mat4, Vec3};
    use thicket_core::NodeTable;

    fn descriptor(asset_id: u64) -> PrototypeDescriptor {
        PrototypeDescriptor {
            asset_id,
            name: format!("asset {asset_id}"),
            lods: vec![LodDescriptor {
                max_distance: 100.0,
                renderers: vec![RendererDescriptor {
                    mesh: Some(MeshId(1)),
                    submeshes: vec![SubMesh {
                        material: MaterialId(1),
                        index_count: 3,
                        first_index: 0,
                        base_vertex: 0,
                    }],
                    layer: 0,
                    rendering_layer_mask: 1,
                }],
                cast_shadows: true,
            }],
            bounds_center: Vec3::ZERO,
            bounds_radius: 1.0,
            shadows: ShadowSettings::default(),
            shadow_only: false,
            max_distance: 100.0,
        }
    }

    fn context() -> InstancingContext {
        InstancingContext::new(InstancingConfig::default(), Arc::new(HeadlessDevice::new())).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = InstancingConfig {
            pool_increment: 0,
            ..InstancingConfig::default()
        };
        assert!(InstancingContext::new(config, Arc::new(HeadlessDevice::new())).is_err());
    }

    #[test]
    fn test_sources_share_group() {
        let mut ctx = context();
        let a = ctx.register(OwnerId(1), &descriptor(7), 0).unwrap();
        let b = ctx.register(OwnerId(2), &descriptor(7), 0).unwrap();
        let c = ctx.register(OwnerId(3), &descriptor(7), 1).unwrap();

        assert_eq!(ctx.group_of(a).unwrap().key(), ctx.group_of(b).unwrap().key());
        assert_ne!(ctx.group_of(a).unwrap().key(), ctx.group_of(c).unwrap().key());
        assert_eq!(ctx.prototypes().ref_count(PrototypeKey(7)), 3);
        assert_eq!(ctx.groups().count(), 2);
    }

    #[test]
    fn test_invalid_descriptor_is_rejected() {
        let mut ctx = context();
        let mut bad = descriptor(1);
        bad.lods.clear();
        assert!(matches!(
            ctx.register(OwnerId(1), &bad, 0),
            Err(InstancingError::InvalidDescriptor { .. })
        ));
        assert!(ctx.prototypes().is_empty());
    }

    #[test]
    fn test_unknown_key_is_a_no_op() {
        let mut ctx = context();
        let mut table = NodeTable::new(4);
        let node = table.insert(Mat4::IDENTITY).unwrap();
        let ghost = RenderKey(99);

        assert_eq!(ctx.add_instance(ghost, node), None);
        assert!(!ctx.remove_instance(ghost, 0));
        assert!(!ctx.require_transform_update(ghost));
        assert!(!ctx.unregister(ghost, &mut table));
        assert_eq!(ctx.status(ghost), Err(InstancingError::UnknownRenderKey(ghost)));
    }

    #[test]
    fn test_buffer_index_is_group_global() {
        let mut ctx = context();
        let mut table = NodeTable::new(16);
        let a = ctx.register(OwnerId(1), &descriptor(3), 0).unwrap();
        let b = ctx.register(OwnerId(2), &descriptor(3), 0).unwrap();
        for _ in 0..3 {
            let node = table.insert(Mat4::IDENTITY).unwrap();
            ctx.add_instance(a, node);
        }
        let node = table.insert(Mat4::IDENTITY).unwrap();
        assert_eq!(ctx.add_instance(b, node), Some(0));
        ctx.begin_frame(&mut table);

        assert_eq!(ctx.buffer_index(b, node), Some(3));
        assert_eq!(ctx.source_range(b), Some((3, 1)));
        assert_eq!(table.buffer_index(node, b.raw()), Some(0));
    }

    #[test]
    fn test_last_unregister_drops_group_and_prototype() {
        let mut ctx = context();
        let mut table = NodeTable::new(4);
        let a = ctx.register(OwnerId(1), &descriptor(5), 0).unwrap();
        let b = ctx.register(OwnerId(2), &descriptor(5), 0).unwrap();

        assert!(ctx.unregister(a, &mut table));
        assert!(ctx.prototype(PrototypeKey(5)).is_ok());
        assert!(ctx.unregister(b, &mut table));
        assert_eq!(ctx.groups().count(), 0);
        assert!(matches!(
            ctx.prototype(PrototypeKey(5)),
            Err(InstancingError::UnknownPrototype(_))
        ));
    }

    #[test]
    fn test_capability_change_resolves_variant() {
        let mut ctx = context();
        let key = ctx.register(OwnerId(1), &descriptor(2), 0).unwrap();
        let flags = CapabilityFlags::INSTANCING | CapabilityFlags::WIND;
        assert!(ctx.set_capabilities(key, flags));
        let group = ctx.group_of(key).unwrap();
        assert_eq!(group.capabilities(), flags);
        assert_eq!(group.variant().0, flags.bits());
    }
}
