//! # Per-Camera Dispatch
//!
//! Turns a group's visibility result into indirect draw commands. Every
//! prototype has a fixed command layout: one slot per
//! `(lod, renderer, submesh)`, color slots first, shadow slots mirrored
//! behind them.
//!
//! ```text
//! indirect: [ LOD0 r0 m0 | LOD0 r0 m1 | LOD1 r0 m0 | ... || shadow copies ... ]
//!             slot 0       slot 1       slot 2             slot_count + n
//! ```
//!
//! Renderers that are skipped (no mesh, layer culled, LOD below the floor)
//! still consume their slots, so offsets never depend on what is visible.
//!
//! Nothing in here fails a frame: a group that cannot write its buffers is
//! logged and skipped while the others keep drawing.

mod stats;

pub use stats::RenderStats;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::camera::{CameraData, CameraGroupState, CameraView};
use crate::culling::{LodBucket, VisibilityRequest, VisibilityResult, VisibilityTask};
use crate::error::InstancingResult;
use crate::gpu::{BufferId, GpuDevice};
use crate::group::RenderSourceGroup;
use crate::ids::{GroupKey, MaterialId, MeshId, VariantId};
use crate::instancing::{DrawIndexedIndirectArgs, Prototype};

/// Render pass a draw belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawPass {
    /// Main color pass.
    Color,
    /// Shadow-caster pass.
    Shadow,
}

/// One indirect draw, ready for the host's command encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    /// Group being drawn.
    pub group: GroupKey,
    /// Pass the draw belongs to.
    pub pass: DrawPass,
    /// LOD level.
    pub lod: usize,
    /// Mesh to bind.
    pub mesh: MeshId,
    /// Material of the submesh.
    pub material: MaterialId,
    /// Shader variant of the group's capability set.
    pub variant: VariantId,
    /// Render layer (after any shadow override).
    pub layer: u8,
    /// Rendering-layer mask (after any shadow override).
    pub rendering_layer_mask: u32,
    /// Group transform buffer.
    pub transforms: BufferId,
    /// Visible-instance index buffer of this camera.
    pub visible_indices: BufferId,
    /// Indirect command buffer of this camera.
    pub indirect_buffer: BufferId,
    /// Byte offset of the command.
    pub indirect_offset: u64,
    /// Instances the command draws.
    pub instance_count: u32,
}

/// Receives draw calls from the dispatcher.
pub trait DrawSink {
    /// Records one draw.
    fn submit(&mut self, call: DrawCall);
}

/// Sink that keeps every call, in submission order.
#[derive(Debug, Default)]
pub struct DrawList {
    calls: Vec<DrawCall>,
}

impl DrawList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded calls.
    #[must_use]
    pub fn calls(&self) -> &[DrawCall] {
        &self.calls
    }

    /// Calls of one pass.
    pub fn pass(&self, pass: DrawPass) -> impl Iterator<Item = &DrawCall> {
        self.calls.iter().filter(move |c| c.pass == pass)
    }

    /// Number of recorded calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Forgets every call.
    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl DrawSink for DrawList {
    fn submit(&mut self, call: DrawCall) {
        self.calls.push(call);
    }
}

/// A draw decided before the camera's buffers are written.
struct PlannedDraw {
    pass: DrawPass,
    lod: usize,
    mesh: MeshId,
    material: MaterialId,
    layer: u8,
    rendering_layer_mask: u32,
    slot: u32,
    instance_count: u32,
}

/// Commands and draws of one group for one camera.
struct DrawPlan {
    args: Vec<DrawIndexedIndirectArgs>,
    draws: Vec<PlannedDraw>,
    culled_renderers: u32,
    skipped_lods: u32,
}

/// Per-camera draw dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    quality_max_lod: u8,
    max_instances: usize,
}

impl Dispatcher {
    /// Creates a dispatcher with the global quality LOD floor.
    #[must_use]
    pub const fn new(quality_max_lod: u8, max_instances: usize) -> Self {
        Self {
            quality_max_lod,
            max_instances,
        }
    }

    /// Global quality LOD floor.
    #[inline]
    #[must_use]
    pub const fn quality_max_lod(&self) -> u8 {
        self.quality_max_lod
    }

    /// Changes the global quality LOD floor.
    pub fn set_quality_max_lod(&mut self, lod: u8) {
        self.quality_max_lod = lod;
    }

    /// Finest LOD a camera may draw for a prototype.
    ///
    /// The coarser of the camera's profile floor and the quality floor
    /// wins, clamped to the prototype's last level.
    #[must_use]
    pub fn min_lod(&self, view: &CameraView, lod_count: usize) -> usize {
        let floor = view.profile_max_lod.max(self.quality_max_lod);
        usize::from(floor).min(lod_count.saturating_sub(1))
    }

    /// Draws every group for one camera.
    ///
    /// Groups without a ready visibility result are skipped; a new job is
    /// scheduled for every group that has none in flight.
    pub fn render(
        &self,
        camera: &mut CameraData,
        groups: &BTreeMap<GroupKey, RenderSourceGroup>,
        device: &Arc<dyn GpuDevice>,
        sink: &mut dyn DrawSink,
    ) -> RenderStats {
        let mut stats = RenderStats::default();
        let view = *camera.view();
        let camera_id = camera.id();

        for (&key, group) in groups {
            if !group.is_drawable() {
                stats.inactive_groups += 1;
                continue;
            }
            let epoch = group.layout_epoch();
            let state = camera.group_state_mut(key);

            stats.stale_results += state.poll(epoch);
            match state.take_ready(epoch) {
                Some(result) => {
                    self.draw_group(group, &view, &result, state, device, sink, &mut stats);
                    state.mark_drawn();
                }
                None if group.instance_count() > 0 => {
                    trace!(camera = %camera_id, group = %key, "visibility not ready, skipping");
                    stats.skipped_groups += 1;
                }
                None => {}
            }

            if !state.has_pending() && group.instance_count() > 0 {
                state.schedule(self.schedule(group, &view));
            }
        }
        stats
    }

    fn schedule(&self, group: &RenderSourceGroup, view: &CameraView) -> VisibilityTask {
        let prototype = Arc::clone(group.prototype());
        let request = VisibilityRequest {
            epoch: group.layout_epoch(),
            view_proj: view.view_proj,
            position: view.position,
            lod_bias: view.lod_bias,
            min_lod: self.min_lod(view, prototype.lod_count()),
            max_distance: view.max_distance,
            render_shadows: view.render_shadows,
        };
        VisibilityTask::spawn(prototype, group.matrix_snapshot(), request)
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_group(
        &self,
        group: &RenderSourceGroup,
        view: &CameraView,
        result: &VisibilityResult,
        state: &mut CameraGroupState,
        device: &Arc<dyn GpuDevice>,
        sink: &mut dyn DrawSink,
        stats: &mut RenderStats,
    ) {
        let plan = self.plan(group.prototype(), view, result);
        stats.culled_renderers += plan.culled_renderers;
        stats.skipped_lods += plan.skipped_lods;
        if plan.draws.is_empty() {
            return;
        }

        let Some(transforms) = group.transforms_buffer() else {
            warn!(group = %group.key(), "visible instances but no transform buffer");
            stats.failed_groups += 1;
            return;
        };

        let label = format!("thicket {}", group.key());
        let buffers = match self.write_buffers(state, device, &label, result, &plan.args) {
            Ok(Some(buffers)) => buffers,
            Ok(None) => {
                stats.failed_groups += 1;
                return;
            }
            Err(e) => {
                warn!(group = %group.key(), error = %e, "failed to write draw buffers");
                stats.failed_groups += 1;
                return;
            }
        };
        let (visible_indices, indirect_buffer) = buffers;

        for draw in plan.draws {
            match draw.pass {
                DrawPass::Color => {
                    stats.color_draws += 1;
                    stats.instances += draw.instance_count;
                }
                DrawPass::Shadow => {
                    stats.shadow_draws += 1;
                    stats.shadow_instances += draw.instance_count;
                }
            }
            stats.draw_calls += 1;
            sink.submit(DrawCall {
                group: group.key(),
                pass: draw.pass,
                lod: draw.lod,
                mesh: draw.mesh,
                material: draw.material,
                variant: group.variant(),
                layer: draw.layer,
                rendering_layer_mask: draw.rendering_layer_mask,
                transforms,
                visible_indices,
                indirect_buffer,
                indirect_offset: u64::from(draw.slot) * DrawIndexedIndirectArgs::SIZE as u64,
                instance_count: draw.instance_count,
            });
        }
        stats.groups_drawn += 1;
    }

    fn write_buffers(
        &self,
        state: &mut CameraGroupState,
        device: &Arc<dyn GpuDevice>,
        label: &str,
        result: &VisibilityResult,
        args: &[DrawIndexedIndirectArgs],
    ) -> InstancingResult<Option<(BufferId, BufferId)>> {
        let (indices, indirect) = state.buffers(device, label, self.max_instances);
        indices.upload(&result.indices, 0, 0, result.indices.len(), true)?;
        indirect.upload(args, 0, 0, args.len(), true)?;
        Ok(indices.active_buffer().zip(indirect.active_buffer()))
    }

    /// Fills the command layout and lists the draws to submit.
    fn plan(&self, prototype: &Prototype, view: &CameraView, result: &VisibilityResult) -> DrawPlan {
        let slot_count = prototype.slot_count();
        let mut plan = DrawPlan {
            args: vec![DrawIndexedIndirectArgs::default(); slot_count as usize * 2],
            draws: Vec::new(),
            culled_renderers: 0,
            skipped_lods: 0,
        };
        let min_lod = self.min_lod(view, prototype.lod_count());
        let shadows = prototype.shadows();

        let mut cursor = 0u32;
        for (lod_index, lod) in prototype.lods().iter().enumerate() {
            let below_floor = lod_index < min_lod;
            if below_floor {
                plan.skipped_lods += 1;
            }
            let color = result.color_bucket(lod_index);
            let shadow = result.shadow_bucket(lod_index);

            for (renderer_index, renderer) in lod.renderers.iter().enumerate() {
                debug_assert_eq!(prototype.renderer_slot(lod_index, renderer_index), Some(cursor));
                let first_slot = cursor;
                cursor += renderer.submeshes.len() as u32;
                if below_floor {
                    continue;
                }
                let Some(mesh) = renderer.mesh else {
                    plan.culled_renderers += 1;
                    continue;
                };

                let draws_color =
                    !prototype.is_shadow_only() && layer_bit(renderer.layer) & view.culling_mask != 0;
                let (shadow_layer, shadow_mask) = shadows.layer_override.map_or(
                    (renderer.layer, renderer.rendering_layer_mask),
                    |o| (o.layer, o.rendering_layer_mask),
                );
                let draws_shadow = view.render_shadows
                    && shadows.cast_shadows
                    && lod.cast_shadows
                    && layer_bit(shadow_layer) & view.shadow_layer_mask != 0;
                if !draws_color && !draws_shadow {
                    plan.culled_renderers += 1;
                    continue;
                }

                for (offset, submesh) in renderer.submeshes.iter().enumerate() {
                    let slot = first_slot + offset as u32;
                    let mut emit = |pass, slot: u32, bucket: LodBucket, layer, mask| {
                        if bucket.count == 0 {
                            return;
                        }
                        plan.args[slot as usize] = DrawIndexedIndirectArgs::new(
                            submesh.index_count,
                            submesh.first_index,
                            submesh.base_vertex,
                            bucket.count,
                            bucket.offset,
                        );
                        plan.draws.push(PlannedDraw {
                            pass,
                            lod: lod_index,
                            mesh,
                            material: submesh.material,
                            layer,
                            rendering_layer_mask: mask,
                            slot,
                            instance_count: bucket.count,
                        });
                    };
                    if draws_color {
                        emit(
                            DrawPass::Color,
                            slot,
                            color,
                            renderer.layer,
                            renderer.rendering_layer_mask,
                        );
                    }
                    if draws_shadow {
                        emit(DrawPass::Shadow, slot_count + slot, shadow, shadow_layer, shadow_mask);
                    }
                }
            }
        }
        debug_assert_eq!(cursor, slot_count);
        plan
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(0, crate::config::DEFAULT_MAX_INSTANCE_COUNT)
    }
}

#[inline]
fn layer_bit(layer: u8) -> u32 {
    1u32.checked_shl(u32::from(layer)).unwrap_or(0)
}
