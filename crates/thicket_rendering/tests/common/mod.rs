//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use bytemuck::Pod;
use glam::{Mat4, Vec3};
use thicket_core::{NodeHandle, NodeTable};
use thicket_rendering::{
    BufferId, CameraView, DrawList, HeadlessDevice, InstancingConfig, InstancingContext, LodDescriptor,
    MaterialId, MeshId, PrototypeDescriptor, RendererDescriptor, ShadowSettings, SubMesh,
};

/// One renderer with `submeshes` consecutive 36-index submeshes.
pub fn renderer(mesh: Option<u32>, submeshes: u32, layer: u8) -> RendererDescriptor {
    RendererDescriptor {
        mesh: mesh.map(MeshId),
        submeshes: (0..submeshes)
            .map(|m| SubMesh {
                material: MaterialId(m + 1),
                index_count: 36,
                first_index: m * 36,
                base_vertex: 0,
            })
            .collect(),
        layer,
        rendering_layer_mask: 1,
    }
}

/// A prototype with LODs ending at 10, 30 and 90 units (truncated to `lods`).
pub fn descriptor(asset_id: u64, lods: usize) -> PrototypeDescriptor {
    PrototypeDescriptor {
        asset_id,
        name: format!("tree {asset_id}"),
        lods: [10.0, 30.0, 90.0]
            .iter()
            .take(lods)
            .enumerate()
            .map(|(i, &max_distance)| LodDescriptor {
                max_distance,
                renderers: vec![renderer(Some(i as u32 + 1), 1, 0)],
                cast_shadows: true,
            })
            .collect(),
        bounds_center: Vec3::ZERO,
        bounds_radius: 0.5,
        shadows: ShadowSettings::default(),
        shadow_only: false,
        max_distance: 200.0,
    }
}

/// Camera at the origin looking down -Z.
pub fn camera_view() -> CameraView {
    let proj = Mat4::perspective_rh(70f32.to_radians(), 16.0 / 9.0, 0.1, 500.0);
    let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
    CameraView {
        view_proj: proj * view,
        ..CameraView::default()
    }
}

/// A node `distance` units in front of the camera.
pub fn node_at(nodes: &mut NodeTable, distance: f32) -> NodeHandle {
    nodes
        .insert(Mat4::from_translation(Vec3::new(0.0, 0.0, -distance)))
        .unwrap()
}

/// Context on a fresh headless device.
pub fn context(config: InstancingConfig) -> (InstancingContext, Arc<HeadlessDevice>) {
    let device = Arc::new(HeadlessDevice::new());
    let ctx = InstancingContext::new(config, device.clone()).unwrap();
    (ctx, device)
}

/// Runs a frame, renders `camera` and returns what was drawn.
///
/// The first render of a group only schedules visibility, so this renders
/// twice with a join in between.
pub fn settle_and_draw(
    ctx: &mut InstancingContext,
    nodes: &mut NodeTable,
    camera: thicket_rendering::CameraId,
) -> (DrawList, thicket_rendering::RenderStats) {
    ctx.run_frame(nodes);
    let mut warmup = DrawList::new();
    ctx.render_camera(camera, &mut warmup);
    ctx.join_visibility();
    ctx.end_frame();

    ctx.run_frame(nodes);
    let mut list = DrawList::new();
    let stats = ctx.render_camera(camera, &mut list);
    ctx.end_frame();
    (list, stats)
}

/// Copies a device buffer back as typed elements.
pub fn read_back<T: Pod>(device: &HeadlessDevice, buffer: BufferId) -> Vec<T> {
    device
        .contents(buffer)
        .unwrap()
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}
