//! Integration tests for pool lifecycle, growth and dirty uploads.

mod common;

use common::{camera_view, context, descriptor, node_at, read_back};
use glam::{Mat4, Vec3};
use thicket_core::{NodeSource, NodeTable};
use thicket_rendering::{CameraId, DrawList, DrawPass, InstancingConfig, OwnerId};

#[test]
fn test_three_lod_prototype_lifecycle() {
    let (mut ctx, _device) = context(InstancingConfig::default());
    let mut nodes = NodeTable::new(1_024);
    let key = ctx.register(OwnerId(1), &descriptor(11, 3), 0).unwrap();
    assert_eq!(ctx.prototype(thicket_rendering::PrototypeKey(11)).unwrap().lod_count(), 3);

    let mut handles = Vec::new();
    for i in 0..150u32 {
        let node = node_at(&mut nodes, 2.0 + i as f32 * 0.1);
        assert_eq!(ctx.add_instance_immediate(key, node, &mut nodes), Some(i));
        let capacity = ctx.group_of(key).unwrap().source(key).unwrap().pool().capacity();
        let expected = if i < 128 { 128 } else { 256 };
        assert_eq!(capacity, expected, "capacity after add #{i}");
        handles.push(node);
    }

    // Remove #10: the last instance fills the hole.
    assert!(ctx.remove_instance_immediate(key, 10, &mut nodes));
    assert_eq!(ctx.instance_count(key), 149);
    let pool = ctx.group_of(key).unwrap().source(key).unwrap().pool();
    assert_eq!(pool.nodes()[10], handles[149]);
    assert_eq!(pool.index_of(handles[149]), Some(10));
    assert_eq!(nodes.buffer_index(handles[149], key.raw()), Some(10));
    assert_eq!(nodes.buffer_index(handles[10], key.raw()), None);

    // No visibility yet: the group is skipped, not waited on.
    let camera = CameraId(0);
    ctx.add_camera(camera, camera_view());
    ctx.run_frame(&mut nodes);
    let mut first = DrawList::new();
    let stats = ctx.render_camera(camera, &mut first);
    assert!(first.is_empty());
    assert_eq!(stats.skipped_groups, 1);
    ctx.join_visibility();
    ctx.end_frame();

    // Next frame the resolved visibility draws.
    ctx.run_frame(&mut nodes);
    let mut second = DrawList::new();
    let stats = ctx.render_camera(camera, &mut second);
    assert_eq!(stats.groups_drawn, 1);
    assert_eq!(stats.skipped_groups, 0);
    assert_eq!(stats.instances, 149);
    assert!(second.pass(DrawPass::Color).count() >= 1);
    assert_eq!(stats.shadow_instances, 149);
    ctx.join_visibility();
    ctx.end_frame();
}

#[test]
fn test_double_remove_is_a_no_op() {
    let (mut ctx, _device) = context(InstancingConfig::default());
    let mut nodes = NodeTable::new(16);
    let key = ctx.register(OwnerId(1), &descriptor(2, 1), 0).unwrap();
    for i in 0..5 {
        let node = node_at(&mut nodes, 1.0 + i as f32);
        ctx.add_instance(key, node);
    }
    ctx.begin_frame(&mut nodes);
    assert_eq!(ctx.instance_count(key), 5);

    assert!(ctx.remove_instance(key, 2));
    assert!(!ctx.remove_instance(key, 2));
    ctx.begin_frame(&mut nodes);
    assert_eq!(ctx.instance_count(key), 4);

    // Out-of-range removal is ignored too.
    assert!(!ctx.remove_instance(key, 40));
    ctx.begin_frame(&mut nodes);
    assert_eq!(ctx.instance_count(key), 4);
}

#[test]
fn test_single_moved_node_uploads_one_slot() {
    let (mut ctx, device) = context(InstancingConfig::default());
    let mut nodes = NodeTable::new(64);
    let key = ctx.register(OwnerId(1), &descriptor(3, 1), 0).unwrap();
    let handles: Vec<_> = (0..10)
        .map(|i| {
            let node = node_at(&mut nodes, 1.0 + i as f32);
            ctx.add_instance(key, node);
            node
        })
        .collect();

    ctx.run_frame(&mut nodes);
    ctx.end_frame();
    let buffer = ctx.group_of(key).unwrap().transforms_buffer().unwrap();
    assert_eq!(device.uploads_to(buffer).len(), 1);
    device.clear_uploads();

    let moved = Mat4::from_translation(Vec3::new(4.0, 0.0, -4.0));
    nodes.set_world(handles[4], moved).unwrap();
    let stats = ctx.run_frame(&mut nodes);
    ctx.end_frame();

    assert_eq!(stats.entries_changed, 1);
    let uploads = device.uploads_to(buffer);
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].offset, 4 * 64);
    assert_eq!(uploads[0].len, 64);

    let matrices: Vec<Mat4> = read_back(&device, buffer);
    assert_eq!(matrices[4], moved);
}

#[test]
fn test_teleport_forces_full_rewrite() {
    let (mut ctx, device) = context(InstancingConfig::default());
    let mut nodes = NodeTable::new(64);
    let key = ctx.register(OwnerId(1), &descriptor(4, 1), 0).unwrap();
    for i in 0..8 {
        let node = node_at(&mut nodes, 1.0 + i as f32);
        ctx.add_instance(key, node);
    }
    ctx.run_frame(&mut nodes);
    ctx.end_frame();
    device.clear_uploads();

    assert!(ctx.require_transform_update(key));
    let stats = ctx.run_frame(&mut nodes);
    assert_eq!(stats.full_rewrites, 1);
    let buffer = ctx.group_of(key).unwrap().transforms_buffer().unwrap();
    assert_eq!(device.uploads_to(buffer)[0].len, 8 * 64);
}

#[test]
fn test_destroyed_node_stops_drawing() {
    let (mut ctx, device) = context(InstancingConfig::default());
    let mut nodes = NodeTable::new(8);
    let key = ctx.register(OwnerId(1), &descriptor(5, 1), 0).unwrap();
    let keep = node_at(&mut nodes, 2.0);
    let doomed = node_at(&mut nodes, 3.0);
    ctx.add_instance(key, keep);
    ctx.add_instance(key, doomed);
    ctx.run_frame(&mut nodes);
    ctx.end_frame();

    assert!(nodes.remove(doomed));
    assert!(nodes.world_matrix(doomed).is_none());
    ctx.run_frame(&mut nodes);
    let buffer = ctx.group_of(key).unwrap().transforms_buffer().unwrap();
    let matrices: Vec<Mat4> = read_back(&device, buffer);
    assert_eq!(matrices[1], Mat4::ZERO);
}

#[test]
fn test_growth_is_amortized() {
    let (mut ctx, _device) = context(InstancingConfig::default());
    let mut nodes = NodeTable::new(2_048);
    let key = ctx.register(OwnerId(1), &descriptor(6, 1), 0).unwrap();

    for i in 0..1_000 {
        let node = node_at(&mut nodes, 1.0 + (i % 50) as f32);
        ctx.add_instance_immediate(key, node, &mut nodes);
    }
    let pool = ctx.group_of(key).unwrap().source(key).unwrap().pool();
    assert_eq!(pool.len(), 1_000);
    // ceil(1000 / 128) growth steps, not one per add.
    assert_eq!(pool.reallocations(), 8);
}

#[test]
fn test_unregister_reports_nodes_and_drops_group() {
    let (mut ctx, device) = context(InstancingConfig::default());
    let mut nodes = NodeTable::new(8);
    let key = ctx.register(OwnerId(1), &descriptor(7, 2), 0).unwrap();
    let node = node_at(&mut nodes, 2.0);
    ctx.add_instance(key, node);
    ctx.run_frame(&mut nodes);
    ctx.add_camera(CameraId(1), camera_view());
    ctx.render_camera(CameraId(1), &mut DrawList::new());
    assert_eq!(nodes.buffer_index(node, key.raw()), Some(0));

    assert!(ctx.unregister(key, &mut nodes));
    assert_eq!(nodes.buffer_index(node, key.raw()), None);
    assert_eq!(ctx.groups().count(), 0);
    assert!(ctx.prototypes().is_empty());
    assert_eq!(device.live_buffers(), 0);
}

#[test]
fn test_gpu_storage_grows_with_pool_capacity() {
    let (mut ctx, _device) = context(InstancingConfig::default());
    let mut nodes = NodeTable::new(512);
    let key = ctx.register(OwnerId(1), &descriptor(8, 1), 0).unwrap();

    let frames = 300;
    for i in 0..frames {
        let node = node_at(&mut nodes, 1.0 + (i % 8) as f32);
        ctx.add_instance(key, node);
        ctx.run_frame(&mut nodes);
        ctx.end_frame();
    }

    let group = ctx.group_of(key).unwrap();
    let pool_capacity = group.source(key).unwrap().pool().capacity();
    assert_eq!(pool_capacity, 384);
    assert_eq!(group.transforms().capacity(), pool_capacity);
    assert!(group.transforms().stats().reallocations <= (frames as u64).div_ceil(128) + 1);
}

#[test]
fn test_double_buffered_transforms_keep_last_frame() {
    let config = InstancingConfig {
        double_buffer_transforms: true,
        ..InstancingConfig::default()
    };
    let (mut ctx, device) = context(config);
    let mut nodes = NodeTable::new(16);
    let key = ctx.register(OwnerId(1), &descriptor(9, 1), 0).unwrap();
    let handles: Vec<_> = (0..3)
        .map(|i| {
            let node = node_at(&mut nodes, 2.0 + i as f32);
            ctx.add_instance(key, node);
            node
        })
        .collect();
    ctx.run_frame(&mut nodes);
    ctx.end_frame();

    let old = nodes.world_matrix(handles[2]).unwrap();
    let moved = Mat4::from_translation(Vec3::new(3.0, 1.0, -9.0));
    nodes.set_world(handles[2], moved).unwrap();
    ctx.run_frame(&mut nodes);

    let group = ctx.group_of(key).unwrap();
    let active = group.transforms_buffer().unwrap();
    let previous = group.previous_transforms_buffer().unwrap();
    assert_ne!(active, previous);
    let current: Vec<Mat4> = read_back(&device, active);
    let last: Vec<Mat4> = read_back(&device, previous);
    assert_eq!(current[2], moved);
    assert_eq!(last[2], old);
    assert_eq!(current[0], last[0]);

    // Next frame the roles swap and the move is carried forward.
    ctx.end_frame();
    let group = ctx.group_of(key).unwrap();
    assert_eq!(group.transforms_buffer(), Some(previous));
    let current: Vec<Mat4> = read_back(&device, previous);
    let last: Vec<Mat4> = read_back(&device, active);
    assert_eq!(current[2], moved);
    assert_eq!(last[2], moved);
}
