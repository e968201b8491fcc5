//! Integration tests for per-camera dispatch.

mod common;

use std::sync::Arc;

use common::{camera_view, context, descriptor, node_at, read_back, renderer, settle_and_draw};
use thicket_core::NodeTable;
use thicket_rendering::{
    ActivationConfig, CameraId, CameraView, DrawIndexedIndirectArgs, DrawList, DrawPass,
    HeadlessDevice, InstancingConfig, InstancingContext, InstancingError, LodDescriptor, OwnerId,
    ShadowLayerOverride, ShadowSettings,
};

#[test]
fn test_lod_floor_is_the_coarser_setting() {
    let config = InstancingConfig {
        quality_max_lod: 1,
        ..InstancingConfig::default()
    };
    let (mut ctx, _device) = context(config);
    let mut nodes = NodeTable::new(64);
    let key = ctx.register(OwnerId(1), &descriptor(1, 3), 0).unwrap();
    for i in 0..20 {
        let node = node_at(&mut nodes, 2.0 + i as f32);
        ctx.add_instance(key, node);
    }

    let camera = CameraId(0);
    ctx.add_camera(
        camera,
        CameraView {
            profile_max_lod: 2,
            render_shadows: false,
            ..camera_view()
        },
    );

    let mut runs = Vec::new();
    for _ in 0..2 {
        let (list, stats) = settle_and_draw(&mut ctx, &mut nodes, camera);
        assert!(list.calls().iter().all(|c| c.lod == 2));
        assert_eq!(stats.instances, 20);
        assert_eq!(stats.skipped_lods, 2);
        runs.push(list.calls().to_vec());
    }
    assert_eq!(runs[0], runs[1]);

    // Quality floor above the profile's also wins.
    ctx.set_quality_max_lod(2);
    ctx.update_camera(
        camera,
        CameraView {
            profile_max_lod: 0,
            render_shadows: false,
            ..camera_view()
        },
    );
    let (list, _) = settle_and_draw(&mut ctx, &mut nodes, camera);
    assert!(!list.is_empty());
    assert!(list.calls().iter().all(|c| c.lod == 2));
}

#[test]
fn test_shadow_override_and_shadow_only() {
    let (mut ctx, _device) = context(InstancingConfig::default());
    let mut nodes = NodeTable::new(16);

    let mut caster = descriptor(2, 1);
    caster.lods[0].renderers[0].layer = 3;
    caster.shadows = ShadowSettings {
        layer_override: Some(ShadowLayerOverride {
            layer: 8,
            rendering_layer_mask: 0x100,
        }),
        ..ShadowSettings::default()
    };
    let a = ctx.register(OwnerId(1), &caster, 0).unwrap();

    let mut proxy = descriptor(3, 1);
    proxy.shadow_only = true;
    let b = ctx.register(OwnerId(2), &proxy, 0).unwrap();

    for key in [a, b] {
        let node = node_at(&mut nodes, 5.0);
        ctx.add_instance(key, node);
    }
    let camera = CameraId(1);
    ctx.add_camera(camera, camera_view());
    let (list, stats) = settle_and_draw(&mut ctx, &mut nodes, camera);

    let caster_group = ctx.group_of(a).unwrap().key();
    let proxy_group = ctx.group_of(b).unwrap().key();
    let color: Vec<_> = list.pass(DrawPass::Color).collect();
    let shadow: Vec<_> = list.pass(DrawPass::Shadow).collect();

    assert_eq!(color.len(), 1);
    assert_eq!(color[0].group, caster_group);
    assert_eq!((color[0].layer, color[0].rendering_layer_mask), (3, 1));

    assert_eq!(shadow.len(), 2);
    let caster_shadow = shadow.iter().find(|c| c.group == caster_group).unwrap();
    assert_eq!((caster_shadow.layer, caster_shadow.rendering_layer_mask), (8, 0x100));
    assert!(shadow.iter().any(|c| c.group == proxy_group));
    assert_eq!(stats.color_draws, 1);
    assert_eq!(stats.shadow_draws, 2);
}

#[test]
fn test_shadow_layer_mask_culls_shadow_draws() {
    let (mut ctx, _device) = context(InstancingConfig::default());
    let mut nodes = NodeTable::new(8);
    let key = ctx.register(OwnerId(1), &descriptor(4, 1), 0).unwrap();
    let node = node_at(&mut nodes, 3.0);
    ctx.add_instance(key, node);

    let camera = CameraId(2);
    ctx.add_camera(
        camera,
        CameraView {
            shadow_layer_mask: !1,
            ..camera_view()
        },
    );
    let (list, _) = settle_and_draw(&mut ctx, &mut nodes, camera);
    assert_eq!(list.pass(DrawPass::Color).count(), 1);
    assert_eq!(list.pass(DrawPass::Shadow).count(), 0);
}

#[test]
fn test_null_mesh_keeps_command_slots() {
    let (mut ctx, device) = context(InstancingConfig::default());
    let mut nodes = NodeTable::new(8);
    let mut desc = descriptor(5, 1);
    desc.lods = vec![LodDescriptor {
        max_distance: 50.0,
        renderers: vec![renderer(None, 2, 0), renderer(Some(9), 1, 0)],
        cast_shadows: true,
    }];
    let key = ctx.register(OwnerId(1), &desc, 0).unwrap();
    for i in 0..3 {
        let node = node_at(&mut nodes, 2.0 + i as f32);
        ctx.add_instance(key, node);
    }

    let camera = CameraId(3);
    ctx.add_camera(camera, camera_view());
    let (list, stats) = settle_and_draw(&mut ctx, &mut nodes, camera);

    assert_eq!(stats.culled_renderers, 1);
    let stride = DrawIndexedIndirectArgs::SIZE as u64;
    let color = list.pass(DrawPass::Color).next().unwrap();
    let shadow = list.pass(DrawPass::Shadow).next().unwrap();
    // Three color slots (2 skipped + 1), shadow slots mirror them.
    assert_eq!(color.indirect_offset, 2 * stride);
    assert_eq!(shadow.indirect_offset, 5 * stride);

    let args: Vec<DrawIndexedIndirectArgs> = read_back(&device, color.indirect_buffer);
    assert_eq!(args.len(), 6);
    assert!(args[0].is_empty());
    assert_eq!(args[2].instance_count, 3);
    assert_eq!(args[5].instance_count, 3);

    let indices: Vec<u32> = read_back(&device, color.visible_indices);
    let first = args[2].first_instance as usize;
    let mut drawn = indices[first..first + 3].to_vec();
    drawn.sort_unstable();
    assert_eq!(drawn, vec![0, 1, 2]);
}

#[test]
fn test_failed_group_does_not_stop_others() {
    // Room for one matrix per buffer.
    let device = Arc::new(HeadlessDevice::with_max_buffer_size(64));
    let mut ctx = InstancingContext::new(InstancingConfig::default(), device).unwrap();
    let mut nodes = NodeTable::new(16);

    let big = ctx.register(OwnerId(1), &descriptor(6, 1), 0).unwrap();
    let small = ctx.register(OwnerId(2), &descriptor(7, 1), 0).unwrap();
    for i in 0..4 {
        let node = node_at(&mut nodes, 2.0 + i as f32);
        ctx.add_instance(big, node);
    }
    let node = node_at(&mut nodes, 2.0);
    ctx.add_instance(small, node);

    let camera = CameraId(4);
    ctx.add_camera(
        camera,
        CameraView {
            render_shadows: false,
            ..camera_view()
        },
    );
    let (list, stats) = settle_and_draw(&mut ctx, &mut nodes, camera);

    assert!(matches!(ctx.status(big), Err(InstancingError::GroupDisabled { .. })));
    assert!(ctx.status(small).is_ok());
    assert_eq!(stats.inactive_groups, 1);
    assert_eq!(stats.groups_drawn, 1);
    assert_eq!(list.len(), 1);
    assert_eq!(list.calls()[0].group, ctx.group_of(small).unwrap().key());
}

#[test]
fn test_activation_hysteresis() {
    let config = InstancingConfig {
        activation: ActivationConfig {
            enabled: true,
            enable_threshold: 4,
            disable_threshold: 2,
            cooldown_frames: 0,
        },
        ..InstancingConfig::default()
    };
    let (mut ctx, _device) = context(config);
    let mut nodes = NodeTable::new(16);
    let key = ctx.register(OwnerId(1), &descriptor(8, 1), 0).unwrap();
    let node = node_at(&mut nodes, 2.0);
    ctx.add_instance(key, node);

    ctx.begin_frame(&mut nodes);
    assert!(!ctx.group_of(key).unwrap().is_active());
    ctx.add_camera(CameraId(0), camera_view());
    let stats = ctx.render_camera(CameraId(0), &mut DrawList::new());
    assert_eq!(stats.inactive_groups, 1);
    ctx.end_frame();

    // Three instances sit inside the band: still off.
    for i in 0..2 {
        let node = node_at(&mut nodes, 3.0 + i as f32);
        ctx.add_instance(key, node);
    }
    ctx.begin_frame(&mut nodes);
    assert!(!ctx.group_of(key).unwrap().is_active());
    ctx.end_frame();

    let node = node_at(&mut nodes, 6.0);
    ctx.add_instance(key, node);
    ctx.begin_frame(&mut nodes);
    assert!(ctx.group_of(key).unwrap().is_active());
}

#[test]
fn test_stale_visibility_is_discarded() {
    let (mut ctx, _device) = context(InstancingConfig::default());
    let mut nodes = NodeTable::new(16);
    let key = ctx.register(OwnerId(1), &descriptor(9, 1), 0).unwrap();
    for i in 0..4 {
        let node = node_at(&mut nodes, 2.0 + i as f32);
        ctx.add_instance(key, node);
    }
    let camera = CameraId(5);
    ctx.add_camera(camera, camera_view());
    ctx.run_frame(&mut nodes);
    ctx.render_camera(camera, &mut DrawList::new());
    ctx.join_visibility();
    ctx.end_frame();

    // A removal batch lands between culling and drawing.
    assert!(ctx.remove_instance(key, 0));
    ctx.run_frame(&mut nodes);
    let mut list = DrawList::new();
    let stats = ctx.render_camera(camera, &mut list);
    assert!(list.is_empty());
    assert_eq!(stats.skipped_groups, 1);

    ctx.join_visibility();
    ctx.end_frame();
    ctx.run_frame(&mut nodes);
    let mut list = DrawList::new();
    let stats = ctx.render_camera(camera, &mut list);
    assert_eq!(stats.instances, 3);
}

#[test]
fn test_appends_every_frame_keep_drawing() {
    let (mut ctx, _device) = context(InstancingConfig::default());
    let mut nodes = NodeTable::new(128);
    let key = ctx.register(OwnerId(1), &descriptor(10, 1), 0).unwrap();
    for i in 0..10 {
        let node = node_at(&mut nodes, 2.0 + (i % 7) as f32);
        ctx.add_instance(key, node);
    }
    let camera = CameraId(6);
    ctx.add_camera(
        camera,
        CameraView {
            render_shadows: false,
            ..camera_view()
        },
    );
    ctx.run_frame(&mut nodes);
    ctx.render_camera(camera, &mut DrawList::new());
    ctx.join_visibility();
    ctx.end_frame();

    for i in 0..60u32 {
        let node = node_at(&mut nodes, 2.0 + (i % 7) as f32);
        ctx.add_instance(key, node);
        ctx.run_frame(&mut nodes);
        let mut list = DrawList::new();
        let stats = ctx.render_camera(camera, &mut list);
        ctx.join_visibility();
        ctx.end_frame();

        assert_eq!(stats.groups_drawn, 1, "frame {i}");
        assert_eq!(stats.stale_results, 0);
        // Drawn from last frame's culling: the newest instance is not in it yet.
        assert_eq!(stats.instances, 10 + i);
    }
}

#[test]
fn test_removal_drops_waiting_result_as_stale() {
    let (mut ctx, _device) = context(InstancingConfig::default());
    let mut nodes = NodeTable::new(16);
    let key = ctx.register(OwnerId(1), &descriptor(12, 1), 0).unwrap();
    for i in 0..4 {
        let node = node_at(&mut nodes, 2.0 + i as f32);
        ctx.add_instance(key, node);
    }
    let camera = CameraId(7);
    ctx.add_camera(camera, camera_view());
    ctx.run_frame(&mut nodes);
    ctx.render_camera(camera, &mut DrawList::new());
    ctx.join_visibility();
    ctx.end_frame();

    assert!(ctx.remove_instance(key, 1));
    ctx.run_frame(&mut nodes);
    let stats = ctx.render_camera(camera, &mut DrawList::new());
    assert_eq!(stats.stale_results, 1);
    assert_eq!(stats.skipped_groups, 1);
    ctx.join_visibility();
    ctx.end_frame();
}

#[test]
fn test_config_file_round_trip() {
    let path = std::env::temp_dir().join(format!("thicket_config_{}.toml", std::process::id()));
    std::fs::write(
        &path,
        "pool_increment = 64\nquality_max_lod = 1\n\n[activation]\nenabled = true\nenable_threshold = 8\ndisable_threshold = 2\n",
    )
    .unwrap();
    let config = InstancingConfig::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(config.pool_increment, 64);
    assert_eq!(config.quality_max_lod, 1);
    assert!(config.activation.enabled);
    assert_eq!(config.activation.cooldown_frames, 60);
    assert!(InstancingContext::new(config, Arc::new(HeadlessDevice::new())).is_ok());

    let bad = InstancingConfig::from_toml_str("[activation]\nenable_threshold = 1\ndisable_threshold = 5\n");
    assert!(matches!(bad, Err(InstancingError::InvalidConfig(_))));
    assert!(InstancingConfig::load("/nonexistent/thicket.toml").is_err());
}
