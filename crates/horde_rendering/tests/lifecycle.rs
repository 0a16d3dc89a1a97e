//! # Renderer Lifecycle Tests
//!
//! Drives `InstancedRenderer` through its state machine on the software
//! device: setup failures, device loss, rebuilds, path selection, disposal.
//!
//! Run with: cargo test --test lifecycle -- --nocapture

use horde_rendering::{
    DrawPath, Frustum, GeometryHandle, Instance, InstancedRenderer, MeshRange, ModelDesc, Plane, RenderError,
    RendererConfig, RendererState, SoftDevice, SoftDrawBackend, StaticGeometry, SubmitMode,
};
use horde_rendering::instancing::DrawIndexedIndirectArgs;
use horde_shared::{Mat4, Vec3};

fn geometry() -> (StaticGeometry, GeometryHandle) {
    let mut geometry = StaticGeometry::new();
    let cube = geometry.push(MeshRange { index_count: 36, index_start: 0, base_vertex: 0, bounding_radius: 0.87 });
    (geometry, cube)
}

fn small_config() -> RendererConfig {
    RendererConfig { instances_per_model: 64, seed: 3, ..RendererConfig::default() }
}

fn everything() -> Frustum {
    Frustum::from_box(Vec3::new(-1000.0, -1000.0, -1000.0), Vec3::new(1000.0, 1000.0, 1000.0))
}

fn ready(config: RendererConfig, models: usize) -> (InstancedRenderer<SoftDevice>, SoftDrawBackend) {
    let (geometry, cube) = geometry();
    let device = SoftDevice::new();
    let backend = device.draw_backend();
    let mut renderer = InstancedRenderer::new(device, config);
    renderer.setup(&vec![ModelDesc::new(cube); models], &geometry, &backend).unwrap();
    (renderer, backend)
}

// ============================================================================
// STATE MACHINE
// ============================================================================

#[test]
fn verify_render_before_setup_is_rejected() {
    let device = SoftDevice::new();
    let mut backend = device.draw_backend();
    let mut renderer = InstancedRenderer::new(device, small_config());

    let err = renderer.render_frame(&everything(), &mut backend).unwrap_err();
    assert_eq!(err, RenderError::InvalidState { expected: "ready", actual: "uninitialized" });
    assert_eq!(renderer.rebuild(1).unwrap_err(), RenderError::InvalidState {
        expected: "ready",
        actual: "uninitialized"
    });
    assert_eq!(renderer.state(), RendererState::Uninitialized);
    assert!(backend.calls().is_empty());
}

#[test]
fn verify_setup_twice_is_rejected() {
    let (mut renderer, backend) = ready(small_config(), 1);
    let (geometry, cube) = geometry();

    let err = renderer.setup(&[ModelDesc::new(cube)], &geometry, &backend).unwrap_err();
    assert!(matches!(err, RenderError::InvalidState { expected: "uninitialized", .. }));
    assert_eq!(renderer.state(), RendererState::Ready);
}

#[test]
fn verify_frame_returns_to_ready() {
    let (mut renderer, mut backend) = ready(small_config(), 2);

    let first = renderer.render_frame(&everything(), &mut backend).unwrap();
    let second = renderer.render_frame(&everything(), &mut backend).unwrap();

    assert_eq!(renderer.state(), RendererState::Ready);
    assert_eq!(first.frame_index, 1);
    assert_eq!(second.frame_index, 2);
    assert_eq!(second.path, DrawPath::Indirect);
    assert_eq!(second.models_drawn, 2);
    assert_eq!(second.total_instances, 128);
    assert_eq!(second.visible_instances, None);
    assert_eq!(renderer.stats(), second);
}

#[test]
fn verify_degenerate_frustum_keeps_ready() {
    let (mut renderer, mut backend) = ready(small_config(), 1);
    let degenerate = Frustum::new([Plane::new(0.0, 0.0, 0.0, 1.0); 6]);

    let err = renderer.render_frame(&degenerate, &mut backend).unwrap_err();
    assert!(matches!(err, RenderError::Configuration(_)));
    assert_eq!(renderer.state(), RendererState::Ready);
    assert_eq!(renderer.device().live_buffers(), 6);

    assert!(renderer.render_frame(&everything(), &mut backend).is_ok());
}

#[test]
fn verify_dispose_releases_everything() {
    let (mut renderer, mut backend) = ready(small_config(), 3);
    assert_eq!(renderer.device().live_buffers(), 6);

    renderer.dispose().unwrap();
    assert_eq!(renderer.state(), RendererState::Disposed);
    assert_eq!(renderer.device().live_buffers(), 0);
    assert!(renderer.buffers().is_none());

    assert_eq!(renderer.render_frame(&everything(), &mut backend).unwrap_err(), RenderError::UseAfterDispose);
    assert_eq!(renderer.rebuild(9).unwrap_err(), RenderError::UseAfterDispose);
    assert_eq!(renderer.reset().unwrap_err(), RenderError::UseAfterDispose);
    assert_eq!(renderer.reconfigure(small_config()).unwrap_err(), RenderError::UseAfterDispose);
    assert_eq!(renderer.dispose().unwrap_err(), RenderError::UseAfterDispose);
    assert_eq!(renderer.device().live_buffers(), 0);
}

#[test]
fn verify_dispose_before_setup() {
    let device = SoftDevice::new();
    let backend = device.draw_backend();
    let (geometry, cube) = geometry();
    let mut renderer = InstancedRenderer::new(device, small_config());

    renderer.dispose().unwrap();
    let err = renderer.setup(&[ModelDesc::new(cube)], &geometry, &backend).unwrap_err();
    assert_eq!(err, RenderError::UseAfterDispose);
}

// ============================================================================
// SETUP FAILURES
// ============================================================================

#[test]
fn verify_setup_errors_leave_nothing_allocated() {
    let (geometry, cube) = geometry();
    let device = SoftDevice::new();
    let backend = device.draw_backend();

    let mut renderer =
        InstancedRenderer::new(device, RendererConfig { instances_per_model: 0, ..RendererConfig::default() });
    let err = renderer.setup(&[ModelDesc::new(cube)], &geometry, &backend).unwrap_err();
    assert!(matches!(err, RenderError::Configuration(_)));

    let err = renderer.setup(&[], &geometry, &backend).unwrap_err();
    assert!(matches!(err, RenderError::Configuration(_)));

    assert_eq!(renderer.state(), RendererState::Uninitialized);
    assert_eq!(renderer.device().live_buffers(), 0);
    assert!(renderer.store().is_none());
}

#[test]
fn verify_total_over_hard_cap_is_rejected() {
    let (geometry, cube) = geometry();
    let device = SoftDevice::new();
    let backend = device.draw_backend();
    let config = RendererConfig { instances_per_model: 600, max_total_instances: 1000, ..RendererConfig::default() };
    let mut renderer = InstancedRenderer::new(device, config);

    let err = renderer.setup(&[ModelDesc::new(cube); 2], &geometry, &backend).unwrap_err();
    assert!(matches!(err, RenderError::Configuration(_)));
    assert_eq!(renderer.state(), RendererState::Uninitialized);
}

#[test]
fn verify_capacity_overflow_from_supplied_instances() {
    let (geometry, cube) = geometry();
    let device = SoftDevice::new();
    let backend = device.draw_backend();
    let mut renderer =
        InstancedRenderer::new(device, RendererConfig { instances_per_model: 2, ..RendererConfig::default() });

    let instances: Vec<Instance> = (0..3u8)
        .map(|i| Instance {
            transform: Mat4::from_translation(Vec3::new(f32::from(i), 0.0, 0.0)),
            model_id: 0,
            color: None,
        })
        .collect();

    let err = renderer.setup_with_instances(&[ModelDesc::new(cube)], &geometry, &instances, &backend).unwrap_err();
    assert_eq!(err, RenderError::CapacityOverflow { model: 0, instances: 3, capacity: 2 });
    assert_eq!(renderer.state(), RendererState::Uninitialized);
    assert_eq!(renderer.device().live_buffers(), 0);

    renderer.setup_with_instances(&[ModelDesc::new(cube)], &geometry, &instances[..2], &backend).unwrap();
    assert_eq!(renderer.state(), RendererState::Ready);
}

#[test]
fn verify_supplied_instances_are_culled() {
    let (geometry, cube) = geometry();
    let device = SoftDevice::new();
    let mut backend = device.draw_backend();
    let mut renderer =
        InstancedRenderer::new(device, RendererConfig { instances_per_model: 4, ..RendererConfig::default() });

    let at = |x: f32, model_id: u32| Instance {
        transform: Mat4::from_translation(Vec3::new(x, 0.0, 0.0)),
        model_id,
        color: None,
    };
    let instances = [at(0.0, 0), at(500.0, 0), at(1.0, 1), at(2.0, 1), at(-500.0, 1)];
    renderer
        .setup_with_instances(&[ModelDesc::new(cube); 2], &geometry, &instances, &backend)
        .unwrap();

    let frustum = Frustum::from_box(Vec3::new(-10.0, -10.0, -10.0), Vec3::new(10.0, 10.0, 10.0));
    renderer.render_frame(&frustum, &mut backend).unwrap();
    assert_eq!(backend.instances_per_model(2), vec![1, 2]);
}

// ============================================================================
// PATH SELECTION
// ============================================================================

#[test]
fn verify_auto_falls_back_to_batched() {
    let (geometry, cube) = geometry();
    let device = SoftDevice::without_indirect();
    let mut backend = device.draw_backend();
    let mut renderer = InstancedRenderer::new(device, small_config());

    renderer.setup(&[ModelDesc::new(cube); 2], &geometry, &backend).unwrap();
    assert_eq!(renderer.path(), Some(DrawPath::Batched));
    assert!(renderer.buffers().is_none());
    assert_eq!(renderer.device().live_buffers(), 0);

    let stats = renderer.render_frame(&everything(), &mut backend).unwrap();
    assert_eq!(stats.path, DrawPath::Batched);
    assert_eq!(stats.visible_instances, Some(128));
    assert_eq!(backend.instances_per_model(2), vec![64, 64]);
}

#[test]
fn verify_forced_indirect_without_support() {
    let (geometry, cube) = geometry();
    let device = SoftDevice::without_indirect();
    let backend = device.draw_backend();
    let config = RendererConfig { submit_mode: SubmitMode::Indirect, ..small_config() };
    let mut renderer = InstancedRenderer::new(device, config);

    let err = renderer.setup(&[ModelDesc::new(cube)], &geometry, &backend).unwrap_err();
    assert!(matches!(err, RenderError::BackendUnavailable(_)));
    assert!(!err.requires_reinit());
    assert_eq!(renderer.state(), RendererState::Uninitialized);
}

#[test]
fn verify_backend_without_indirect_forces_batched() {
    let (geometry, cube) = geometry();
    let device = SoftDevice::new();
    let backend = SoftDrawBackend::new(false);
    let mut renderer = InstancedRenderer::new(device, small_config());

    renderer.setup(&[ModelDesc::new(cube)], &geometry, &backend).unwrap();
    assert_eq!(renderer.path(), Some(DrawPath::Batched));
}

// ============================================================================
// DEVICE LOSS
// ============================================================================

#[test]
fn verify_device_loss_mid_frame() {
    let (mut renderer, mut backend) = ready(small_config(), 2);
    renderer.render_frame(&everything(), &mut backend).unwrap();
    assert_eq!(backend.calls().len(), 2);

    renderer.device_mut().lose_device();
    let err = renderer.render_frame(&everything(), &mut backend).unwrap_err();

    assert!(matches!(err, RenderError::DeviceLost(_)));
    assert!(err.requires_reinit());
    assert_eq!(renderer.state(), RendererState::Uninitialized);
    assert_eq!(renderer.device().live_buffers(), 0);
    assert!(backend.calls().is_empty(), "no draws after a failed submit");
}

#[test]
fn verify_setup_after_device_loss() {
    let (mut renderer, mut backend) = ready(small_config(), 1);
    let (geometry, cube) = geometry();

    renderer.device_mut().lose_device();
    assert!(renderer.render_frame(&everything(), &mut backend).is_err());

    let err = renderer.setup(&[ModelDesc::new(cube)], &geometry, &backend).unwrap_err();
    assert!(matches!(err, RenderError::DeviceLost(_)));
    assert_eq!(renderer.device().live_buffers(), 0);
    assert_eq!(renderer.state(), RendererState::Uninitialized);

    renderer.device_mut().recover();
    renderer.setup(&[ModelDesc::new(cube)], &geometry, &backend).unwrap();
    let stats = renderer.render_frame(&everything(), &mut backend).unwrap();
    assert_eq!(stats.frame_index, 1);
    assert_eq!(renderer.device().live_buffers(), 6);
}

#[test]
fn verify_device_loss_during_rebuild() {
    let (mut renderer, _backend) = ready(small_config(), 1);

    renderer.device_mut().lose_device();
    let err = renderer.rebuild(77).unwrap_err();

    assert!(matches!(err, RenderError::DeviceLost(_)));
    assert_eq!(renderer.state(), RendererState::Uninitialized);
    assert_eq!(renderer.device().live_buffers(), 0);
}

// ============================================================================
// REBUILD AND RECONFIGURE
// ============================================================================

#[test]
fn verify_rebuild_changes_population() {
    let (mut renderer, mut backend) = ready(small_config(), 2);
    let before = renderer.store().unwrap().instances().to_vec();
    assert_eq!(renderer.store().unwrap().generation(), 0);

    renderer.rebuild(1234).unwrap();
    let store = renderer.store().unwrap();
    assert_eq!(store.seed(), 1234);
    assert_eq!(store.generation(), 1);
    assert_eq!(store.len(), 128);
    assert_ne!(store.instances(), before.as_slice());

    let stats = renderer.render_frame(&everything(), &mut backend).unwrap();
    assert_eq!(stats.draw_calls, 2);
    assert_eq!(backend.instances_per_model(2), vec![64, 64]);
}

#[test]
fn verify_rebuild_invalidates_visible_sets() {
    let (mut renderer, mut backend) = ready(small_config(), 3);
    renderer.render_frame(&everything(), &mut backend).unwrap();

    let buffers = renderer.buffers().unwrap();
    let drawn: Vec<u32> =
        buffers.args.read_records::<DrawIndexedIndirectArgs>().iter().map(|a| a.instance_count).collect();
    assert_eq!(drawn, vec![64, 64, 64]);
    assert_eq!(buffers.counters.read_words(), vec![64, 64, 64]);

    renderer.rebuild(500).unwrap();

    // No frame in between: the stale counts must already be gone
    let buffers = renderer.buffers().unwrap();
    let args = buffers.args.read_records::<DrawIndexedIndirectArgs>();
    assert_eq!(args.len(), 3);
    assert!(args.iter().all(|a| a.instance_count == 0), "{args:?}");
    assert!(args.iter().all(|a| a.index_count == 36));
    assert!(buffers.counters.read_words().iter().all(|&c| c == 0));
    assert!(buffers.visible.read_words().iter().all(|&v| v == 0));
}

#[test]
fn verify_rebuild_same_seed_is_reproducible() {
    let (mut renderer, _backend) = ready(small_config(), 2);
    let before = renderer.store().unwrap().instances().to_vec();

    renderer.rebuild(3).unwrap();
    assert_eq!(renderer.store().unwrap().instances(), before.as_slice());
}

#[test]
fn verify_reset_and_reconfigure() {
    let (mut renderer, mut backend) = ready(small_config(), 1);
    let (geometry, cube) = geometry();

    assert!(matches!(renderer.reconfigure(small_config()), Err(RenderError::InvalidState { .. })));

    renderer.reset().unwrap();
    assert_eq!(renderer.state(), RendererState::Uninitialized);
    assert_eq!(renderer.device().live_buffers(), 0);

    renderer.reconfigure(RendererConfig { instances_per_model: 10, ..small_config() }).unwrap();
    renderer.setup(&[ModelDesc::new(cube); 3], &geometry, &backend).unwrap();

    let stats = renderer.render_frame(&everything(), &mut backend).unwrap();
    assert_eq!(stats.total_instances, 30);
    assert_eq!(stats.draw_calls, 3);
    assert_eq!(renderer.config().instances_per_model, 10);
}

#[test]
fn verify_headless_device_keeps_no_log() {
    let (mut renderer, mut backend) = ready(small_config(), 3);
    for _ in 0..1000 {
        renderer.render_frame(&everything(), &mut backend).unwrap();
    }
    assert!(renderer.device().take_timeline().is_empty());
    assert_eq!(backend.calls().len(), 3);
}

#[test]
fn verify_recorded_timeline_is_per_frame() {
    let (geometry, cube) = geometry();
    let device = SoftDevice::new().with_timeline();
    let mut backend = device.draw_backend();
    let mut renderer = InstancedRenderer::new(device, small_config());
    renderer.setup(&vec![ModelDesc::new(cube); 3], &geometry, &backend).unwrap();
    renderer.device().take_timeline();

    for _ in 0..10 {
        renderer.render_frame(&everything(), &mut backend).unwrap();
    }
    // params write, counter clear, dispatch, 3 copies, submit, 3 draws
    assert_eq!(renderer.device().take_timeline().len(), 10 * 10);
    assert!(renderer.device().take_timeline().is_empty());
}

// ============================================================================
// CONFIG FILES
// ============================================================================

#[test]
fn verify_toml_config_drives_renderer() {
    let config = RendererConfig::from_toml_str(
        r#"
        instances_per_model = 2500
        seed = 11
        submit_mode = "batched"
        max_instances_per_batch = 1023

        [placement]
        kind = "random_in_volume"
        center = [0.0, 0.0, 0.0]
        extent = [20.0, 20.0, 20.0]
        "#,
    )
    .unwrap();

    let (mut renderer, mut backend) = ready(config, 1);
    let stats = renderer.render_frame(&everything(), &mut backend).unwrap();

    assert_eq!(stats.path, DrawPath::Batched);
    assert_eq!(stats.draw_calls, 3);
    assert_eq!(backend.instances_per_model(1), vec![2500]);
}

#[test]
fn verify_bad_toml_is_a_parse_error() {
    let err = RendererConfig::from_toml_str("instances_per_model = \"lots\"").unwrap_err();
    assert!(matches!(err, RenderError::ConfigParse(_)));
}
