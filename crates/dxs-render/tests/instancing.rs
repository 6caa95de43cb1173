//! Instance batching: capacity, eligibility and reset participation

use std::sync::Arc;

use dxs_core::Config;
use dxs_render::backend::null::NullDevice;
use dxs_render::backend::{DeviceStatus, StreamBinding};
use dxs_render::fvf::FVF_XYZNDUV2;
use dxs_render::instancing::{InstanceBatch, InstanceData, MAX_INSTANCES_PER_DRAW};
use dxs_render::math::{self, Vector3f};
use dxs_render::telemetry::NullObserver;
use dxs_render::{FrameOutcome, GraphicsDevice, InstanceCandidate, InstanceManager, PolygonRenderer, RenderContext};

const SHADER: [u32; 4] = [0xFFFE_0300, 0, 0, 0x0000_FFFF];

fn context() -> RenderContext<NullDevice> {
    let mut config = Config::default();
    config.recovery.lost_backoff_ms = 0;
    config.recovery.reset_backoff_ms = 0;
    RenderContext::with_observer(NullDevice::new(), config, Arc::new(NullObserver)).unwrap()
}

fn renderer() -> PolygonRenderer {
    PolygonRenderer {
        index_offset: 0,
        vertex_offset: 0,
        index_count: 6,
        min_vertex_index: 0,
        vertex_index_range: 4,
        strip: false,
        pass: 0,
    }
}

#[test]
fn test_batch_capacity_boundary() {
    let mut batch = InstanceBatch::default();
    let data = InstanceData::from_world(&math::identity());
    for _ in 0..MAX_INSTANCES_PER_DRAW {
        assert!(batch.add_instance(data));
    }
    assert!(!batch.add_instance(data));
    assert_eq!(batch.collected_count(), MAX_INSTANCES_PER_DRAW);

    batch.reset();
    assert_eq!(batch.collected_count(), 0);
    assert!(batch.add_instance(data));
}

#[test]
fn test_single_eligible_object_draws_nothing() {
    let mut ctx = context();
    let mut manager = InstanceManager::new(&ctx.config().instancing);
    manager.init_with_shader(&mut ctx, &SHADER).unwrap();

    let vb = ctx.create_vertex_buffer(FVF_XYZNDUV2, 4).unwrap();
    let ib = ctx.create_index_buffer(6).unwrap();
    ctx.set_vertex_buffer(0, Some(&vb));
    ctx.set_index_buffer(Some(&ib), 0);
    ctx.apply();

    let r = renderer();
    let mut sorted = InstanceCandidate::rigid(math::identity(), r);
    sorted.sorted = true;
    let mut billboard = InstanceCandidate::rigid(math::identity(), r);
    billboard.billboard = true;
    let mut stretched = InstanceCandidate::rigid(math::identity(), r);
    stretched.scale = Vector3f::new(1.0, 2.0, 1.0);
    let candidates = [
        sorted,
        InstanceCandidate::rigid(math::translation(5.0, 0.0, 0.0), r),
        billboard,
        stretched,
    ];
    assert_eq!(manager.collect(&candidates, &r), 1);
    assert_eq!(manager.batch().collected_count(), 1);

    let stream0 = ctx.device().stream_source(0);
    let indices = ctx.device().indices();
    ctx.device_mut().clear_calls();
    assert!(!manager.draw_instanced(&mut ctx, &r, FVF_XYZNDUV2).unwrap());

    assert!(ctx.device().draws().is_empty());
    assert!(ctx.device().calls().is_empty());
    assert_eq!(ctx.device().stream_source(0), stream0);
    assert_eq!(ctx.device().stream_source(1), StreamBinding::NULL);
    assert_eq!(ctx.device().indices(), indices);
}

#[test]
fn test_shared_manager_follows_device_reset() {
    let mut ctx = context();
    let manager = InstanceManager::shared(&ctx.config().instancing);
    manager.lock().init_with_shader(&mut ctx, &SHADER).unwrap();
    ctx.register_resource_hook(Box::new(Arc::clone(&manager)));
    let live_before = ctx.device().live_vertex_buffers();

    ctx.device_mut().set_status(DeviceStatus::NotReset);
    ctx.begin_scene().unwrap();
    assert_eq!(ctx.end_scene(true), FrameOutcome::Reset);

    assert!(manager.lock().is_available());
    assert_eq!(ctx.device().live_vertex_buffers(), live_before);

    let vb = ctx.create_vertex_buffer(FVF_XYZNDUV2, 4).unwrap();
    let ib = ctx.create_index_buffer(6).unwrap();
    ctx.set_vertex_buffer(0, Some(&vb));
    ctx.set_index_buffer(Some(&ib), 0);
    let r = renderer();
    let candidates = [
        InstanceCandidate::rigid(math::translation(1.0, 0.0, 0.0), r),
        InstanceCandidate::rigid(math::translation(2.0, 0.0, 0.0), r),
    ];
    let mut guard = manager.lock();
    assert_eq!(guard.collect(&candidates, &r), 2);
    assert!(guard.draw_instanced(&mut ctx, &r, FVF_XYZNDUV2).unwrap());
    assert_eq!(ctx.device().draws().len(), 1);
}
