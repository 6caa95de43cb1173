//! Slot loops bounded by device capabilities and configuration

use std::sync::Arc;

use dxs_core::Config;
use dxs_render::backend::null::{DeviceCall, NullDevice};
use dxs_render::backend::{DeviceCaps, Light, TextureStageState};
use dxs_render::math::Vector3f;
use dxs_render::telemetry::NullObserver;
use dxs_render::{DeviceLimits, RenderContext};

fn two_stage_context() -> RenderContext<NullDevice> {
    let device = NullDevice::with_caps(DeviceCaps {
        max_texture_stages: 2,
        max_lights: 2,
        ..DeviceCaps::default()
    });
    RenderContext::with_observer(device, Config::default(), Arc::new(NullObserver)).unwrap()
}

fn stage_state_writes_from(ctx: &RenderContext<NullDevice>, first: u32) -> usize {
    ctx.device()
        .count_calls(|c| matches!(c, DeviceCall::SetTextureStageState { stage, .. } if *stage >= first))
}

#[test]
fn test_limits_take_the_smallest_bound() {
    let ctx = two_stage_context();
    assert_eq!(
        ctx.limits(),
        DeviceLimits {
            texture_stages: 2,
            vertex_streams: 4,
            lights: 2,
        }
    );

    let mut config = Config::default();
    config.device.max_texture_stages = 1;
    config.device.max_vertex_streams = 2;
    let ctx = RenderContext::with_observer(NullDevice::new(), config, Arc::new(NullObserver)).unwrap();
    assert_eq!(ctx.limits().texture_stages, 1);
    assert_eq!(ctx.limits().vertex_streams, 2);
    assert_eq!(ctx.limits().lights, 4);
}

#[test]
fn test_guard_acquire_stays_within_stage_caps() {
    let mut ctx = two_stage_context();
    ctx.device_mut().clear_calls();
    {
        let _guard = ctx.scoped_state("limits");
    }
    assert_eq!(stage_state_writes_from(&ctx, 2), 0);
    assert!(stage_state_writes_from(&ctx, 0) > 0);
}

#[test]
fn test_invalidate_stays_within_stage_caps() {
    let mut ctx = two_stage_context();
    ctx.device_mut().clear_calls();
    ctx.invalidate_cached_render_states();

    let beyond = ctx
        .device()
        .count_calls(|c| matches!(c, DeviceCall::SetTexture { stage, .. } if *stage >= 2));
    assert_eq!(beyond, 0);
    let within = ctx
        .device()
        .count_calls(|c| matches!(c, DeviceCall::SetTexture { stage, .. } if *stage < 2));
    assert_eq!(within, 2);
}

#[test]
fn test_setters_ignore_slots_beyond_caps() {
    let mut ctx = two_stage_context();
    let tex = ctx.create_texture(4, 4, 1).unwrap();
    let light = Light::directional(Vector3f::new(0.0, -1.0, 0.0), [1.0, 1.0, 1.0]);
    ctx.device_mut().clear_calls();

    ctx.set_texture(3, Some(&tex));
    ctx.set_texture_stage_state(2, TextureStageState::ColorOp, 4);
    ctx.set_light(2, Some(light));
    ctx.set_light(1, Some(light));
    ctx.apply();

    let device = ctx.device();
    assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::SetTexture { .. })), 0);
    assert_eq!(stage_state_writes_from(&ctx, 2), 0);
    assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::SetLight(i) if *i >= 2)), 0);
    assert!(device.calls().contains(&DeviceCall::SetLight(1)));
    assert!(device.calls().contains(&DeviceCall::LightEnable(1, true)));
}
