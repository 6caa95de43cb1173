//! Benchmarks for the apply pass and draw dispatch

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dxs_core::Config;
use dxs_render::backend::null::NullDevice;
use dxs_render::backend::{RenderState, TransformKind};
use dxs_render::fvf::FVF_XYZNDUV2;
use dxs_render::math;
use dxs_render::telemetry::NullObserver;
use dxs_render::RenderContext;
use std::sync::Arc;

fn context() -> RenderContext<NullDevice> {
    let mut device = NullDevice::new();
    device.set_recording(false);
    RenderContext::with_observer(device, Config::default(), Arc::new(NullObserver)).unwrap()
}

fn bench_apply_clean(c: &mut Criterion) {
    let mut ctx = context();
    let vb = ctx.create_vertex_buffer(FVF_XYZNDUV2, 1024).unwrap();
    let ib = ctx.create_index_buffer(3072).unwrap();
    ctx.set_vertex_buffer(0, Some(&vb));
    ctx.set_index_buffer(Some(&ib), 0);
    ctx.apply();

    c.bench_function("apply_nothing_dirty", |b| {
        b.iter(|| {
            ctx.apply();
            black_box(ctx.stats().current().device_calls);
        });
    });
}

fn bench_mesh_draws(c: &mut Criterion) {
    let mut group = c.benchmark_group("mesh_draws");

    for meshes in [16u32, 128, 1024].iter() {
        group.bench_with_input(BenchmarkId::new("world_change_per_draw", meshes), meshes, |b, &meshes| {
            let mut ctx = context();
            let vb = ctx.create_vertex_buffer(FVF_XYZNDUV2, 1024).unwrap();
            let ib = ctx.create_index_buffer(3072).unwrap();
            ctx.set_vertex_buffer(0, Some(&vb));
            ctx.set_index_buffer(Some(&ib), 0);
            ctx.set_fvf(FVF_XYZNDUV2, "bench");
            let worlds: Vec<_> = (0..meshes).map(|i| math::translation(i as f32, 0.0, 0.0)).collect();

            b.iter(|| {
                ctx.begin_scene().unwrap();
                for world in &worlds {
                    ctx.set_transform(TransformKind::World, world);
                    ctx.draw_triangles(0, 12, 0, 24);
                }
                black_box(ctx.end_scene(false));
            });
        });

        group.bench_with_input(BenchmarkId::new("redundant_render_states", meshes), meshes, |b, &meshes| {
            let mut ctx = context();
            b.iter(|| {
                for _ in 0..meshes {
                    ctx.set_render_state(RenderState::ZEnable, 1);
                    ctx.set_render_state(RenderState::Lighting, 1);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_apply_clean, bench_mesh_draws);
criterion_main!(benches);
