//! Draw dispatch across buffer kinds

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use dxs_core::Config;
use dxs_render::backend::null::NullDevice;
use dxs_render::backend::{PrimitiveType, TransformKind};
use dxs_render::fvf::FVF_XYZNDUV2;
use dxs_render::math;
use dxs_render::resource::{SortingIndexBuffer, SortingVertexBuffer};
use dxs_render::telemetry::{PipelineEvent, RecordingObserver};
use dxs_render::vertex::VertexXyzNDUV2;
use dxs_render::RenderContext;

fn context() -> (RenderContext<NullDevice>, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::new());
    let ctx = RenderContext::with_observer(NullDevice::new(), Config::default(), observer.clone()).unwrap();
    (ctx, observer)
}

fn triangle_at(z: f32) -> (Arc<SortingVertexBuffer>, Arc<SortingIndexBuffer>) {
    let vb = Arc::new(SortingVertexBuffer::new(vec![
        VertexXyzNDUV2::at([0.0, 0.0, z]),
        VertexXyzNDUV2::at([1.0, 0.0, z]),
        VertexXyzNDUV2::at([0.0, 1.0, z]),
    ]));
    let ib = Arc::new(SortingIndexBuffer::new(vec![0, 1, 2]));
    (vb, ib)
}

fn draw_catching(ctx: &mut RenderContext<NullDevice>) -> bool {
    panic::catch_unwind(AssertUnwindSafe(|| ctx.draw(PrimitiveType::TriangleList, 0, 1, 0, 3))).is_err()
}

#[test]
fn test_sorting_vertices_with_device_indices_never_draw() {
    let (mut ctx, observer) = context();
    let (vb, _) = triangle_at(1.0);
    let ib = ctx.create_index_buffer(3).unwrap();
    ctx.set_sorting_vertex_buffer(&vb);
    ctx.set_index_buffer(Some(&ib), 0);

    assert_eq!(draw_catching(&mut ctx), cfg!(debug_assertions));
    assert!(ctx.device().draws().is_empty());
    assert_eq!(
        observer.count(|e| matches!(e, PipelineEvent::MismatchedBufferKinds { .. })),
        1
    );
}

#[test]
fn test_device_vertices_with_sorting_indices_never_draw() {
    let (mut ctx, observer) = context();
    let (_, ib) = triangle_at(1.0);
    let vb = ctx.create_vertex_buffer(FVF_XYZNDUV2, 3).unwrap();
    ctx.set_vertex_buffer(0, Some(&vb));
    ctx.set_sorting_index_buffer(&ib, 0);

    assert_eq!(draw_catching(&mut ctx), cfg!(debug_assertions));
    assert!(ctx.device().draws().is_empty());
    assert_eq!(
        observer.count(|e| matches!(e, PipelineEvent::MismatchedBufferKinds { .. })),
        1
    );
}

#[test]
fn test_sorting_draws_flush_far_to_near() {
    let (mut ctx, _) = context();
    let (near_vb, near_ib) = triangle_at(1.0);
    let (far_vb, far_ib) = triangle_at(50.0);
    let (mid_vb, mid_ib) = triangle_at(10.0);

    for (vb, ib) in [(&near_vb, &near_ib), (&far_vb, &far_ib), (&mid_vb, &mid_ib)] {
        ctx.set_sorting_vertex_buffer(vb);
        ctx.set_sorting_index_buffer(ib, 0);
        ctx.draw_triangles(0, 1, 0, 3);
    }
    assert!(ctx.device().draws().is_empty());
    assert_eq!(ctx.sorting_renderer().len(), 3);

    ctx.set_transform(TransformKind::World, &math::translation(0.0, 0.0, 0.5));
    ctx.flush_sorting();
    assert!(ctx.sorting_renderer().is_empty());

    let draws = ctx.device().draws();
    assert_eq!(draws.len(), 3);
    let uploaded_z: Vec<f32> = draws
        .iter()
        .map(|draw| {
            let binding = draw.stream0;
            let bytes = ctx
                .device()
                .vertex_buffer_data(binding.buffer.unwrap())
                .unwrap();
            let first = (draw.base_vertex as usize) * 44;
            let vertex: VertexXyzNDUV2 = bytemuck::pod_read_unaligned(&bytes[first..first + 44]);
            vertex.position[2]
        })
        .collect();
    assert_eq!(uploaded_z, vec![50.0, 10.0, 1.0]);
    assert_eq!(
        ctx.record().transform(TransformKind::World),
        math::translation(0.0, 0.0, 0.5)
    );
}
