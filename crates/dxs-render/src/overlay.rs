//! Screen-space 2D overlay draws
//!
//! Overlay geometry is given in clip space, so every transform is identity
//! and depth and lighting are switched off for the draw. The draw runs
//! inside a [`ScopedStateGuard`](crate::guard::ScopedStateGuard); the 3D
//! state around it is restored when the guard drops.

use std::sync::Arc;

use crate::backend::{cull, texture_op, GraphicsDevice, RenderState, TextureStageState, TransformKind};
use crate::context::RenderContext;
use crate::fvf::FVF_XYZDUV1;
use crate::math;
use crate::resource::Texture;
use crate::vertex::VertexXyzDUV1;
use dxs_core::DeviceError;

/// Layout owner tag of overlay draws
pub const OVERLAY_OWNER: &str = "Render2D";

/// Immediate-mode 2D renderer over the dynamic rings
#[derive(Debug, Default, Clone, Copy)]
pub struct Overlay2d;

impl Overlay2d {
    pub fn new() -> Self {
        Self
    }

    /// Draw an indexed triangle list with `texture` on stage 0
    pub fn render<D: GraphicsDevice>(
        &self,
        ctx: &mut RenderContext<D>,
        vertices: &[VertexXyzDUV1],
        indices: &[u16],
        texture: Option<&Arc<Texture>>,
    ) -> Result<(), DeviceError> {
        if vertices.is_empty() || indices.len() < 3 {
            return Ok(());
        }
        let saved_texture = ctx.record().texture(0).cloned();

        let result = {
            let mut guard = ctx.scoped_state(OVERLAY_OWNER);
            Self::draw(&mut guard, vertices, indices, texture)
        };

        ctx.set_texture(0, saved_texture.as_ref());
        result
    }

    fn draw<D: GraphicsDevice>(
        ctx: &mut RenderContext<D>,
        vertices: &[VertexXyzDUV1],
        indices: &[u16],
        texture: Option<&Arc<Texture>>,
    ) -> Result<(), DeviceError> {
        let identity = math::identity();
        ctx.set_world_identity();
        ctx.set_view_identity();
        ctx.set_transform(TransformKind::Projection, &identity);

        ctx.set_render_state(RenderState::ZEnable, 0);
        ctx.set_render_state(RenderState::ZWriteEnable, 0);
        ctx.set_render_state(RenderState::Lighting, 0);
        ctx.set_render_state(RenderState::CullMode, cull::NONE);
        ctx.set_fvf(FVF_XYZDUV1, OVERLAY_OWNER);

        let vertex_access = ctx.allocate_dynamic_vertices(FVF_XYZDUV1, vertices.len() as u32)?;
        ctx.write_dynamic_vertices(&vertex_access, bytemuck::cast_slice(vertices))?;
        let index_access = ctx.allocate_dynamic_indices(indices.len() as u32)?;
        ctx.write_dynamic_indices(&index_access, indices)?;
        ctx.set_dynamic_vertex_buffer(vertex_access);
        ctx.set_dynamic_index_buffer(index_access, 0);

        ctx.set_texture(0, texture);
        ctx.set_texture_stage_state(0, TextureStageState::ColorOp, texture_op::MODULATE);
        ctx.set_texture_stage_state(0, TextureStageState::AlphaOp, texture_op::MODULATE);

        ctx.draw_triangles(0, indices.len() as u32 / 3, 0, vertices.len() as u32);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullDevice;
    use crate::backend::PrimitiveType;
    use crate::telemetry::{NullObserver, PipelineEvent, RecordingObserver};
    use dxs_core::Config;

    fn quad() -> (Vec<VertexXyzDUV1>, Vec<u16>) {
        let v = |x: f32, y: f32| VertexXyzDUV1 {
            position: [x, y, 0.0],
            diffuse: 0xFFFF_FFFF,
            uv: [x, y],
        };
        (vec![v(0.0, 0.0), v(1.0, 0.0), v(1.0, 1.0), v(0.0, 1.0)], vec![0, 1, 2, 0, 2, 3])
    }

    #[test]
    fn test_overlay_draws_with_2d_state() {
        let mut ctx = RenderContext::with_observer(NullDevice::new(), Config::default(), Arc::new(NullObserver)).unwrap();
        let tex = ctx.create_texture(16, 16, 1).unwrap();
        let (vertices, indices) = quad();
        Overlay2d::new().render(&mut ctx, &vertices, &indices, Some(&tex)).unwrap();

        let draws = ctx.device().draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].primitive, PrimitiveType::TriangleList);
        assert_eq!(draws[0].primitive_count, 2);
        assert_eq!(draws[0].fvf, FVF_XYZDUV1);
        assert_eq!(draws[0].num_vertices, 4);
    }

    #[test]
    fn test_overlay_restores_3d_state() {
        let observer = Arc::new(RecordingObserver::new());
        let mut config = Config::default();
        config.debug.validate_pipeline = true;
        let mut ctx = RenderContext::with_observer(NullDevice::new(), config, observer.clone()).unwrap();
        let projection = math::translation(0.0, 0.0, 2.0);
        ctx.set_transform(TransformKind::Projection, &projection);
        ctx.set_render_state(RenderState::Lighting, 1);
        ctx.apply();

        let (vertices, indices) = quad();
        Overlay2d::new().render(&mut ctx, &vertices, &indices, None).unwrap();

        assert_eq!(ctx.device().transform(TransformKind::Projection), projection);
        assert_eq!(ctx.render_state(RenderState::Lighting), 1);
        assert_eq!(ctx.render_state(RenderState::ZEnable), 1);
        assert_eq!(ctx.render_state(RenderState::CullMode), cull::CW);
        assert_eq!(observer.count(|e| matches!(e, PipelineEvent::RestoreMismatch { .. })), 0);
    }
}
