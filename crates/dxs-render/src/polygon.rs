//! Per-mesh draw records

use crate::backend::GraphicsDevice;
use crate::context::RenderContext;

/// One draw of a mesh pass: an index range into the mesh's shared buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PolygonRenderer {
    pub index_offset: u32,
    pub vertex_offset: u32,
    pub index_count: u32,
    pub min_vertex_index: u32,
    pub vertex_index_range: u32,
    pub strip: bool,
    pub pass: u32,
}

impl PolygonRenderer {
    /// Primitives covered by the index range
    pub fn polygon_count(&self) -> u32 {
        if self.strip {
            self.index_count.saturating_sub(2)
        } else {
            self.index_count / 3
        }
    }

    /// Draw with the mesh buffers already bound; `base_vertex_offset` is the
    /// mesh's first vertex within the bound vertex buffer
    pub fn render<D: GraphicsDevice>(&self, ctx: &mut RenderContext<D>, base_vertex_offset: u32) {
        ctx.set_index_base_offset(base_vertex_offset + self.vertex_offset);
        if self.strip {
            ctx.draw_strip(
                self.index_offset,
                self.polygon_count(),
                self.min_vertex_index,
                self.vertex_index_range,
            );
        } else {
            ctx.draw_triangles(
                self.index_offset,
                self.polygon_count(),
                self.min_vertex_index,
                self.vertex_index_range,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::null::NullDevice;
    use crate::backend::PrimitiveType;
    use crate::fvf::FVF_XYZDUV1;
    use crate::telemetry::NullObserver;
    use dxs_core::Config;

    #[test]
    fn test_render_strip_and_list() {
        let mut ctx = RenderContext::with_observer(NullDevice::new(), Config::default(), Arc::new(NullObserver)).unwrap();
        let vb = ctx.create_vertex_buffer(FVF_XYZDUV1, 64).unwrap();
        let ib = ctx.create_index_buffer(64).unwrap();
        ctx.set_vertex_buffer(0, Some(&vb));
        ctx.set_index_buffer(Some(&ib), 0);

        let list = PolygonRenderer {
            index_offset: 6,
            vertex_offset: 4,
            index_count: 12,
            min_vertex_index: 0,
            vertex_index_range: 8,
            strip: false,
            pass: 0,
        };
        list.render(&mut ctx, 16);
        let strip = PolygonRenderer {
            strip: true,
            index_count: 6,
            ..list
        };
        strip.render(&mut ctx, 0);

        let draws = ctx.device().draws();
        assert_eq!(draws[0].primitive, PrimitiveType::TriangleList);
        assert_eq!(draws[0].primitive_count, 4);
        assert_eq!(draws[0].base_vertex, 20);
        assert_eq!(draws[0].start_index, 6);
        assert_eq!(draws[1].primitive, PrimitiveType::TriangleStrip);
        assert_eq!(draws[1].primitive_count, 4);
        assert_eq!(draws[1].base_vertex, 4);
    }
}
