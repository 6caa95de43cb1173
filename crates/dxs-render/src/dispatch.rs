//! Draw dispatch
//!
//! Every draw applies pending state first, then routes on the buffer kinds
//! bound to stream 0 and the index input: device buffers go straight to an
//! indexed draw, sorting buffers are copied into the dynamic rings and drawn
//! from there. One of each is a programming error.

use std::sync::Arc;

use crate::backend::{GraphicsDevice, PrimitiveType, StreamBinding};
use crate::context::RenderContext;
use crate::fvf::FVF_XYZNDUV2;
use crate::state::{BufferKind, IndexSource, VertexSource};
use crate::telemetry::PipelineEvent;
use dxs_core::DeviceError;

/// Vertices a draw may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexRange {
    /// Everything the bound stream 0 source holds past its base offsets
    Whole,
    Explicit { min_vertex_index: u32, vertex_count: u32 },
}

impl VertexRange {
    /// Interpret a raw `(min, count)` pair; a count below three means the
    /// whole bound buffer
    pub fn from_raw(min_vertex_index: u32, vertex_count: u32) -> Self {
        if vertex_count < 3 {
            Self::Whole
        } else {
            Self::Explicit {
                min_vertex_index,
                vertex_count,
            }
        }
    }
}

impl<D: GraphicsDevice> RenderContext<D> {
    /// Indexed draw with the raw vertex-range convention of [`VertexRange::from_raw`]
    pub fn draw(
        &mut self,
        primitive: PrimitiveType,
        start_index: u32,
        polygon_count: u32,
        min_vertex_index: u32,
        vertex_count: u32,
    ) {
        self.draw_range(
            primitive,
            start_index,
            polygon_count,
            VertexRange::from_raw(min_vertex_index, vertex_count),
        );
    }

    /// Triangle list draw; sorting geometry is deferred to the sorting renderer
    pub fn draw_triangles(&mut self, start_index: u32, polygon_count: u32, min_vertex_index: u32, vertex_count: u32) {
        let range = VertexRange::from_raw(min_vertex_index, vertex_count);
        if self.record.streams[0].kind().is_sorting() && self.record.index.kind().is_sorting() {
            self.assert_owner_thread();
            self.defer_sorting_draw(PrimitiveType::TriangleList, start_index, polygon_count, range);
            return;
        }
        self.draw_range(PrimitiveType::TriangleList, start_index, polygon_count, range);
    }

    pub fn draw_strip(&mut self, start_index: u32, polygon_count: u32, min_vertex_index: u32, vertex_count: u32) {
        self.draw(
            PrimitiveType::TriangleStrip,
            start_index,
            polygon_count,
            min_vertex_index,
            vertex_count,
        );
    }

    /// Apply pending state and issue one indexed draw
    pub fn draw_range(&mut self, primitive: PrimitiveType, start_index: u32, polygon_count: u32, range: VertexRange) {
        let limit = self.config.device.draw_polygon_low_bound_limit;
        if limit != 0 && limit >= polygon_count {
            return;
        }
        self.assert_owner_thread();
        self.apply();
        if !self.config.debug.draw_triangles {
            return;
        }

        let vertex = self.record.streams[0].kind();
        let index = self.record.index.kind();
        if vertex == BufferKind::None || index == BufferKind::None {
            self.report(PipelineEvent::MissingBuffers { vertex, index });
            debug_assert!(false, "draw without buffers (vb={:?} ib={:?})", vertex, index);
            return;
        }
        if vertex.is_sorting() != index.is_sorting() {
            self.report(PipelineEvent::MismatchedBufferKinds { vertex, index });
            debug_assert!(
                false,
                "vertex and index buffers must both be sorting or both device buffers (vb={:?} ib={:?})",
                vertex,
                index
            );
            return;
        }

        let (min_vertex_index, vertex_count) = self.resolve_range(range);
        if vertex.is_sorting() {
            self.draw_sorting_ib_vb(primitive, start_index, polygon_count, min_vertex_index, vertex_count);
            return;
        }

        if self.config.debug.validate_pipeline {
            self.ensure_indices_match("Draw");
        }
        let base_vertex = self.record.index_base_offset as i32;
        let Some(start) = start_index.checked_add(self.record.index.index_offset()) else {
            return self.report_overflow("Draw", "start index");
        };
        let result = self.device.draw_indexed_primitive(
            primitive,
            base_vertex,
            min_vertex_index,
            vertex_count,
            start,
            polygon_count,
        );
        self.finish_draw(result, polygon_count, vertex_count, |ctx, error| {
            tracing::debug!(
                "Draw: DIP failed ctx={} prim={:?} start={} polys={} base={} min={} count={}: {}",
                ctx.draw_context.unwrap_or("-"),
                primitive,
                start,
                polygon_count,
                base_vertex,
                min_vertex_index,
                vertex_count,
                error
            );
        });
    }

    /// Concrete `(min_vertex_index, vertex_count)` for a range
    fn resolve_range(&self, range: VertexRange) -> (u32, u32) {
        match range {
            VertexRange::Explicit {
                min_vertex_index,
                vertex_count,
            } => (min_vertex_index, vertex_count),
            VertexRange::Whole => {
                let source = &self.record.streams[0];
                let count = match source {
                    VertexSource::Engine(_) | VertexSource::Sorting(_) => source
                        .vertex_count()
                        .saturating_sub(self.record.index_base_offset)
                        .saturating_sub(source.vertex_offset()),
                    _ => source.vertex_count(),
                };
                (0, count)
            }
        }
    }

    fn finish_draw(
        &mut self,
        result: Result<(), DeviceError>,
        polygon_count: u32,
        vertex_count: u32,
        on_error: impl FnOnce(&Self, &DeviceError),
    ) {
        match result {
            Ok(()) => self.stats.record_draw(polygon_count, vertex_count),
            Err(error) => {
                on_error(self, &error);
                self.report(PipelineEvent::CallFailed {
                    context: "DrawIndexedPrimitive",
                    error,
                });
            }
        }
    }

    fn report_overflow(&self, context: &'static str, what: &str) {
        tracing::warn!("{}: {} overflows", context, what);
        self.report(PipelineEvent::CallFailed {
            context,
            error: DeviceError::InvalidCall(format!("{} overflows", what)),
        });
    }

    /// Copy the bound sorting range into the dynamic rings and draw it
    fn draw_sorting_ib_vb(
        &mut self,
        primitive: PrimitiveType,
        start_index: u32,
        polygon_count: u32,
        min_vertex_index: u32,
        vertex_count: u32,
    ) {
        let index_count = match primitive {
            PrimitiveType::TriangleList => polygon_count.checked_mul(3),
            PrimitiveType::TriangleStrip | PrimitiveType::TriangleFan => polygon_count.checked_add(2),
            other => {
                debug_assert!(false, "sorting draw with {:?}", other);
                tracing::warn!("SortingDraw: unsupported primitive {:?}", other);
                return;
            }
        };
        let Some(index_count) = index_count else {
            return self.report_overflow("SortingDraw", "index count");
        };

        let (vertices, vertex_offset) = match &self.record.streams[0] {
            VertexSource::Sorting(vb) => (Arc::clone(vb), 0),
            VertexSource::DynamicSorting(access) => (Arc::clone(access.buffer()), access.vertex_offset()),
            _ => return,
        };
        let (indices, index_offset) = match &self.record.index {
            IndexSource::Sorting(ib) => (Arc::clone(ib), 0),
            IndexSource::DynamicSorting(access) => (Arc::clone(access.buffer()), access.index_offset()),
            _ => return,
        };

        let first_vertex = vertex_offset
            .checked_add(self.record.index_base_offset)
            .and_then(|v| v.checked_add(min_vertex_index));
        let first_index = index_offset.checked_add(start_index);
        let (Some(first_vertex), Some(first_index)) = (first_vertex, first_index) else {
            return self.report_overflow("SortingDraw", "first vertex or index");
        };
        let (first_vertex, first_index) = (first_vertex as usize, first_index as usize);
        let (Some(src_vertices), Some(src_indices)) = (
            vertices.vertices().get(first_vertex..first_vertex.saturating_add(vertex_count as usize)),
            indices.indices().get(first_index..first_index.saturating_add(index_count as usize)),
        ) else {
            self.report(PipelineEvent::CallFailed {
                context: "SortingDraw",
                error: DeviceError::InvalidCall(format!(
                    "range past sorting buffers (vertices {}+{}, indices {}+{})",
                    first_vertex, vertex_count, first_index, index_count
                )),
            });
            return;
        };

        let rebased: Vec<u16> = src_indices
            .iter()
            .map(|&i| {
                let index = u32::from(i).wrapping_sub(min_vertex_index);
                debug_assert!(index < vertex_count, "sorting index {} outside range {}", index, vertex_count);
                index as u16
            })
            .collect();

        let vertex_access = match self.allocate_dynamic_vertices(FVF_XYZNDUV2, vertex_count) {
            Ok(access) => access,
            Err(error) => return self.report(PipelineEvent::CallFailed { context: "SortingDraw: vertices", error }),
        };
        let result = self.write_dynamic_vertices(&vertex_access, bytemuck::cast_slice(src_vertices));
        if self.check("SortingDraw: write vertices", result).is_none() {
            return;
        }
        let index_access = match self.allocate_dynamic_indices(index_count) {
            Ok(access) => access,
            Err(error) => return self.report(PipelineEvent::CallFailed { context: "SortingDraw: indices", error }),
        };
        let result = self.write_dynamic_indices(&index_access, &rebased);
        if self.check("SortingDraw: write indices", result).is_none() {
            return;
        }

        let binding = StreamBinding::new(vertex_access.buffer(), 0, vertex_access.stride());
        let result = self.writer().stream(0, binding);
        if self.check("SortingDraw: SetStreamSource", result).is_none() {
            return;
        }
        let result = self.writer().declaration(None);
        if self.check("SortingDraw: SetVertexDeclaration(null)", result).is_none() {
            return;
        }
        let result = self.writer().fvf(FVF_XYZNDUV2);
        if self.check("SortingDraw: SetFVF", result).is_none() {
            return;
        }
        self.record.set_fvf(FVF_XYZNDUV2, "SortingDraw");
        let result = self.writer().indices(Some(index_access.buffer()));
        if self.check("SortingDraw: SetIndices", result).is_none() {
            return;
        }

        let base_vertex = vertex_access.vertex_offset() as i32;
        let start = index_access.index_offset();
        let result = self
            .device
            .draw_indexed_primitive(primitive, base_vertex, 0, vertex_count, start, polygon_count);
        self.finish_draw(result, polygon_count, vertex_count, |_, error| {
            tracing::debug!(
                "SortingDraw: DIP failed prim={:?} start={} polys={} base={} count={}: {}",
                primitive,
                start,
                polygon_count,
                base_vertex,
                vertex_count,
                error
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullDevice;
    use crate::fvf::FVF_XYZDUV1;
    use crate::resource::{SortingIndexBuffer, SortingVertexBuffer};
    use crate::telemetry::RecordingObserver;
    use crate::vertex::VertexXyzNDUV2;
    use dxs_core::Config;

    fn context_with(config: Config) -> RenderContext<NullDevice> {
        RenderContext::with_observer(NullDevice::new(), config, Arc::new(RecordingObserver::new())).unwrap()
    }

    fn context() -> RenderContext<NullDevice> {
        context_with(Config::default())
    }

    #[test]
    fn test_vertex_range_from_raw() {
        assert_eq!(VertexRange::from_raw(5, 0), VertexRange::Whole);
        assert_eq!(VertexRange::from_raw(5, 2), VertexRange::Whole);
        assert_eq!(
            VertexRange::from_raw(5, 3),
            VertexRange::Explicit {
                min_vertex_index: 5,
                vertex_count: 3
            }
        );
    }

    #[test]
    fn test_whole_range_subtracts_base_offset() {
        let mut ctx = context();
        let vb = ctx.create_vertex_buffer(FVF_XYZDUV1, 100).unwrap();
        let ib = ctx.create_index_buffer(30).unwrap();
        ctx.set_vertex_buffer(0, Some(&vb));
        ctx.set_index_buffer(Some(&ib), 10);
        ctx.draw(PrimitiveType::TriangleList, 3, 2, 7, 0);

        let draws = ctx.device().draws();
        assert_eq!(draws.len(), 1);
        let draw = draws[0];
        assert_eq!(draw.base_vertex, 10);
        assert_eq!(draw.min_vertex_index, 0);
        assert_eq!(draw.num_vertices, 90);
        assert_eq!(draw.start_index, 3);
        assert_eq!(draw.primitive_count, 2);
        assert_eq!(ctx.stats().current().draw_calls, 1);
    }

    #[test]
    fn test_dynamic_index_offset_is_added() {
        let mut ctx = context();
        let vb = ctx.create_vertex_buffer(FVF_XYZDUV1, 16).unwrap();
        ctx.allocate_dynamic_indices(6).unwrap();
        let indices = ctx.allocate_dynamic_indices(6).unwrap();
        ctx.set_vertex_buffer(0, Some(&vb));
        ctx.set_dynamic_index_buffer(indices, 0);
        ctx.draw(PrimitiveType::TriangleList, 0, 2, 0, 16);
        assert_eq!(ctx.device().draws()[0].start_index, 6);
    }

    #[test]
    fn test_low_bound_limit_skips_small_draws() {
        let mut config = Config::default();
        config.device.draw_polygon_low_bound_limit = 4;
        let mut ctx = context_with(config);
        let vb = ctx.create_vertex_buffer(FVF_XYZDUV1, 16).unwrap();
        let ib = ctx.create_index_buffer(30).unwrap();
        ctx.set_vertex_buffer(0, Some(&vb));
        ctx.set_index_buffer(Some(&ib), 0);

        ctx.draw(PrimitiveType::TriangleList, 0, 4, 0, 0);
        assert!(ctx.device().draws().is_empty());
        ctx.draw(PrimitiveType::TriangleList, 0, 5, 0, 0);
        assert_eq!(ctx.device().draws().len(), 1);
    }

    #[test]
    fn test_draw_triangles_switch_still_applies() {
        let mut config = Config::default();
        config.debug.draw_triangles = false;
        let mut ctx = context_with(config);
        let vb = ctx.create_vertex_buffer(FVF_XYZDUV1, 16).unwrap();
        let ib = ctx.create_index_buffer(30).unwrap();
        ctx.set_vertex_buffer(0, Some(&vb));
        ctx.set_index_buffer(Some(&ib), 0);
        ctx.draw(PrimitiveType::TriangleList, 0, 5, 0, 0);
        assert!(ctx.device().draws().is_empty());
        assert_eq!(ctx.device().indices(), Some(ib.handle()));
    }

    fn sorting_quad() -> (Arc<SortingVertexBuffer>, Arc<SortingIndexBuffer>) {
        let mut vertices = vec![VertexXyzNDUV2::at([9.0, 9.0, 9.0]); 2];
        vertices.extend([
            VertexXyzNDUV2::at([0.0, 0.0, 1.0]),
            VertexXyzNDUV2::at([1.0, 0.0, 1.0]),
            VertexXyzNDUV2::at([1.0, 1.0, 1.0]),
            VertexXyzNDUV2::at([0.0, 1.0, 1.0]),
        ]);
        let vb = Arc::new(SortingVertexBuffer::new(vertices));
        let ib = Arc::new(SortingIndexBuffer::new(vec![2, 3, 4, 2, 4, 5]));
        (vb, ib)
    }

    #[test]
    fn test_sorting_draw_materialises_into_rings() {
        let mut ctx = context();
        let (vb, ib) = sorting_quad();
        ctx.set_sorting_vertex_buffer(&vb);
        ctx.set_sorting_index_buffer(&ib, 0);
        ctx.draw(PrimitiveType::TriangleList, 0, 2, 2, 4);

        let draws = ctx.device().draws();
        assert_eq!(draws.len(), 1);
        let draw = draws[0].clone();
        assert_eq!(draw.fvf, FVF_XYZNDUV2);
        assert_eq!(draw.declaration, None);
        assert_eq!(draw.stream0.stride, 44);
        assert_eq!(draw.min_vertex_index, 0);
        assert_eq!(draw.num_vertices, 4);

        let ring = draw.indices.unwrap();
        let data = ctx.device().index_buffer_data(ring).unwrap();
        let start = draw.start_index as usize;
        assert_eq!(&data[start..start + 6], &[0, 1, 2, 0, 2, 3]);

        let vertices = ctx.device().vertex_buffer_data(draw.stream0.buffer.unwrap()).unwrap();
        let first = (draw.base_vertex as usize) * 44;
        let copied: VertexXyzNDUV2 = bytemuck::pod_read_unaligned(&vertices[first..first + 44]);
        assert_eq!(copied.position, [0.0, 0.0, 1.0]);
        assert_eq!(ctx.record().layout().owner(), Some("SortingDraw"));
    }

    #[test]
    fn test_oversized_counts_are_reported_without_drawing() {
        let observer = Arc::new(RecordingObserver::new());
        let mut ctx = RenderContext::with_observer(NullDevice::new(), Config::default(), observer.clone()).unwrap();
        let (vb, ib) = sorting_quad();
        ctx.set_sorting_vertex_buffer(&vb);
        ctx.set_sorting_index_buffer(&ib, 0);
        ctx.draw(PrimitiveType::TriangleList, 0, u32::MAX, 2, 4);
        ctx.draw(PrimitiveType::TriangleStrip, 0, u32::MAX - 1, 2, 4);

        ctx.set_sorting_index_buffer(&ib, u32::MAX);
        ctx.draw(PrimitiveType::TriangleList, 0, 2, 2, 4);

        let vertices = ctx.create_vertex_buffer(FVF_XYZDUV1, 16).unwrap();
        ctx.allocate_dynamic_indices(6).unwrap();
        let indices = ctx.allocate_dynamic_indices(6).unwrap();
        ctx.set_vertex_buffer(0, Some(&vertices));
        ctx.set_dynamic_index_buffer(indices, 0);
        ctx.draw(PrimitiveType::TriangleList, u32::MAX, 2, 0, 16);

        assert!(ctx.device().draws().is_empty());
        let overflows = observer.count(|e| {
            matches!(e, PipelineEvent::CallFailed { error: DeviceError::InvalidCall(msg), .. } if msg.ends_with("overflows"))
        });
        assert_eq!(overflows, 4);
    }

    #[test]
    fn test_sorting_triangles_are_deferred_until_flush() {
        let mut ctx = context();
        let (vb, ib) = sorting_quad();
        ctx.set_sorting_vertex_buffer(&vb);
        ctx.set_sorting_index_buffer(&ib, 0);
        ctx.draw_triangles(0, 2, 2, 4);
        assert!(ctx.device().draws().is_empty());
        assert_eq!(ctx.sorting_renderer().len(), 1);

        ctx.flush_sorting();
        assert_eq!(ctx.device().draws().len(), 1);
        assert!(ctx.sorting_renderer().is_empty());
        assert!(ctx.record().vertex_source(0).kind().is_sorting());
    }

    #[test]
    fn test_mismatched_kinds_never_draw() {
        let mut ctx = context();
        let (vb, _) = sorting_quad();
        let ib = ctx.create_index_buffer(6).unwrap();
        ctx.set_sorting_vertex_buffer(&vb);
        ctx.set_index_buffer(Some(&ib), 0);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.draw(PrimitiveType::TriangleList, 0, 2, 0, 4);
        }));
        assert_eq!(outcome.is_err(), cfg!(debug_assertions));
        assert!(ctx.device().draws().is_empty());
    }
}
