//! Deferred depth-sorted geometry
//!
//! Triangle lists drawn from sorting buffers are not submitted immediately.
//! Each draw becomes a node carrying its buffers, range, transforms and
//! textures; [`RenderContext::flush_sorting`] submits the nodes back to
//! front by the view-space depth of their centroid.

use std::sync::Arc;

use crate::backend::{GraphicsDevice, PrimitiveType, TransformKind};
use crate::context::RenderContext;
use crate::dispatch::VertexRange;
use crate::math::{self, Matrix4f, Vector3f};
use crate::resource::Texture;
use crate::state::{DirtyFlags, IndexSource, VertexSource, MAX_TEXTURE_STAGES};

/// One deferred draw
#[derive(Debug, Clone)]
pub struct SortingNode {
    vertices: VertexSource,
    indices: IndexSource,
    index_base_offset: u32,
    primitive: PrimitiveType,
    start_index: u32,
    polygon_count: u32,
    range: VertexRange,
    world: Matrix4f,
    view: Matrix4f,
    textures: [Option<Arc<Texture>>; MAX_TEXTURE_STAGES],
    depth: f32,
}

impl SortingNode {
    /// View-space depth of the node's centroid
    pub fn depth(&self) -> f32 {
        self.depth
    }

    pub fn polygon_count(&self) -> u32 {
        self.polygon_count
    }
}

/// Queue of deferred sorting draws
#[derive(Debug, Default)]
pub struct SortingRenderer {
    nodes: Vec<SortingNode>,
}

impl SortingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop every pending node
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    fn push(&mut self, node: SortingNode) {
        self.nodes.push(node);
    }

    /// Pending nodes ordered far to near
    fn take_sorted(&mut self) -> Vec<SortingNode> {
        let mut nodes = std::mem::take(&mut self.nodes);
        nodes.sort_by(|a, b| b.depth.total_cmp(&a.depth));
        nodes
    }
}

/// Average view-space position of the vertices referenced by the draw
fn centroid_depth(
    vertices: &VertexSource,
    index_base_offset: u32,
    range: VertexRange,
    world_view: &Matrix4f,
) -> f32 {
    let (storage, first) = match vertices {
        VertexSource::Sorting(vb) => (vb.vertices(), 0),
        VertexSource::DynamicSorting(access) => (access.buffer().vertices(), access.vertex_offset()),
        _ => return 0.0,
    };
    let (min, count) = match range {
        VertexRange::Explicit {
            min_vertex_index,
            vertex_count,
        } => (min_vertex_index, vertex_count),
        VertexRange::Whole => (0, vertices.vertex_count().saturating_sub(index_base_offset)),
    };
    let start = (first + index_base_offset + min) as usize;
    let end = (start + count as usize).min(storage.len());
    let slice = storage.get(start..end).unwrap_or(&[]);
    if slice.is_empty() {
        return 0.0;
    }
    let sum = slice
        .iter()
        .fold(Vector3f::zeros(), |acc, v| acc + Vector3f::from(v.position));
    let center = sum / slice.len() as f32;
    math::transform_point(&center, world_view).z
}

impl<D: GraphicsDevice> RenderContext<D> {
    /// Queue a draw from the bound sorting buffers
    pub(crate) fn defer_sorting_draw(
        &mut self,
        primitive: PrimitiveType,
        start_index: u32,
        polygon_count: u32,
        range: VertexRange,
    ) {
        let record = &self.record;
        let world_view = record.world * record.view;
        let depth = centroid_depth(&record.streams[0], record.index_base_offset, range, &world_view);
        let node = SortingNode {
            vertices: record.streams[0].clone(),
            indices: record.index.clone(),
            index_base_offset: record.index_base_offset,
            primitive,
            start_index,
            polygon_count,
            range,
            world: record.world,
            view: record.view,
            textures: record.textures.clone(),
            depth,
        };
        self.sorting.push(node);
    }

    /// Pending sorting draws
    pub fn sorting_renderer(&self) -> &SortingRenderer {
        &self.sorting
    }

    /// Submit every deferred sorting draw back to front.
    ///
    /// The record's stream 0, index, transform and texture bindings are put
    /// back afterwards.
    pub fn flush_sorting(&mut self) {
        self.assert_owner_thread();
        if self.sorting.is_empty() {
            return;
        }
        let nodes = self.sorting.take_sorted();
        tracing::trace!("SortingRenderer: flushing {} nodes", nodes.len());

        let saved_stream0 = self.record.streams[0].clone();
        let saved_index = self.record.index.clone();
        let saved_base = self.record.index_base_offset;
        let saved_world = self.record.world;
        let saved_view = self.record.view;
        let saved_textures = self.record.textures.clone();

        for node in nodes {
            self.record.set_vertex_source(0, node.vertices);
            self.record.set_index_source(node.indices, node.index_base_offset);
            self.record.set_transform(TransformKind::World, &node.world);
            self.record.set_transform(TransformKind::View, &node.view);
            for (stage, texture) in node.textures.into_iter().enumerate() {
                self.record.set_texture(stage, texture);
            }
            self.draw_range(node.primitive, node.start_index, node.polygon_count, node.range);
        }

        self.record.set_vertex_source(0, saved_stream0);
        self.record.set_index_source(saved_index, saved_base);
        self.record.sync_transform(TransformKind::World, &saved_world);
        self.record.sync_transform(TransformKind::View, &saved_view);
        self.record.mark_dirty(DirtyFlags::WORLD | DirtyFlags::VIEW);
        for (stage, texture) in saved_textures.into_iter().enumerate() {
            self.record.set_texture(stage, texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::SortingVertexBuffer;
    use crate::vertex::VertexXyzNDUV2;

    #[test]
    fn test_centroid_depth_uses_view_space() {
        let vb = Arc::new(SortingVertexBuffer::new(vec![
            VertexXyzNDUV2::at([0.0, 0.0, 2.0]),
            VertexXyzNDUV2::at([1.0, 0.0, 4.0]),
            VertexXyzNDUV2::at([0.0, 1.0, 6.0]),
        ]));
        let source = VertexSource::Sorting(vb);
        let world_view = math::translation(0.0, 0.0, 10.0);
        let depth = centroid_depth(&source, 0, VertexRange::Whole, &world_view);
        assert!((depth - 14.0).abs() < 1e-5);

        let partial = centroid_depth(
            &source,
            0,
            VertexRange::Explicit {
                min_vertex_index: 2,
                vertex_count: 1,
            },
            &math::identity(),
        );
        assert!((partial - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_nodes_sort_far_to_near() {
        let mut renderer = SortingRenderer::new();
        for depth in [1.0, 5.0, 3.0] {
            renderer.push(SortingNode {
                vertices: VertexSource::None,
                indices: IndexSource::None,
                index_base_offset: 0,
                primitive: PrimitiveType::TriangleList,
                start_index: 0,
                polygon_count: 1,
                range: VertexRange::Whole,
                world: math::identity(),
                view: math::identity(),
                textures: std::array::from_fn(|_| None),
                depth,
            });
        }
        let depths: Vec<f32> = renderer.take_sorted().iter().map(SortingNode::depth).collect();
        assert_eq!(depths, vec![5.0, 3.0, 1.0]);
        assert!(renderer.is_empty());
    }
}
