//! Buffers and textures referenced by the render-state record
//!
//! Device-backed resources are shared through `Arc`. The registry keeps one
//! reference to everything it created; a resource whose only remaining
//! reference is the registry's is unused and may be evicted under memory
//! pressure. Sorting buffers live in CPU memory and are never device-bound.

use std::sync::Arc;

use crate::backend::{
    BufferUsage, DeviceResult, GraphicsDevice, IndexBufferHandle, LockMode, TextureHandle,
    VertexBufferHandle,
};
use crate::fvf::FvfInfo;
use crate::vertex::VertexXyzNDUV2;
use dxs_core::DeviceError;

/// Engine-owned device vertex buffer with a fixed format
#[derive(Debug)]
pub struct EngineVertexBuffer {
    handle: VertexBufferHandle,
    fvf_info: FvfInfo,
    vertex_count: u32,
}

impl EngineVertexBuffer {
    pub fn handle(&self) -> VertexBufferHandle {
        self.handle
    }

    pub fn fvf(&self) -> u32 {
        self.fvf_info.fvf()
    }

    pub fn fvf_info(&self) -> &FvfInfo {
        &self.fvf_info
    }

    /// Bytes per vertex, derived from the buffer's format
    pub fn stride(&self) -> u32 {
        self.fvf_info.size()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Write raw vertex bytes starting at vertex `first_vertex`
    pub fn write<D: GraphicsDevice>(&self, device: &mut D, first_vertex: u32, data: &[u8]) -> DeviceResult<()> {
        device.write_vertex_buffer(self.handle, first_vertex * self.stride(), data, LockMode::NoOverwrite)
    }
}

/// Engine-owned device index buffer of 16-bit indices
#[derive(Debug)]
pub struct EngineIndexBuffer {
    handle: IndexBufferHandle,
    index_count: u32,
}

impl EngineIndexBuffer {
    pub fn handle(&self) -> IndexBufferHandle {
        self.handle
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn write<D: GraphicsDevice>(&self, device: &mut D, first: u32, indices: &[u16]) -> DeviceResult<()> {
        device.write_index_buffer(self.handle, first, indices, LockMode::NoOverwrite)
    }
}

/// Device texture
#[derive(Debug)]
pub struct Texture {
    handle: TextureHandle,
    width: u32,
    height: u32,
}

impl Texture {
    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// CPU-side vertex accumulator for depth-sorted geometry
#[derive(Debug, Clone, Default)]
pub struct SortingVertexBuffer {
    vertices: Vec<VertexXyzNDUV2>,
}

impl SortingVertexBuffer {
    pub fn new(vertices: Vec<VertexXyzNDUV2>) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[VertexXyzNDUV2] {
        &self.vertices
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }
}

/// CPU-side index accumulator for depth-sorted geometry
#[derive(Debug, Clone, Default)]
pub struct SortingIndexBuffer {
    indices: Vec<u16>,
}

impl SortingIndexBuffer {
    pub fn new(indices: Vec<u16>) -> Self {
        Self { indices }
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Owner of every device buffer and texture created through the context
#[derive(Default)]
pub struct ResourceRegistry {
    vertex_buffers: Vec<Arc<EngineVertexBuffer>>,
    index_buffers: Vec<Arc<EngineIndexBuffer>>,
    textures: Vec<Arc<Texture>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `create`, evicting unused resources and retrying once when the
    /// device runs out of video memory
    fn with_eviction<D: GraphicsDevice, T>(
        &mut self,
        device: &mut D,
        what: &str,
        mut create: impl FnMut(&mut D) -> DeviceResult<T>,
    ) -> DeviceResult<T> {
        match create(device) {
            Err(DeviceError::OutOfVideoMemory) => {
                let evicted = self.purge_unused(device);
                tracing::warn!(
                    "ResourceRegistry: out of video memory creating {}, evicted {} unused resources, retrying",
                    what,
                    evicted
                );
                create(device).inspect_err(|e| {
                    tracing::error!("ResourceRegistry: creating {} failed after eviction: {}", what, e);
                })
            }
            other => other,
        }
    }

    /// Create a vertex buffer holding `vertex_count` vertices of format `fvf`
    pub fn create_vertex_buffer<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        fvf: u32,
        vertex_count: u32,
        usage: BufferUsage,
    ) -> DeviceResult<Arc<EngineVertexBuffer>> {
        let fvf_info = FvfInfo::new(fvf);
        if fvf_info.size() == 0 {
            return Err(DeviceError::InvalidCall(format!(
                "vertex buffer format 0x{:x} has zero stride",
                fvf
            )));
        }
        let size = fvf_info.size() * vertex_count;
        let handle = self.with_eviction(device, "vertex buffer", |d| d.create_vertex_buffer(size, usage))?;
        let buffer = Arc::new(EngineVertexBuffer {
            handle,
            fvf_info,
            vertex_count,
        });
        self.vertex_buffers.push(Arc::clone(&buffer));
        tracing::trace!(
            "ResourceRegistry: created vertex buffer {:?} fvf=0x{:x} vertices={}",
            handle,
            fvf,
            vertex_count
        );
        Ok(buffer)
    }

    /// Create an index buffer holding `index_count` 16-bit indices
    pub fn create_index_buffer<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        index_count: u32,
        usage: BufferUsage,
    ) -> DeviceResult<Arc<EngineIndexBuffer>> {
        let handle = self.with_eviction(device, "index buffer", |d| d.create_index_buffer(index_count, usage))?;
        let buffer = Arc::new(EngineIndexBuffer { handle, index_count });
        self.index_buffers.push(Arc::clone(&buffer));
        Ok(buffer)
    }

    pub fn create_texture<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
        levels: u32,
    ) -> DeviceResult<Arc<Texture>> {
        let handle = self.with_eviction(device, "texture", |d| d.create_texture(width, height, levels))?;
        let texture = Arc::new(Texture { handle, width, height });
        self.textures.push(Arc::clone(&texture));
        Ok(texture)
    }

    /// Release every resource nobody but the registry references.
    ///
    /// Returns the number of resources released.
    pub fn purge_unused<D: GraphicsDevice>(&mut self, device: &mut D) -> usize {
        let mut released = 0;
        self.vertex_buffers.retain(|b| {
            let unused = Arc::strong_count(b) == 1;
            if unused {
                device.release_vertex_buffer(b.handle);
                released += 1;
            }
            !unused
        });
        self.index_buffers.retain(|b| {
            let unused = Arc::strong_count(b) == 1;
            if unused {
                device.release_index_buffer(b.handle);
                released += 1;
            }
            !unused
        });
        self.textures.retain(|t| {
            let unused = Arc::strong_count(t) == 1;
            if unused {
                device.release_texture(t.handle);
                released += 1;
            }
            !unused
        });
        released
    }

    /// Release everything on the device, referenced or not
    pub fn release_all<D: GraphicsDevice>(&mut self, device: &mut D) {
        for b in self.vertex_buffers.drain(..) {
            device.release_vertex_buffer(b.handle);
        }
        for b in self.index_buffers.drain(..) {
            device.release_index_buffer(b.handle);
        }
        for t in self.textures.drain(..) {
            device.release_texture(t.handle);
        }
    }

    /// Number of live resources of all kinds
    pub fn len(&self) -> usize {
        self.vertex_buffers.len() + self.index_buffers.len() + self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullDevice;
    use crate::fvf::FVF_XYZDUV1;

    #[test]
    fn test_vertex_buffer_stride_from_format() {
        let mut device = NullDevice::new();
        let mut registry = ResourceRegistry::new();
        let vb = registry
            .create_vertex_buffer(&mut device, FVF_XYZDUV1, 10, BufferUsage::Static)
            .unwrap();
        assert_eq!(vb.stride(), 24);
        assert_eq!(vb.vertex_count(), 10);
        assert_eq!(device.vertex_buffer_data(vb.handle()).unwrap().len(), 240);
    }

    #[test]
    fn test_zero_stride_format_rejected() {
        let mut device = NullDevice::new();
        let mut registry = ResourceRegistry::new();
        assert!(registry
            .create_vertex_buffer(&mut device, 0, 10, BufferUsage::Static)
            .is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_purge_keeps_referenced_resources() {
        let mut device = NullDevice::new();
        let mut registry = ResourceRegistry::new();
        let kept = registry.create_index_buffer(&mut device, 6, BufferUsage::Static).unwrap();
        let dropped = registry.create_index_buffer(&mut device, 6, BufferUsage::Static).unwrap();
        drop(dropped);

        assert_eq!(registry.purge_unused(&mut device), 1);
        assert_eq!(registry.len(), 1);
        assert!(device.index_buffer_data(kept.handle()).is_some());
    }

    #[test]
    fn test_out_of_memory_evicts_and_retries_once() {
        let mut device = NullDevice::new();
        device.set_video_memory_budget(Some(48));
        let mut registry = ResourceRegistry::new();

        let stale = registry
            .create_vertex_buffer(&mut device, FVF_XYZDUV1, 2, BufferUsage::Static)
            .unwrap();
        drop(stale);

        // Fits only after the stale buffer is evicted
        let fresh = registry
            .create_vertex_buffer(&mut device, FVF_XYZDUV1, 2, BufferUsage::Static)
            .unwrap();
        assert_eq!(registry.len(), 1);

        // Still referenced, nothing to evict
        let err = registry
            .create_vertex_buffer(&mut device, FVF_XYZDUV1, 2, BufferUsage::Static)
            .unwrap_err();
        assert_eq!(err, DeviceError::OutOfVideoMemory);
        assert_eq!(fresh.vertex_count(), 2);
    }

    #[test]
    fn test_release_all() {
        let mut device = NullDevice::new();
        let mut registry = ResourceRegistry::new();
        let _tex = registry.create_texture(&mut device, 4, 4, 1).unwrap();
        let _vb = registry
            .create_vertex_buffer(&mut device, FVF_XYZDUV1, 3, BufferUsage::Static)
            .unwrap();
        registry.release_all(&mut device);
        assert!(registry.is_empty());
        assert_eq!(device.live_textures(), 0);
        assert_eq!(device.live_vertex_buffers(), 0);
    }
}
