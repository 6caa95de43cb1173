//! Dynamic vertex and index rings
//!
//! Transient geometry (sorted triangles, 2D overlay batches) is written into
//! a pair of write-only device buffers used as rings: allocations advance a
//! cursor with no-overwrite writes and wrap with a discard when full.

use std::sync::Arc;

use crate::backend::{
    BufferUsage, DeviceResult, GraphicsDevice, IndexBufferHandle, LockMode, VertexBufferHandle,
};
use crate::fvf::{fvf_size, FVF_XYZNDUV2};
use crate::resource::{SortingIndexBuffer, SortingVertexBuffer};
use dxs_core::{DeviceConfig, DeviceError};

/// A slice of the dynamic vertex ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicVertexAccess {
    buffer: VertexBufferHandle,
    fvf: u32,
    vertex_offset: u32,
    vertex_count: u32,
    lock_mode: LockMode,
}

impl DynamicVertexAccess {
    pub fn buffer(&self) -> VertexBufferHandle {
        self.buffer
    }

    /// Format the slice was allocated with; authoritative for its stride
    pub fn fvf(&self) -> u32 {
        self.fvf
    }

    pub fn stride(&self) -> u32 {
        fvf_size(self.fvf)
    }

    /// First vertex of the slice, in units of this slice's stride
    pub fn vertex_offset(&self) -> u32 {
        self.vertex_offset
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

/// A slice of the dynamic index ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicIndexAccess {
    buffer: IndexBufferHandle,
    index_offset: u32,
    index_count: u32,
    lock_mode: LockMode,
}

impl DynamicIndexAccess {
    pub fn buffer(&self) -> IndexBufferHandle {
        self.buffer
    }

    pub fn index_offset(&self) -> u32 {
        self.index_offset
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Transient CPU-side sorting vertices
#[derive(Debug, Clone)]
pub struct DynamicSortingAccess {
    buffer: Arc<SortingVertexBuffer>,
    vertex_offset: u32,
    vertex_count: u32,
}

impl DynamicSortingAccess {
    pub fn new(buffer: Arc<SortingVertexBuffer>, vertex_offset: u32, vertex_count: u32) -> Self {
        Self {
            buffer,
            vertex_offset,
            vertex_count,
        }
    }

    pub fn buffer(&self) -> &Arc<SortingVertexBuffer> {
        &self.buffer
    }

    pub fn vertex_offset(&self) -> u32 {
        self.vertex_offset
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

/// Transient CPU-side sorting indices
#[derive(Debug, Clone)]
pub struct DynamicSortingIndexAccess {
    buffer: Arc<SortingIndexBuffer>,
    index_offset: u32,
    index_count: u32,
}

impl DynamicSortingIndexAccess {
    pub fn new(buffer: Arc<SortingIndexBuffer>, index_offset: u32, index_count: u32) -> Self {
        Self {
            buffer,
            index_offset,
            index_count,
        }
    }

    pub fn buffer(&self) -> &Arc<SortingIndexBuffer> {
        &self.buffer
    }

    pub fn index_offset(&self) -> u32 {
        self.index_offset
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Write-only vertex ring
#[derive(Debug)]
pub struct DynamicVertexRing {
    buffer: VertexBufferHandle,
    capacity: u32,
    cursor: u32,
}

impl DynamicVertexRing {
    /// Create a ring of `capacity` bytes
    pub fn create<D: GraphicsDevice>(device: &mut D, capacity: u32) -> DeviceResult<Self> {
        let buffer = device.create_vertex_buffer(capacity, BufferUsage::DynamicWriteOnly)?;
        Ok(Self {
            buffer,
            capacity,
            cursor: 0,
        })
    }

    pub fn buffer(&self) -> VertexBufferHandle {
        self.buffer
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Reserve room for `vertex_count` vertices of format `fvf`
    pub fn allocate(&mut self, fvf: u32, vertex_count: u32) -> DeviceResult<DynamicVertexAccess> {
        let stride = fvf_size(fvf);
        if stride == 0 {
            return Err(DeviceError::InvalidCall(format!(
                "dynamic vertex format 0x{:x} has zero stride",
                fvf
            )));
        }
        let bytes = stride * vertex_count;
        if bytes > self.capacity {
            return Err(DeviceError::InvalidCall(format!(
                "{} dynamic vertices of stride {} exceed ring capacity {}",
                vertex_count, stride, self.capacity
            )));
        }

        // Offsets are expressed in whole vertices of this stride
        let aligned = self.cursor.div_ceil(stride) * stride;
        let (start, lock_mode) = if aligned == 0 || aligned + bytes > self.capacity {
            (0, LockMode::Discard)
        } else {
            (aligned, LockMode::NoOverwrite)
        };
        self.cursor = start + bytes;

        Ok(DynamicVertexAccess {
            buffer: self.buffer,
            fvf,
            vertex_offset: start / stride,
            vertex_count,
            lock_mode,
        })
    }

    /// Copy vertex bytes into an allocated slice
    pub fn write<D: GraphicsDevice>(
        &self,
        device: &mut D,
        access: &DynamicVertexAccess,
        data: &[u8],
    ) -> DeviceResult<()> {
        let limit = (access.stride() * access.vertex_count) as usize;
        if data.len() > limit {
            return Err(DeviceError::InvalidCall(format!(
                "{} bytes written into a {} byte dynamic slice",
                data.len(),
                limit
            )));
        }
        device.write_vertex_buffer(
            access.buffer,
            access.vertex_offset * access.stride(),
            data,
            access.lock_mode,
        )
    }
}

/// Write-only index ring
#[derive(Debug)]
pub struct DynamicIndexRing {
    buffer: IndexBufferHandle,
    capacity: u32,
    cursor: u32,
}

impl DynamicIndexRing {
    /// Create a ring of `capacity` indices
    pub fn create<D: GraphicsDevice>(device: &mut D, capacity: u32) -> DeviceResult<Self> {
        let buffer = device.create_index_buffer(capacity, BufferUsage::DynamicWriteOnly)?;
        Ok(Self {
            buffer,
            capacity,
            cursor: 0,
        })
    }

    pub fn buffer(&self) -> IndexBufferHandle {
        self.buffer
    }

    pub fn allocate(&mut self, index_count: u32) -> DeviceResult<DynamicIndexAccess> {
        if index_count > self.capacity {
            return Err(DeviceError::InvalidCall(format!(
                "{} dynamic indices exceed ring capacity {}",
                index_count, self.capacity
            )));
        }
        let (start, lock_mode) = if self.cursor == 0 || self.cursor + index_count > self.capacity {
            (0, LockMode::Discard)
        } else {
            (self.cursor, LockMode::NoOverwrite)
        };
        self.cursor = start + index_count;
        Ok(DynamicIndexAccess {
            buffer: self.buffer,
            index_offset: start,
            index_count,
            lock_mode,
        })
    }

    pub fn write<D: GraphicsDevice>(
        &self,
        device: &mut D,
        access: &DynamicIndexAccess,
        indices: &[u16],
    ) -> DeviceResult<()> {
        if indices.len() as u32 > access.index_count {
            return Err(DeviceError::InvalidCall(format!(
                "{} indices written into a {} index dynamic slice",
                indices.len(),
                access.index_count
            )));
        }
        device.write_index_buffer(access.buffer, access.index_offset, indices, access.lock_mode)
    }
}

/// The vertex and index rings, created together and released together
#[derive(Debug)]
pub struct DynamicBuffers {
    pub vertices: DynamicVertexRing,
    pub indices: DynamicIndexRing,
}

impl DynamicBuffers {
    /// Create both rings sized from the device configuration
    pub fn create<D: GraphicsDevice>(device: &mut D, config: &DeviceConfig) -> DeviceResult<Self> {
        let vertex_bytes = config.dynamic_vertex_capacity * fvf_size(FVF_XYZNDUV2);
        let vertices = DynamicVertexRing::create(device, vertex_bytes)?;
        let indices = match DynamicIndexRing::create(device, config.dynamic_index_capacity) {
            Ok(indices) => indices,
            Err(e) => {
                device.release_vertex_buffer(vertices.buffer);
                return Err(e);
            }
        };
        tracing::debug!(
            "DynamicBuffers: created rings ({} vertex bytes, {} indices)",
            vertex_bytes,
            config.dynamic_index_capacity
        );
        Ok(Self { vertices, indices })
    }

    pub fn release<D: GraphicsDevice>(self, device: &mut D) {
        device.release_vertex_buffer(self.vertices.buffer);
        device.release_index_buffer(self.indices.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullDevice;
    use crate::fvf::FVF_XYZDUV1;

    #[test]
    fn test_vertex_ring_advances_then_wraps() {
        let mut device = NullDevice::new();
        let mut ring = DynamicVertexRing::create(&mut device, 44 * 4).unwrap();

        let a = ring.allocate(FVF_XYZNDUV2, 2).unwrap();
        assert_eq!(a.vertex_offset(), 0);
        assert_eq!(a.lock_mode, LockMode::Discard);

        let b = ring.allocate(FVF_XYZNDUV2, 2).unwrap();
        assert_eq!(b.vertex_offset(), 2);
        assert_eq!(b.lock_mode, LockMode::NoOverwrite);

        let c = ring.allocate(FVF_XYZNDUV2, 1).unwrap();
        assert_eq!(c.vertex_offset(), 0);
        assert_eq!(c.lock_mode, LockMode::Discard);
    }

    #[test]
    fn test_vertex_ring_aligns_to_stride() {
        let mut device = NullDevice::new();
        let mut ring = DynamicVertexRing::create(&mut device, 1024).unwrap();
        ring.allocate(FVF_XYZNDUV2, 1).unwrap();
        // 44 bytes used; next 24-byte vertex starts at byte 48
        let access = ring.allocate(FVF_XYZDUV1, 2).unwrap();
        assert_eq!(access.vertex_offset(), 2);
        assert_eq!(access.stride(), 24);
    }

    #[test]
    fn test_vertex_ring_rejects_oversized() {
        let mut device = NullDevice::new();
        let mut ring = DynamicVertexRing::create(&mut device, 100).unwrap();
        assert!(ring.allocate(FVF_XYZNDUV2, 3).is_err());
        assert!(ring.allocate(0, 1).is_err());
    }

    #[test]
    fn test_index_ring_write() {
        let mut device = NullDevice::new();
        let mut ring = DynamicIndexRing::create(&mut device, 8).unwrap();
        ring.allocate(3).unwrap();
        let access = ring.allocate(3).unwrap();
        assert_eq!(access.index_offset(), 3);
        ring.write(&mut device, &access, &[7, 8, 9]).unwrap();
        assert_eq!(&device.index_buffer_data(ring.buffer()).unwrap()[3..6], &[7, 8, 9]);
        assert!(ring.write(&mut device, &access, &[1, 2, 3, 4]).is_err());
    }
}
