//! Structured vertex layouts
//!
//! A [`VertexLayoutDescriptor`] is the explicit counterpart of a legacy FVF
//! code: an ordered list of `(stream, offset, type, usage, usage_index)`
//! elements that the device compiles into a declaration object.

use bytemuck::{Pod, Zeroable};

/// Element data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclType {
    Float1 = 0,
    Float2 = 1,
    Float3 = 2,
    Float4 = 3,
    /// Packed 0xAARRGGBB colour
    D3dColor = 4,
}

impl DeclType {
    /// Size in bytes of one element of this type
    pub fn byte_size(&self) -> u16 {
        match self {
            Self::Float1 => 4,
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
            Self::D3dColor => 4,
        }
    }
}

/// Element semantic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclUsage {
    Position = 0,
    Normal = 3,
    TexCoord = 5,
    /// Pre-transformed screen-space position
    PositionT = 9,
    Color = 10,
}

/// One element of a vertex layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexElement {
    /// Source stream (0 = geometry, 1 = per-instance)
    pub stream: u16,
    /// Byte offset within the stream's vertex
    pub offset: u16,
    pub decl_type: DeclType,
    pub usage: DeclUsage,
    pub usage_index: u8,
}

impl VertexElement {
    /// Create a new element
    pub const fn new(
        stream: u16,
        offset: u16,
        decl_type: DeclType,
        usage: DeclUsage,
        usage_index: u8,
    ) -> Self {
        Self {
            stream,
            offset,
            decl_type,
            usage,
            usage_index,
        }
    }

    /// First byte past this element
    pub fn end(&self) -> u16 {
        self.offset + self.decl_type.byte_size()
    }
}

/// Ordered, immutable vertex layout
///
/// The end-of-declaration sentinel is not stored; it is implied by the end
/// of the element list and re-added by the device encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VertexLayoutDescriptor {
    elements: Vec<VertexElement>,
}

impl VertexLayoutDescriptor {
    /// Build a descriptor from its elements
    pub fn new(elements: Vec<VertexElement>) -> Self {
        Self { elements }
    }

    /// Elements in declaration order
    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }

    /// Whether the layout has no elements
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Bytes per vertex consumed from `stream`
    pub fn stride(&self, stream: u16) -> u32 {
        self.elements
            .iter()
            .filter(|e| e.stream == stream)
            .map(|e| e.end() as u32)
            .max()
            .unwrap_or(0)
    }

    /// Highest stream index referenced plus one
    pub fn stream_count(&self) -> u16 {
        self.elements.iter().map(|e| e.stream + 1).max().unwrap_or(0)
    }

    /// Find the element with the given semantic
    pub fn find(&self, usage: DeclUsage, usage_index: u8) -> Option<&VertexElement> {
        self.elements
            .iter()
            .find(|e| e.usage == usage && e.usage_index == usage_index)
    }
}

/// Vertex with position, normal, diffuse colour and two texture coordinate sets
///
/// This is the format of sorting buffers and the dynamic vertex ring.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VertexXyzNDUV2 {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub diffuse: u32,
    pub uv0: [f32; 2],
    pub uv1: [f32; 2],
}

/// Vertex with position, diffuse colour and one texture coordinate set
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VertexXyzDUV1 {
    pub position: [f32; 3],
    pub diffuse: u32,
    pub uv: [f32; 2],
}

impl VertexXyzNDUV2 {
    /// Vertex at `position` with a white diffuse colour
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            normal: [0.0, 0.0, 1.0],
            diffuse: 0xFFFF_FFFF,
            uv0: [0.0; 2],
            uv1: [0.0; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decl_type_byte_size() {
        assert_eq!(DeclType::Float2.byte_size(), 8);
        assert_eq!(DeclType::Float3.byte_size(), 12);
        assert_eq!(DeclType::Float4.byte_size(), 16);
        assert_eq!(DeclType::D3dColor.byte_size(), 4);
    }

    #[test]
    fn test_descriptor_stride_per_stream() {
        let layout = VertexLayoutDescriptor::new(vec![
            VertexElement::new(0, 0, DeclType::Float3, DeclUsage::Position, 0),
            VertexElement::new(0, 12, DeclType::D3dColor, DeclUsage::Color, 0),
            VertexElement::new(1, 0, DeclType::Float4, DeclUsage::TexCoord, 4),
            VertexElement::new(1, 16, DeclType::Float4, DeclUsage::TexCoord, 5),
        ]);
        assert_eq!(layout.stride(0), 16);
        assert_eq!(layout.stride(1), 32);
        assert_eq!(layout.stride(2), 0);
        assert_eq!(layout.stream_count(), 2);
        assert!(layout.find(DeclUsage::TexCoord, 5).is_some());
    }

    #[test]
    fn test_vertex_struct_sizes() {
        assert_eq!(std::mem::size_of::<VertexXyzNDUV2>(), 44);
        assert_eq!(std::mem::size_of::<VertexXyzDUV1>(), 24);
    }
}
