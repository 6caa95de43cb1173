//! Legacy flexible-vertex-format codes and the declaration builder
//!
//! An FVF code is a bitmask whose set bits select vertex components in a
//! fixed order: position, normal, diffuse, specular, then N texture
//! coordinate pairs. Every producer that writes vertex bytes for an FVF
//! relies on exactly the offsets computed here.

use crate::vertex::{DeclType, DeclUsage, VertexElement, VertexLayoutDescriptor};

/// FVF bit constants
pub mod bits {
    pub const XYZ: u32 = 0x002;
    pub const XYZRHW: u32 = 0x004;
    pub const NORMAL: u32 = 0x010;
    pub const PSIZE: u32 = 0x020;
    pub const DIFFUSE: u32 = 0x040;
    pub const SPECULAR: u32 = 0x080;
    pub const TEXCOUNT_MASK: u32 = 0xF00;
    pub const TEXCOUNT_SHIFT: u32 = 8;
    pub const TEX1: u32 = 0x100;
    pub const TEX2: u32 = 0x200;
}

/// Position + diffuse + one UV set (water tracks, 24 bytes)
pub const FVF_XYZDUV1: u32 = bits::XYZ | bits::DIFFUSE | bits::TEX1;
/// Position + normal + diffuse + two UV sets (sorting and dynamic buffers, 44 bytes)
pub const FVF_XYZNDUV2: u32 = bits::XYZ | bits::NORMAL | bits::DIFFUSE | bits::TEX2;
/// Position + diffuse + two UV sets (water mesh, 32 bytes)
pub const FVF_XYZDUV2: u32 = bits::XYZ | bits::DIFFUSE | bits::TEX2;

/// Bits the builder understands
const SUPPORTED_BITS: u32 = bits::XYZ
    | bits::XYZRHW
    | bits::NORMAL
    | bits::DIFFUSE
    | bits::SPECULAR
    | bits::TEXCOUNT_MASK;

/// Number of texture coordinate pairs encoded in `fvf`
pub fn tex_count(fvf: u32) -> u32 {
    (fvf & bits::TEXCOUNT_MASK) >> bits::TEXCOUNT_SHIFT
}

/// Whether every set bit of `fvf` is understood and a position is present
pub fn is_supported(fvf: u32) -> bool {
    fvf & !SUPPORTED_BITS == 0 && fvf & (bits::XYZ | bits::XYZRHW) != 0
}

/// Per-component byte offsets for an FVF code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FvfInfo {
    fvf: u32,
    normal_offset: Option<u32>,
    diffuse_offset: Option<u32>,
    specular_offset: Option<u32>,
    texcoord_offset: u32,
    size: u32,
}

impl FvfInfo {
    /// Compute the layout of `fvf`
    pub fn new(fvf: u32) -> Self {
        let mut offset = 0u32;
        if fvf & bits::XYZ != 0 {
            offset += 12;
        } else if fvf & bits::XYZRHW != 0 {
            offset += 16;
        }

        let normal_offset = (fvf & bits::NORMAL != 0).then(|| {
            let at = offset;
            offset += 12;
            at
        });
        let diffuse_offset = (fvf & bits::DIFFUSE != 0).then(|| {
            let at = offset;
            offset += 4;
            at
        });
        let specular_offset = (fvf & bits::SPECULAR != 0).then(|| {
            let at = offset;
            offset += 4;
            at
        });
        let texcoord_offset = offset;
        offset += tex_count(fvf) * 8;

        Self {
            fvf,
            normal_offset,
            diffuse_offset,
            specular_offset,
            texcoord_offset,
            size: offset,
        }
    }

    pub fn fvf(&self) -> u32 {
        self.fvf
    }

    /// Vertex size in bytes; this is the stream stride
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn normal_offset(&self) -> Option<u32> {
        self.normal_offset
    }

    pub fn diffuse_offset(&self) -> Option<u32> {
        self.diffuse_offset
    }

    pub fn specular_offset(&self) -> Option<u32> {
        self.specular_offset
    }

    /// Offset of texture coordinate set `index`
    pub fn texcoord_offset(&self, index: u32) -> u32 {
        self.texcoord_offset + index * 8
    }
}

/// Stride in bytes of a vertex in format `fvf`
pub fn fvf_size(fvf: u32) -> u32 {
    FvfInfo::new(fvf).size()
}

fn push_geometry_elements(fvf: u32, elements: &mut Vec<VertexElement>) -> u16 {
    let mut offset = 0u16;
    let mut push = |decl_type: DeclType, usage: DeclUsage, usage_index: u8, offset: &mut u16| {
        elements.push(VertexElement::new(0, *offset, decl_type, usage, usage_index));
        *offset += decl_type.byte_size();
    };

    if fvf & bits::XYZ != 0 {
        push(DeclType::Float3, DeclUsage::Position, 0, &mut offset);
    } else if fvf & bits::XYZRHW != 0 {
        push(DeclType::Float4, DeclUsage::PositionT, 0, &mut offset);
    }
    if fvf & bits::NORMAL != 0 {
        push(DeclType::Float3, DeclUsage::Normal, 0, &mut offset);
    }
    if fvf & bits::DIFFUSE != 0 {
        push(DeclType::D3dColor, DeclUsage::Color, 0, &mut offset);
    }
    if fvf & bits::SPECULAR != 0 {
        push(DeclType::D3dColor, DeclUsage::Color, 1, &mut offset);
    }
    for t in 0..tex_count(fvf) {
        push(DeclType::Float2, DeclUsage::TexCoord, t as u8, &mut offset);
    }
    offset
}

/// Build the structured layout equivalent of `fvf`.
///
/// Unknown bits are ignored; a code with neither position bit simply
/// produces no position element.
pub fn build_declaration(fvf: u32) -> VertexLayoutDescriptor {
    let mut elements = Vec::with_capacity(8);
    push_geometry_elements(fvf, &mut elements);
    VertexLayoutDescriptor::new(elements)
}

/// Semantic index of the first per-instance transform row
pub const INSTANCE_ROW_USAGE_BASE: u8 = 4;

/// Geometry layout of `fvf` on stream 0 plus three per-instance float4 rows on stream 1
pub fn build_instanced_declaration(fvf: u32) -> VertexLayoutDescriptor {
    let mut elements = Vec::with_capacity(12);
    push_geometry_elements(fvf, &mut elements);
    for row in 0..3u8 {
        elements.push(VertexElement::new(
            1,
            row as u16 * 16,
            DeclType::Float4,
            DeclUsage::TexCoord,
            INSTANCE_ROW_USAGE_BASE + row,
        ));
    }
    VertexLayoutDescriptor::new(elements)
}

/// Hand-authored layouts for formats with external byte producers
pub fn known_declaration(fvf: u32) -> Option<(VertexLayoutDescriptor, u32)> {
    use DeclType::*;
    use DeclUsage::*;

    let (elements, stride) = match fvf {
        FVF_XYZDUV1 => (
            vec![
                VertexElement::new(0, 0, Float3, Position, 0),
                VertexElement::new(0, 12, D3dColor, Color, 0),
                VertexElement::new(0, 16, Float2, TexCoord, 0),
            ],
            24,
        ),
        FVF_XYZNDUV2 => (
            vec![
                VertexElement::new(0, 0, Float3, Position, 0),
                VertexElement::new(0, 12, Float3, Normal, 0),
                VertexElement::new(0, 24, D3dColor, Color, 0),
                VertexElement::new(0, 28, Float2, TexCoord, 0),
                VertexElement::new(0, 36, Float2, TexCoord, 1),
            ],
            44,
        ),
        FVF_XYZDUV2 => (
            vec![
                VertexElement::new(0, 0, Float3, Position, 0),
                VertexElement::new(0, 12, D3dColor, Color, 0),
                VertexElement::new(0, 16, Float2, TexCoord, 0),
                VertexElement::new(0, 24, Float2, TexCoord, 1),
            ],
            32,
        ),
        _ => return None,
    };
    Some((VertexLayoutDescriptor::new(elements), stride))
}
