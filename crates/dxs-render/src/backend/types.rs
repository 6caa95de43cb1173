//! Device-level handles, enums and state structs

use crate::math::Vector3f;

macro_rules! device_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Raw handle value
            pub const fn raw(&self) -> u32 {
                self.0
            }
        }
    };
}

device_handle!(
    /// Device vertex buffer
    VertexBufferHandle
);
device_handle!(
    /// Device index buffer (16-bit indices)
    IndexBufferHandle
);
device_handle!(
    /// Device texture
    TextureHandle
);
device_handle!(
    /// Compiled vertex declaration
    DeclarationHandle
);
device_handle!(
    /// Vertex or pixel shader
    ShaderHandle
);

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    PointList = 1,
    LineList = 2,
    LineStrip = 3,
    TriangleList = 4,
    TriangleStrip = 5,
    TriangleFan = 6,
}

impl PrimitiveType {
    /// Indices consumed by `polygon_count` primitives
    pub fn index_count(&self, polygon_count: u32) -> u32 {
        match self {
            Self::PointList => polygon_count,
            Self::LineList => polygon_count * 2,
            Self::LineStrip => polygon_count + 1,
            Self::TriangleList => polygon_count * 3,
            Self::TriangleStrip | Self::TriangleFan => polygon_count + 2,
        }
    }
}

/// Transform slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    View = 2,
    Projection = 3,
    World = 256,
}

/// Render state selector; discriminants are the device's state ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderState {
    ZEnable = 7,
    FillMode = 8,
    ShadeMode = 9,
    ZWriteEnable = 14,
    AlphaTestEnable = 15,
    SrcBlend = 19,
    DestBlend = 20,
    CullMode = 22,
    ZFunc = 23,
    AlphaRef = 24,
    AlphaFunc = 25,
    DitherEnable = 26,
    AlphaBlendEnable = 27,
    FogEnable = 28,
    SpecularEnable = 29,
    Lighting = 137,
    Ambient = 139,
    ColorVertex = 141,
    NormalizeNormals = 143,
    DiffuseMaterialSource = 145,
    SpecularMaterialSource = 146,
    AmbientMaterialSource = 147,
    EmissiveMaterialSource = 148,
    BlendOp = 171,
}

/// Number of render-state slots the record caches
pub const RENDER_STATE_SLOTS: usize = 256;

impl RenderState {
    /// Cache slot of this state
    pub fn slot(&self) -> usize {
        *self as usize
    }
}

/// Texture stage state selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureStageState {
    ColorOp = 1,
    ColorArg1 = 2,
    ColorArg2 = 3,
    AlphaOp = 4,
    AlphaArg1 = 5,
    AlphaArg2 = 6,
    TexCoordIndex = 11,
    TextureTransformFlags = 24,
}

/// Number of texture-stage-state slots per stage
pub const TEXTURE_STAGE_STATE_SLOTS: usize = 33;

impl TextureStageState {
    pub fn slot(&self) -> usize {
        *self as usize
    }
}

/// Texture stage operator values
pub mod texture_op {
    pub const DISABLE: u32 = 1;
    pub const SELECT_ARG1: u32 = 2;
    pub const MODULATE: u32 = 4;
}

/// Cull mode values
pub mod cull {
    pub const NONE: u32 = 1;
    pub const CW: u32 = 2;
    pub const CCW: u32 = 3;
}

/// Material colour source values
pub mod material_source {
    pub const MATERIAL: u32 = 0;
    pub const COLOR1: u32 = 1;
    pub const COLOR2: u32 = 2;
}

/// Stream frequency divider flags
pub mod stream_freq {
    pub const INDEXED_DATA: u32 = 1 << 30;
    pub const INSTANCE_DATA: u32 = 2 << 30;
}

/// Cooperative level as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Ok,
    /// Lost and not yet resettable
    Lost,
    /// Lost and ready to be reset
    NotReset,
}

/// Buffer write behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Previous contents are thrown away
    Discard,
    /// Caller promises not to touch data the GPU may still read
    NoOverwrite,
}

/// Buffer creation usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Static,
    /// Dynamic, write-only
    DynamicWriteOnly,
}

/// Stream source binding as seen on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamBinding {
    pub buffer: Option<VertexBufferHandle>,
    pub offset: u32,
    pub stride: u32,
}

impl StreamBinding {
    pub const NULL: Self = Self {
        buffer: None,
        offset: 0,
        stride: 0,
    };

    pub fn new(buffer: VertexBufferHandle, offset: u32, stride: u32) -> Self {
        Self {
            buffer: Some(buffer),
            offset,
            stride,
        }
    }
}

/// Viewport rectangle and depth range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub min_z: f32,
    pub max_z: f32,
}

impl Viewport {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            min_z: 0.0,
            max_z: 1.0,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0, 0, 800, 600)
    }
}

/// Fixed-function light kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightType {
    Point = 1,
    Spot = 2,
    Directional = 3,
}

/// Fixed-function light parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub light_type: LightType,
    pub diffuse: [f32; 4],
    pub specular: [f32; 4],
    pub ambient: [f32; 4],
    pub position: Vector3f,
    /// Direction the light travels, toward the lit surface
    pub direction: Vector3f,
    pub range: f32,
    pub attenuation: [f32; 3],
}

impl Light {
    /// White directional light travelling along `direction`
    pub fn directional(direction: Vector3f, diffuse: [f32; 3]) -> Self {
        Self {
            light_type: LightType::Directional,
            diffuse: [diffuse[0], diffuse[1], diffuse[2], 1.0],
            specular: [0.0; 4],
            ambient: [0.0; 4],
            position: Vector3f::zeros(),
            direction,
            range: 0.0,
            attenuation: [0.0; 3],
        }
    }
}

impl Default for Light {
    fn default() -> Self {
        Self::directional(Vector3f::new(0.0, 0.0, 1.0), [1.0, 1.0, 1.0])
    }
}

/// Fixed-function material
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub diffuse: [f32; 4],
    pub ambient: [f32; 4],
    pub specular: [f32; 4],
    pub emissive: [f32; 4],
    pub power: f32,
}

impl Material {
    /// Material applied when no material is selected
    pub fn null() -> Self {
        Self {
            diffuse: [1.0, 1.0, 1.0, 1.0],
            ambient: [1.0, 1.0, 1.0, 1.0],
            specular: [0.0; 4],
            emissive: [0.0; 4],
            power: 0.0,
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::null()
    }
}

/// Device capabilities the core consults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    /// (major, minor)
    pub vertex_shader_version: (u8, u8),
    /// Stream offsets and frequency dividers are supported
    pub stream_offset: bool,
    pub max_texture_stages: u32,
    pub max_streams: u32,
    pub max_lights: u32,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            vertex_shader_version: (3, 0),
            stream_offset: true,
            max_texture_stages: 8,
            max_streams: 4,
            max_lights: 8,
        }
    }
}

/// Transform slots saved by guards and snapshots
pub const CORE_TRANSFORMS: [TransformKind; 3] = [
    TransformKind::World,
    TransformKind::View,
    TransformKind::Projection,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_counts() {
        assert_eq!(PrimitiveType::TriangleList.index_count(4), 12);
        assert_eq!(PrimitiveType::TriangleStrip.index_count(4), 6);
        assert_eq!(PrimitiveType::TriangleFan.index_count(1), 3);
    }

    #[test]
    fn test_render_state_slots_fit() {
        assert!(RenderState::BlendOp.slot() < RENDER_STATE_SLOTS);
        assert!(TextureStageState::TextureTransformFlags.slot() < TEXTURE_STAGE_STATE_SLOTS);
    }
}
