//! Graphics device interface
//!
//! The core drives one concrete, imperative and stateful device. Every
//! setter here is a real device call; the getters read back what the device
//! currently holds and are used for snapshots and save/restore.

pub mod null;
pub mod types;

pub use types::*;

use crate::math::Matrix4f;
use crate::vertex::VertexLayoutDescriptor;
use dxs_core::DeviceError;

/// Result of a device call
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Graphics device trait
pub trait GraphicsDevice {
    /// Device capabilities
    fn caps(&self) -> DeviceCaps;

    // Resource creation

    /// Create a vertex buffer of `size` bytes
    fn create_vertex_buffer(&mut self, size: u32, usage: BufferUsage) -> DeviceResult<VertexBufferHandle>;

    /// Release a vertex buffer
    fn release_vertex_buffer(&mut self, buffer: VertexBufferHandle);

    /// Create an index buffer holding `count` 16-bit indices
    fn create_index_buffer(&mut self, count: u32, usage: BufferUsage) -> DeviceResult<IndexBufferHandle>;

    /// Release an index buffer
    fn release_index_buffer(&mut self, buffer: IndexBufferHandle);

    /// Write bytes into a vertex buffer at `offset`
    fn write_vertex_buffer(
        &mut self,
        buffer: VertexBufferHandle,
        offset: u32,
        data: &[u8],
        mode: LockMode,
    ) -> DeviceResult<()>;

    /// Write indices into an index buffer starting at index `first`
    fn write_index_buffer(
        &mut self,
        buffer: IndexBufferHandle,
        first: u32,
        indices: &[u16],
        mode: LockMode,
    ) -> DeviceResult<()>;

    /// Create a texture
    fn create_texture(&mut self, width: u32, height: u32, levels: u32) -> DeviceResult<TextureHandle>;

    /// Release a texture
    fn release_texture(&mut self, texture: TextureHandle);

    /// Compile a vertex declaration
    fn create_vertex_declaration(&mut self, layout: &VertexLayoutDescriptor) -> DeviceResult<DeclarationHandle>;

    /// Release a vertex declaration
    fn release_vertex_declaration(&mut self, decl: DeclarationHandle);

    /// Create a vertex shader from bytecode
    fn create_vertex_shader(&mut self, bytecode: &[u32]) -> DeviceResult<ShaderHandle>;

    /// Release a vertex shader
    fn release_vertex_shader(&mut self, shader: ShaderHandle);

    // Input assembly

    fn set_fvf(&mut self, fvf: u32) -> DeviceResult<()>;
    fn fvf(&self) -> u32;

    fn set_vertex_declaration(&mut self, decl: Option<DeclarationHandle>) -> DeviceResult<()>;
    fn vertex_declaration(&self) -> Option<DeclarationHandle>;

    fn set_stream_source(
        &mut self,
        stream: u32,
        buffer: Option<VertexBufferHandle>,
        offset: u32,
        stride: u32,
    ) -> DeviceResult<()>;
    fn stream_source(&self, stream: u32) -> StreamBinding;

    fn set_stream_source_freq(&mut self, stream: u32, divider: u32) -> DeviceResult<()>;
    fn stream_source_freq(&self, stream: u32) -> u32;

    fn set_indices(&mut self, buffer: Option<IndexBufferHandle>) -> DeviceResult<()>;
    fn indices(&self) -> Option<IndexBufferHandle>;

    // Shaders

    fn set_vertex_shader(&mut self, shader: Option<ShaderHandle>) -> DeviceResult<()>;
    fn vertex_shader(&self) -> Option<ShaderHandle>;

    fn set_pixel_shader(&mut self, shader: Option<ShaderHandle>) -> DeviceResult<()>;
    fn pixel_shader(&self) -> Option<ShaderHandle>;

    /// Upload float4 constants starting at `register`
    fn set_vertex_shader_constants(&mut self, register: u32, data: &[[f32; 4]]) -> DeviceResult<()>;

    // Fixed-function state

    fn set_transform(&mut self, kind: TransformKind, matrix: &Matrix4f) -> DeviceResult<()>;
    fn transform(&self, kind: TransformKind) -> Matrix4f;

    fn set_viewport(&mut self, viewport: &Viewport) -> DeviceResult<()>;
    fn viewport(&self) -> Viewport;

    fn set_render_state(&mut self, state: RenderState, value: u32) -> DeviceResult<()>;
    fn render_state(&self, state: RenderState) -> u32;

    fn set_texture_stage_state(&mut self, stage: u32, state: TextureStageState, value: u32) -> DeviceResult<()>;
    fn texture_stage_state(&self, stage: u32, state: TextureStageState) -> u32;

    fn set_texture(&mut self, stage: u32, texture: Option<TextureHandle>) -> DeviceResult<()>;
    fn texture(&self, stage: u32) -> Option<TextureHandle>;

    fn set_material(&mut self, material: &Material) -> DeviceResult<()>;
    fn material(&self) -> Material;

    fn set_light(&mut self, index: u32, light: &Light) -> DeviceResult<()>;
    fn light(&self, index: u32) -> Light;

    fn light_enable(&mut self, index: u32, enable: bool) -> DeviceResult<()>;
    fn is_light_enabled(&self, index: u32) -> bool;

    // Drawing

    /// Indexed draw from the bound streams and index buffer
    fn draw_indexed_primitive(
        &mut self,
        primitive: PrimitiveType,
        base_vertex: i32,
        min_vertex_index: u32,
        num_vertices: u32,
        start_index: u32,
        primitive_count: u32,
    ) -> DeviceResult<()>;

    // Frame and lifecycle

    fn begin_scene(&mut self) -> DeviceResult<()>;
    fn end_scene(&mut self) -> DeviceResult<()>;
    fn present(&mut self) -> DeviceResult<()>;

    /// Query whether the device is usable
    fn test_cooperative_level(&self) -> DeviceStatus;

    /// Reset a lost device; all device state returns to defaults
    fn reset(&mut self) -> DeviceResult<()>;
}
