//! Null device for testing and headless runs
//!
//! Keeps the full device state in memory so getters return what was set,
//! and records every call so tests can count exactly what the core emitted.

use super::*;
use std::collections::HashMap;

/// Error code reported for rejected calls
pub const INVALID_CALL: u32 = 0x8876_086C;

/// One recorded device call
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateVertexBuffer { buffer: VertexBufferHandle, size: u32 },
    ReleaseVertexBuffer(VertexBufferHandle),
    CreateIndexBuffer { buffer: IndexBufferHandle, count: u32 },
    ReleaseIndexBuffer(IndexBufferHandle),
    WriteVertexBuffer { buffer: VertexBufferHandle, offset: u32, len: u32, mode: LockMode },
    WriteIndexBuffer { buffer: IndexBufferHandle, first: u32, count: u32, mode: LockMode },
    CreateTexture(TextureHandle),
    ReleaseTexture(TextureHandle),
    CreateVertexDeclaration(DeclarationHandle),
    ReleaseVertexDeclaration(DeclarationHandle),
    CreateVertexShader(ShaderHandle),
    ReleaseVertexShader(ShaderHandle),
    SetFvf(u32),
    SetVertexDeclaration(Option<DeclarationHandle>),
    SetStreamSource { stream: u32, binding: StreamBinding },
    SetStreamSourceFreq { stream: u32, divider: u32 },
    SetIndices(Option<IndexBufferHandle>),
    SetVertexShader(Option<ShaderHandle>),
    SetPixelShader(Option<ShaderHandle>),
    SetVertexShaderConstants { register: u32, count: u32 },
    SetTransform(TransformKind),
    SetViewport(Viewport),
    SetRenderState(RenderState, u32),
    SetTextureStageState { stage: u32, state: TextureStageState, value: u32 },
    SetTexture { stage: u32, texture: Option<TextureHandle> },
    SetMaterial,
    SetLight(u32),
    LightEnable(u32, bool),
    DrawIndexedPrimitive(DrawRecord),
    BeginScene,
    EndScene,
    Present,
    Reset,
}

impl DeviceCall {
    /// Whether this call changes pipeline state (as opposed to resources or frames)
    pub fn is_state_call(&self) -> bool {
        matches!(
            self,
            Self::SetFvf(_)
                | Self::SetVertexDeclaration(_)
                | Self::SetStreamSource { .. }
                | Self::SetStreamSourceFreq { .. }
                | Self::SetIndices(_)
                | Self::SetVertexShader(_)
                | Self::SetPixelShader(_)
                | Self::SetVertexShaderConstants { .. }
                | Self::SetTransform(_)
                | Self::SetViewport(_)
                | Self::SetRenderState(..)
                | Self::SetTextureStageState { .. }
                | Self::SetTexture { .. }
                | Self::SetMaterial
                | Self::SetLight(_)
                | Self::LightEnable(..)
        )
    }
}

/// Parameters and bound state of one recorded draw
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub primitive: PrimitiveType,
    pub base_vertex: i32,
    pub min_vertex_index: u32,
    pub num_vertices: u32,
    pub start_index: u32,
    pub primitive_count: u32,
    pub fvf: u32,
    pub declaration: Option<DeclarationHandle>,
    pub stream0: StreamBinding,
    pub indices: Option<IndexBufferHandle>,
}

const MAX_STREAMS: usize = 16;
const MAX_STAGES: usize = 8;
const MAX_LIGHTS: usize = 8;
const MAX_CONSTANTS: usize = 256;

#[derive(Debug, Clone)]
struct PipelineRegisters {
    fvf: u32,
    declaration: Option<DeclarationHandle>,
    streams: [StreamBinding; MAX_STREAMS],
    stream_freq: [u32; MAX_STREAMS],
    indices: Option<IndexBufferHandle>,
    vertex_shader: Option<ShaderHandle>,
    pixel_shader: Option<ShaderHandle>,
    constants: Vec<[f32; 4]>,
    transforms: HashMap<TransformKind, Matrix4f>,
    viewport: Viewport,
    render_states: [u32; RENDER_STATE_SLOTS],
    texture_stage_states: [[u32; TEXTURE_STAGE_STATE_SLOTS]; MAX_STAGES],
    textures: [Option<TextureHandle>; MAX_STAGES],
    material: Material,
    lights: [Light; MAX_LIGHTS],
    light_enabled: [bool; MAX_LIGHTS],
}

impl PipelineRegisters {
    fn new() -> Self {
        let mut render_states = [0u32; RENDER_STATE_SLOTS];
        render_states[RenderState::ZEnable.slot()] = 1;
        render_states[RenderState::ZWriteEnable.slot()] = 1;
        render_states[RenderState::CullMode.slot()] = cull::CCW;
        render_states[RenderState::Lighting.slot()] = 1;
        render_states[RenderState::ColorVertex.slot()] = 1;
        render_states[RenderState::DiffuseMaterialSource.slot()] = material_source::COLOR1;
        render_states[RenderState::SpecularMaterialSource.slot()] = material_source::COLOR2;

        let mut texture_stage_states = [[0u32; TEXTURE_STAGE_STATE_SLOTS]; MAX_STAGES];
        for (stage, states) in texture_stage_states.iter_mut().enumerate() {
            let (color, alpha) = if stage == 0 {
                (texture_op::MODULATE, texture_op::SELECT_ARG1)
            } else {
                (texture_op::DISABLE, texture_op::DISABLE)
            };
            states[TextureStageState::ColorOp.slot()] = color;
            states[TextureStageState::AlphaOp.slot()] = alpha;
            states[TextureStageState::TexCoordIndex.slot()] = stage as u32;
        }

        Self {
            fvf: 0,
            declaration: None,
            streams: [StreamBinding::NULL; MAX_STREAMS],
            stream_freq: [1; MAX_STREAMS],
            indices: None,
            vertex_shader: None,
            pixel_shader: None,
            constants: vec![[0.0; 4]; MAX_CONSTANTS],
            transforms: HashMap::new(),
            viewport: Viewport::default(),
            render_states,
            texture_stage_states,
            textures: [None; MAX_STAGES],
            material: Material::null(),
            lights: [Light::default(); MAX_LIGHTS],
            light_enabled: [false; MAX_LIGHTS],
        }
    }
}

/// Null graphics device with call recording and failure injection
pub struct NullDevice {
    caps: DeviceCaps,
    next_handle: u32,
    registers: PipelineRegisters,
    vertex_buffers: HashMap<VertexBufferHandle, Vec<u8>>,
    index_buffers: HashMap<IndexBufferHandle, Vec<u16>>,
    textures: HashMap<TextureHandle, (u32, u32)>,
    declarations: HashMap<DeclarationHandle, VertexLayoutDescriptor>,
    shaders: HashMap<ShaderHandle, Vec<u32>>,
    calls: Vec<DeviceCall>,
    recording: bool,
    /// Draw call count this frame
    draw_calls_this_frame: u32,
    frame_count: u64,
    in_scene: bool,
    status: DeviceStatus,
    /// Bytes of buffer memory available; `None` is unlimited
    video_memory_budget: Option<u64>,
    video_memory_used: u64,
    fail_declarations: bool,
    fail_draws: bool,
    fail_resets: u32,
    lose_on_present: bool,
    /// Draws issued while a declaration and a non-zero FVF were both bound
    layout_conflicts: u32,
}

impl NullDevice {
    pub fn new() -> Self {
        Self::with_caps(DeviceCaps::default())
    }

    /// Create a device reporting the given capabilities
    pub fn with_caps(caps: DeviceCaps) -> Self {
        Self {
            caps,
            next_handle: 1,
            registers: PipelineRegisters::new(),
            vertex_buffers: HashMap::new(),
            index_buffers: HashMap::new(),
            textures: HashMap::new(),
            declarations: HashMap::new(),
            shaders: HashMap::new(),
            calls: Vec::new(),
            recording: true,
            draw_calls_this_frame: 0,
            frame_count: 0,
            in_scene: false,
            status: DeviceStatus::Ok,
            video_memory_budget: None,
            video_memory_used: 0,
            fail_declarations: false,
            fail_draws: false,
            fail_resets: 0,
            lose_on_present: false,
            layout_conflicts: 0,
        }
    }

    fn alloc_handle(&mut self) -> u32 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    fn record(&mut self, call: DeviceCall) {
        if self.recording {
            self.calls.push(call);
        }
    }

    fn check_usable(&self) -> DeviceResult<()> {
        match self.status {
            DeviceStatus::Ok => Ok(()),
            DeviceStatus::Lost => Err(DeviceError::DeviceLost),
            DeviceStatus::NotReset => Err(DeviceError::DeviceNotReset),
        }
    }

    fn reserve_memory(&mut self, bytes: u64) -> DeviceResult<()> {
        if let Some(budget) = self.video_memory_budget {
            if self.video_memory_used + bytes > budget {
                return Err(DeviceError::OutOfVideoMemory);
            }
        }
        self.video_memory_used += bytes;
        Ok(())
    }

    // Instrumentation

    /// All recorded calls since the last clear
    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    /// Forget recorded calls
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Pause or resume recording
    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    /// Count recorded calls matching `pred`
    pub fn count_calls(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    /// Number of recorded pipeline-state calls
    pub fn state_call_count(&self) -> usize {
        self.count_calls(DeviceCall::is_state_call)
    }

    /// Recorded draws in order
    pub fn draws(&self) -> Vec<&DrawRecord> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::DrawIndexedPrimitive(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn draw_calls_this_frame(&self) -> u32 {
        self.draw_calls_this_frame
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn layout_conflicts(&self) -> u32 {
        self.layout_conflicts
    }

    /// Contents of a vertex buffer
    pub fn vertex_buffer_data(&self, buffer: VertexBufferHandle) -> Option<&[u8]> {
        self.vertex_buffers.get(&buffer).map(|v| v.as_slice())
    }

    /// Contents of an index buffer
    pub fn index_buffer_data(&self, buffer: IndexBufferHandle) -> Option<&[u16]> {
        self.index_buffers.get(&buffer).map(|v| v.as_slice())
    }

    /// Layout a declaration was compiled from
    pub fn declaration_layout(&self, decl: DeclarationHandle) -> Option<&VertexLayoutDescriptor> {
        self.declarations.get(&decl)
    }

    /// Current value of a shader constant register
    pub fn vertex_shader_constant(&self, register: u32) -> [f32; 4] {
        self.registers
            .constants
            .get(register as usize)
            .copied()
            .unwrap_or([0.0; 4])
    }

    pub fn live_vertex_buffers(&self) -> usize {
        self.vertex_buffers.len()
    }

    pub fn live_declarations(&self) -> usize {
        self.declarations.len()
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    // Failure injection

    pub fn set_status(&mut self, status: DeviceStatus) {
        self.status = status;
    }

    /// Limit buffer memory; creations beyond it fail with out-of-video-memory
    pub fn set_video_memory_budget(&mut self, budget: Option<u64>) {
        self.video_memory_budget = budget;
    }

    pub fn set_fail_declarations(&mut self, fail: bool) {
        self.fail_declarations = fail;
    }

    pub fn set_fail_draws(&mut self, fail: bool) {
        self.fail_draws = fail;
    }

    /// Make the next `count` resets fail
    pub fn set_fail_resets(&mut self, count: u32) {
        self.fail_resets = count;
    }

    /// Lose the device during the next present
    pub fn set_lose_on_present(&mut self, lose: bool) {
        self.lose_on_present = lose;
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for NullDevice {
    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn create_vertex_buffer(&mut self, size: u32, _usage: BufferUsage) -> DeviceResult<VertexBufferHandle> {
        self.reserve_memory(size as u64)?;
        let buffer = VertexBufferHandle(self.alloc_handle());
        self.vertex_buffers.insert(buffer, vec![0; size as usize]);
        self.record(DeviceCall::CreateVertexBuffer { buffer, size });
        Ok(buffer)
    }

    fn release_vertex_buffer(&mut self, buffer: VertexBufferHandle) {
        if let Some(data) = self.vertex_buffers.remove(&buffer) {
            self.video_memory_used = self.video_memory_used.saturating_sub(data.len() as u64);
        }
        self.record(DeviceCall::ReleaseVertexBuffer(buffer));
    }

    fn create_index_buffer(&mut self, count: u32, _usage: BufferUsage) -> DeviceResult<IndexBufferHandle> {
        self.reserve_memory(count as u64 * 2)?;
        let buffer = IndexBufferHandle(self.alloc_handle());
        self.index_buffers.insert(buffer, vec![0; count as usize]);
        self.record(DeviceCall::CreateIndexBuffer { buffer, count });
        Ok(buffer)
    }

    fn release_index_buffer(&mut self, buffer: IndexBufferHandle) {
        if let Some(data) = self.index_buffers.remove(&buffer) {
            self.video_memory_used = self.video_memory_used.saturating_sub(data.len() as u64 * 2);
        }
        self.record(DeviceCall::ReleaseIndexBuffer(buffer));
    }

    fn write_vertex_buffer(
        &mut self,
        buffer: VertexBufferHandle,
        offset: u32,
        data: &[u8],
        mode: LockMode,
    ) -> DeviceResult<()> {
        let storage = self
            .vertex_buffers
            .get_mut(&buffer)
            .ok_or(DeviceError::InvalidHandle(buffer.0))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > storage.len() {
            return Err(DeviceError::InvalidCall(format!(
                "vertex write {}..{} past buffer size {}",
                start,
                end,
                storage.len()
            )));
        }
        if mode == LockMode::Discard {
            storage.iter_mut().for_each(|b| *b = 0);
        }
        storage[start..end].copy_from_slice(data);
        self.record(DeviceCall::WriteVertexBuffer {
            buffer,
            offset,
            len: data.len() as u32,
            mode,
        });
        Ok(())
    }

    fn write_index_buffer(
        &mut self,
        buffer: IndexBufferHandle,
        first: u32,
        indices: &[u16],
        mode: LockMode,
    ) -> DeviceResult<()> {
        let storage = self
            .index_buffers
            .get_mut(&buffer)
            .ok_or(DeviceError::InvalidHandle(buffer.0))?;
        let start = first as usize;
        let end = start + indices.len();
        if end > storage.len() {
            return Err(DeviceError::InvalidCall(format!(
                "index write {}..{} past buffer size {}",
                start,
                end,
                storage.len()
            )));
        }
        if mode == LockMode::Discard {
            storage.iter_mut().for_each(|i| *i = 0);
        }
        storage[start..end].copy_from_slice(indices);
        self.record(DeviceCall::WriteIndexBuffer {
            buffer,
            first,
            count: indices.len() as u32,
            mode,
        });
        Ok(())
    }

    fn create_texture(&mut self, width: u32, height: u32, _levels: u32) -> DeviceResult<TextureHandle> {
        self.reserve_memory(width as u64 * height as u64 * 4)?;
        let texture = TextureHandle(self.alloc_handle());
        self.textures.insert(texture, (width, height));
        self.record(DeviceCall::CreateTexture(texture));
        Ok(texture)
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if let Some((w, h)) = self.textures.remove(&texture) {
            self.video_memory_used = self.video_memory_used.saturating_sub(w as u64 * h as u64 * 4);
        }
        self.record(DeviceCall::ReleaseTexture(texture));
    }

    fn create_vertex_declaration(&mut self, layout: &VertexLayoutDescriptor) -> DeviceResult<DeclarationHandle> {
        if self.fail_declarations {
            return Err(DeviceError::CallFailed {
                call: "CreateVertexDeclaration",
                code: INVALID_CALL,
            });
        }
        if layout.is_empty() {
            return Err(DeviceError::InvalidCall("empty vertex declaration".to_string()));
        }
        let decl = DeclarationHandle(self.alloc_handle());
        self.declarations.insert(decl, layout.clone());
        self.record(DeviceCall::CreateVertexDeclaration(decl));
        Ok(decl)
    }

    fn release_vertex_declaration(&mut self, decl: DeclarationHandle) {
        self.declarations.remove(&decl);
        self.record(DeviceCall::ReleaseVertexDeclaration(decl));
    }

    fn create_vertex_shader(&mut self, bytecode: &[u32]) -> DeviceResult<ShaderHandle> {
        if bytecode.is_empty() {
            return Err(DeviceError::InvalidCall("empty shader bytecode".to_string()));
        }
        let shader = ShaderHandle(self.alloc_handle());
        self.shaders.insert(shader, bytecode.to_vec());
        self.record(DeviceCall::CreateVertexShader(shader));
        Ok(shader)
    }

    fn release_vertex_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader);
        self.record(DeviceCall::ReleaseVertexShader(shader));
    }

    fn set_fvf(&mut self, fvf: u32) -> DeviceResult<()> {
        self.registers.fvf = fvf;
        self.record(DeviceCall::SetFvf(fvf));
        Ok(())
    }

    fn fvf(&self) -> u32 {
        self.registers.fvf
    }

    fn set_vertex_declaration(&mut self, decl: Option<DeclarationHandle>) -> DeviceResult<()> {
        if let Some(d) = decl {
            if !self.declarations.contains_key(&d) {
                return Err(DeviceError::InvalidHandle(d.0));
            }
        }
        self.registers.declaration = decl;
        self.record(DeviceCall::SetVertexDeclaration(decl));
        Ok(())
    }

    fn vertex_declaration(&self) -> Option<DeclarationHandle> {
        self.registers.declaration
    }

    fn set_stream_source(
        &mut self,
        stream: u32,
        buffer: Option<VertexBufferHandle>,
        offset: u32,
        stride: u32,
    ) -> DeviceResult<()> {
        let slot = self
            .registers
            .streams
            .get_mut(stream as usize)
            .ok_or_else(|| DeviceError::InvalidCall(format!("stream {} out of range", stream)))?;
        let binding = StreamBinding {
            buffer,
            offset,
            stride,
        };
        *slot = binding;
        self.record(DeviceCall::SetStreamSource { stream, binding });
        Ok(())
    }

    fn stream_source(&self, stream: u32) -> StreamBinding {
        self.registers
            .streams
            .get(stream as usize)
            .copied()
            .unwrap_or_default()
    }

    fn set_stream_source_freq(&mut self, stream: u32, divider: u32) -> DeviceResult<()> {
        let slot = self
            .registers
            .stream_freq
            .get_mut(stream as usize)
            .ok_or_else(|| DeviceError::InvalidCall(format!("stream {} out of range", stream)))?;
        *slot = divider;
        self.record(DeviceCall::SetStreamSourceFreq { stream, divider });
        Ok(())
    }

    fn stream_source_freq(&self, stream: u32) -> u32 {
        self.registers.stream_freq.get(stream as usize).copied().unwrap_or(1)
    }

    fn set_indices(&mut self, buffer: Option<IndexBufferHandle>) -> DeviceResult<()> {
        self.registers.indices = buffer;
        self.record(DeviceCall::SetIndices(buffer));
        Ok(())
    }

    fn indices(&self) -> Option<IndexBufferHandle> {
        self.registers.indices
    }

    fn set_vertex_shader(&mut self, shader: Option<ShaderHandle>) -> DeviceResult<()> {
        self.registers.vertex_shader = shader;
        self.record(DeviceCall::SetVertexShader(shader));
        Ok(())
    }

    fn vertex_shader(&self) -> Option<ShaderHandle> {
        self.registers.vertex_shader
    }

    fn set_pixel_shader(&mut self, shader: Option<ShaderHandle>) -> DeviceResult<()> {
        self.registers.pixel_shader = shader;
        self.record(DeviceCall::SetPixelShader(shader));
        Ok(())
    }

    fn pixel_shader(&self) -> Option<ShaderHandle> {
        self.registers.pixel_shader
    }

    fn set_vertex_shader_constants(&mut self, register: u32, data: &[[f32; 4]]) -> DeviceResult<()> {
        let start = register as usize;
        let end = start + data.len();
        if end > MAX_CONSTANTS {
            return Err(DeviceError::InvalidCall(format!("constant register {} out of range", end)));
        }
        self.registers.constants[start..end].copy_from_slice(data);
        self.record(DeviceCall::SetVertexShaderConstants {
            register,
            count: data.len() as u32,
        });
        Ok(())
    }

    fn set_transform(&mut self, kind: TransformKind, matrix: &Matrix4f) -> DeviceResult<()> {
        self.registers.transforms.insert(kind, *matrix);
        self.record(DeviceCall::SetTransform(kind));
        Ok(())
    }

    fn transform(&self, kind: TransformKind) -> Matrix4f {
        self.registers
            .transforms
            .get(&kind)
            .copied()
            .unwrap_or_else(Matrix4f::identity)
    }

    fn set_viewport(&mut self, viewport: &Viewport) -> DeviceResult<()> {
        self.registers.viewport = *viewport;
        self.record(DeviceCall::SetViewport(*viewport));
        Ok(())
    }

    fn viewport(&self) -> Viewport {
        self.registers.viewport
    }

    fn set_render_state(&mut self, state: RenderState, value: u32) -> DeviceResult<()> {
        self.registers.render_states[state.slot()] = value;
        self.record(DeviceCall::SetRenderState(state, value));
        Ok(())
    }

    fn render_state(&self, state: RenderState) -> u32 {
        self.registers.render_states[state.slot()]
    }

    fn set_texture_stage_state(&mut self, stage: u32, state: TextureStageState, value: u32) -> DeviceResult<()> {
        let states = self
            .registers
            .texture_stage_states
            .get_mut(stage as usize)
            .ok_or_else(|| DeviceError::InvalidCall(format!("stage {} out of range", stage)))?;
        states[state.slot()] = value;
        self.record(DeviceCall::SetTextureStageState { stage, state, value });
        Ok(())
    }

    fn texture_stage_state(&self, stage: u32, state: TextureStageState) -> u32 {
        self.registers
            .texture_stage_states
            .get(stage as usize)
            .map(|s| s[state.slot()])
            .unwrap_or(0)
    }

    fn set_texture(&mut self, stage: u32, texture: Option<TextureHandle>) -> DeviceResult<()> {
        let slot = self
            .registers
            .textures
            .get_mut(stage as usize)
            .ok_or_else(|| DeviceError::InvalidCall(format!("stage {} out of range", stage)))?;
        *slot = texture;
        self.record(DeviceCall::SetTexture { stage, texture });
        Ok(())
    }

    fn texture(&self, stage: u32) -> Option<TextureHandle> {
        self.registers.textures.get(stage as usize).copied().flatten()
    }

    fn set_material(&mut self, material: &Material) -> DeviceResult<()> {
        self.registers.material = *material;
        self.record(DeviceCall::SetMaterial);
        Ok(())
    }

    fn material(&self) -> Material {
        self.registers.material
    }

    fn set_light(&mut self, index: u32, light: &Light) -> DeviceResult<()> {
        let slot = self
            .registers
            .lights
            .get_mut(index as usize)
            .ok_or_else(|| DeviceError::InvalidCall(format!("light {} out of range", index)))?;
        *slot = *light;
        self.record(DeviceCall::SetLight(index));
        Ok(())
    }

    fn light(&self, index: u32) -> Light {
        self.registers.lights.get(index as usize).copied().unwrap_or_default()
    }

    fn light_enable(&mut self, index: u32, enable: bool) -> DeviceResult<()> {
        let slot = self
            .registers
            .light_enabled
            .get_mut(index as usize)
            .ok_or_else(|| DeviceError::InvalidCall(format!("light {} out of range", index)))?;
        *slot = enable;
        self.record(DeviceCall::LightEnable(index, enable));
        Ok(())
    }

    fn is_light_enabled(&self, index: u32) -> bool {
        self.registers.light_enabled.get(index as usize).copied().unwrap_or(false)
    }

    fn draw_indexed_primitive(
        &mut self,
        primitive: PrimitiveType,
        base_vertex: i32,
        min_vertex_index: u32,
        num_vertices: u32,
        start_index: u32,
        primitive_count: u32,
    ) -> DeviceResult<()> {
        self.check_usable()?;
        if self.fail_draws {
            return Err(DeviceError::CallFailed {
                call: "DrawIndexedPrimitive",
                code: INVALID_CALL,
            });
        }
        if self.registers.declaration.is_some() && self.registers.fvf != 0 {
            self.layout_conflicts += 1;
        }
        self.draw_calls_this_frame += 1;
        let record = DrawRecord {
            primitive,
            base_vertex,
            min_vertex_index,
            num_vertices,
            start_index,
            primitive_count,
            fvf: self.registers.fvf,
            declaration: self.registers.declaration,
            stream0: self.registers.streams[0],
            indices: self.registers.indices,
        };
        self.record(DeviceCall::DrawIndexedPrimitive(record));
        Ok(())
    }

    fn begin_scene(&mut self) -> DeviceResult<()> {
        if self.in_scene {
            return Err(DeviceError::InvalidCall("BeginScene inside a scene".to_string()));
        }
        self.in_scene = true;
        self.draw_calls_this_frame = 0;
        self.record(DeviceCall::BeginScene);
        Ok(())
    }

    fn end_scene(&mut self) -> DeviceResult<()> {
        let was_in_scene = self.in_scene;
        self.in_scene = false;
        self.record(DeviceCall::EndScene);
        if was_in_scene {
            Ok(())
        } else {
            Err(DeviceError::InvalidCall("EndScene without BeginScene".to_string()))
        }
    }

    fn present(&mut self) -> DeviceResult<()> {
        self.record(DeviceCall::Present);
        if self.lose_on_present {
            self.lose_on_present = false;
            self.status = DeviceStatus::Lost;
        }
        self.check_usable()?;
        self.frame_count += 1;
        Ok(())
    }

    fn test_cooperative_level(&self) -> DeviceStatus {
        self.status
    }

    fn reset(&mut self) -> DeviceResult<()> {
        self.record(DeviceCall::Reset);
        match self.status {
            DeviceStatus::Lost => return Err(DeviceError::DeviceLost),
            DeviceStatus::Ok | DeviceStatus::NotReset => {}
        }
        if self.fail_resets > 0 {
            self.fail_resets -= 1;
            return Err(DeviceError::CallFailed {
                call: "Reset",
                code: INVALID_CALL,
            });
        }
        self.registers = PipelineRegisters::new();
        self.in_scene = false;
        self.status = DeviceStatus::Ok;
        Ok(())
    }
}
