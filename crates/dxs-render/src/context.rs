//! Render context
//!
//! [`RenderContext`] owns the device together with everything that shadows
//! it: the render-state record, the applied-state shadow, the layout cache,
//! the resource registry and the dynamic rings. It replaces global device
//! state with one explicit object passed by reference.
//!
//! A context is driven by exactly one thread, the one that created it. Every
//! state-mutating entry point checks this in debug builds.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::applied::{AppliedState, DeviceWriter};
use crate::backend::{
    cull, material_source, BufferUsage, DeviceCaps, DeviceResult, GraphicsDevice, Light,
    Material, RenderState, ShaderHandle, TextureStageState, TransformKind, Viewport,
};
use crate::dynamic::{
    DynamicBuffers, DynamicIndexAccess, DynamicSortingAccess, DynamicSortingIndexAccess,
    DynamicVertexAccess,
};
use crate::layout_cache::LayoutCache;
use crate::math::Matrix4f;
use crate::reset::ResourceHook;
use crate::resource::{
    EngineIndexBuffer, EngineVertexBuffer, ResourceRegistry, SortingIndexBuffer,
    SortingVertexBuffer, Texture,
};
use crate::snapshot::ModeValidator;
use crate::sorting::SortingRenderer;
use crate::state::{
    DirtyFlags, IndexSource, RenderStateRecord, VertexSource, MAX_LIGHTS, MAX_TEXTURE_STAGES,
    MAX_VERTEX_STREAMS, UNKNOWN_STATE,
};
use crate::stats::{FrameStatistics, StateCategory};
use crate::telemetry::{PipelineEvent, PipelineObserver, TracingObserver};
use dxs_core::{Config, DeviceConfig, DeviceError, Result};

/// Comparison function value for "less or equal"
const CMP_LESS_EQUAL: u32 = 4;
/// Blend factor values
const BLEND_ZERO: u32 = 1;
const BLEND_ONE: u32 = 2;
const BLEND_OP_ADD: u32 = 1;
const SHADE_GOURAUD: u32 = 2;

/// Slot counts the context drives on the device.
///
/// Each is the smallest of the device capability, the configured limit and
/// the size of the record's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub texture_stages: usize,
    pub vertex_streams: usize,
    pub lights: usize,
}

impl DeviceLimits {
    pub fn resolve(caps: &DeviceCaps, config: &DeviceConfig) -> Self {
        let bound = |cap: u32, configured: u32, tracked: usize| (cap.min(configured) as usize).min(tracked);
        Self {
            texture_stages: bound(caps.max_texture_stages, config.max_texture_stages, MAX_TEXTURE_STAGES),
            vertex_streams: bound(caps.max_streams, config.max_vertex_streams, MAX_VERTEX_STREAMS),
            lights: bound(caps.max_lights, config.max_lights, MAX_LIGHTS),
        }
    }
}

/// Device owner and state shadow
pub struct RenderContext<D: GraphicsDevice> {
    pub(crate) device: D,
    pub(crate) record: RenderStateRecord,
    pub(crate) applied: AppliedState,
    pub(crate) layouts: LayoutCache,
    pub(crate) resources: ResourceRegistry,
    pub(crate) dynamic: Option<DynamicBuffers>,
    pub(crate) sorting: SortingRenderer,
    pub(crate) stats: FrameStatistics,
    pub(crate) observer: Arc<dyn PipelineObserver>,
    pub(crate) mode_validator: ModeValidator,
    pub(crate) hooks: Vec<Box<dyn ResourceHook<D>>>,
    pub(crate) config: Config,
    pub(crate) caps: DeviceCaps,
    pub(crate) limits: DeviceLimits,
    /// Frames presented since the last reset
    pub(crate) frame_count: u64,
    /// Label attached to draw failures
    pub(crate) draw_context: Option<&'static str>,
    owner: ThreadId,
}

impl<D: GraphicsDevice> RenderContext<D> {
    /// Take ownership of `device` with a tracing observer
    pub fn new(device: D, config: Config) -> Result<Self> {
        let observer = Arc::new(TracingObserver::from_config(&config.debug));
        Self::with_observer(device, config, observer)
    }

    /// Take ownership of `device`, reporting diagnostics to `observer`
    pub fn with_observer(mut device: D, config: Config, observer: Arc<dyn PipelineObserver>) -> Result<Self> {
        let caps = device.caps();
        let limits = DeviceLimits::resolve(&caps, &config.device);
        if limits.vertex_streams < MAX_VERTEX_STREAMS {
            tracing::warn!(
                "RenderContext: device exposes {} streams, {} are tracked",
                limits.vertex_streams,
                MAX_VERTEX_STREAMS
            );
        }

        let dynamic = DynamicBuffers::create(&mut device, &config.device)?;
        let applied = AppliedState::capture(&device);

        let mut ctx = Self {
            device,
            record: RenderStateRecord::new(),
            applied,
            layouts: LayoutCache::new(),
            resources: ResourceRegistry::new(),
            dynamic: Some(dynamic),
            sorting: SortingRenderer::new(),
            stats: FrameStatistics::new(),
            observer,
            mode_validator: ModeValidator::new(),
            hooks: Vec::new(),
            config,
            caps,
            limits,
            frame_count: 0,
            draw_context: None,
            owner: thread::current().id(),
        };
        ctx.set_default_render_states();

        tracing::info!(
            "RenderContext: created (vs {}.{}, {} texture stages, {} lights, stream offsets {})",
            caps.vertex_shader_version.0,
            caps.vertex_shader_version.1,
            limits.texture_stages,
            limits.lights,
            caps.stream_offset
        );
        Ok(ctx)
    }

    #[inline]
    pub(crate) fn assert_owner_thread(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owner,
            "RenderContext used from a thread that does not own it"
        );
    }

    /// Shadow-filtered writer over the device
    pub(crate) fn writer(&mut self) -> DeviceWriter<'_, D> {
        DeviceWriter::new(&mut self.device, &mut self.applied, &mut self.stats)
    }

    pub(crate) fn report(&self, event: PipelineEvent) {
        self.observer.report(event);
    }

    /// Report a failed device call
    pub(crate) fn check<T>(&self, context: &'static str, result: DeviceResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.report(PipelineEvent::CallFailed { context, error });
                None
            }
        }
    }

    // Accessors

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Direct device access.
    ///
    /// Writes made here bypass the shadow; follow them with
    /// [`invalidate_cached_render_states`](Self::invalidate_cached_render_states).
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn record(&self) -> &RenderStateRecord {
        &self.record
    }

    pub fn applied(&self) -> &AppliedState {
        &self.applied
    }

    pub fn stats(&self) -> &FrameStatistics {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn caps(&self) -> DeviceCaps {
        self.caps
    }

    /// Slot counts resolved at creation; later config edits do not change them
    pub fn limits(&self) -> DeviceLimits {
        self.limits
    }

    pub fn observer(&self) -> &Arc<dyn PipelineObserver> {
        &self.observer
    }

    /// Frames presented since creation or the last reset
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Label attached to subsequent draw failures
    pub fn set_draw_context(&mut self, label: Option<&'static str>) {
        self.draw_context = label;
    }

    /// Register a collaborator that owns device resources across resets
    pub fn register_resource_hook(&mut self, hook: Box<dyn ResourceHook<D>>) {
        self.hooks.push(hook);
    }

    // Frame

    /// Start a frame
    pub fn begin_scene(&mut self) -> DeviceResult<()> {
        self.assert_owner_thread();
        self.stats.begin();
        self.device.begin_scene()
    }

    // Buffers

    /// Bind a vertex source to `stream`
    pub fn set_vertex_source(&mut self, stream: usize, source: VertexSource) {
        self.assert_owner_thread();
        if stream >= self.limits.vertex_streams {
            tracing::warn!("RenderContext: vertex stream {} out of range", stream);
            return;
        }
        self.record.set_vertex_source(stream, source);
    }

    /// Bind an engine vertex buffer, or nothing, to `stream`
    pub fn set_vertex_buffer(&mut self, stream: usize, buffer: Option<&Arc<EngineVertexBuffer>>) {
        let source = buffer.map_or(VertexSource::None, |vb| VertexSource::Engine(Arc::clone(vb)));
        self.set_vertex_source(stream, source);
    }

    /// Bind a slice of the dynamic vertex ring to stream 0
    pub fn set_dynamic_vertex_buffer(&mut self, access: DynamicVertexAccess) {
        self.set_vertex_source(0, VertexSource::DynamicEngine(access));
    }

    /// Bind CPU-side sorting vertices to stream 0
    pub fn set_sorting_vertex_buffer(&mut self, buffer: &Arc<SortingVertexBuffer>) {
        self.set_vertex_source(0, VertexSource::Sorting(Arc::clone(buffer)));
    }

    pub fn set_dynamic_sorting_vertex_buffer(&mut self, access: DynamicSortingAccess) {
        self.set_vertex_source(0, VertexSource::DynamicSorting(access));
    }

    /// Bind an index source; `index_base_offset` is added to every index
    pub fn set_index_source(&mut self, source: IndexSource, index_base_offset: u32) {
        self.assert_owner_thread();
        self.record.set_index_source(source, index_base_offset);
    }

    pub fn set_index_buffer(&mut self, buffer: Option<&Arc<EngineIndexBuffer>>, index_base_offset: u32) {
        let source = buffer.map_or(IndexSource::None, |ib| IndexSource::Engine(Arc::clone(ib)));
        self.set_index_source(source, index_base_offset);
    }

    pub fn set_dynamic_index_buffer(&mut self, access: DynamicIndexAccess, index_base_offset: u32) {
        self.set_index_source(IndexSource::DynamicEngine(access), index_base_offset);
    }

    pub fn set_sorting_index_buffer(&mut self, buffer: &Arc<SortingIndexBuffer>, index_base_offset: u32) {
        self.set_index_source(IndexSource::Sorting(Arc::clone(buffer)), index_base_offset);
    }

    pub fn set_dynamic_sorting_index_buffer(&mut self, access: DynamicSortingIndexAccess, index_base_offset: u32) {
        self.set_index_source(IndexSource::DynamicSorting(access), index_base_offset);
    }

    /// Change the base vertex of the bound index range
    pub fn set_index_base_offset(&mut self, index_base_offset: u32) {
        self.assert_owner_thread();
        self.record.set_index_base_offset(index_base_offset);
    }

    /// Force the next apply to rebind streams and indices
    pub fn invalidate_vertex_buffer_state(&mut self) {
        self.record.mark_dirty(DirtyFlags::VERTEX_BUFFER | DirtyFlags::INDEX_BUFFER);
    }

    // Layout

    /// Select a structured layout
    pub fn set_vertex_declaration(&mut self, decl: crate::backend::DeclarationHandle, owner: &'static str) {
        self.assert_owner_thread();
        self.record.set_declaration(decl, owner);
    }

    /// Select a legacy layout; zero requests the explicit clear state
    pub fn set_fvf(&mut self, fvf: u32, owner: &'static str) {
        self.assert_owner_thread();
        if fvf == 0 {
            tracing::debug!("RenderContext: layout cleared by {}", owner);
        }
        self.record.set_fvf(fvf, owner);
    }

    // Textures, material, lights

    pub fn set_texture(&mut self, stage: usize, texture: Option<&Arc<Texture>>) {
        self.assert_owner_thread();
        if stage >= self.limits.texture_stages {
            tracing::warn!("RenderContext: texture stage {} out of range", stage);
            return;
        }
        self.record.set_texture(stage, texture.cloned());
    }

    /// Select a material; `None` applies the null material
    pub fn set_material(&mut self, material: Option<Material>) {
        self.assert_owner_thread();
        self.record.set_material(material);
    }

    /// Set or disable fixed-function light `index`
    pub fn set_light(&mut self, index: usize, light: Option<Light>) {
        self.assert_owner_thread();
        if index >= self.limits.lights {
            tracing::warn!("RenderContext: light {} out of range", index);
            return;
        }
        self.record.set_light(index, light);
    }

    // Transforms

    /// World and view are deferred to apply; projection is written immediately
    pub fn set_transform(&mut self, kind: TransformKind, matrix: &Matrix4f) {
        self.assert_owner_thread();
        match kind {
            TransformKind::World | TransformKind::View => self.record.set_transform(kind, matrix),
            TransformKind::Projection => {
                let result = self.writer().transform(kind, matrix);
                self.check("SetTransform(Projection)", result);
                self.record.sync_transform(kind, matrix);
            }
        }
    }

    pub fn transform(&self, kind: TransformKind) -> Matrix4f {
        self.record.transform(kind)
    }

    pub fn set_world_identity(&mut self) {
        self.assert_owner_thread();
        self.record.set_world_identity();
    }

    pub fn set_view_identity(&mut self) {
        self.assert_owner_thread();
        self.record.set_view_identity();
    }

    // Shaders

    pub fn set_vertex_shader(&mut self, shader: Option<ShaderHandle>) {
        self.assert_owner_thread();
        self.record.set_vertex_shader(shader);
    }

    pub fn set_pixel_shader(&mut self, shader: Option<ShaderHandle>) {
        self.assert_owner_thread();
        self.record.set_pixel_shader(shader);
    }

    /// Forget the applied shader selection so the next apply rebinds it
    pub fn invalidate_shader(&mut self) {
        self.applied.forget_shaders();
        self.record.mark_dirty(DirtyFlags::SHADER);
    }

    /// Compile a vertex shader
    pub fn create_vertex_shader(&mut self, bytecode: &[u32]) -> DeviceResult<ShaderHandle> {
        self.device.create_vertex_shader(bytecode)
    }

    pub fn release_vertex_shader(&mut self, shader: ShaderHandle) {
        if self.applied.vertex_shader == Some(Some(shader)) {
            self.applied.vertex_shader = None;
        }
        if self.record.vertex_shader() == Some(shader) {
            self.record.set_vertex_shader(None);
        }
        self.device.release_vertex_shader(shader);
    }

    // Immediate state

    /// Write a render state unless the cache already holds `value`
    pub fn set_render_state(&mut self, state: RenderState, value: u32) {
        self.assert_owner_thread();
        let slot = state.slot();
        if self.record.render_states[slot] == value {
            return;
        }
        match self.device.set_render_state(state, value) {
            Ok(()) => {
                self.record.render_states[slot] = value;
                self.stats.record_call(StateCategory::RenderState);
            }
            Err(error) => {
                self.record.render_states[slot] = UNKNOWN_STATE;
                self.report(PipelineEvent::CallFailed {
                    context: "SetRenderState",
                    error,
                });
            }
        }
    }

    /// Current value of a render state
    pub fn render_state(&self, state: RenderState) -> u32 {
        match self.record.render_states[state.slot()] {
            UNKNOWN_STATE => self.device.render_state(state),
            value => value,
        }
    }

    /// Write a texture stage state unless the cache already holds `value`
    pub fn set_texture_stage_state(&mut self, stage: usize, state: TextureStageState, value: u32) {
        self.assert_owner_thread();
        if stage >= self.limits.texture_stages {
            tracing::warn!("RenderContext: texture stage {} out of range", stage);
            return;
        }
        let cached = &mut self.record.texture_stage_states[stage][state.slot()];
        if *cached == value {
            return;
        }
        match self.device.set_texture_stage_state(stage as u32, state, value) {
            Ok(()) => {
                *cached = value;
                self.stats.record_call(StateCategory::TextureStageState);
            }
            Err(error) => {
                *cached = UNKNOWN_STATE;
                self.report(PipelineEvent::CallFailed {
                    context: "SetTextureStageState",
                    error,
                });
            }
        }
    }

    pub fn texture_stage_state(&self, stage: usize, state: TextureStageState) -> u32 {
        match self.record.texture_stage_states[stage][state.slot()] {
            UNKNOWN_STATE => self.device.texture_stage_state(stage as u32, state),
            value => value,
        }
    }

    pub fn set_viewport(&mut self, viewport: &Viewport) {
        self.assert_owner_thread();
        let result = self.device.set_viewport(viewport);
        if self.check("SetViewport", result).is_some() {
            self.stats.record_call(StateCategory::Other);
        }
    }

    /// Program the baseline render states every frame starts from
    pub fn set_default_render_states(&mut self) {
        const DEFAULTS: [(RenderState, u32); 18] = [
            (RenderState::ZEnable, 1),
            (RenderState::ZWriteEnable, 1),
            (RenderState::ZFunc, CMP_LESS_EQUAL),
            (RenderState::AlphaBlendEnable, 0),
            (RenderState::SrcBlend, BLEND_ONE),
            (RenderState::DestBlend, BLEND_ZERO),
            (RenderState::BlendOp, BLEND_OP_ADD),
            (RenderState::AlphaTestEnable, 0),
            (RenderState::AlphaRef, 0),
            (RenderState::AlphaFunc, CMP_LESS_EQUAL),
            (RenderState::CullMode, cull::CW),
            (RenderState::ShadeMode, SHADE_GOURAUD),
            (RenderState::DitherEnable, 0),
            (RenderState::Lighting, 0),
            (RenderState::ColorVertex, 1),
            (RenderState::SpecularEnable, 0),
            (RenderState::SpecularMaterialSource, material_source::MATERIAL),
            (RenderState::FogEnable, 0),
        ];
        for (state, value) in DEFAULTS {
            self.set_render_state(state, value);
        }
    }

    // Resources

    /// Create a static vertex buffer of `vertex_count` vertices in format `fvf`
    pub fn create_vertex_buffer(&mut self, fvf: u32, vertex_count: u32) -> DeviceResult<Arc<EngineVertexBuffer>> {
        self.resources
            .create_vertex_buffer(&mut self.device, fvf, vertex_count, BufferUsage::Static)
    }

    pub fn create_index_buffer(&mut self, index_count: u32) -> DeviceResult<Arc<EngineIndexBuffer>> {
        self.resources
            .create_index_buffer(&mut self.device, index_count, BufferUsage::Static)
    }

    pub fn create_texture(&mut self, width: u32, height: u32, levels: u32) -> DeviceResult<Arc<Texture>> {
        self.resources.create_texture(&mut self.device, width, height, levels)
    }

    /// Copy vertex bytes into an engine buffer starting at `first_vertex`
    pub fn write_vertex_buffer(
        &mut self,
        buffer: &EngineVertexBuffer,
        first_vertex: u32,
        data: &[u8],
    ) -> DeviceResult<()> {
        buffer.write(&mut self.device, first_vertex, data)
    }

    pub fn write_index_buffer(&mut self, buffer: &EngineIndexBuffer, first: u32, indices: &[u16]) -> DeviceResult<()> {
        buffer.write(&mut self.device, first, indices)
    }

    /// Release resources nothing references anymore
    pub fn purge_unused_resources(&mut self) -> usize {
        self.resources.purge_unused(&mut self.device)
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    // Dynamic rings

    fn dynamic_buffers(&mut self) -> DeviceResult<&mut DynamicBuffers> {
        self.dynamic
            .as_mut()
            .ok_or_else(|| DeviceError::InvalidCall("dynamic buffers are released".to_string()))
    }

    /// Reserve `vertex_count` vertices of format `fvf` in the dynamic ring
    pub fn allocate_dynamic_vertices(&mut self, fvf: u32, vertex_count: u32) -> DeviceResult<DynamicVertexAccess> {
        self.dynamic_buffers()?.vertices.allocate(fvf, vertex_count)
    }

    pub fn write_dynamic_vertices(&mut self, access: &DynamicVertexAccess, data: &[u8]) -> DeviceResult<()> {
        let dynamic = self
            .dynamic
            .as_ref()
            .ok_or_else(|| DeviceError::InvalidCall("dynamic buffers are released".to_string()))?;
        dynamic.vertices.write(&mut self.device, access, data)
    }

    pub fn allocate_dynamic_indices(&mut self, index_count: u32) -> DeviceResult<DynamicIndexAccess> {
        self.dynamic_buffers()?.indices.allocate(index_count)
    }

    pub fn write_dynamic_indices(&mut self, access: &DynamicIndexAccess, indices: &[u16]) -> DeviceResult<()> {
        let dynamic = self
            .dynamic
            .as_ref()
            .ok_or_else(|| DeviceError::InvalidCall("dynamic buffers are released".to_string()))?;
        dynamic.indices.write(&mut self.device, access, indices)
    }
}

impl<D: GraphicsDevice> Drop for RenderContext<D> {
    fn drop(&mut self) {
        self.sorting.clear();
        self.record.unbind_buffers();
        for stage in 0..MAX_TEXTURE_STAGES {
            self.record.set_texture(stage, None);
        }
        for hook in &mut self.hooks {
            hook.release_resources(&mut self.device);
        }
        self.layouts.release_all(&mut self.device);
        if let Some(dynamic) = self.dynamic.take() {
            dynamic.release(&mut self.device);
        }
        self.resources.release_all(&mut self.device);
        tracing::debug!("RenderContext: released device objects");
    }
}
