//! Hardware instancing of rigid meshes
//!
//! Meshes that share geometry and differ only by their world transform can
//! be drawn in one call. Each instance contributes three float4 rows (a 3x4
//! world matrix) in a dynamic buffer bound on stream 1 with an instance
//! frequency of one; stream 0 keeps the mesh geometry and is repeated
//! `count` times. A vertex shader replaces the fixed-function transform and
//! lighting, so view-projection, ambient, up to two directional lights and
//! the material are uploaded as shader constants.
//!
//! The draw disturbs layout, shader, stream and world state behind the
//! render-state record. Everything it changes is put back by a drop guard
//! and the affected record categories are invalidated afterwards.

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;

use crate::backend::{
    material_source, stream_freq, texture_op, BufferUsage, DeclarationHandle, GraphicsDevice,
    IndexBufferHandle, LockMode, PrimitiveType, RenderState, ShaderHandle, StreamBinding,
    TextureStageState, TransformKind, VertexBufferHandle,
};
use crate::context::RenderContext;
use crate::fvf;
use crate::light::LightEnvironment;
use crate::math::{self, Matrix4f, Vector3f};
use crate::polygon::PolygonRenderer;
use crate::reset::ResourceHook;
use crate::stats::StateCategory;
use dxs_core::{InstancingConfig, InstancingError};

/// Upper bound of instances per draw
pub const MAX_INSTANCES_PER_DRAW: usize = 256;

/// Upper bound of cached instancing layouts
pub const MAX_CACHED_LAYOUTS: usize = 16;

/// Lowest vertex shader model able to run the instancing shader
pub const MIN_VERTEX_SHADER_VERSION: (u8, u8) = (3, 0);

/// Shader constants c0..c13
const CONSTANT_COUNT: usize = 14;

/// Directional lights evaluated by the instancing shader
const MAX_SHADER_LIGHTS: usize = 2;

/// Per-instance data: the first three columns of a row-vector world matrix,
/// stored as rows of the equivalent 3x4 column-vector matrix
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub rows: [[f32; 4]; 3],
}

/// Byte stride of [`InstanceData`] on stream 1
pub const INSTANCE_STRIDE: u32 = std::mem::size_of::<InstanceData>() as u32;

impl InstanceData {
    pub fn from_world(world: &Matrix4f) -> Self {
        let row = |i: usize| [world[(0, i)], world[(1, i)], world[(2, i)], world[(3, i)]];
        Self {
            rows: [row(0), row(1), row(2)],
        }
    }
}

/// Instances collected for one draw
#[derive(Debug, Clone)]
pub struct InstanceBatch {
    instances: Vec<InstanceData>,
    capacity: usize,
}

impl InstanceBatch {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_INSTANCES_PER_DRAW);
        Self {
            instances: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an instance; returns `false` once the batch is full
    pub fn add_instance(&mut self, instance: InstanceData) -> bool {
        if self.instances.len() >= self.capacity {
            return false;
        }
        self.instances.push(instance);
        true
    }

    pub fn reset(&mut self) {
        self.instances.clear();
    }

    pub fn collected_count(&self) -> usize {
        self.instances.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.instances)
    }
}

impl Default for InstanceBatch {
    fn default() -> Self {
        Self::new(MAX_INSTANCES_PER_DRAW)
    }
}

/// Instancing declaration resolved for one draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceLayout {
    pub declaration: DeclarationHandle,
    /// `false` when the cache was full; the caller releases it after the draw
    pub cached: bool,
}

/// Bounded FVF to instancing declaration cache
#[derive(Debug, Default)]
pub struct InstanceLayoutCache {
    entries: Vec<(u32, DeclarationHandle)>,
    capacity: usize,
}

impl InstanceLayoutCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.min(MAX_CACHED_LAYOUTS),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Declaration for `fvf`, built on first use
    pub fn get<D: GraphicsDevice>(&mut self, device: &mut D, fvf: u32) -> Result<InstanceLayout, InstancingError> {
        if let Some((_, declaration)) = self.entries.iter().find(|(key, _)| *key == fvf) {
            return Ok(InstanceLayout {
                declaration: *declaration,
                cached: true,
            });
        }

        let descriptor = fvf::build_instanced_declaration(fvf);
        let declaration = device.create_vertex_declaration(&descriptor).map_err(|e| {
            tracing::warn!("Instancing: declaration for FVF 0x{:x} failed: {}", fvf, e);
            InstancingError::LayoutUnavailable(fvf)
        })?;

        let cached = self.entries.len() < self.capacity;
        if cached {
            self.entries.push((fvf, declaration));
        } else {
            tracing::debug!("Instancing: layout cache full, FVF 0x{:x} left uncached", fvf);
        }
        Ok(InstanceLayout { declaration, cached })
    }

    pub fn release_all<D: GraphicsDevice>(&mut self, device: &mut D) {
        for (_, declaration) in self.entries.drain(..) {
            device.release_vertex_declaration(declaration);
        }
    }
}

/// One mesh draw offered for instancing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceCandidate {
    pub world: Matrix4f,
    pub renderer: PolygonRenderer,
    pub scale: Vector3f,
    pub skinned: bool,
    pub sorted: bool,
    pub billboard: bool,
    pub material_override: bool,
    pub alpha_override: bool,
}

impl InstanceCandidate {
    /// Unit-scale rigid candidate with no overrides
    pub fn rigid(world: Matrix4f, renderer: PolygonRenderer) -> Self {
        Self {
            world,
            renderer,
            scale: Vector3f::new(1.0, 1.0, 1.0),
            skinned: false,
            sorted: false,
            billboard: false,
            material_override: false,
            alpha_override: false,
        }
    }

    /// Rigid, unsorted, non-billboard, unit uniform scale, no overrides
    pub fn is_eligible(&self) -> bool {
        let unit_scale = self.scale.iter().all(|s| (s - 1.0).abs() <= 1e-4);
        !self.skinned
            && !self.sorted
            && !self.billboard
            && !self.material_override
            && !self.alpha_override
            && !self.renderer.strip
            && unit_scale
    }
}

/// Hardware instancing manager.
///
/// Owns the instance buffer, the instancing shader and the layout cache.
/// Register it with [`RenderContext::register_resource_hook`] through
/// [`SharedInstanceManager`] so the instance buffer follows device resets.
#[derive(Debug)]
pub struct InstanceManager {
    config: InstancingConfig,
    available: bool,
    enabled: bool,
    instance_buffer: Option<VertexBufferHandle>,
    shader: Option<ShaderHandle>,
    layouts: InstanceLayoutCache,
    batch: InstanceBatch,
    frame_draw_calls: u32,
    frame_instances: u32,
    last_frame_draw_calls: u32,
    last_frame_instances: u32,
}

/// Instance manager shared between the caller and the context's reset hooks
pub type SharedInstanceManager = Arc<Mutex<InstanceManager>>;

impl InstanceManager {
    pub fn new(config: &InstancingConfig) -> Self {
        Self {
            config: config.clone(),
            available: false,
            enabled: config.enabled,
            instance_buffer: None,
            shader: None,
            layouts: InstanceLayoutCache::new(config.max_cached_layouts),
            batch: InstanceBatch::new(config.max_instances_per_draw),
            frame_draw_calls: 0,
            frame_instances: 0,
            last_frame_draw_calls: 0,
            last_frame_instances: 0,
        }
    }

    pub fn shared(config: &InstancingConfig) -> SharedInstanceManager {
        Arc::new(Mutex::new(Self::new(config)))
    }

    /// Initialize with the shader at the configured path
    pub fn init<D: GraphicsDevice>(&mut self, ctx: &mut RenderContext<D>) -> Result<(), InstancingError> {
        Self::check_caps(ctx)?;
        let bytecode = load_shader(&self.config.shader_path)?;
        self.init_with_shader(ctx, &bytecode)
    }

    /// Initialize with caller-supplied shader bytecode.
    ///
    /// Any failure releases whatever was created and leaves the manager
    /// unavailable.
    pub fn init_with_shader<D: GraphicsDevice>(
        &mut self,
        ctx: &mut RenderContext<D>,
        bytecode: &[u32],
    ) -> Result<(), InstancingError> {
        self.shutdown(ctx);
        Self::check_caps(ctx)?;

        let result = self.create_resources(ctx, bytecode);
        match &result {
            Ok(()) => {
                self.available = true;
                tracing::info!(
                    "Instancing: ready, {} instances per draw, {} cached layouts",
                    self.batch.capacity(),
                    self.layouts.capacity
                );
            }
            Err(e) => {
                tracing::warn!("Instancing: initialization failed: {}", e);
                self.shutdown(ctx);
            }
        }
        result
    }

    fn check_caps<D: GraphicsDevice>(ctx: &RenderContext<D>) -> Result<(), InstancingError> {
        let caps = ctx.caps();
        if caps.vertex_shader_version < MIN_VERTEX_SHADER_VERSION {
            return Err(InstancingError::Unsupported(format!(
                "vertex shader model {}.{} below {}.{}",
                caps.vertex_shader_version.0,
                caps.vertex_shader_version.1,
                MIN_VERTEX_SHADER_VERSION.0,
                MIN_VERTEX_SHADER_VERSION.1
            )));
        }
        if !caps.stream_offset {
            return Err(InstancingError::Unsupported("no stream offset support".to_string()));
        }
        Ok(())
    }

    fn create_resources<D: GraphicsDevice>(
        &mut self,
        ctx: &mut RenderContext<D>,
        bytecode: &[u32],
    ) -> Result<(), InstancingError> {
        let buffer = create_instance_buffer(ctx.device_mut(), self.batch.capacity())?;
        self.instance_buffer = Some(buffer);
        let shader = ctx
            .create_vertex_shader(bytecode)
            .map_err(|e| InstancingError::ShaderUnavailable(e.to_string()))?;
        self.shader = Some(shader);
        Ok(())
    }

    /// Release every device object and become unavailable
    pub fn shutdown<D: GraphicsDevice>(&mut self, ctx: &mut RenderContext<D>) {
        if let Some(buffer) = self.instance_buffer.take() {
            ctx.device_mut().release_vertex_buffer(buffer);
        }
        if let Some(shader) = self.shader.take() {
            ctx.release_vertex_shader(shader);
        }
        self.layouts.release_all(ctx.device_mut());
        self.batch.reset();
        self.available = false;
    }

    /// Runtime toggle; collection yields nothing while disabled
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_available(&self) -> bool {
        self.available && self.instance_buffer.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.is_available()
    }

    pub fn batch(&self) -> &InstanceBatch {
        &self.batch
    }

    pub fn layout_cache(&self) -> &InstanceLayoutCache {
        &self.layouts
    }

    /// Gather eligible candidates drawn by `renderer` into the batch.
    ///
    /// Returns the number collected; zero while disabled or unavailable.
    pub fn collect(&mut self, candidates: &[InstanceCandidate], renderer: &PolygonRenderer) -> usize {
        self.batch.reset();
        if !self.is_enabled() {
            return 0;
        }
        for candidate in candidates {
            if candidate.renderer != *renderer || !candidate.is_eligible() {
                continue;
            }
            if !self.batch.add_instance(InstanceData::from_world(&candidate.world)) {
                break;
            }
        }
        self.batch.collected_count()
    }

    /// Draw the collected batch with the mesh buffers bound on the record.
    ///
    /// Returns `Ok(false)` without touching the device when fewer than two
    /// instances were collected. On error nothing was drawn and the caller
    /// falls back to per-mesh draws.
    pub fn draw_instanced<D: GraphicsDevice>(
        &mut self,
        ctx: &mut RenderContext<D>,
        renderer: &PolygonRenderer,
        fvf: u32,
    ) -> Result<bool, InstancingError> {
        let count = self.batch.collected_count();
        if count < 2 {
            return Ok(false);
        }
        let (Some(buffer), Some(shader)) = (self.instance_buffer, self.shader) else {
            return Err(InstancingError::Unsupported("instancing not initialized".to_string()));
        };
        if renderer.strip {
            return Err(InstancingError::Unsupported("strip renderers".to_string()));
        }
        ctx.assert_owner_thread();

        let layout = self.layouts.get(ctx.device_mut(), fvf)?;
        if let Err(e) = ctx
            .device_mut()
            .write_vertex_buffer(buffer, 0, self.batch.as_bytes(), LockMode::Discard)
        {
            tracing::warn!("Instancing: instance buffer write failed: {}", e);
            if !layout.cached {
                ctx.device_mut().release_vertex_declaration(layout.declaration);
            }
            return Err(InstancingError::BufferWriteFailed(e.to_string()));
        }

        // Bind the mesh buffers and fixed-function state the constants are read from
        ctx.apply();

        {
            let mut scope = InstancingScope::enter(ctx);
            scope.bind(layout.declaration, shader, buffer, count as u32);
            let constants = build_constants(&scope.device, scope.record.light_environment(), fvf);
            let result = scope.device.set_vertex_shader_constants(0, &constants);
            scope.check("Instancing: SetVertexShaderConstants", result);

            scope.set_texture_stage_state(1, TextureStageState::ColorOp, texture_op::DISABLE);
            scope.set_texture_stage_state(1, TextureStageState::AlphaOp, texture_op::DISABLE);

            if renderer.vertex_index_range == 0 {
                tracing::warn!(
                    "Instancing: empty vertex range (index offset {}, count {}), draw renders nothing",
                    renderer.index_offset,
                    renderer.index_count
                );
            }
            let polygons = renderer.index_count / 3;
            let result = scope.device.draw_indexed_primitive(
                PrimitiveType::TriangleList,
                0,
                renderer.min_vertex_index,
                renderer.vertex_index_range,
                renderer.index_offset,
                polygons,
            );
            if scope.check("Instancing: DrawIndexedPrimitive", result).is_some() {
                scope
                    .stats
                    .record_draw(polygons * count as u32, renderer.vertex_index_range * count as u32);
            }
        }

        ctx.invalidate_shader();
        ctx.invalidate_vertex_buffer_state();
        if !layout.cached {
            ctx.device_mut().release_vertex_declaration(layout.declaration);
        }

        self.frame_draw_calls += 1;
        self.frame_instances += count as u32;
        tracing::trace!("Instancing: drew {} instances of FVF 0x{:x}", count, fvf);
        Ok(true)
    }

    pub fn begin_frame_statistics(&mut self) {
        self.frame_draw_calls = 0;
        self.frame_instances = 0;
    }

    pub fn end_frame_statistics(&mut self) {
        self.last_frame_draw_calls = self.frame_draw_calls;
        self.last_frame_instances = self.frame_instances;
    }

    pub fn last_frame_draw_calls(&self) -> u32 {
        self.last_frame_draw_calls
    }

    pub fn last_frame_instances(&self) -> u32 {
        self.last_frame_instances
    }

    fn release_device_buffer<D: GraphicsDevice>(&mut self, device: &mut D) {
        if let Some(buffer) = self.instance_buffer.take() {
            device.release_vertex_buffer(buffer);
        }
    }

    fn recreate_device_buffer<D: GraphicsDevice>(&mut self, device: &mut D) {
        if !self.available || self.instance_buffer.is_some() {
            return;
        }
        match create_instance_buffer(device, self.batch.capacity()) {
            Ok(buffer) => self.instance_buffer = Some(buffer),
            Err(e) => {
                tracing::warn!("Instancing: {} after reset, disabling", e);
                self.available = false;
            }
        }
    }
}

impl<D: GraphicsDevice> ResourceHook<D> for SharedInstanceManager {
    fn release_resources(&mut self, device: &mut D) {
        self.lock().release_device_buffer(device);
    }

    fn reacquire_resources(&mut self, device: &mut D) {
        self.lock().recreate_device_buffer(device);
    }
}

fn create_instance_buffer<D: GraphicsDevice>(device: &mut D, capacity: usize) -> Result<VertexBufferHandle, InstancingError> {
    let size = capacity as u32 * INSTANCE_STRIDE;
    device
        .create_vertex_buffer(size, BufferUsage::DynamicWriteOnly)
        .map_err(|e| InstancingError::BufferCreateFailed(e.to_string()))
}

/// Read little-endian shader bytecode from disk
fn load_shader(path: &Path) -> Result<Vec<u32>, InstancingError> {
    let bytes = std::fs::read(path)
        .map_err(|e| InstancingError::ShaderUnavailable(format!("{}: {}", path.display(), e)))?;
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(InstancingError::ShaderUnavailable(format!(
            "{}: truncated bytecode ({} bytes)",
            path.display(),
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect())
}

/// Shader constants for the current device state.
///
/// | register | contents |
/// |---|---|
/// | c0..c3 | transposed view * projection |
/// | c4 | ambient |
/// | c5, c6 | light 0 direction toward the light, diffuse |
/// | c7 | material diffuse |
/// | c8 | material emissive |
/// | c9 | lighting enabled, vertex colour present, light count |
/// | c10 | material ambient |
/// | c11, c12 | light 1 direction, diffuse |
/// | c13 | diffuse, ambient, emissive taken from vertex colour |
fn build_constants<D: GraphicsDevice>(
    device: &D,
    environment: Option<&LightEnvironment>,
    fvf: u32,
) -> [[f32; 4]; CONSTANT_COUNT] {
    let mut c = [[0.0f32; 4]; CONSTANT_COUNT];

    let view = device.transform(TransformKind::View);
    let projection = device.transform(TransformKind::Projection);
    let view_projection = (view * projection).transpose();
    c[0..4].copy_from_slice(&math::to_registers(&view_projection));

    let ambient = match environment {
        Some(env) => env.equivalent_ambient,
        None => math::unpack_rgb(device.render_state(RenderState::Ambient)),
    };
    c[4] = rgb0(ambient);

    let mut lights: Vec<(Vector3f, [f32; 3])> = Vec::with_capacity(MAX_SHADER_LIGHTS);
    match environment {
        Some(env) => {
            for light in env.lights.iter().take(MAX_SHADER_LIGHTS) {
                lights.push((light.direction, light.diffuse));
            }
        }
        None => {
            let view_inverse = view.try_inverse().unwrap_or_else(math::identity);
            for index in 0..MAX_SHADER_LIGHTS as u32 {
                if !device.is_light_enabled(index) {
                    continue;
                }
                let light = device.light(index);
                let travel = math::transform_normal(&light.direction, &view_inverse)
                    .try_normalize(f32::EPSILON)
                    .unwrap_or_else(Vector3f::zeros);
                lights.push((-travel, [light.diffuse[0], light.diffuse[1], light.diffuse[2]]));
            }
        }
    }
    for (slot, (direction, diffuse)) in lights.iter().enumerate() {
        let (dir_reg, diffuse_reg) = if slot == 0 { (5, 6) } else { (11, 12) };
        c[dir_reg] = [direction.x, direction.y, direction.z, 0.0];
        c[diffuse_reg] = rgb0(*diffuse);
    }

    let material = device.material();
    c[7] = material.diffuse;
    c[8] = [material.emissive[0], material.emissive[1], material.emissive[2], 0.0];
    c[10] = [material.ambient[0], material.ambient[1], material.ambient[2], 0.0];

    let lighting = device.render_state(RenderState::Lighting) != 0;
    let vertex_colour = fvf & fvf::bits::DIFFUSE != 0;
    c[9] = [
        flag(lighting),
        flag(vertex_colour),
        lights.len() as f32,
        0.0,
    ];

    let from_vertex = |state| {
        let source = device.render_state(state);
        flag(source == material_source::COLOR1 || source == material_source::COLOR2)
    };
    c[13] = [
        from_vertex(RenderState::DiffuseMaterialSource),
        from_vertex(RenderState::AmbientMaterialSource),
        from_vertex(RenderState::EmissiveMaterialSource),
        0.0,
    ];
    c
}

fn rgb0(rgb: [f32; 3]) -> [f32; 4] {
    [rgb[0], rgb[1], rgb[2], 0.0]
}

fn flag(set: bool) -> f32 {
    if set {
        1.0
    } else {
        0.0
    }
}

/// Device bindings disturbed by an instanced draw, put back on drop
struct InstancingScope<'a, D: GraphicsDevice> {
    ctx: &'a mut RenderContext<D>,
    stream0: StreamBinding,
    indices: Option<IndexBufferHandle>,
    fvf: u32,
}

impl<'a, D: GraphicsDevice> InstancingScope<'a, D> {
    fn enter(ctx: &'a mut RenderContext<D>) -> Self {
        let stream0 = ctx.device.stream_source(0);
        let indices = ctx.device.indices();
        let fvf = ctx.device.fvf();
        Self {
            ctx,
            stream0,
            indices,
            fvf,
        }
    }

    fn bind(&mut self, declaration: DeclarationHandle, shader: ShaderHandle, buffer: VertexBufferHandle, count: u32) {
        let ctx = &mut *self.ctx;
        // Legacy format and declaration are never bound together
        let result = ctx.writer().fvf(0);
        ctx.check("Instancing: SetFVF", result);
        let result = ctx.writer().declaration(Some(declaration));
        ctx.check("Instancing: SetVertexDeclaration", result);
        let result = ctx.writer().vertex_shader(Some(shader));
        ctx.check("Instancing: SetVertexShader", result);
        let result = ctx.writer().stream(1, StreamBinding::new(buffer, 0, INSTANCE_STRIDE));
        ctx.check("Instancing: SetStreamSource", result);

        set_frequency(ctx, 0, stream_freq::INDEXED_DATA | count);
        set_frequency(ctx, 1, stream_freq::INSTANCE_DATA | 1);

        let result = ctx.writer().transform(TransformKind::World, &math::identity());
        ctx.check("Instancing: SetTransform", result);
    }

    fn restore(&mut self) {
        let ctx = &mut *self.ctx;
        set_frequency(ctx, 0, 1);
        set_frequency(ctx, 1, 1);

        let result = ctx.writer().stream(1, StreamBinding::NULL);
        ctx.check("Instancing: SetStreamSource", result);
        let result = ctx.writer().vertex_shader(None);
        ctx.check("Instancing: SetVertexShader", result);
        let result = ctx.writer().declaration(None);
        ctx.check("Instancing: SetVertexDeclaration", result);

        if self.stream0.buffer.is_some() {
            let result = ctx.writer().stream(0, self.stream0);
            ctx.check("Instancing: SetStreamSource", result);
        }
        if self.indices.is_some() {
            let result = ctx.writer().indices(self.indices);
            ctx.check("Instancing: SetIndices", result);
        }
        let fvf = if self.fvf != 0 { self.fvf } else { ctx.record.layout().fvf() };
        if fvf != 0 {
            let result = ctx.writer().fvf(fvf);
            ctx.check("Instancing: SetFVF", result);
        }
        ctx.record.mark_dirty(crate::state::DirtyFlags::WORLD);
    }
}

fn set_frequency<D: GraphicsDevice>(ctx: &mut RenderContext<D>, stream: u32, divider: u32) {
    let result = ctx.device.set_stream_source_freq(stream, divider);
    if ctx.check("Instancing: SetStreamSourceFreq", result).is_some() {
        ctx.stats.record_call(StateCategory::Other);
    }
}

impl<D: GraphicsDevice> Deref for InstancingScope<'_, D> {
    type Target = RenderContext<D>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl<D: GraphicsDevice> DerefMut for InstancingScope<'_, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl<D: GraphicsDevice> Drop for InstancingScope<'_, D> {
    fn drop(&mut self) {
        self.restore();
    }
}
