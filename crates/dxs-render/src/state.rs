//! Render-state record
//!
//! The canonical in-memory mirror of the device state the core manages.
//! Setters only mutate memory and mark the matching dirty bit; nothing here
//! talks to the device. The apply engine reads the record and clears the
//! dirty mask.

use std::num::NonZeroU32;
use std::sync::Arc;

use bitflags::bitflags;

use crate::backend::{
    DeclarationHandle, Light, Material, ShaderHandle, TransformKind, RENDER_STATE_SLOTS,
    TEXTURE_STAGE_STATE_SLOTS,
};
use crate::dynamic::{
    DynamicIndexAccess, DynamicSortingAccess, DynamicSortingIndexAccess, DynamicVertexAccess,
};
use crate::light::LightEnvironment;
use crate::math::{self, Matrix4f};
use crate::resource::{
    EngineIndexBuffer, EngineVertexBuffer, SortingIndexBuffer, SortingVertexBuffer, Texture,
};

/// Vertex streams tracked by the record
pub const MAX_VERTEX_STREAMS: usize = 4;
/// Texture stages tracked by the record
pub const MAX_TEXTURE_STAGES: usize = 8;
/// Fixed-function lights tracked by the record
pub const MAX_LIGHTS: usize = 4;

/// Value stored in the immediate state caches when the device value is unknown
pub const UNKNOWN_STATE: u32 = 0x1234_5678;

bitflags! {
    /// Categories with pending changes not yet pushed to the device
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirtyFlags: u32 {
        const SHADER = 1 << 0;
        const TEXTURE0 = 1 << 1;
        const TEXTURE1 = 1 << 2;
        const TEXTURE2 = 1 << 3;
        const TEXTURE3 = 1 << 4;
        const TEXTURE4 = 1 << 5;
        const TEXTURE5 = 1 << 6;
        const TEXTURE6 = 1 << 7;
        const TEXTURE7 = 1 << 8;
        const MATERIAL = 1 << 9;
        const LIGHT0 = 1 << 10;
        const LIGHT1 = 1 << 11;
        const LIGHT2 = 1 << 12;
        const LIGHT3 = 1 << 13;
        const WORLD = 1 << 14;
        const VIEW = 1 << 15;
        const VERTEX_BUFFER = 1 << 16;
        const INDEX_BUFFER = 1 << 17;
        /// Record world matrix is known to be identity
        const WORLD_IDENTITY = 1 << 30;
        /// Record view matrix is known to be identity
        const VIEW_IDENTITY = 1 << 31;

        const TEXTURES = Self::TEXTURE0.bits() | Self::TEXTURE1.bits() | Self::TEXTURE2.bits()
            | Self::TEXTURE3.bits() | Self::TEXTURE4.bits() | Self::TEXTURE5.bits()
            | Self::TEXTURE6.bits() | Self::TEXTURE7.bits();
        const LIGHTS = Self::LIGHT0.bits() | Self::LIGHT1.bits() | Self::LIGHT2.bits()
            | Self::LIGHT3.bits();
        /// Bits that survive an apply pass
        const PERSISTENT = Self::WORLD_IDENTITY.bits() | Self::VIEW_IDENTITY.bits();
        /// Every state category
        const ALL_CATEGORIES = Self::SHADER.bits() | Self::TEXTURES.bits() | Self::MATERIAL.bits()
            | Self::LIGHTS.bits() | Self::WORLD.bits() | Self::VIEW.bits()
            | Self::VERTEX_BUFFER.bits() | Self::INDEX_BUFFER.bits();
    }
}

impl DirtyFlags {
    /// Dirty bit of texture stage `stage`
    pub fn texture(stage: usize) -> Self {
        debug_assert!(stage < MAX_TEXTURE_STAGES);
        Self::from_bits_truncate(Self::TEXTURE0.bits() << stage)
    }

    /// Dirty bit of light `index`
    pub fn light(index: usize) -> Self {
        debug_assert!(index < MAX_LIGHTS);
        Self::from_bits_truncate(Self::LIGHT0.bits() << index)
    }

    /// Whether any state category (ignoring the identity markers) is pending
    pub fn has_pending(&self) -> bool {
        self.intersects(Self::ALL_CATEGORIES)
    }
}

/// Storage class of a bound buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    None,
    Engine,
    DynamicEngine,
    Sorting,
    DynamicSorting,
}

impl BufferKind {
    /// CPU-side sorting storage that must be materialised before drawing
    pub fn is_sorting(&self) -> bool {
        matches!(self, Self::Sorting | Self::DynamicSorting)
    }

    /// Device-resident storage that can be drawn directly
    pub fn is_device(&self) -> bool {
        matches!(self, Self::Engine | Self::DynamicEngine)
    }
}

/// What a vertex stream is bound to
#[derive(Debug, Clone, Default)]
pub enum VertexSource {
    #[default]
    None,
    Engine(Arc<EngineVertexBuffer>),
    DynamicEngine(DynamicVertexAccess),
    Sorting(Arc<SortingVertexBuffer>),
    DynamicSorting(DynamicSortingAccess),
}

impl VertexSource {
    pub fn kind(&self) -> BufferKind {
        match self {
            Self::None => BufferKind::None,
            Self::Engine(_) => BufferKind::Engine,
            Self::DynamicEngine(_) => BufferKind::DynamicEngine,
            Self::Sorting(_) => BufferKind::Sorting,
            Self::DynamicSorting(_) => BufferKind::DynamicSorting,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Format of the bound vertices, zero when unknown
    pub fn fvf(&self) -> u32 {
        match self {
            Self::Engine(vb) => vb.fvf(),
            Self::DynamicEngine(access) => access.fvf(),
            Self::Sorting(_) | Self::DynamicSorting(_) => crate::fvf::FVF_XYZNDUV2,
            Self::None => 0,
        }
    }

    /// First vertex of the bound range within its storage
    pub fn vertex_offset(&self) -> u32 {
        match self {
            Self::DynamicEngine(access) => access.vertex_offset(),
            Self::DynamicSorting(access) => access.vertex_offset(),
            _ => 0,
        }
    }

    /// Vertices available in the bound range
    pub fn vertex_count(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Engine(vb) => vb.vertex_count(),
            Self::DynamicEngine(access) => access.vertex_count(),
            Self::Sorting(vb) => vb.vertex_count(),
            Self::DynamicSorting(access) => access.vertex_count(),
        }
    }

    /// Whether two sources refer to the same storage and range
    pub fn same_binding(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Engine(a), Self::Engine(b)) => Arc::ptr_eq(a, b),
            (Self::DynamicEngine(a), Self::DynamicEngine(b)) => a == b,
            (Self::Sorting(a), Self::Sorting(b)) => Arc::ptr_eq(a, b),
            (Self::DynamicSorting(a), Self::DynamicSorting(b)) => {
                Arc::ptr_eq(a.buffer(), b.buffer()) && a.vertex_offset() == b.vertex_offset()
            }
            _ => false,
        }
    }
}

/// What the index input is bound to
#[derive(Debug, Clone, Default)]
pub enum IndexSource {
    #[default]
    None,
    Engine(Arc<EngineIndexBuffer>),
    DynamicEngine(DynamicIndexAccess),
    Sorting(Arc<SortingIndexBuffer>),
    DynamicSorting(DynamicSortingIndexAccess),
}

impl IndexSource {
    pub fn kind(&self) -> BufferKind {
        match self {
            Self::None => BufferKind::None,
            Self::Engine(_) => BufferKind::Engine,
            Self::DynamicEngine(_) => BufferKind::DynamicEngine,
            Self::Sorting(_) => BufferKind::Sorting,
            Self::DynamicSorting(_) => BufferKind::DynamicSorting,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// First index of the bound range within its storage
    pub fn index_offset(&self) -> u32 {
        match self {
            Self::DynamicEngine(access) => access.index_offset(),
            Self::DynamicSorting(access) => access.index_offset(),
            _ => 0,
        }
    }

    /// Device handle for device-resident kinds
    pub fn device_handle(&self) -> Option<crate::backend::IndexBufferHandle> {
        match self {
            Self::Engine(ib) => Some(ib.handle()),
            Self::DynamicEngine(access) => Some(access.buffer()),
            _ => None,
        }
    }

    /// Indices visible through this source, starting at its index offset
    pub fn sorting_indices(&self) -> Option<&[u16]> {
        match self {
            Self::Sorting(ib) => Some(ib.indices()),
            Self::DynamicSorting(access) => Some(access.buffer().indices()),
            _ => None,
        }
    }
}

/// Active vertex-layout mode
///
/// A structured declaration and a legacy format can never both be
/// asserted; the variants make that state unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    /// Nothing asserted; apply derives a legacy format from the bound buffer
    Unset,
    /// Explicit clear: both device registers are emptied and nothing is asserted
    Cleared { owner: &'static str },
    Legacy { fvf: NonZeroU32, owner: &'static str },
    Structured { decl: DeclarationHandle, owner: &'static str },
}

impl LayoutMode {
    /// Legacy format, zero unless in legacy mode
    pub fn fvf(&self) -> u32 {
        match self {
            Self::Legacy { fvf, .. } => fvf.get(),
            _ => 0,
        }
    }

    /// Structured declaration, if in structured mode
    pub fn declaration(&self) -> Option<DeclarationHandle> {
        match self {
            Self::Structured { decl, .. } => Some(*decl),
            _ => None,
        }
    }

    /// Call site that last set the layout
    pub fn owner(&self) -> Option<&'static str> {
        match self {
            Self::Unset => None,
            Self::Cleared { owner } | Self::Legacy { owner, .. } | Self::Structured { owner, .. } => {
                Some(*owner)
            }
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy { .. })
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured { .. })
    }
}

/// In-memory mirror of the managed device state
#[derive(Debug, Clone)]
pub struct RenderStateRecord {
    pub(crate) streams: [VertexSource; MAX_VERTEX_STREAMS],
    pub(crate) index: IndexSource,
    /// Base vertex added to every index of the bound index range
    pub(crate) index_base_offset: u32,
    pub(crate) layout: LayoutMode,
    pub(crate) textures: [Option<Arc<Texture>>; MAX_TEXTURE_STAGES],
    pub(crate) material: Option<Material>,
    pub(crate) lights: [Option<Light>; MAX_LIGHTS],
    pub(crate) light_environment: Option<LightEnvironment>,
    pub(crate) world: Matrix4f,
    pub(crate) view: Matrix4f,
    pub(crate) projection: Matrix4f,
    pub(crate) vertex_shader: Option<ShaderHandle>,
    pub(crate) pixel_shader: Option<ShaderHandle>,
    pub(crate) render_states: [u32; RENDER_STATE_SLOTS],
    pub(crate) texture_stage_states: [[u32; TEXTURE_STAGE_STATE_SLOTS]; MAX_TEXTURE_STAGES],
    pub(crate) dirty: DirtyFlags,
}

impl RenderStateRecord {
    /// Create a record with every category dirty and every cache unknown
    pub fn new() -> Self {
        Self {
            streams: std::array::from_fn(|_| VertexSource::None),
            index: IndexSource::None,
            index_base_offset: 0,
            layout: LayoutMode::Unset,
            textures: std::array::from_fn(|_| None),
            material: None,
            lights: [None; MAX_LIGHTS],
            light_environment: None,
            world: math::identity(),
            view: math::identity(),
            projection: math::identity(),
            vertex_shader: None,
            pixel_shader: None,
            render_states: [UNKNOWN_STATE; RENDER_STATE_SLOTS],
            texture_stage_states: [[UNKNOWN_STATE; TEXTURE_STAGE_STATE_SLOTS]; MAX_TEXTURE_STAGES],
            dirty: DirtyFlags::ALL_CATEGORIES,
        }
    }

    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    /// Mark categories dirty
    pub fn mark_dirty(&mut self, flags: DirtyFlags) {
        self.dirty |= flags;
    }

    /// Drop every pending bit except the identity markers
    pub(crate) fn clear_applied(&mut self) {
        self.dirty &= DirtyFlags::PERSISTENT;
    }

    // Buffers

    pub fn vertex_source(&self, stream: usize) -> &VertexSource {
        &self.streams[stream]
    }

    /// Bind `source` to `stream`, releasing the previous occupant
    pub fn set_vertex_source(&mut self, stream: usize, source: VertexSource) {
        self.streams[stream] = source;
        self.dirty |= DirtyFlags::VERTEX_BUFFER;
    }

    pub fn index_source(&self) -> &IndexSource {
        &self.index
    }

    pub fn index_base_offset(&self) -> u32 {
        self.index_base_offset
    }

    pub fn set_index_source(&mut self, source: IndexSource, index_base_offset: u32) {
        self.index = source;
        self.index_base_offset = index_base_offset;
        self.dirty |= DirtyFlags::INDEX_BUFFER;
    }

    /// Change the base vertex of the bound index range without rebinding
    pub fn set_index_base_offset(&mut self, index_base_offset: u32) {
        self.index_base_offset = index_base_offset;
    }

    // Layout

    pub fn layout(&self) -> LayoutMode {
        self.layout
    }

    /// Enter structured mode; the legacy format is implicitly zero
    pub fn set_declaration(&mut self, decl: DeclarationHandle, owner: &'static str) {
        self.layout = LayoutMode::Structured { decl, owner };
        self.dirty |= DirtyFlags::VERTEX_BUFFER;
    }

    /// Enter legacy mode, or the explicit clear state for format zero.
    ///
    /// A legacy format replaces any vertex shader selection.
    pub fn set_fvf(&mut self, fvf: u32, owner: &'static str) {
        self.layout = match NonZeroU32::new(fvf) {
            Some(fvf) => LayoutMode::Legacy { fvf, owner },
            None => LayoutMode::Cleared { owner },
        };
        self.vertex_shader = None;
        self.dirty |= DirtyFlags::VERTEX_BUFFER | DirtyFlags::SHADER;
    }

    /// Forget the tracked layout so the next apply must rebind explicitly
    pub fn clear_layout_tracking(&mut self) {
        self.layout = LayoutMode::Unset;
        self.dirty |= DirtyFlags::VERTEX_BUFFER;
    }

    // Textures, material, lights

    pub fn texture(&self, stage: usize) -> Option<&Arc<Texture>> {
        self.textures[stage].as_ref()
    }

    pub fn set_texture(&mut self, stage: usize, texture: Option<Arc<Texture>>) {
        let same = match (&self.textures[stage], &texture) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if !same {
            self.textures[stage] = texture;
            self.dirty |= DirtyFlags::texture(stage);
        }
    }

    pub fn material(&self) -> Option<&Material> {
        self.material.as_ref()
    }

    pub fn set_material(&mut self, material: Option<Material>) {
        if self.material != material {
            self.material = material;
            self.dirty |= DirtyFlags::MATERIAL;
        }
    }

    pub fn light(&self, index: usize) -> Option<&Light> {
        self.lights[index].as_ref()
    }

    /// Set or disable light `index`
    pub fn set_light(&mut self, index: usize, light: Option<Light>) {
        self.lights[index] = light;
        self.dirty |= DirtyFlags::light(index);
    }

    pub fn light_environment(&self) -> Option<&LightEnvironment> {
        self.light_environment.as_ref()
    }

    pub(crate) fn set_light_environment(&mut self, environment: Option<LightEnvironment>) {
        self.light_environment = environment;
    }

    // Transforms

    pub fn transform(&self, kind: TransformKind) -> Matrix4f {
        match kind {
            TransformKind::World => self.world,
            TransformKind::View => self.view,
            TransformKind::Projection => self.projection,
        }
    }

    /// Store a world or view matrix; projection is written immediately by the context
    pub fn set_transform(&mut self, kind: TransformKind, matrix: &Matrix4f) {
        match kind {
            TransformKind::World => {
                self.world = *matrix;
                self.dirty |= DirtyFlags::WORLD;
                self.dirty -= DirtyFlags::WORLD_IDENTITY;
            }
            TransformKind::View => {
                self.view = *matrix;
                self.dirty |= DirtyFlags::VIEW;
                self.dirty -= DirtyFlags::VIEW_IDENTITY;
            }
            TransformKind::Projection => self.projection = *matrix,
        }
    }

    /// Set the world matrix to identity; a no-op when it already is
    pub fn set_world_identity(&mut self) {
        if self.dirty.contains(DirtyFlags::WORLD_IDENTITY) {
            return;
        }
        self.world = math::identity();
        self.dirty |= DirtyFlags::WORLD | DirtyFlags::WORLD_IDENTITY;
    }

    /// Set the view matrix to identity; a no-op when it already is
    pub fn set_view_identity(&mut self) {
        if self.dirty.contains(DirtyFlags::VIEW_IDENTITY) {
            return;
        }
        self.view = math::identity();
        self.dirty |= DirtyFlags::VIEW | DirtyFlags::VIEW_IDENTITY;
    }

    /// Store a transform that was already written to the device out of band
    pub(crate) fn sync_transform(&mut self, kind: TransformKind, matrix: &Matrix4f) {
        let identity = math::is_identity(matrix);
        let marker = match kind {
            TransformKind::World => {
                self.world = *matrix;
                DirtyFlags::WORLD_IDENTITY
            }
            TransformKind::View => {
                self.view = *matrix;
                DirtyFlags::VIEW_IDENTITY
            }
            TransformKind::Projection => {
                self.projection = *matrix;
                return;
            }
        };
        self.dirty.set(marker, identity);
    }

    // Shaders

    pub fn vertex_shader(&self) -> Option<ShaderHandle> {
        self.vertex_shader
    }

    pub fn pixel_shader(&self) -> Option<ShaderHandle> {
        self.pixel_shader
    }

    pub fn set_vertex_shader(&mut self, shader: Option<ShaderHandle>) {
        self.vertex_shader = shader;
        self.dirty |= DirtyFlags::SHADER;
    }

    pub fn set_pixel_shader(&mut self, shader: Option<ShaderHandle>) {
        self.pixel_shader = shader;
        self.dirty |= DirtyFlags::SHADER;
    }

    /// Reset the immediate render-state and texture-stage caches to unknown
    pub(crate) fn forget_state_caches(&mut self) {
        self.render_states = [UNKNOWN_STATE; RENDER_STATE_SLOTS];
        self.texture_stage_states = [[UNKNOWN_STATE; TEXTURE_STAGE_STATE_SLOTS]; MAX_TEXTURE_STAGES];
    }

    /// Drop every buffer binding
    pub(crate) fn unbind_buffers(&mut self) {
        for stream in 0..MAX_VERTEX_STREAMS {
            self.set_vertex_source(stream, VertexSource::None);
        }
        self.set_index_source(IndexSource::None, 0);
    }
}

impl Default for RenderStateRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fvf::{FVF_XYZDUV1, FVF_XYZNDUV2};

    #[test]
    fn test_dirty_helpers() {
        assert_eq!(DirtyFlags::texture(0), DirtyFlags::TEXTURE0);
        assert_eq!(DirtyFlags::texture(7), DirtyFlags::TEXTURE7);
        assert_eq!(DirtyFlags::light(3), DirtyFlags::LIGHT3);
        assert!(!DirtyFlags::PERSISTENT.has_pending());
        assert!(!DirtyFlags::ALL_CATEGORIES.intersects(DirtyFlags::PERSISTENT));
    }

    #[test]
    fn test_layout_modes_are_exclusive() {
        let mut record = RenderStateRecord::new();
        let decl = DeclarationHandle(9);

        record.set_declaration(decl, "test");
        assert_eq!(record.layout().declaration(), Some(decl));
        assert_eq!(record.layout().fvf(), 0);

        record.set_fvf(FVF_XYZDUV1, "test");
        assert_eq!(record.layout().declaration(), None);
        assert_eq!(record.layout().fvf(), FVF_XYZDUV1);

        record.set_declaration(decl, "test");
        assert_eq!(record.layout().fvf(), 0);
    }

    #[test]
    fn test_fvf_zero_is_explicit_clear() {
        let mut record = RenderStateRecord::new();
        record.set_fvf(FVF_XYZNDUV2, "mesh");
        record.clear_applied();
        record.set_fvf(0, "clear");

        assert_eq!(record.layout(), LayoutMode::Cleared { owner: "clear" });
        assert!(record.dirty().contains(DirtyFlags::VERTEX_BUFFER));
        assert!(record.dirty().contains(DirtyFlags::SHADER));
    }

    #[test]
    fn test_world_identity_fast_path() {
        let mut record = RenderStateRecord::new();
        record.set_world_identity();
        record.clear_applied();
        assert!(record.dirty().contains(DirtyFlags::WORLD_IDENTITY));

        record.set_world_identity();
        assert!(!record.dirty().contains(DirtyFlags::WORLD));

        record.set_transform(TransformKind::World, &math::translation(1.0, 0.0, 0.0));
        assert!(record.dirty().contains(DirtyFlags::WORLD));
        assert!(!record.dirty().contains(DirtyFlags::WORLD_IDENTITY));
    }

    #[test]
    fn test_clear_applied_keeps_identity_bits() {
        let mut record = RenderStateRecord::new();
        record.set_view_identity();
        record.clear_applied();
        assert_eq!(record.dirty(), DirtyFlags::VIEW_IDENTITY);
    }

    #[test]
    fn test_same_texture_is_not_dirty() {
        let mut record = RenderStateRecord::new();
        record.clear_applied();
        record.set_texture(2, None);
        assert!(!record.dirty().has_pending());
    }

    #[test]
    fn test_sorting_source_reports_sorting_format() {
        let source = VertexSource::Sorting(Arc::new(SortingVertexBuffer::default()));
        assert!(source.kind().is_sorting());
        assert_eq!(source.fvf(), FVF_XYZNDUV2);
        assert!(VertexSource::None.kind() == BufferKind::None);
    }
}
