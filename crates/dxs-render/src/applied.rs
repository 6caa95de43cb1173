//! Shadow of the state last written to the device
//!
//! Every entry is `None` while the device value is unknown. Writes routed
//! through [`DeviceWriter`] are skipped when the shadow already holds the
//! requested value, so repeated apply passes over an unchanged record cost
//! no device calls. Anything that writes the device directly must update or
//! forget the matching entry.

use crate::backend::{
    DeclarationHandle, DeviceResult, GraphicsDevice, IndexBufferHandle, Light, Material,
    ShaderHandle, StreamBinding, TextureHandle, TransformKind,
};
use crate::math::Matrix4f;
use crate::state::{MAX_LIGHTS, MAX_TEXTURE_STAGES, MAX_VERTEX_STREAMS};
use crate::stats::{FrameStatistics, StateCategory};

/// Last known device value of each shadowed register
#[derive(Debug, Clone, Default)]
pub struct AppliedState {
    pub(crate) fvf: Option<u32>,
    pub(crate) declaration: Option<Option<DeclarationHandle>>,
    pub(crate) streams: [Option<StreamBinding>; MAX_VERTEX_STREAMS],
    pub(crate) indices: Option<Option<IndexBufferHandle>>,
    pub(crate) vertex_shader: Option<Option<ShaderHandle>>,
    pub(crate) pixel_shader: Option<Option<ShaderHandle>>,
    pub(crate) textures: [Option<Option<TextureHandle>>; MAX_TEXTURE_STAGES],
    pub(crate) material: Option<Material>,
    pub(crate) lights: [Option<Light>; MAX_LIGHTS],
    pub(crate) light_enabled: [Option<bool>; MAX_LIGHTS],
    pub(crate) world: Option<Matrix4f>,
    pub(crate) view: Option<Matrix4f>,
    pub(crate) projection: Option<Matrix4f>,
}

impl AppliedState {
    /// Shadow with every register unknown
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Read the current device values of every shadowed register
    pub fn capture<D: GraphicsDevice>(device: &D) -> Self {
        Self {
            fvf: Some(device.fvf()),
            declaration: Some(device.vertex_declaration()),
            streams: std::array::from_fn(|s| Some(device.stream_source(s as u32))),
            indices: Some(device.indices()),
            vertex_shader: Some(device.vertex_shader()),
            pixel_shader: Some(device.pixel_shader()),
            textures: std::array::from_fn(|s| Some(device.texture(s as u32))),
            material: Some(device.material()),
            lights: std::array::from_fn(|i| Some(device.light(i as u32))),
            light_enabled: std::array::from_fn(|i| Some(device.is_light_enabled(i as u32))),
            world: Some(device.transform(TransformKind::World)),
            view: Some(device.transform(TransformKind::View)),
            projection: Some(device.transform(TransformKind::Projection)),
        }
    }

    /// Forget everything
    pub fn forget_all(&mut self) {
        *self = Self::unknown();
    }

    pub fn forget_layout(&mut self) {
        self.fvf = None;
        self.declaration = None;
    }

    pub fn forget_stream(&mut self, stream: usize) {
        self.streams[stream] = None;
    }

    pub fn forget_indices(&mut self) {
        self.indices = None;
    }

    pub fn forget_shaders(&mut self) {
        self.vertex_shader = None;
        self.pixel_shader = None;
    }

    pub fn forget_transform(&mut self, kind: TransformKind) {
        *self.transform_slot(kind) = None;
    }

    fn transform_slot(&mut self, kind: TransformKind) -> &mut Option<Matrix4f> {
        match kind {
            TransformKind::World => &mut self.world,
            TransformKind::View => &mut self.view,
            TransformKind::Projection => &mut self.projection,
        }
    }

    /// Last known stream binding
    pub fn stream(&self, stream: usize) -> Option<StreamBinding> {
        self.streams[stream]
    }

    pub fn fvf(&self) -> Option<u32> {
        self.fvf
    }

    pub fn declaration(&self) -> Option<Option<DeclarationHandle>> {
        self.declaration
    }
}

/// Store `value` in `slot` after a successful write; skip the write when the
/// slot already holds it. A failed write leaves the register unknown.
fn filtered<T: PartialEq + Copy>(
    slot: &mut Option<T>,
    value: T,
    write: impl FnOnce() -> DeviceResult<()>,
) -> DeviceResult<bool> {
    if *slot == Some(value) {
        return Ok(false);
    }
    match write() {
        Ok(()) => {
            *slot = Some(value);
            Ok(true)
        }
        Err(e) => {
            *slot = None;
            Err(e)
        }
    }
}

/// Shadow-filtered device writes with statistics
pub struct DeviceWriter<'a, D: GraphicsDevice> {
    pub device: &'a mut D,
    pub shadow: &'a mut AppliedState,
    pub stats: &'a mut FrameStatistics,
}

impl<'a, D: GraphicsDevice> DeviceWriter<'a, D> {
    pub fn new(device: &'a mut D, shadow: &'a mut AppliedState, stats: &'a mut FrameStatistics) -> Self {
        Self { device, shadow, stats }
    }

    fn count(&mut self, written: DeviceResult<bool>, category: StateCategory) -> DeviceResult<bool> {
        if let Ok(true) = written {
            self.stats.record_call(category);
        }
        written
    }

    pub fn fvf(&mut self, fvf: u32) -> DeviceResult<bool> {
        let device = &mut *self.device;
        let written = filtered(&mut self.shadow.fvf, fvf, || device.set_fvf(fvf));
        self.count(written, StateCategory::VertexBuffer)
    }

    pub fn declaration(&mut self, decl: Option<DeclarationHandle>) -> DeviceResult<bool> {
        let device = &mut *self.device;
        let written = filtered(&mut self.shadow.declaration, decl, || device.set_vertex_declaration(decl));
        self.count(written, StateCategory::VertexBuffer)
    }

    pub fn stream(&mut self, stream: usize, binding: StreamBinding) -> DeviceResult<bool> {
        let device = &mut *self.device;
        let written = filtered(&mut self.shadow.streams[stream], binding, || {
            device.set_stream_source(stream as u32, binding.buffer, binding.offset, binding.stride)
        });
        self.count(written, StateCategory::VertexBuffer)
    }

    pub fn indices(&mut self, buffer: Option<IndexBufferHandle>) -> DeviceResult<bool> {
        let device = &mut *self.device;
        let written = filtered(&mut self.shadow.indices, buffer, || device.set_indices(buffer));
        self.count(written, StateCategory::IndexBuffer)
    }

    pub fn vertex_shader(&mut self, shader: Option<ShaderHandle>) -> DeviceResult<bool> {
        let device = &mut *self.device;
        let written = filtered(&mut self.shadow.vertex_shader, shader, || device.set_vertex_shader(shader));
        self.count(written, StateCategory::Shader)
    }

    pub fn pixel_shader(&mut self, shader: Option<ShaderHandle>) -> DeviceResult<bool> {
        let device = &mut *self.device;
        let written = filtered(&mut self.shadow.pixel_shader, shader, || device.set_pixel_shader(shader));
        self.count(written, StateCategory::Shader)
    }

    pub fn texture(&mut self, stage: usize, texture: Option<TextureHandle>) -> DeviceResult<bool> {
        let device = &mut *self.device;
        let written = filtered(&mut self.shadow.textures[stage], texture, || {
            device.set_texture(stage as u32, texture)
        });
        self.count(written, StateCategory::Texture)
    }

    pub fn material(&mut self, material: &Material) -> DeviceResult<bool> {
        let device = &mut *self.device;
        let written = filtered(&mut self.shadow.material, *material, || device.set_material(material));
        self.count(written, StateCategory::Material)
    }

    pub fn light(&mut self, index: usize, light: &Light) -> DeviceResult<bool> {
        let device = &mut *self.device;
        let written = filtered(&mut self.shadow.lights[index], *light, || {
            device.set_light(index as u32, light)
        });
        self.count(written, StateCategory::Light)
    }

    pub fn light_enable(&mut self, index: usize, enable: bool) -> DeviceResult<bool> {
        let device = &mut *self.device;
        let written = filtered(&mut self.shadow.light_enabled[index], enable, || {
            device.light_enable(index as u32, enable)
        });
        self.count(written, StateCategory::Light)
    }

    pub fn transform(&mut self, kind: TransformKind, matrix: &Matrix4f) -> DeviceResult<bool> {
        let device = &mut *self.device;
        let written = filtered(self.shadow.transform_slot(kind), *matrix, || device.set_transform(kind, matrix));
        self.count(written, StateCategory::Matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::{DeviceCall, NullDevice};
    use crate::backend::VertexBufferHandle;

    #[test]
    fn test_repeated_write_is_filtered() {
        let mut device = NullDevice::new();
        let mut shadow = AppliedState::unknown();
        let mut stats = FrameStatistics::new();
        let mut writer = DeviceWriter::new(&mut device, &mut shadow, &mut stats);

        let binding = StreamBinding::new(VertexBufferHandle(3), 0, 24);
        assert_eq!(writer.stream(0, binding), Ok(true));
        assert_eq!(writer.stream(0, binding), Ok(false));
        assert_eq!(writer.fvf(0x142), Ok(true));
        assert_eq!(writer.fvf(0x142), Ok(false));

        assert_eq!(stats.current().vertex_buffer_changes, 2);
        assert_eq!(device.calls().len(), 2);
    }

    #[test]
    fn test_capture_matches_device() {
        let mut device = NullDevice::new();
        device.set_fvf(0x142).unwrap();
        let shadow = AppliedState::capture(&device);
        assert_eq!(shadow.fvf(), Some(0x142));
        assert_eq!(shadow.declaration(), Some(None));
        assert_eq!(shadow.stream(2), Some(StreamBinding::NULL));
    }

    #[test]
    fn test_failed_write_forgets_register() {
        let mut device = NullDevice::new();
        let mut shadow = AppliedState::capture(&device);
        let mut stats = FrameStatistics::new();
        let mut writer = DeviceWriter::new(&mut device, &mut shadow, &mut stats);

        // Unknown declaration handle is rejected by the device
        assert!(writer.declaration(Some(DeclarationHandle(77))).is_err());
        assert_eq!(shadow.declaration(), None);
        assert_eq!(stats.current().device_calls, 0);
    }

    #[test]
    fn test_forget_forces_rewrite() {
        let mut device = NullDevice::new();
        let mut shadow = AppliedState::capture(&device);
        shadow.forget_indices();
        let mut stats = FrameStatistics::new();
        let mut writer = DeviceWriter::new(&mut device, &mut shadow, &mut stats);
        assert_eq!(writer.indices(None), Ok(true));
        assert_eq!(device.calls(), &[DeviceCall::SetIndices(None)]);
    }
}
