//! Dirty-flag apply engine
//!
//! Pushes every dirty category of the render-state record to the device in
//! a fixed order: shaders, textures (ascending stage), material, lights
//! (ascending index), world, view, vertex layout and streams, indices. All
//! writes go through the applied-state shadow, so a category whose value
//! did not change since the last pass costs no device call.

use crate::backend::{GraphicsDevice, Material, StreamBinding, TransformKind};
use crate::context::RenderContext;
use crate::state::{DirtyFlags, LayoutMode, VertexSource};
use crate::telemetry::PipelineEvent;

impl<D: GraphicsDevice> RenderContext<D> {
    /// Push all pending record changes to the device
    pub fn apply(&mut self) {
        self.assert_owner_thread();
        let dirty = self.record.dirty();
        if !dirty.has_pending() {
            return;
        }

        if dirty.contains(DirtyFlags::SHADER) {
            self.apply_shaders();
        }
        if dirty.intersects(DirtyFlags::TEXTURES) {
            self.apply_textures(dirty);
        }
        if dirty.contains(DirtyFlags::MATERIAL) {
            let material = self.record.material.unwrap_or_else(Material::null);
            let result = self.writer().material(&material);
            self.check("SetMaterial", result);
        }
        if dirty.intersects(DirtyFlags::LIGHTS) {
            self.apply_lights(dirty);
        }
        if dirty.contains(DirtyFlags::WORLD) {
            let world = self.record.world;
            let result = self.writer().transform(TransformKind::World, &world);
            self.check("SetTransform(World)", result);
        }
        if dirty.contains(DirtyFlags::VIEW) {
            let view = self.record.view;
            let result = self.writer().transform(TransformKind::View, &view);
            self.check("SetTransform(View)", result);
        }
        if dirty.contains(DirtyFlags::VERTEX_BUFFER) {
            self.apply_layout();
            self.apply_streams();
        }
        if dirty.contains(DirtyFlags::INDEX_BUFFER) && !self.record.index.kind().is_sorting() {
            let indices = self.record.index.device_handle();
            let result = self.writer().indices(indices);
            self.check("SetIndices", result);
        }

        self.record.clear_applied();

        if self.config.debug.validate_pipeline {
            self.validate_layout_mode("Apply");
        }
    }

    fn apply_shaders(&mut self) {
        let (vs, ps) = (self.record.vertex_shader, self.record.pixel_shader);
        let result = self.writer().vertex_shader(vs);
        self.check("SetVertexShader", result);
        let result = self.writer().pixel_shader(ps);
        self.check("SetPixelShader", result);
    }

    fn apply_textures(&mut self, dirty: DirtyFlags) {
        for stage in 0..self.limits.texture_stages {
            if !dirty.contains(DirtyFlags::texture(stage)) {
                continue;
            }
            let texture = self.record.textures[stage].as_ref().map(|t| t.handle());
            let result = self.writer().texture(stage, texture);
            self.check("SetTexture", result);
        }
    }

    fn apply_lights(&mut self, dirty: DirtyFlags) {
        for index in 0..self.limits.lights {
            if !dirty.contains(DirtyFlags::light(index)) {
                continue;
            }
            match self.record.lights[index] {
                Some(light) => {
                    let result = self.writer().light(index, &light);
                    if self.check("SetLight", result).is_some() {
                        let result = self.writer().light_enable(index, true);
                        self.check("LightEnable", result);
                    }
                }
                None => {
                    let result = self.writer().light_enable(index, false);
                    self.check("LightEnable", result);
                }
            }
        }
    }

    /// Resolve the layout mode into the two device layout registers.
    ///
    /// The register being vacated is always written first, and the other
    /// one is only written when that succeeded, so a declaration and a
    /// non-zero format are never bound together.
    fn apply_layout(&mut self) {
        match self.record.layout {
            LayoutMode::Structured { decl, .. } => {
                let result = self.writer().fvf(0);
                if self.check("SetFVF(0)", result).is_some() {
                    let result = self.writer().declaration(Some(decl));
                    self.check("SetVertexDeclaration", result);
                }
            }
            LayoutMode::Legacy { fvf, .. } => self.write_legacy_layout(fvf.get()),
            LayoutMode::Cleared { .. } => {
                let result = self.writer().declaration(None);
                self.check("SetVertexDeclaration(null)", result);
                let result = self.writer().fvf(0);
                self.check("SetFVF(0)", result);
            }
            LayoutMode::Unset => {
                let fvf = self.record.streams[0].fvf();
                if fvf != 0 {
                    self.write_legacy_layout(fvf);
                } else {
                    let owner = self.record.layout.owner();
                    self.report(PipelineEvent::LayoutUntouched { owner });
                }
            }
        }
    }

    fn write_legacy_layout(&mut self, fvf: u32) {
        let result = self.writer().declaration(None);
        if self.check("SetVertexDeclaration(null)", result).is_some() {
            let result = self.writer().fvf(fvf);
            self.check("SetFVF", result);
        }
    }

    fn apply_streams(&mut self) {
        for stream in 0..self.limits.vertex_streams {
            let binding = match &self.record.streams[stream] {
                VertexSource::None => StreamBinding::NULL,
                VertexSource::Engine(vb) => {
                    let stride = vb.stride();
                    if stride == 0 && vb.vertex_count() > 0 {
                        self.report(PipelineEvent::ZeroStride { stream: stream as u32 });
                        debug_assert!(false, "zero stride bound to a non-empty vertex buffer");
                        continue;
                    }
                    StreamBinding::new(vb.handle(), 0, stride)
                }
                VertexSource::DynamicEngine(access) => {
                    let stride = access.stride();
                    StreamBinding::new(access.buffer(), access.vertex_offset() * stride, stride)
                }
                // Materialised into the dynamic rings at draw time
                VertexSource::Sorting(_) | VertexSource::DynamicSorting(_) => continue,
            };
            let result = self.writer().stream(stream, binding);
            self.check("SetStreamSource", result);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::backend::null::{DeviceCall, NullDevice};
    use crate::backend::{DeclarationHandle, GraphicsDevice, Light, StreamBinding, TransformKind};
    use crate::context::RenderContext;
    use crate::dynamic::DynamicSortingAccess;
    use crate::fvf::{FVF_XYZDUV1, FVF_XYZNDUV2};
    use crate::math::{self, Vector3f};
    use crate::resource::SortingVertexBuffer;
    use crate::state::DirtyFlags;
    use crate::vertex::VertexXyzNDUV2;
    use crate::telemetry::{PipelineEvent, RecordingObserver};
    use dxs_core::Config;

    fn context() -> (RenderContext<NullDevice>, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::new());
        let ctx = RenderContext::with_observer(NullDevice::new(), Config::default(), observer.clone()).unwrap();
        (ctx, observer)
    }

    #[test]
    fn test_fresh_context_applies_nothing() {
        let (mut ctx, _) = context();
        ctx.device_mut().clear_calls();
        ctx.apply();
        assert_eq!(ctx.device().state_call_count(), 0);
        assert!(!ctx.record().dirty().has_pending());
    }

    #[test]
    fn test_unchanged_categories_issue_no_calls() {
        let (mut ctx, _) = context();
        let vb = ctx.create_vertex_buffer(FVF_XYZNDUV2, 16).unwrap();
        ctx.set_vertex_buffer(0, Some(&vb));
        ctx.set_transform(TransformKind::World, &math::translation(1.0, 2.0, 3.0));
        ctx.apply();

        ctx.device_mut().clear_calls();
        ctx.set_vertex_buffer(0, Some(&vb));
        ctx.set_transform(TransformKind::World, &math::translation(1.0, 2.0, 3.0));
        ctx.apply();
        assert_eq!(ctx.device().state_call_count(), 0);
    }

    #[test]
    fn test_structured_layout_zeroes_fvf_first() {
        let (mut ctx, _) = context();
        ctx.set_fvf(FVF_XYZDUV1, "mesh");
        ctx.apply();
        let decl = ctx.bind_decl(FVF_XYZNDUV2, "mesh").unwrap();
        ctx.device_mut().clear_calls();
        ctx.apply();

        let calls = ctx.device().calls();
        let fvf_at = calls.iter().position(|c| *c == DeviceCall::SetFvf(0)).unwrap();
        let decl_at = calls
            .iter()
            .position(|c| *c == DeviceCall::SetVertexDeclaration(Some(decl)))
            .unwrap();
        assert!(fvf_at < decl_at);
        assert_eq!(ctx.device().fvf(), 0);
    }

    #[test]
    fn test_legacy_layout_nulls_declaration_first() {
        let (mut ctx, _) = context();
        ctx.bind_decl(FVF_XYZNDUV2, "mesh").unwrap();
        ctx.apply();
        ctx.device_mut().clear_calls();
        ctx.set_fvf(FVF_XYZDUV1, "mesh");
        ctx.apply();

        assert_eq!(
            &ctx.device().calls()[..2],
            &[DeviceCall::SetVertexDeclaration(None), DeviceCall::SetFvf(FVF_XYZDUV1)]
        );
    }

    #[test]
    fn test_unset_layout_derives_from_stream0() {
        let (mut ctx, observer) = context();
        let vb = ctx.create_vertex_buffer(FVF_XYZDUV1, 8).unwrap();
        ctx.set_vertex_buffer(0, Some(&vb));
        ctx.apply();
        assert_eq!(ctx.device().fvf(), FVF_XYZDUV1);
        assert_eq!(ctx.device().stream_source(0), StreamBinding::new(vb.handle(), 0, 24));
        assert_eq!(observer.count(|e| matches!(e, PipelineEvent::LayoutUntouched { .. })), 0);
    }

    #[test]
    fn test_unset_layout_derives_from_sorting_stream0() {
        let (mut ctx, _) = context();
        let vertices = Arc::new(SortingVertexBuffer::new(vec![VertexXyzNDUV2::at([0.0, 0.0, 1.0]); 4]));
        ctx.set_dynamic_sorting_vertex_buffer(DynamicSortingAccess::new(vertices, 1, 3));
        ctx.apply();
        assert_eq!(ctx.device().fvf(), FVF_XYZNDUV2);
        assert_eq!(ctx.device().vertex_declaration(), None);
        assert_eq!(ctx.device().stream_source(0), StreamBinding::NULL);
    }

    #[test]
    fn test_unset_layout_without_buffer_leaves_device_untouched() {
        let (mut ctx, observer) = context();
        let decl = ctx.bind_decl(FVF_XYZNDUV2, "mesh").unwrap();
        ctx.apply();
        ctx.record.clear_layout_tracking();
        ctx.device_mut().clear_calls();
        ctx.apply();

        assert_eq!(ctx.device().vertex_declaration(), Some(decl));
        assert_eq!(ctx.device().count_calls(|c| matches!(c, DeviceCall::SetFvf(_))), 0);
        assert_eq!(observer.count(|e| matches!(e, PipelineEvent::LayoutUntouched { .. })), 1);
    }

    #[test]
    fn test_dynamic_stream_offset_uses_access_stride() {
        let (mut ctx, _) = context();
        let first = ctx.allocate_dynamic_vertices(FVF_XYZDUV1, 3).unwrap();
        let second = ctx.allocate_dynamic_vertices(FVF_XYZDUV1, 3).unwrap();
        ctx.set_dynamic_vertex_buffer(second);
        ctx.apply();
        let binding = ctx.device().stream_source(0);
        assert_eq!(binding.stride, 24);
        assert_eq!(binding.offset, second.vertex_offset() * 24);
        assert_eq!(binding.buffer, Some(first.buffer()));
    }

    #[test]
    fn test_light_dirty_bits_are_independent() {
        let (mut ctx, _) = context();
        ctx.set_light(2, Some(Light::directional(Vector3f::new(0.0, -1.0, 0.0), [1.0; 3])));
        ctx.device_mut().clear_calls();
        ctx.apply();
        assert_eq!(
            ctx.device().calls(),
            &[DeviceCall::SetLight(2), DeviceCall::LightEnable(2, true)]
        );
        assert!(ctx.device().is_light_enabled(2));

        ctx.set_light(2, None);
        ctx.apply();
        assert!(!ctx.device().is_light_enabled(2));
    }

    #[test]
    fn test_identity_bits_survive_apply() {
        let (mut ctx, _) = context();
        ctx.set_world_identity();
        ctx.apply();
        assert_eq!(ctx.record().dirty(), DirtyFlags::WORLD_IDENTITY);
    }

    #[test]
    fn test_unknown_declaration_is_not_bound_with_fvf() {
        let (mut ctx, observer) = context();
        ctx.set_fvf(FVF_XYZDUV1, "mesh");
        ctx.apply();
        ctx.set_vertex_declaration(DeclarationHandle(999), "bogus");
        ctx.apply();
        assert_eq!(ctx.device().vertex_declaration(), None);
        assert_eq!(ctx.device().fvf(), 0);
        assert_eq!(observer.count(|e| matches!(e, PipelineEvent::CallFailed { .. })), 1);
    }
}
