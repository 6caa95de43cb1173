//! Scoped state guard
//!
//! [`ScopedStateGuard`] takes an exclusive borrow of the context, snapshots
//! the device pipeline state a nested renderer is likely to disturb, and
//! restores it when dropped. Restoration therefore runs on normal exit,
//! early `?` returns and unwinding alike.
//!
//! Restore order is fixed: layout tracking, stream 0, indices, projection,
//! view, world, viewport, render states.

use std::ops::{Deref, DerefMut};

use crate::backend::{
    texture_op, DeclarationHandle, GraphicsDevice, IndexBufferHandle, StreamBinding,
    TextureStageState, TransformKind, Viewport,
};
use crate::context::RenderContext;
use crate::math::Matrix4f;
use crate::snapshot::{PipelineStateSnapshot, GUARDED_RENDER_STATES};
use crate::state::{DirtyFlags, IndexSource, VertexSource, UNKNOWN_STATE};
use crate::stats::StateCategory;
use crate::telemetry::PipelineEvent;

/// Device values captured at acquire time
#[derive(Debug, Clone)]
struct SavedState {
    fvf: u32,
    /// Owned by the layout cache, which outlives every guard
    declaration: Option<DeclarationHandle>,
    stream0: StreamBinding,
    indices: Option<IndexBufferHandle>,
    projection: Matrix4f,
    view: Matrix4f,
    world: Matrix4f,
    viewport: Viewport,
    render_states: [u32; 4],
}

/// Record bindings kept alive for the scope
#[derive(Debug, Clone)]
struct RetainedBindings {
    stream0: VertexSource,
    index: IndexSource,
    index_base_offset: u32,
    world: Matrix4f,
    view: Matrix4f,
}

/// Exclusive claim on the context's pipeline state for one scope
pub struct ScopedStateGuard<'a, D: GraphicsDevice> {
    ctx: &'a mut RenderContext<D>,
    location: &'static str,
    saved: SavedState,
    retained: Option<RetainedBindings>,
    entry_snapshot: Option<PipelineStateSnapshot>,
}

impl<'a, D: GraphicsDevice> ScopedStateGuard<'a, D> {
    /// Snapshot the pipeline state and disable every texture combiner stage
    pub fn acquire(ctx: &'a mut RenderContext<D>, location: &'static str) -> Self {
        ctx.assert_owner_thread();

        let device = &ctx.device;
        let saved = SavedState {
            fvf: device.fvf(),
            declaration: device.vertex_declaration(),
            stream0: device.stream_source(0),
            indices: device.indices(),
            projection: device.transform(TransformKind::Projection),
            view: device.transform(TransformKind::View),
            world: device.transform(TransformKind::World),
            viewport: device.viewport(),
            render_states: GUARDED_RENDER_STATES.map(|state| device.render_state(state)),
        };
        let retained = RetainedBindings {
            stream0: ctx.record.streams[0].clone(),
            index: ctx.record.index.clone(),
            index_base_offset: ctx.record.index_base_offset,
            world: ctx.record.world,
            view: ctx.record.view,
        };
        let entry_snapshot = ctx
            .config
            .debug
            .validate_pipeline
            .then(|| PipelineStateSnapshot::capture(&ctx.device, location));

        // Bound textures stay; only the combiners are reset
        for stage in 0..ctx.limits.texture_stages {
            ctx.set_texture_stage_state(stage, TextureStageState::ColorOp, texture_op::DISABLE);
            ctx.set_texture_stage_state(stage, TextureStageState::AlphaOp, texture_op::DISABLE);
        }

        tracing::trace!("StateGuard: acquired at {}", location);
        Self {
            ctx,
            location,
            saved,
            retained: Some(retained),
            entry_snapshot,
        }
    }

    /// Location tag given at acquire time
    pub fn location(&self) -> &'static str {
        self.location
    }

    /// Layout registers at acquire time
    pub fn saved_layout(&self) -> (u32, Option<DeclarationHandle>) {
        (self.saved.fvf, self.saved.declaration)
    }

    fn restore(&mut self) {
        let ctx = &mut *self.ctx;
        let saved = &self.saved;

        ctx.record.clear_layout_tracking();
        ctx.applied.forget_layout();

        ctx.applied.forget_stream(0);
        let result = ctx.writer().stream(0, saved.stream0);
        ctx.check("StateGuard: SetStreamSource", result);

        ctx.applied.forget_indices();
        let result = ctx.writer().indices(saved.indices);
        ctx.check("StateGuard: SetIndices", result);

        if let Some(retained) = self.retained.take() {
            ctx.record.streams[0] = retained.stream0;
            ctx.record.index = retained.index;
            ctx.record.index_base_offset = retained.index_base_offset;
            ctx.record.sync_transform(TransformKind::World, &retained.world);
            ctx.record.sync_transform(TransformKind::View, &retained.view);
        }
        ctx.record
            .mark_dirty(DirtyFlags::VERTEX_BUFFER | DirtyFlags::INDEX_BUFFER | DirtyFlags::WORLD | DirtyFlags::VIEW);

        for (kind, matrix) in [
            (TransformKind::Projection, &saved.projection),
            (TransformKind::View, &saved.view),
            (TransformKind::World, &saved.world),
        ] {
            ctx.applied.forget_transform(kind);
            let result = ctx.writer().transform(kind, matrix);
            ctx.check("StateGuard: SetTransform", result);
        }
        ctx.record.sync_transform(TransformKind::Projection, &saved.projection);

        let result = ctx.device.set_viewport(&saved.viewport);
        if ctx.check("StateGuard: SetViewport", result).is_some() {
            ctx.stats.record_call(StateCategory::Other);
        }

        for (state, value) in GUARDED_RENDER_STATES.into_iter().zip(saved.render_states) {
            let result = ctx.device.set_render_state(state, value);
            let cached = match ctx.check("StateGuard: SetRenderState", result) {
                Some(()) => {
                    ctx.stats.record_call(StateCategory::RenderState);
                    value
                }
                None => UNKNOWN_STATE,
            };
            ctx.record.render_states[state.slot()] = cached;
        }

        if let Some(entry) = &self.entry_snapshot {
            let restored = PipelineStateSnapshot::capture(&ctx.device, self.location);
            let fields = entry.validate_restored(&restored);
            if !fields.is_empty() {
                ctx.report(PipelineEvent::RestoreMismatch {
                    location: self.location,
                    fields,
                });
            }
        }
        tracing::trace!("StateGuard: released at {}", self.location);
    }
}

impl<D: GraphicsDevice> Deref for ScopedStateGuard<'_, D> {
    type Target = RenderContext<D>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl<D: GraphicsDevice> DerefMut for ScopedStateGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl<D: GraphicsDevice> Drop for ScopedStateGuard<'_, D> {
    fn drop(&mut self) {
        self.restore();
    }
}

impl<D: GraphicsDevice> RenderContext<D> {
    /// Acquire a [`ScopedStateGuard`] over this context
    pub fn scoped_state(&mut self, location: &'static str) -> ScopedStateGuard<'_, D> {
        ScopedStateGuard::acquire(self, location)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::null::NullDevice;
    use crate::backend::{cull, RenderState};
    use crate::fvf::{FVF_XYZDUV1, FVF_XYZNDUV2};
    use crate::math;
    use crate::telemetry::RecordingObserver;
    use dxs_core::Config;

    fn context() -> (RenderContext<NullDevice>, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::new());
        let mut config = Config::default();
        config.debug.validate_pipeline = true;
        let ctx = RenderContext::with_observer(NullDevice::new(), config, observer.clone()).unwrap();
        (ctx, observer)
    }

    #[test]
    fn test_entry_disables_combiners_but_keeps_textures() {
        let (mut ctx, _) = context();
        let tex = ctx.create_texture(4, 4, 1).unwrap();
        ctx.set_texture(0, Some(&tex));
        ctx.set_texture_stage_state(0, TextureStageState::ColorOp, texture_op::MODULATE);
        ctx.apply();
        {
            let guard = ctx.scoped_state("test");
            assert_eq!(
                guard.device().texture_stage_state(0, TextureStageState::ColorOp),
                texture_op::DISABLE
            );
            assert_eq!(guard.device().texture(0), Some(tex.handle()));
        }
    }

    #[test]
    fn test_release_restores_bindings_and_states() {
        let (mut ctx, observer) = context();
        let vb = ctx.create_vertex_buffer(FVF_XYZNDUV2, 8).unwrap();
        let ib = ctx.create_index_buffer(12).unwrap();
        ctx.set_vertex_buffer(0, Some(&vb));
        ctx.set_index_buffer(Some(&ib), 0);
        ctx.apply();
        let before = ctx.capture_pipeline_state("before");

        {
            let mut guard = ctx.scoped_state("test");
            let other = guard.create_vertex_buffer(FVF_XYZDUV1, 4).unwrap();
            guard.set_vertex_buffer(0, Some(&other));
            guard.set_index_buffer(None, 0);
            guard.set_render_state(RenderState::CullMode, cull::NONE);
            guard.set_render_state(RenderState::Lighting, 1);
            guard.set_transform(TransformKind::Projection, &math::translation(0.0, 0.0, 5.0));
            guard.set_world_identity();
            guard.apply();
            assert_eq!(guard.device().indices(), None);
        }

        let after = ctx.capture_pipeline_state("after");
        assert!(before.validate_restored(&after).is_empty());
        assert_eq!(ctx.render_state(RenderState::CullMode), cull::CW);
        assert_eq!(observer.count(|e| matches!(e, PipelineEvent::RestoreMismatch { .. })), 0);
        assert_eq!(ctx.record().layout(), crate::state::LayoutMode::Unset);
        assert!(ctx.record().vertex_source(0).same_binding(&VertexSource::Engine(vb)));
    }

    #[test]
    fn test_null_stream_is_restored_as_null() {
        let (mut ctx, _) = context();
        {
            let mut guard = ctx.scoped_state("test");
            let vb = guard.create_vertex_buffer(FVF_XYZDUV1, 4).unwrap();
            guard.set_vertex_buffer(0, Some(&vb));
            guard.apply();
            assert!(guard.device().stream_source(0).buffer.is_some());
        }
        assert_eq!(ctx.device().stream_source(0), StreamBinding::NULL);
        assert_eq!(ctx.applied().stream(0), Some(StreamBinding::NULL));
    }
}
