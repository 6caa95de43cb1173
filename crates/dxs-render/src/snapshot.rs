//! Pipeline state snapshots and layout-mode validation

use std::collections::HashMap;

use crate::backend::{
    DeclarationHandle, GraphicsDevice, IndexBufferHandle, RenderState, StreamBinding,
    TransformKind, Viewport, CORE_TRANSFORMS,
};
use crate::context::RenderContext;
use crate::math::Matrix4f;
use crate::state::{LayoutMode, MAX_VERTEX_STREAMS};
use crate::telemetry::{ExpectedLayout, PipelineEvent};

/// Render states captured by snapshots and protected by the state guard
pub const GUARDED_RENDER_STATES: [RenderState; 4] = [
    RenderState::ZEnable,
    RenderState::ZWriteEnable,
    RenderState::Lighting,
    RenderState::CullMode,
];

/// A field of [`PipelineStateSnapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineField {
    Fvf,
    Declaration,
    Stream(u32),
    Indices,
    Transform(TransformKind),
    Viewport,
    RenderState(RenderState),
}

impl PipelineField {
    /// Whether the state guard promises to restore this field
    pub fn is_guarded(&self) -> bool {
        match self {
            Self::Fvf | Self::Declaration => false,
            Self::Stream(stream) => *stream == 0,
            _ => true,
        }
    }
}

/// Point-in-time copy of the device pipeline state
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStateSnapshot {
    pub location: &'static str,
    pub fvf: u32,
    pub declaration: Option<DeclarationHandle>,
    pub streams: [StreamBinding; MAX_VERTEX_STREAMS],
    pub indices: Option<IndexBufferHandle>,
    pub transforms: [Matrix4f; 3],
    pub viewport: Viewport,
    pub render_states: [u32; 4],
}

impl PipelineStateSnapshot {
    /// Read the current pipeline state from the device
    pub fn capture<D: GraphicsDevice>(device: &D, location: &'static str) -> Self {
        Self {
            location,
            fvf: device.fvf(),
            declaration: device.vertex_declaration(),
            streams: std::array::from_fn(|s| device.stream_source(s as u32)),
            indices: device.indices(),
            transforms: CORE_TRANSFORMS.map(|kind| device.transform(kind)),
            viewport: device.viewport(),
            render_states: GUARDED_RENDER_STATES.map(|state| device.render_state(state)),
        }
    }

    /// Fields that differ between `self` and `other`
    pub fn diff(&self, other: &Self) -> Vec<PipelineField> {
        let mut fields = Vec::new();
        if self.fvf != other.fvf {
            fields.push(PipelineField::Fvf);
        }
        if self.declaration != other.declaration {
            fields.push(PipelineField::Declaration);
        }
        for (stream, (a, b)) in self.streams.iter().zip(&other.streams).enumerate() {
            if a != b {
                fields.push(PipelineField::Stream(stream as u32));
            }
        }
        if self.indices != other.indices {
            fields.push(PipelineField::Indices);
        }
        for (i, kind) in CORE_TRANSFORMS.iter().enumerate() {
            if self.transforms[i] != other.transforms[i] {
                fields.push(PipelineField::Transform(*kind));
            }
        }
        if self.viewport != other.viewport {
            fields.push(PipelineField::Viewport);
        }
        for (i, state) in GUARDED_RENDER_STATES.iter().enumerate() {
            if self.render_states[i] != other.render_states[i] {
                fields.push(PipelineField::RenderState(*state));
            }
        }
        fields
    }

    /// Guarded fields of `restored` that no longer match this snapshot
    pub fn validate_restored(&self, restored: &Self) -> Vec<PipelineField> {
        self.diff(restored)
            .into_iter()
            .filter(PipelineField::is_guarded)
            .collect()
    }
}

/// Edge-triggered layout-mode checker
///
/// A mismatch is reported once when a caller tag first observes it and
/// again only after the tag has seen a consistent state in between.
#[derive(Debug, Default)]
pub struct ModeValidator {
    mismatched: HashMap<&'static str, bool>,
}

impl ModeValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare the record's layout mode with the device registers
    pub fn check(
        &mut self,
        tag: &'static str,
        layout: LayoutMode,
        device_fvf: u32,
        device_declaration: Option<DeclarationHandle>,
    ) -> Option<PipelineEvent> {
        let expected = match layout {
            LayoutMode::Legacy { .. } if device_declaration.is_some() => Some(ExpectedLayout::Legacy),
            LayoutMode::Structured { .. } if device_declaration.is_none() || device_fvf != 0 => {
                Some(ExpectedLayout::Structured)
            }
            _ => None,
        };
        let was = self.mismatched.insert(tag, expected.is_some()).unwrap_or(false);
        match expected {
            Some(expected) if !was => Some(PipelineEvent::LayoutModeMismatch {
                tag,
                expected,
                device_fvf,
                device_declaration,
            }),
            _ => None,
        }
    }
}

impl<D: GraphicsDevice> RenderContext<D> {
    /// Snapshot the device pipeline state
    pub fn capture_pipeline_state(&self, location: &'static str) -> PipelineStateSnapshot {
        PipelineStateSnapshot::capture(&self.device, location)
    }

    /// Report a layout-mode mismatch between record and device, edge-triggered per tag
    pub fn validate_layout_mode(&mut self, tag: &'static str) {
        let event = self.mode_validator.check(
            tag,
            self.record.layout(),
            self.device.fvf(),
            self.device.vertex_declaration(),
        );
        if let Some(event) = event {
            self.observer.report(event);
        }
    }

    /// Check that the device index buffer is the one the record expects
    pub fn ensure_indices_match(&self, tag: &'static str) -> bool {
        let expected = self.record.index_source().device_handle();
        let actual = self.device.indices();
        if expected.is_some() && expected != actual {
            self.observer.report(PipelineEvent::IndexBufferMismatch { tag, expected, actual });
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullDevice;
    use crate::backend::VertexBufferHandle;
    use crate::math;
    use std::num::NonZeroU32;

    #[test]
    fn test_snapshot_diff() {
        let mut device = NullDevice::new();
        let before = PipelineStateSnapshot::capture(&device, "test");

        device.set_stream_source(0, Some(VertexBufferHandle(4)), 0, 24).unwrap();
        device.set_fvf(0x142).unwrap();
        device
            .set_transform(TransformKind::View, &math::translation(0.0, 1.0, 0.0))
            .unwrap();
        device.set_render_state(RenderState::Lighting, 0).unwrap();
        let after = PipelineStateSnapshot::capture(&device, "test");

        assert_eq!(
            before.diff(&after),
            vec![
                PipelineField::Fvf,
                PipelineField::Stream(0),
                PipelineField::Transform(TransformKind::View),
                PipelineField::RenderState(RenderState::Lighting),
            ]
        );
        // FVF is deliberately cleared by the guard and not validated
        assert_eq!(
            before.validate_restored(&after),
            vec![
                PipelineField::Stream(0),
                PipelineField::Transform(TransformKind::View),
                PipelineField::RenderState(RenderState::Lighting),
            ]
        );
    }

    #[test]
    fn test_mode_validator_is_edge_triggered() {
        let mut validator = ModeValidator::new();
        let legacy = LayoutMode::Legacy {
            fvf: NonZeroU32::new(0x142).unwrap(),
            owner: "test",
        };
        let decl = Some(DeclarationHandle(3));

        assert!(validator.check("draw", legacy, 0x142, decl).is_some());
        assert!(validator.check("draw", legacy, 0x142, decl).is_none());
        // Other tags track their own edge
        assert!(validator.check("guard", legacy, 0x142, decl).is_some());

        assert!(validator.check("draw", legacy, 0x142, None).is_none());
        assert!(validator.check("draw", legacy, 0x142, decl).is_some());
    }

    #[test]
    fn test_structured_mode_requires_zero_fvf() {
        let mut validator = ModeValidator::new();
        let structured = LayoutMode::Structured {
            decl: DeclarationHandle(3),
            owner: "test",
        };
        let event = validator.check("apply", structured, 0x142, Some(DeclarationHandle(3)));
        assert!(matches!(
            event,
            Some(PipelineEvent::LayoutModeMismatch {
                expected: ExpectedLayout::Structured,
                ..
            })
        ));
    }
}
