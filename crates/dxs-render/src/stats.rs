//! Per-frame state-change statistics

/// Counters accumulated over one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounters {
    pub matrix_changes: u32,
    pub material_changes: u32,
    pub vertex_buffer_changes: u32,
    pub index_buffer_changes: u32,
    pub light_changes: u32,
    pub texture_changes: u32,
    pub render_state_changes: u32,
    pub texture_stage_state_changes: u32,
    pub shader_changes: u32,
    /// Every state-changing device call issued by the core
    pub device_calls: u32,
    pub draw_calls: u32,
    pub polygons: u32,
    pub vertices: u32,
}

/// Counter category of a state-changing device call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCategory {
    Matrix,
    Material,
    VertexBuffer,
    IndexBuffer,
    Light,
    Texture,
    RenderState,
    TextureStageState,
    Shader,
    /// Calls that count toward the total only
    Other,
}

/// Frame statistics with the previous frame's totals kept for display
#[derive(Debug, Clone, Default)]
pub struct FrameStatistics {
    current: FrameCounters,
    last_frame: FrameCounters,
    frames: u64,
}

impl FrameStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting a new frame
    pub fn begin(&mut self) {
        self.current = FrameCounters::default();
    }

    /// Finish the frame and keep its totals
    pub fn end(&mut self) {
        self.last_frame = self.current;
        self.frames += 1;
    }

    pub fn current(&self) -> &FrameCounters {
        &self.current
    }

    pub fn last_frame(&self) -> &FrameCounters {
        &self.last_frame
    }

    /// Frames completed since creation
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Count one state-changing device call
    pub fn record_call(&mut self, category: StateCategory) {
        let c = &mut self.current;
        c.device_calls += 1;
        match category {
            StateCategory::Matrix => c.matrix_changes += 1,
            StateCategory::Material => c.material_changes += 1,
            StateCategory::VertexBuffer => c.vertex_buffer_changes += 1,
            StateCategory::IndexBuffer => c.index_buffer_changes += 1,
            StateCategory::Light => c.light_changes += 1,
            StateCategory::Texture => c.texture_changes += 1,
            StateCategory::RenderState => c.render_state_changes += 1,
            StateCategory::TextureStageState => c.texture_stage_state_changes += 1,
            StateCategory::Shader => c.shader_changes += 1,
            StateCategory::Other => {}
        }
    }

    /// Count one draw call
    pub fn record_draw(&mut self, polygons: u32, vertices: u32) {
        self.current.device_calls += 1;
        self.current.draw_calls += 1;
        self.current.polygons += polygons;
        self.current.vertices += vertices;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rollover() {
        let mut stats = FrameStatistics::new();
        stats.begin();
        stats.record_call(StateCategory::VertexBuffer);
        stats.record_call(StateCategory::Other);
        stats.record_draw(10, 30);
        stats.end();

        let last = stats.last_frame();
        assert_eq!(last.vertex_buffer_changes, 1);
        assert_eq!(last.device_calls, 3);
        assert_eq!(last.draw_calls, 1);
        assert_eq!(last.polygons, 10);

        stats.begin();
        assert_eq!(stats.current().device_calls, 0);
        assert_eq!(stats.last_frame().device_calls, 3);
        assert_eq!(stats.frames(), 1);
    }
}
