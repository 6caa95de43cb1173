//! Device loss and reset
//!
//! Presenting can lose the device. While lost nothing may be created and
//! every default-pool object must be released before the device accepts a
//! reset. [`ResourceHook`]s let owners of such objects take part in the
//! release and recreation. After a reset the device holds its own defaults,
//! so every cache and the applied shadow are discarded.

use std::thread;
use std::time::Duration;

use crate::applied::AppliedState;
use crate::backend::{DeviceStatus, GraphicsDevice};
use crate::context::RenderContext;
use crate::dynamic::DynamicBuffers;
use crate::state::DirtyFlags;
use crate::stats::StateCategory;

/// Owner of device objects that do not survive a reset
pub trait ResourceHook<D: GraphicsDevice> {
    /// Release default-pool objects before the device is reset
    fn release_resources(&mut self, device: &mut D);

    /// Recreate them after a successful reset
    fn reacquire_resources(&mut self, device: &mut D);
}

/// Result of ending a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The scene was ended without a present
    Unflipped,
    Presented,
    /// The device is lost; rendering should pause
    Lost,
    /// The device was reset; device objects were recreated
    Reset,
    /// Present or every reset attempt failed
    Failed,
}

impl<D: GraphicsDevice> RenderContext<D> {
    /// Whether the device currently refuses rendering
    pub fn is_device_lost(&self) -> bool {
        self.device.test_cooperative_level() != DeviceStatus::Ok
    }

    /// End the scene and, when `flip` is set, present it.
    ///
    /// A lost device backs off for `recovery.lost_backoff_ms`. A device
    /// waiting for reset is reset up to `recovery.max_reset_attempts` times,
    /// backing off `recovery.reset_backoff_ms` after each failure.
    pub fn end_scene(&mut self, flip: bool) -> FrameOutcome {
        self.assert_owner_thread();
        let result = self.device.end_scene();
        if self.check("RenderContext: EndScene", result).is_some() {
            self.stats.record_call(StateCategory::Other);
        }
        self.stats.end();
        if !flip {
            return FrameOutcome::Unflipped;
        }

        let recovery = self.config.recovery.clone();
        let attempts = recovery.max_reset_attempts.max(1);
        for attempt in 1..=attempts {
            match self.device.test_cooperative_level() {
                DeviceStatus::Ok => return self.present(),
                DeviceStatus::Lost => {
                    tracing::debug!("RenderContext: device lost, waiting");
                    backoff(recovery.lost_backoff_ms);
                    return FrameOutcome::Lost;
                }
                DeviceStatus::NotReset => {
                    tracing::info!("RenderContext: device ready for reset (attempt {}/{})", attempt, attempts);
                    if self.reset_device(true) {
                        return FrameOutcome::Reset;
                    }
                    tracing::warn!("RenderContext: device reset failed");
                    backoff(recovery.reset_backoff_ms);
                }
            }
        }
        FrameOutcome::Failed
    }

    fn present(&mut self) -> FrameOutcome {
        match self.device.present() {
            Ok(()) => {
                self.frame_count += 1;
                FrameOutcome::Presented
            }
            Err(e) if e.is_device_loss() => {
                tracing::warn!("RenderContext: device lost during present");
                FrameOutcome::Lost
            }
            Err(e) => {
                tracing::warn!("RenderContext: present failed: {}", e);
                FrameOutcome::Failed
            }
        }
    }

    /// Release default-pool objects, reset the device and rebuild state.
    ///
    /// Returns `false` while the device is still lost or when the reset
    /// call fails; the dynamic rings stay released until a later reset
    /// succeeds.
    pub fn reset_device(&mut self, reload: bool) -> bool {
        self.assert_owner_thread();
        tracing::info!("RenderContext: resetting device");

        self.sorting.clear();
        self.record.unbind_buffers();
        for hook in &mut self.hooks {
            hook.release_resources(&mut self.device);
        }
        if let Some(dynamic) = self.dynamic.take() {
            dynamic.release(&mut self.device);
        }
        self.frame_count = 0;

        if self.device.test_cooperative_level() == DeviceStatus::Lost {
            tracing::debug!("RenderContext: device still lost, reset deferred");
            return false;
        }
        if let Err(e) = self.device.reset() {
            tracing::warn!("RenderContext: reset failed: {}", e);
            return false;
        }

        if reload {
            for hook in &mut self.hooks {
                hook.reacquire_resources(&mut self.device);
            }
        }
        match DynamicBuffers::create(&mut self.device, &self.config.device) {
            Ok(dynamic) => self.dynamic = Some(dynamic),
            Err(e) => tracing::warn!("RenderContext: dynamic buffers unavailable after reset: {}", e),
        }
        self.invalidate_cached_render_states();
        self.set_default_render_states();
        tracing::info!("RenderContext: device reset completed");
        true
    }

    /// Discard every cached value so the next apply rewrites all state
    pub fn invalidate_cached_render_states(&mut self) {
        self.record.forget_state_caches();
        for stage in 0..self.limits.texture_stages as u32 {
            let result = self.device.set_texture(stage, None);
            self.check("RenderContext: SetTexture", result);
        }
        let result = self.device.set_vertex_shader(None);
        self.check("RenderContext: SetVertexShader", result);
        let result = self.device.set_pixel_shader(None);
        self.check("RenderContext: SetPixelShader", result);

        self.applied = AppliedState::unknown();
        self.record.mark_dirty(DirtyFlags::ALL_CATEGORIES);
    }
}

fn backoff(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}
