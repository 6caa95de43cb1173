//! Pipeline telemetry
//!
//! The core reports diagnostic events at fixed points (layout conflicts,
//! mismatched buffer kinds, failed draws, guard restore mismatches) through
//! a [`PipelineObserver`]. Release builds can install [`NullObserver`];
//! the default [`TracingObserver`] forwards to `tracing` with throttling.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::backend::{DeclarationHandle, IndexBufferHandle};
use crate::snapshot::PipelineField;
use crate::state::BufferKind;
use dxs_core::{DebugConfig, DeviceError};

/// Layout mode the record expected when a device mismatch was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedLayout {
    Legacy,
    Structured,
}

/// Diagnostic event emitted by the core
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Record and device disagree about the active layout mode
    LayoutModeMismatch {
        tag: &'static str,
        expected: ExpectedLayout,
        device_fvf: u32,
        device_declaration: Option<DeclarationHandle>,
    },
    /// A draw was requested with one sorting and one device buffer
    MismatchedBufferKinds {
        vertex: BufferKind,
        index: BufferKind,
    },
    /// A draw was requested with nothing bound on stream 0 or no index source
    MissingBuffers {
        vertex: BufferKind,
        index: BufferKind,
    },
    /// A non-empty engine buffer resolved to a zero stride
    ZeroStride { stream: u32 },
    /// Apply had no layout to assert and left the device untouched
    LayoutUntouched { owner: Option<&'static str> },
    /// A device call failed during apply or draw
    CallFailed {
        context: &'static str,
        error: DeviceError,
    },
    /// Guarded state differs from its snapshot after restore
    RestoreMismatch {
        location: &'static str,
        fields: Vec<PipelineField>,
    },
    /// Device index buffer differs from the record's
    IndexBufferMismatch {
        tag: &'static str,
        expected: Option<IndexBufferHandle>,
        actual: Option<IndexBufferHandle>,
    },
}

impl PipelineEvent {
    fn slot(&self) -> usize {
        match self {
            Self::LayoutModeMismatch { .. } => 0,
            Self::MismatchedBufferKinds { .. } => 1,
            Self::MissingBuffers { .. } => 2,
            Self::ZeroStride { .. } => 3,
            Self::LayoutUntouched { .. } => 4,
            Self::CallFailed { .. } => 5,
            Self::RestoreMismatch { .. } => 6,
            Self::IndexBufferMismatch { .. } => 7,
        }
    }
}

const EVENT_KINDS: usize = 8;

/// Receiver of pipeline diagnostics
pub trait PipelineObserver: Send + Sync {
    fn report(&self, event: PipelineEvent);
}

/// Observer that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl PipelineObserver for NullObserver {
    fn report(&self, _event: PipelineEvent) {}
}

/// Logs the first `first` occurrences, then every `every`th
#[derive(Debug)]
pub struct LogThrottle {
    first: u64,
    every: u64,
    count: AtomicU64,
}

impl LogThrottle {
    pub fn new(first: u64, every: u64) -> Self {
        Self {
            first,
            every: every.max(1),
            count: AtomicU64::new(0),
        }
    }

    /// Count one occurrence and decide whether it should be logged
    pub fn should_log(&self) -> bool {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        n <= self.first || n % self.every == 0
    }

    /// Occurrences counted so far
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(5, 128)
    }
}

/// Observer that forwards events to `tracing`, throttled per event kind
#[derive(Debug)]
pub struct TracingObserver {
    throttles: [LogThrottle; EVENT_KINDS],
}

impl TracingObserver {
    pub fn new(first: u64, every: u64) -> Self {
        Self {
            throttles: std::array::from_fn(|_| LogThrottle::new(first, every)),
        }
    }

    /// Build from the debug configuration section
    pub fn from_config(config: &DebugConfig) -> Self {
        Self::new(
            u64::from(config.log_throttle_first),
            u64::from(config.log_throttle_every),
        )
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new(5, 128)
    }
}

impl PipelineObserver for TracingObserver {
    fn report(&self, event: PipelineEvent) {
        let throttle = &self.throttles[event.slot()];
        if !throttle.should_log() {
            return;
        }
        let n = throttle.count();
        match event {
            PipelineEvent::LayoutModeMismatch {
                tag,
                expected,
                device_fvf,
                device_declaration,
            } => tracing::warn!(
                "Pipeline: [{}] layout mismatch (#{}) expected {:?}, device fvf=0x{:x} decl={:?}",
                tag,
                n,
                expected,
                device_fvf,
                device_declaration
            ),
            PipelineEvent::MismatchedBufferKinds { vertex, index } => tracing::error!(
                "Pipeline: vertex and index buffers must both be sorting or both device buffers (vb={:?} ib={:?})",
                vertex,
                index
            ),
            PipelineEvent::MissingBuffers { vertex, index } => {
                tracing::error!("Pipeline: draw without buffers (vb={:?} ib={:?})", vertex, index)
            }
            PipelineEvent::ZeroStride { stream } => {
                tracing::error!("Pipeline: zero stride for non-empty buffer on stream {}", stream)
            }
            PipelineEvent::LayoutUntouched { owner } => tracing::debug!(
                "Apply: no FVF available; leaving device layout untouched. owner={}",
                owner.unwrap_or("(none)")
            ),
            PipelineEvent::CallFailed { context, error } => {
                tracing::warn!("Pipeline: {} failed (#{}): {}", context, n, error)
            }
            PipelineEvent::RestoreMismatch { location, fields } => tracing::warn!(
                "Pipeline: [{}] state not restored: {:?}",
                location,
                fields
            ),
            PipelineEvent::IndexBufferMismatch { tag, expected, actual } => tracing::warn!(
                "Pipeline: [{}] device IB {:?} does not match expected {:?}",
                tag,
                actual,
                expected
            ),
        }
    }
}

/// Observer that keeps every event, for tests
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event reported so far
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Count events matching `pred`
    pub fn count(&self, pred: impl Fn(&PipelineEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl PipelineObserver for RecordingObserver {
    fn report(&self, event: PipelineEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_first_then_every() {
        let throttle = LogThrottle::new(2, 4);
        let logged: Vec<bool> = (0..9).map(|_| throttle.should_log()).collect();
        assert_eq!(
            logged,
            vec![true, true, false, true, false, false, false, true, false]
        );
        assert_eq!(throttle.count(), 9);
    }

    #[test]
    fn test_recording_observer() {
        let observer = RecordingObserver::new();
        observer.report(PipelineEvent::ZeroStride { stream: 0 });
        observer.report(PipelineEvent::LayoutUntouched { owner: None });
        assert_eq!(observer.len(), 2);
        assert_eq!(
            observer.count(|e| matches!(e, PipelineEvent::ZeroStride { .. })),
            1
        );
        observer.clear();
        assert!(observer.is_empty());
    }

    #[test]
    fn test_tracing_observer_accepts_all_kinds() {
        let observer = TracingObserver::new(1, 2);
        for _ in 0..3 {
            observer.report(PipelineEvent::MissingBuffers {
                vertex: BufferKind::None,
                index: BufferKind::Engine,
            });
        }
        assert_eq!(observer.throttles[2].count(), 3);
    }
}
