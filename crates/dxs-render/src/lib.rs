//! Render-state shadowing and lazy device synchronization for dxshadow
//!
//! Callers describe the pipeline state they want on a [`RenderContext`].
//! Nothing reaches the device until a draw, when the apply pass writes only
//! the categories that changed and only the values the device does not
//! already hold. Vertex layouts are derived from legacy FVF codes and
//! cached; scoped guards, instancing and device reset keep the record, the
//! applied shadow and the device coherent around their own device writes.

pub mod apply;
pub mod applied;
pub mod backend;
pub mod context;
pub mod dispatch;
pub mod dynamic;
pub mod fvf;
pub mod guard;
pub mod instancing;
pub mod layout_cache;
pub mod light;
pub mod math;
pub mod overlay;
pub mod polygon;
pub mod reset;
pub mod resource;
pub mod snapshot;
pub mod sorting;
pub mod state;
pub mod stats;
pub mod telemetry;
pub mod vertex;

pub use backend::null::NullDevice;
pub use backend::GraphicsDevice;
pub use context::{DeviceLimits, RenderContext};
pub use dispatch::VertexRange;
pub use guard::ScopedStateGuard;
pub use instancing::{InstanceCandidate, InstanceManager, SharedInstanceManager};
pub use layout_cache::LayoutCache;
pub use light::{EnvironmentLight, LightEnvironment};
pub use overlay::Overlay2d;
pub use polygon::PolygonRenderer;
pub use reset::{FrameOutcome, ResourceHook};
pub use snapshot::PipelineStateSnapshot;
pub use state::{DirtyFlags, LayoutMode, RenderStateRecord};
pub use stats::{FrameCounters, FrameStatistics};
pub use telemetry::{PipelineEvent, PipelineObserver, RecordingObserver, TracingObserver};
