//! Core types for dxshadow
//!
//! This crate provides the error taxonomy, configuration, and logging
//! infrastructure shared by the render-state layer and its driver.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, DebugConfig, DeviceConfig, InstancingConfig, LogLevel, RecoveryConfig};
pub use error::{ConfigError, DeviceError, InstancingError, LayoutError, Result, ShadowError};
pub use logging::init_logging;
