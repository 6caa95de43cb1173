//! Configuration system for dxshadow

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub device: DeviceConfig,
    pub instancing: InstancingConfig,
    pub recovery: RecoveryConfig,
    pub debug: DebugConfig,
}

/// Device limits and draw settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Texture stages tracked by the state record
    pub max_texture_stages: u32,
    /// Vertex streams tracked by the state record
    pub max_vertex_streams: u32,
    /// Fixed-function lights tracked by the state record
    pub max_lights: u32,
    /// Draws with this many polygons or fewer are skipped (0 disables)
    pub draw_polygon_low_bound_limit: u32,
    /// Capacity of the dynamic vertex ring, in vertices
    pub dynamic_vertex_capacity: u32,
    /// Capacity of the dynamic index ring, in indices
    pub dynamic_index_capacity: u32,
}

/// Hardware instancing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstancingConfig {
    pub enabled: bool,
    pub max_instances_per_draw: usize,
    pub max_cached_layouts: usize,
    /// Compiled vertex shader used for instanced draws
    pub shader_path: PathBuf,
}

/// Device-lost recovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Sleep while the device is lost and cannot be reset yet
    pub lost_backoff_ms: u64,
    /// Sleep after a failed reset attempt
    pub reset_backoff_ms: u64,
    /// Reset attempts per frame before giving up on that frame
    pub max_reset_attempts: u32,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    /// Capture and compare pipeline snapshots around scoped guards
    pub validate_pipeline: bool,
    /// Always log the first N occurrences of a throttled message
    pub log_throttle_first: u32,
    /// After that, log every Nth occurrence
    pub log_throttle_every: u32,
    /// Kill switch for triangle drawing
    pub draw_triangles: bool,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

// Default implementations

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            max_texture_stages: 8,
            max_vertex_streams: 4,
            max_lights: 4,
            draw_polygon_low_bound_limit: 0,
            dynamic_vertex_capacity: 8192,
            dynamic_index_capacity: 32768,
        }
    }
}

impl Default for InstancingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_instances_per_draw: 256,
            max_cached_layouts: 16,
            shader_path: PathBuf::from("shaders/RigidInstance.vso"),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            lost_backoff_ms: 100,
            reset_backoff_ms: 500,
            max_reset_attempts: 3,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            validate_pipeline: cfg!(debug_assertions),
            log_throttle_first: 5,
            log_throttle_every: 128,
            draw_triangles: true,
        }
    }
}

impl Config {
    /// Load the config at [`Config::config_path`], writing defaults on first run
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if !path.exists() {
            tracing::info!("Config: no render-state config at {}, writing defaults", path.display());
            let config = Self::default();
            config.save_to(&path)?;
            return Ok(config);
        }
        Self::load_from(&path)
    }

    /// Parse a render-state config file; missing sections take their defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        std::fs::write(path, content).map_err(write_error)
    }

    /// `dxshadow/render.toml` under the platform config directory
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dxshadow")
            .join("render.toml")
    }
}
