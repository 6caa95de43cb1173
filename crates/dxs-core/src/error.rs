//! Error types for the dxshadow render-state layer

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the render-state layer
#[derive(Error, Debug)]
pub enum ShadowError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Instancing error: {0}")]
    Instancing(#[from] InstancingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

/// Errors reported by the graphics device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("{call} failed with code 0x{code:08x}")]
    CallFailed { call: &'static str, code: u32 },

    #[error("Out of video memory")]
    OutOfVideoMemory,

    #[error("Device lost")]
    DeviceLost,

    #[error("Device lost and ready for reset")]
    DeviceNotReset,

    #[error("Invalid handle: {0}")]
    InvalidHandle(u32),

    #[error("Invalid call: {0}")]
    InvalidCall(String),
}

/// Render-state configuration file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read render-state config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed render-state config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Cannot encode render-state config: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("Cannot write render-state config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Vertex layout resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("No layout mapping for FVF 0x{0:08x}")]
    UnrecognizedFormat(u32),

    #[error("Layout compilation failed for FVF 0x{key:08x}: {reason}")]
    CompileFailed { key: u32, reason: String },
}

/// Hardware instancing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstancingError {
    #[error("Instancing unsupported: {0}")]
    Unsupported(String),

    #[error("No instancing layout for FVF 0x{0:08x}")]
    LayoutUnavailable(u32),

    #[error("Instance buffer creation failed: {0}")]
    BufferCreateFailed(String),

    #[error("Instance buffer write failed: {0}")]
    BufferWriteFailed(String),

    #[error("Instancing shader unavailable: {0}")]
    ShaderUnavailable(String),
}

impl DeviceError {
    /// Whether this error signals device loss rather than a failed call
    pub fn is_device_loss(&self) -> bool {
        matches!(self, Self::DeviceLost | Self::DeviceNotReset)
    }
}

/// Result type alias for render-state operations
pub type Result<T> = std::result::Result<T, ShadowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LayoutError::UnrecognizedFormat(0x142);
        assert_eq!(format!("{}", err), "No layout mapping for FVF 0x00000142");

        let err = DeviceError::CallFailed {
            call: "DrawIndexedPrimitive",
            code: 0x8876_086C,
        };
        assert_eq!(
            format!("{}", err),
            "DrawIndexedPrimitive failed with code 0x8876086c"
        );
    }

    #[test]
    fn test_error_conversion() {
        let dev_err = DeviceError::OutOfVideoMemory;
        let err: ShadowError = dev_err.into();
        assert!(matches!(err, ShadowError::Device(_)));

        let err: ShadowError = InstancingError::LayoutUnavailable(2).into();
        assert!(matches!(err, ShadowError::Instancing(_)));
    }

    #[test]
    fn test_device_loss_classification() {
        assert!(DeviceError::DeviceLost.is_device_loss());
        assert!(DeviceError::DeviceNotReset.is_device_loss());
        assert!(!DeviceError::OutOfVideoMemory.is_device_loss());
    }
}
