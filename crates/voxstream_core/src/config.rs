//! # Engine Configuration
//!
//! All tunables are loaded once at startup from a TOML file. Every field has
//! a default, so an empty file (or no file) is a valid configuration.
//!
//! ```toml
//! [streaming]
//! staging_buffer_size = 67108864
//! thread_name = "voxstream-loader"
//!
//! [voxelizer]
//! resolution = 256
//! conservative_rasterization = false
//! # fence_timeout_ms omitted = wait forever
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Largest grid edge the packed fragment record can address (12 bits per axis).
pub const MAX_VOXEL_RESOLUTION: u32 = 4096;

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The TOML was malformed or had wrong types.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Async loader settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Bytes reserved for the persistent staging buffer. Bounds the largest
    /// single texture (RGBA8) or buffer upload.
    pub staging_buffer_size: u64,
    /// Name given to the loader thread.
    pub thread_name: String,
    /// Timeout for the loader's copy fence. `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            // One 4096x4096 RGBA8 texture
            staging_buffer_size: 4096 * 4096 * 4,
            thread_name: "voxstream-loader".to_string(),
            fence_timeout_ms: None,
        }
    }
}

impl StreamingConfig {
    /// Fence timeout as a [`Duration`], `None` meaning infinite.
    #[must_use]
    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }
}

/// Voxelization pipeline settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxelizerConfig {
    /// Voxel grid edge length; also the render area of both passes.
    pub resolution: u32,
    /// Request conservative rasterization (used only if the device supports it).
    pub conservative_rasterization: bool,
    /// Timeout for each phase fence. `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
}

impl Default for VoxelizerConfig {
    fn default() -> Self {
        Self {
            resolution: 256,
            conservative_rasterization: false,
            fence_timeout_ms: None,
        }
    }
}

impl VoxelizerConfig {
    /// Fence timeout as a [`Duration`], `None` meaning infinite.
    #[must_use]
    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }
}

/// Top-level configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Async loader section.
    pub streaming: StreamingConfig,
    /// Voxelizer section.
    pub voxelizer: VoxelizerConfig,
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML and
    /// [`ConfigError::Invalid`] on out-of-range values.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> ConfigResult<()> {
        let resolution = self.voxelizer.resolution;
        if resolution == 0 || resolution > MAX_VOXEL_RESOLUTION {
            return Err(ConfigError::Invalid(format!(
                "voxelizer.resolution must be in 1..={MAX_VOXEL_RESOLUTION}, got {resolution}"
            )));
        }
        if self.streaming.staging_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "streaming.staging_buffer_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
