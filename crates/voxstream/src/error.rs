//! Engine-level error type wrapping every unit's errors.

use thiserror::Error;
use voxstream_core::ConfigError;
use voxstream_device::DeviceError;
use voxstream_render::{LoadError, SceneError, VoxelizeError};

/// Any failure surfaced by [`Engine`](crate::Engine).
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration could not be loaded or is out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Device failure outside a unit's own operations.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Loader setup or request failure.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Scene aggregation or upload failure.
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// Voxelization failure.
    #[error(transparent)]
    Voxelize(#[from] VoxelizeError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
