//! Error types for scene building, streaming and voxelization.

use std::path::PathBuf;
use thiserror::Error;
use voxstream_device::DeviceError;

/// Scene aggregation and upload errors.
#[derive(Error, Debug)]
pub enum SceneError {
    /// A vertex attribute does not have one entry per position.
    #[error("{attribute} has {len} entries for {positions} positions")]
    AttributeLength {
        /// Attribute name.
        attribute: &'static str,
        /// Position count.
        positions: usize,
        /// Attribute entry count.
        len: usize,
    },

    /// Index list is not a triangle list.
    #[error("index count {0} is not a multiple of 3")]
    IndexCount(usize),

    /// An index points past the primitive's vertices.
    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        /// Offending index.
        index: u32,
        /// Vertices in the primitive.
        vertex_count: usize,
    },

    /// The mesh group outgrew 32-bit draw arguments.
    #[error("mesh group too large: {0}")]
    TooLarge(&'static str),

    /// Device failure while uploading.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Async loader errors.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The image could not be read or decoded.
    #[error("failed to decode {path}: {reason}")]
    Decode {
        /// Image path.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },

    /// Decoded image does not match the eagerly created texture.
    #[error("{path} decoded as {actual:?}, texture was created as {expected:?}")]
    DimensionMismatch {
        /// Image path.
        path: PathBuf,
        /// Texture extent.
        expected: (u32, u32),
        /// Decoded extent.
        actual: (u32, u32),
    },

    /// Upload does not fit in the staging buffer.
    #[error("upload of {size} bytes exceeds the {capacity}-byte staging buffer")]
    StagingOverflow {
        /// Bytes requested.
        size: u64,
        /// Staging buffer size.
        capacity: u64,
    },

    /// The loader thread could not be created.
    #[error("failed to spawn loader thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The loader was shut down; the request was not queued.
    #[error("loader is shut down")]
    ShutDown,

    /// Device failure on the loader thread.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl LoadError {
    /// Returns true for errors that will repeat on every later request.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Device(e) if e.is_device_lost())
    }
}

/// Voxelization errors. All are fatal for the run that produced them.
#[derive(Error, Debug)]
pub enum VoxelizeError {
    /// Resolution outside `1..=4096`.
    #[error("voxel resolution {0} outside 1..=4096")]
    InvalidResolution(u32),

    /// Allocation failure, fence timeout or device loss.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Result type for scene operations.
pub type SceneResult<T> = Result<T, SceneError>;

/// Result type for loader operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Result type for voxelization.
pub type VoxelizeResult<T> = Result<T, VoxelizeError>;
