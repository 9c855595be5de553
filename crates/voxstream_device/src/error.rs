//! Device error types.

use crate::handle::{BufferId, FenceId};
use thiserror::Error;

/// Errors reported by a [`RenderDevice`](crate::RenderDevice).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Allocation would exceed device memory.
    #[error("out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes requested.
        requested: u64,
        /// Bytes still available.
        available: u64,
    },

    /// Handle does not name a live object of the expected kind.
    #[error("invalid {kind} handle {raw}")]
    InvalidHandle {
        /// Object kind ("buffer", "texture", ...).
        kind: &'static str,
        /// Raw handle value.
        raw: u32,
    },

    /// Host access to a device-local buffer.
    #[error("buffer {0:?} is not host visible")]
    NotHostVisible(BufferId),

    /// Range falls outside the resource.
    #[error("access out of bounds: offset {offset} + len {len} exceeds size {size}")]
    OutOfBounds {
        /// Start of the access.
        offset: u64,
        /// Length of the access.
        len: u64,
        /// Resource size.
        size: u64,
    },

    /// Fence did not signal before the timeout elapsed.
    #[error("fence {0:?} did not signal before the timeout")]
    FenceTimeout(FenceId),

    /// The device is gone; every further call fails.
    #[error("device lost")]
    DeviceLost,

    /// Zero or otherwise unusable size.
    #[error("invalid size: {0}")]
    InvalidSize(u64),

    /// Resource used on a queue that does not own it.
    #[error("queue ownership violation: {0}")]
    OwnershipViolation(String),

    /// Command stream is malformed (missing bind, wrong layout, ...).
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Feature not supported by this device.
    #[error("unsupported feature: {0}")]
    Unsupported(&'static str),
}

impl DeviceError {
    /// Returns true if the device cannot be used any further.
    #[must_use]
    pub const fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost)
    }
}

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;
