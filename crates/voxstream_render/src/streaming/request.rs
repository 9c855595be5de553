//! Messages into and out of the loader thread.

use std::path::PathBuf;
use voxstream_device::{BufferId, TextureId};

/// Work for the loader thread. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadRequest {
    /// Decode the image at `path` into `texture`.
    Texture {
        /// Image file.
        path: PathBuf,
        /// Eagerly created destination, already at its final extent.
        texture: TextureId,
    },
    /// Copy `data` into `buffer` at `dst_offset`.
    Buffer {
        /// Bytes to upload.
        data: Vec<u8>,
        /// Device-local destination.
        buffer: BufferId,
        /// Byte offset into `buffer`.
        dst_offset: u64,
    },
}

impl UploadRequest {
    /// Short description for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Texture { .. } => "texture",
            Self::Buffer { .. } => "buffer",
        }
    }
}

/// Upload whose copy finished on the transfer queue and now waits for the
/// render thread's acquire barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletedUpload {
    /// Texture left in `TransferDst`, released by the transfer queue.
    Texture(TextureId),
    /// Buffer range written, released by the transfer queue.
    Buffer(BufferId),
}
