//! Asynchronous texture and buffer streaming.
//!
//! - [`AsyncLoader`] - background thread, transfer-queue copies, ownership
//!   transfer to the graphics queue
//! - [`TextureDecoder`] - pluggable image decoding ([`ImageCrateDecoder`])
//! - [`UploadRequest`] / [`CompletedUpload`] - messages in and out

pub mod decoder;
pub mod loader;
pub mod request;
pub mod stats;
mod worker;

pub use decoder::{ImageCrateDecoder, ImageInfo, TextureDecoder};
pub use loader::{AsyncLoader, DrainReport};
pub use request::{CompletedUpload, UploadRequest};
pub use stats::{LoaderState, LoaderStats, LoaderStatsSnapshot};
