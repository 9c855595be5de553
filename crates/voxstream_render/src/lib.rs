//! # VOXSTREAM Render
//!
//! Streaming and voxelization on top of a [`RenderDevice`]:
//!
//! ```text
//!   scene parser thread             loader thread              render thread
//!   ───────────────────             ─────────────              ─────────────
//!   MeshGroup::add_primitive
//!   TextureCache::request ──push──> WorkQueue ──pop──> decode
//!     (texture created now)                            staging write
//!                                                      transfer copy + release
//!                                                          │
//!                                   completion channel <───┘
//!                                          │
//!                                          └────────> drain_pending_texture_updates
//!                                                       acquire barriers
//!                                                       bindless registration
//!   SceneResourceTable::upload ─────────────────────> SceneVoxelizer::voxelize
//!                                                       count ─> resize ─> write
//! ```
//!
//! The device is always passed in as `Arc<D>`; nothing here holds global
//! state.
//!
//! [`RenderDevice`]: voxstream_device::RenderDevice

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod scene;
pub mod streaming;
pub mod voxelizer;

pub use error::{LoadError, LoadResult, SceneError, SceneResult, VoxelizeError, VoxelizeResult};
pub use scene::{Aabb, MeshGroup, MeshPrimitive, SceneResourceTable, TextureCache};
pub use streaming::{
    AsyncLoader, CompletedUpload, DrainReport, ImageCrateDecoder, ImageInfo, LoaderState,
    LoaderStatsSnapshot, TextureDecoder, UploadRequest,
};
pub use voxelizer::{SceneVoxelizer, VoxelCounter, VoxelizationReport, VoxelizeOutcome};
