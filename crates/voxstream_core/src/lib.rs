//! # VOXSTREAM Core
//!
//! Device-agnostic primitives shared by the streaming loader and the
//! voxelizer:
//!
//! - [`WorkQueue`] - MPSC queue feeding the loader thread
//! - [`PathHash`] - DJB2 keys for the texture cache
//! - [`math`] - column-major node transforms
//! - [`config`] - the TOML engine configuration
//!
//! ## Example
//!
//! ```rust
//! use voxstream_core::{EngineConfig, WorkQueue};
//!
//! let config = EngineConfig::from_toml_str("[voxelizer]\nresolution = 128\n").unwrap();
//! assert_eq!(config.voxelizer.resolution, 128);
//!
//! let queue: WorkQueue<u32> = WorkQueue::new();
//! assert!(queue.is_empty());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod hash;
pub mod math;
pub mod queue;

pub use config::{
    ConfigError, ConfigResult, EngineConfig, StreamingConfig, VoxelizerConfig,
    MAX_VOXEL_RESOLUTION,
};
pub use hash::{djb2, PathHash};
pub use math::{Mat4, Vec3};
pub use queue::WorkQueue;
