//! # VOXSTREAM
//!
//! Async texture streaming and two-pass GPU scene voxelization.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            VOXSTREAM                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────┐   ┌────────────────┐   ┌─────────────────┐   │
//! │  │ voxstream_core │   │ voxstream_     │   │ voxstream_      │   │
//! │  │                │──>│ device         │<──│ render          │   │
//! │  │ • WorkQueue    │   │                │   │                 │   │
//! │  │ • PathHash     │   │ • RenderDevice │   │ • AsyncLoader   │   │
//! │  │ • Mat4         │   │ • CommandList  │   │ • TextureCache  │   │
//! │  │ • EngineConfig │   │ • Software     │   │ • SceneVoxelizer│   │
//! │  └────────────────┘   └────────────────┘   └─────────────────┘   │
//! │                                 ▲                                │
//! │                            Engine<D>                             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod engine;
pub mod error;

pub use voxstream_core as core;
pub use voxstream_device as device;
pub use voxstream_render as render;

pub use engine::Engine;
pub use error::{EngineError, EngineResult};
