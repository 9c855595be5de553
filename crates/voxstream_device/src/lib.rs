//! # VOXSTREAM Device Layer
//!
//! The graphics device as seen by the streaming loader and the voxelizer:
//!
//! ```text
//! ┌──────────────────── voxstream_render ─────────────────────┐
//! │  AsyncLoader           SceneResourceTable   SceneVoxelizer │
//! └──────────┬─────────────────────┬───────────────────┬──────┘
//!            │  Arc<D: RenderDevice>                    │
//! ┌──────────▼──────────────────────────────────────────▼──────┐
//! │  RenderDevice trait                                         │
//! │    buffers · textures · pipelines · binding sets            │
//! │    command pools · fences · submit(CommandList)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SoftwareDevice (CPU reference backend)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Records uploaded to the device are defined once in [`layout`] and shared
//! by every backend.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod command;
pub mod device;
pub mod error;
pub mod handle;
pub mod layout;
pub mod software;
pub mod types;

pub use command::{
    BufferBarrier, Command, CommandList, IndexType, Rect2D, RenderingInfo, TextureBarrier,
    Viewport,
};
pub use device::RenderDevice;
pub use error::{DeviceError, DeviceResult};
pub use handle::{
    BindingSetId, BufferId, CommandBufferId, CommandPoolId, FenceId, PipelineId, QueueId,
    TextureId,
};
pub use layout::{
    bindless_index, DrawIndexedIndirectCommand, GpuMaterial, GpuVertex, VoxelFragment,
    DRAW_COMMAND_STRIDE,
    INVALID_TEXTURE_INDEX, VOXEL_FRAGMENT_SIZE,
};
pub use software::{SoftwareDevice, SoftwareDeviceConfig, TextureSnapshot};
pub use types::{
    AccessFlags, Binding, BoundResource, BufferDescriptor, BufferUsage, CullMode, DepthState,
    DeviceCapabilities, GraphicsPipelineDescriptor, MemoryLocation, PipelineStage, QueueType,
    RasterizationState, ShaderProgram, ShaderStage, SubmitInfo, TextureDescriptor, TextureFormat,
    TextureLayout, TextureUsage,
};
