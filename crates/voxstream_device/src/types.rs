//! Descriptors, flags and enums passed to a [`RenderDevice`](crate::RenderDevice).

use crate::handle::{BufferId, CommandBufferId, FenceId, QueueId, TextureId};

// =============================================================================
// QUEUES
// =============================================================================

/// Queue family a submission targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    /// Graphics + compute + transfer.
    Graphics,
    /// Dedicated copy engine. May alias the graphics queue on devices
    /// without a separate transfer family.
    Transfer,
}

// =============================================================================
// BUFFERS
// =============================================================================

bitflags::bitflags! {
    /// How a buffer may be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Source of copy commands.
        const TRANSFER_SRC = 1 << 0;
        /// Destination of copy commands.
        const TRANSFER_DST = 1 << 1;
        /// Read/write storage buffer in shaders.
        const STORAGE = 1 << 2;
        /// Uniform buffer in shaders.
        const UNIFORM = 1 << 3;
        /// Index buffer.
        const INDEX = 1 << 4;
        /// Indirect draw arguments.
        const INDIRECT = 1 << 5;
    }
}

/// Where a buffer's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Fast device memory, not host accessible.
    DeviceLocal,
    /// Host-mapped memory, readable and writable from the CPU.
    HostVisible,
}

/// Buffer creation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Size in bytes. Must be non-zero.
    pub size: u64,
    /// Allowed usages.
    pub usage: BufferUsage,
    /// Memory placement.
    pub memory: MemoryLocation,
    /// Debug label.
    pub label: &'static str,
}

// =============================================================================
// TEXTURES
// =============================================================================

/// Texel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit RGBA, linear.
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB encoded.
    Rgba8Srgb,
}

impl TextureFormat {
    /// Bytes per texel.
    #[inline]
    #[must_use]
    pub const fn bytes_per_texel(self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Rgba8Srgb => 4,
        }
    }
}

bitflags::bitflags! {
    /// How a texture may be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Sampled in shaders.
        const SAMPLED = 1 << 0;
        /// Destination of copy commands.
        const TRANSFER_DST = 1 << 1;
        /// Source of copy commands.
        const TRANSFER_SRC = 1 << 2;
    }
}

/// Texture creation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDescriptor {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Texel format.
    pub format: TextureFormat,
    /// Allowed usages.
    pub usage: TextureUsage,
    /// Debug label.
    pub label: String,
}

impl TextureDescriptor {
    /// Size of the top mip level in bytes.
    #[inline]
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.format.bytes_per_texel())
    }
}

/// Image layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureLayout {
    /// Contents undefined; the initial layout.
    Undefined,
    /// Optimal as a copy destination.
    TransferDst,
    /// Optimal for shader sampling.
    ShaderReadOnly,
}

// =============================================================================
// SYNCHRONIZATION
// =============================================================================

bitflags::bitflags! {
    /// Pipeline stages a barrier waits on or blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStage: u32 {
        /// Start of the pipeline.
        const TOP_OF_PIPE = 1 << 0;
        /// Copy commands.
        const TRANSFER = 1 << 1;
        /// Vertex shading.
        const VERTEX_SHADER = 1 << 2;
        /// Geometry shading.
        const GEOMETRY_SHADER = 1 << 3;
        /// Fragment shading.
        const FRAGMENT_SHADER = 1 << 4;
        /// Host access.
        const HOST = 1 << 5;
        /// Every stage.
        const ALL_COMMANDS = 1 << 6;
    }
}

bitflags::bitflags! {
    /// Memory accesses made visible or available by a barrier.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        /// Copy reads.
        const TRANSFER_READ = 1 << 0;
        /// Copy writes.
        const TRANSFER_WRITE = 1 << 1;
        /// Shader reads.
        const SHADER_READ = 1 << 2;
        /// Shader writes.
        const SHADER_WRITE = 1 << 3;
        /// Host reads.
        const HOST_READ = 1 << 4;
        /// Host writes.
        const HOST_WRITE = 1 << 5;
    }
}

// =============================================================================
// PIPELINES
// =============================================================================

bitflags::bitflags! {
    /// Shader stages that can see a push constant range.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStage: u32 {
        /// Vertex stage.
        const VERTEX = 1 << 0;
        /// Geometry stage.
        const GEOMETRY = 1 << 1;
        /// Fragment stage.
        const FRAGMENT = 1 << 2;
    }
}

/// Built-in programs a graphics pipeline can run.
///
/// Backends map each variant to their own shader modules. Binding slots for
/// each program are listed in [`crate::layout::bindings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderProgram {
    /// Counts covered voxel cells into counter slot 0.
    VoxelizeCount,
    /// Bump-allocates counter slot 1 and writes one fragment per covered cell.
    VoxelizeWrite,
}

/// Face culling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    /// Rasterize both faces.
    #[default]
    None,
    /// Drop front faces.
    Front,
    /// Drop back faces.
    Back,
}

/// Rasterizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RasterizationState {
    /// Face culling.
    pub cull_mode: CullMode,
    /// Cover every cell the triangle touches, not only sampled centers.
    pub conservative: bool,
}

/// Depth state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepthState {
    /// Depth test enabled.
    pub test: bool,
    /// Depth writes enabled.
    pub write: bool,
}

/// Graphics pipeline creation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsPipelineDescriptor {
    /// Program to run.
    pub program: ShaderProgram,
    /// Rasterizer state.
    pub rasterization: RasterizationState,
    /// Depth state.
    pub depth: DepthState,
    /// Color attachment formats. Empty for attachment-less passes.
    pub color_formats: Vec<TextureFormat>,
    /// Debug label.
    pub label: &'static str,
}

/// Resource bound to one slot of a binding set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundResource {
    /// Whole buffer as a storage buffer.
    StorageBuffer(BufferId),
    /// Whole buffer as a uniform buffer.
    UniformBuffer(BufferId),
    /// Sampled texture.
    Texture(TextureId),
}

/// One slot of a binding set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    /// Binding slot number.
    pub slot: u32,
    /// Bound resource.
    pub resource: BoundResource,
}

impl Binding {
    /// Storage buffer at `slot`.
    #[inline]
    #[must_use]
    pub const fn storage(slot: u32, buffer: BufferId) -> Self {
        Self {
            slot,
            resource: BoundResource::StorageBuffer(buffer),
        }
    }
}

// =============================================================================
// SUBMISSION
// =============================================================================

/// One queue submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitInfo {
    /// Target queue.
    pub queue: QueueId,
    /// Command buffer the list is recorded into. Must come from a pool
    /// created for `queue`.
    pub command_buffer: CommandBufferId,
    /// Fence signalled when the work completes. Must be unsignalled.
    pub fence: Option<FenceId>,
}

/// Device feature report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Conservative rasterization is available.
    pub conservative_rasterization: bool,
    /// The transfer queue is a distinct hardware queue.
    pub separate_transfer_queue: bool,
    /// Largest texture edge.
    pub max_texture_dimension: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_byte_size() {
        let desc = TextureDescriptor {
            width: 16,
            height: 8,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
            label: "albedo".to_string(),
        };
        assert_eq!(desc.byte_size(), 16 * 8 * 4);
    }

    #[test]
    fn test_usage_flags_compose() {
        let usage = BufferUsage::STORAGE | BufferUsage::TRANSFER_DST;
        assert!(usage.contains(BufferUsage::STORAGE));
        assert!(!usage.contains(BufferUsage::INDEX));
    }
}
