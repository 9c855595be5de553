//! # Render Device Capability
//!
//! [`RenderDevice`] is everything the streaming loader and the voxelizer
//! need from a graphics API. Consumers receive it explicitly as `Arc<D>`;
//! there is no global device.
//!
//! All methods take `&self` and must be callable from any thread. The
//! loader thread submits copies on the transfer queue while the render
//! thread records draws, so backends synchronize internally.

use crate::command::CommandList;
use crate::error::DeviceResult;
use crate::handle::{
    BindingSetId, BufferId, CommandBufferId, CommandPoolId, FenceId, PipelineId, QueueId,
    TextureId,
};
use crate::types::{
    Binding, BufferDescriptor, DeviceCapabilities, GraphicsPipelineDescriptor, QueueType,
    SubmitInfo, TextureDescriptor,
};
use std::time::Duration;

/// Graphics device abstraction.
///
/// # Example
///
/// ```rust
/// use voxstream_device::{
///     BufferDescriptor, BufferUsage, MemoryLocation, RenderDevice, SoftwareDevice,
/// };
///
/// let device = SoftwareDevice::new();
/// let buffer = device
///     .create_buffer(&BufferDescriptor {
///         size: 16,
///         usage: BufferUsage::STORAGE,
///         memory: MemoryLocation::HostVisible,
///         label: "scratch",
///     })
///     .unwrap();
/// device.write_buffer(buffer, 0, &[1, 2, 3, 4]).unwrap();
/// assert_eq!(device.read_buffer(buffer, 0, 4).unwrap(), vec![1, 2, 3, 4]);
/// ```
pub trait RenderDevice: Send + Sync + 'static {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Feature report.
    fn capabilities(&self) -> DeviceCapabilities;

    /// Queue of the given family.
    fn queue(&self, queue_type: QueueType) -> QueueId;

    // =========================================================================
    // BUFFERS
    // =========================================================================

    /// Allocates a buffer. Contents start zeroed.
    ///
    /// # Errors
    ///
    /// [`DeviceError::InvalidSize`](crate::DeviceError::InvalidSize) for a
    /// zero size, [`DeviceError::OutOfMemory`](crate::DeviceError::OutOfMemory)
    /// if the allocation does not fit.
    fn create_buffer(&self, desc: &BufferDescriptor) -> DeviceResult<BufferId>;

    /// Writes bytes into a host-visible buffer.
    ///
    /// # Errors
    ///
    /// Fails for device-local buffers, out-of-range writes or unknown handles.
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> DeviceResult<()>;

    /// Reads bytes from a host-visible buffer.
    ///
    /// # Errors
    ///
    /// Fails for device-local buffers, out-of-range reads or unknown handles.
    fn read_buffer(&self, buffer: BufferId, offset: u64, len: u64) -> DeviceResult<Vec<u8>>;

    /// Frees a buffer.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown.
    fn destroy_buffer(&self, buffer: BufferId) -> DeviceResult<()>;

    // =========================================================================
    // TEXTURES
    // =========================================================================

    /// Creates a texture in the `Undefined` layout, owned by no queue.
    ///
    /// # Errors
    ///
    /// Fails on zero or oversized dimensions or when memory is exhausted.
    fn create_texture(&self, desc: &TextureDescriptor) -> DeviceResult<TextureId>;

    /// Frees a texture and its bindless slot.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown.
    fn destroy_texture(&self, texture: TextureId) -> DeviceResult<()>;

    /// Width and height the texture was created with.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown.
    fn texture_extent(&self, texture: TextureId) -> DeviceResult<(u32, u32)>;

    /// Registers a texture in the bindless table and returns its index,
    /// which is always [`bindless_index`](crate::layout::bindless_index) of
    /// the handle. Registering twice is harmless.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown.
    fn update_bindless_texture(&self, texture: TextureId) -> DeviceResult<u32>;

    // =========================================================================
    // PIPELINES
    // =========================================================================

    /// Creates a graphics pipeline.
    ///
    /// # Errors
    ///
    /// [`DeviceError::Unsupported`](crate::DeviceError::Unsupported) if the
    /// descriptor asks for a missing feature.
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDescriptor)
        -> DeviceResult<PipelineId>;

    /// Destroys a pipeline.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown.
    fn destroy_pipeline(&self, pipeline: PipelineId) -> DeviceResult<()>;

    /// Creates a binding set for set number `set` of `pipeline`.
    ///
    /// # Errors
    ///
    /// Fails if any referenced handle is unknown or a buffer lacks the usage
    /// its binding needs.
    fn create_binding_set(
        &self,
        pipeline: PipelineId,
        set: u32,
        bindings: &[Binding],
        label: &'static str,
    ) -> DeviceResult<BindingSetId>;

    /// Destroys a binding set.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown.
    fn destroy_binding_set(&self, set: BindingSetId) -> DeviceResult<()>;

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Creates a command pool for `queue`.
    ///
    /// # Errors
    ///
    /// Fails if the queue is unknown.
    fn create_command_pool(&self, queue: QueueId) -> DeviceResult<CommandPoolId>;

    /// Allocates a command buffer from `pool`.
    ///
    /// # Errors
    ///
    /// Fails if the pool is unknown.
    fn allocate_command_buffer(&self, pool: CommandPoolId) -> DeviceResult<CommandBufferId>;

    /// Returns every command buffer of `pool` to the initial state.
    ///
    /// # Errors
    ///
    /// Fails if the pool is unknown.
    fn reset_command_pool(&self, pool: CommandPoolId) -> DeviceResult<()>;

    /// Destroys a pool and every buffer allocated from it.
    ///
    /// # Errors
    ///
    /// Fails if the pool is unknown.
    fn destroy_command_pool(&self, pool: CommandPoolId) -> DeviceResult<()>;

    // =========================================================================
    // SYNCHRONIZATION
    // =========================================================================

    /// Creates a fence.
    ///
    /// # Errors
    ///
    /// Fails only if the device is lost.
    fn create_fence(&self, signaled: bool) -> DeviceResult<FenceId>;

    /// Blocks until the fence signals. `None` waits forever.
    ///
    /// # Errors
    ///
    /// [`DeviceError::FenceTimeout`](crate::DeviceError::FenceTimeout) if the
    /// timeout elapses, [`DeviceError::DeviceLost`](crate::DeviceError::DeviceLost)
    /// if the device dies while waiting.
    fn wait_for_fence(&self, fence: FenceId, timeout: Option<Duration>) -> DeviceResult<()>;

    /// Returns a fence to the unsignalled state.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown.
    fn reset_fence(&self, fence: FenceId) -> DeviceResult<()>;

    /// Destroys a fence.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown.
    fn destroy_fence(&self, fence: FenceId) -> DeviceResult<()>;

    /// Submits a recorded list. The fence, if any, signals on completion.
    ///
    /// # Errors
    ///
    /// Fails on invalid handles, a signalled fence, a command buffer from a
    /// pool of another queue, malformed commands or device loss.
    fn submit(&self, info: &SubmitInfo, commands: CommandList) -> DeviceResult<()>;

    /// Records with `record`, submits, and if the submission has a fence,
    /// waits on it and resets it.
    ///
    /// # Errors
    ///
    /// Propagates submit and wait errors.
    fn immediate_submit<F>(
        &self,
        info: &SubmitInfo,
        timeout: Option<Duration>,
        record: F,
    ) -> DeviceResult<()>
    where
        F: FnOnce(&mut CommandList),
        Self: Sized,
    {
        let mut commands = CommandList::new();
        record(&mut commands);
        self.submit(info, commands)?;

        if let Some(fence) = info.fence {
            self.wait_for_fence(fence, timeout)?;
            self.reset_fence(fence)?;
        }
        Ok(())
    }
}
