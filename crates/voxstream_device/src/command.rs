//! # Command Recording
//!
//! A [`CommandList`] is an owned, backend-neutral recording of GPU work. It
//! is built on any thread and handed to
//! [`RenderDevice::submit`](crate::RenderDevice::submit) together with the
//! command buffer it should execute in.
//!
//! ```text
//!   CommandList::new()
//!     .texture_barrier(..)        ┐
//!     .copy_buffer_to_texture(..) ├─ recorded, nothing executes yet
//!     .draw_indexed_indirect(..)  ┘
//!        │
//!        └──> device.submit(&SubmitInfo { queue, command_buffer, fence }, list)
//! ```

use crate::handle::{BindingSetId, BufferId, PipelineId, QueueId, TextureId};
use crate::types::{AccessFlags, PipelineStage, ShaderStage, TextureLayout};

/// Texture memory + layout barrier, optionally transferring queue ownership.
///
/// When `src_queue` and `dst_queue` are both set and differ, the barrier is
/// an ownership transfer: executed on `src_queue` it releases the texture,
/// executed on `dst_queue` it acquires it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBarrier {
    /// Texture to transition.
    pub texture: TextureId,
    /// Stages that must complete first.
    pub src_stage: PipelineStage,
    /// Accesses made available.
    pub src_access: AccessFlags,
    /// Stages that wait.
    pub dst_stage: PipelineStage,
    /// Accesses made visible.
    pub dst_access: AccessFlags,
    /// Layout the texture is in.
    pub old_layout: TextureLayout,
    /// Layout after the barrier.
    pub new_layout: TextureLayout,
    /// Releasing queue.
    pub src_queue: Option<QueueId>,
    /// Acquiring queue.
    pub dst_queue: Option<QueueId>,
}

impl TextureBarrier {
    /// Returns true if the barrier moves the texture between queues.
    #[inline]
    #[must_use]
    pub fn is_ownership_transfer(&self) -> bool {
        matches!((self.src_queue, self.dst_queue), (Some(src), Some(dst)) if src != dst)
    }
}

/// Buffer memory barrier, optionally transferring queue ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    /// Buffer to synchronize.
    pub buffer: BufferId,
    /// Stages that must complete first.
    pub src_stage: PipelineStage,
    /// Accesses made available.
    pub src_access: AccessFlags,
    /// Stages that wait.
    pub dst_stage: PipelineStage,
    /// Accesses made visible.
    pub dst_access: AccessFlags,
    /// Releasing queue.
    pub src_queue: Option<QueueId>,
    /// Acquiring queue.
    pub dst_queue: Option<QueueId>,
}

/// Render pass without color or depth attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderingInfo {
    /// Render area width.
    pub width: u32,
    /// Render area height.
    pub height: u32,
    /// Layer count.
    pub layer_count: u32,
}

/// Viewport rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width.
    pub width: f32,
    /// Height.
    pub height: f32,
    /// Near depth.
    pub min_depth: f32,
    /// Far depth.
    pub max_depth: f32,
}

impl Viewport {
    /// Full viewport for a square render area of `size` texels.
    #[must_use]
    pub fn square(size: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: size as f32,
            height: size as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Integer scissor rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect2D {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

/// Index element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// 32-bit indices.
    U32,
}

/// A single recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Buffer to buffer copy.
    CopyBuffer {
        /// Source buffer.
        src: BufferId,
        /// Source offset in bytes.
        src_offset: u64,
        /// Destination buffer.
        dst: BufferId,
        /// Destination offset in bytes.
        dst_offset: u64,
        /// Bytes to copy.
        size: u64,
    },
    /// Tightly packed buffer contents into the whole top mip of a texture.
    CopyBufferToTexture {
        /// Source buffer.
        src: BufferId,
        /// Source offset in bytes.
        src_offset: u64,
        /// Destination texture.
        dst: TextureId,
        /// Copy width in texels.
        width: u32,
        /// Copy height in texels.
        height: u32,
    },
    /// Memory, layout and ownership barriers.
    PipelineBarrier {
        /// Texture barriers.
        textures: Vec<TextureBarrier>,
        /// Buffer barriers.
        buffers: Vec<BufferBarrier>,
    },
    /// Begins an attachment-less render pass.
    BeginRendering(RenderingInfo),
    /// Ends the current render pass.
    EndRendering,
    /// Sets the viewport.
    SetViewport(Viewport),
    /// Sets the scissor rectangle.
    SetScissor(Rect2D),
    /// Binds a graphics pipeline.
    BindPipeline(PipelineId),
    /// Binds binding sets starting at `first_set`.
    BindBindingSets {
        /// First set number.
        first_set: u32,
        /// Sets to bind.
        sets: Vec<BindingSetId>,
    },
    /// Writes push constant bytes.
    PushConstants {
        /// Stages the range is visible to.
        stage: ShaderStage,
        /// Byte offset.
        offset: u32,
        /// Raw bytes.
        data: Vec<u8>,
    },
    /// Binds an index buffer.
    BindIndexBuffer {
        /// Index buffer.
        buffer: BufferId,
        /// Byte offset.
        offset: u64,
        /// Element type.
        index_type: IndexType,
    },
    /// Indexed draws whose arguments live in a GPU buffer.
    DrawIndexedIndirect {
        /// Argument buffer.
        buffer: BufferId,
        /// Byte offset of the first argument record.
        offset: u64,
        /// Number of records.
        draw_count: u32,
        /// Stride between records.
        stride: u32,
    },
}

/// Ordered list of recorded commands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw command.
    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Records a buffer to buffer copy.
    pub fn copy_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> &mut Self {
        self.push(Command::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        })
    }

    /// Records a buffer to texture copy covering `width` x `height` texels.
    pub fn copy_buffer_to_texture(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: TextureId,
        width: u32,
        height: u32,
    ) -> &mut Self {
        self.push(Command::CopyBufferToTexture {
            src,
            src_offset,
            dst,
            width,
            height,
        })
    }

    /// Records one pipeline barrier. Does nothing if both lists are empty.
    pub fn pipeline_barrier(
        &mut self,
        textures: Vec<TextureBarrier>,
        buffers: Vec<BufferBarrier>,
    ) -> &mut Self {
        if textures.is_empty() && buffers.is_empty() {
            return self;
        }
        self.push(Command::PipelineBarrier { textures, buffers })
    }

    /// Records a barrier for a single texture.
    pub fn texture_barrier(&mut self, barrier: TextureBarrier) -> &mut Self {
        self.pipeline_barrier(vec![barrier], Vec::new())
    }

    /// Records a barrier for a single buffer.
    pub fn buffer_barrier(&mut self, barrier: BufferBarrier) -> &mut Self {
        self.pipeline_barrier(Vec::new(), vec![barrier])
    }

    /// Begins an attachment-less render pass.
    pub fn begin_rendering(&mut self, info: RenderingInfo) -> &mut Self {
        self.push(Command::BeginRendering(info))
    }

    /// Ends the current render pass.
    pub fn end_rendering(&mut self) -> &mut Self {
        self.push(Command::EndRendering)
    }

    /// Sets the viewport.
    pub fn set_viewport(&mut self, viewport: Viewport) -> &mut Self {
        self.push(Command::SetViewport(viewport))
    }

    /// Sets the scissor rectangle.
    pub fn set_scissor(&mut self, rect: Rect2D) -> &mut Self {
        self.push(Command::SetScissor(rect))
    }

    /// Binds a graphics pipeline.
    pub fn bind_pipeline(&mut self, pipeline: PipelineId) -> &mut Self {
        self.push(Command::BindPipeline(pipeline))
    }

    /// Binds binding sets starting at `first_set`.
    pub fn bind_binding_sets(&mut self, first_set: u32, sets: &[BindingSetId]) -> &mut Self {
        self.push(Command::BindBindingSets {
            first_set,
            sets: sets.to_vec(),
        })
    }

    /// Writes push constants from any `Pod` value.
    pub fn push_constants<T: bytemuck::Pod>(
        &mut self,
        stage: ShaderStage,
        offset: u32,
        value: &T,
    ) -> &mut Self {
        self.push(Command::PushConstants {
            stage,
            offset,
            data: bytemuck::bytes_of(value).to_vec(),
        })
    }

    /// Binds an index buffer.
    pub fn bind_index_buffer(
        &mut self,
        buffer: BufferId,
        offset: u64,
        index_type: IndexType,
    ) -> &mut Self {
        self.push(Command::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        })
    }

    /// Records indexed indirect draws.
    pub fn draw_indexed_indirect(
        &mut self,
        buffer: BufferId,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> &mut Self {
        self.push(Command::DrawIndexedIndirect {
            buffer,
            offset,
            draw_count,
            stride,
        })
    }

    /// Recorded commands in order.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of recorded commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Texture barriers recorded so far, across all barrier commands.
    pub fn texture_barriers(&self) -> impl Iterator<Item = &TextureBarrier> {
        self.commands.iter().flat_map(|c| match c {
            Command::PipelineBarrier { textures, .. } => textures.as_slice(),
            _ => &[][..],
        })
    }

    /// Drops every recorded command.
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Consumes the list.
    #[must_use]
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn barrier(src: Option<QueueId>, dst: Option<QueueId>) -> TextureBarrier {
        TextureBarrier {
            texture: TextureId::from_raw(1),
            src_stage: PipelineStage::TRANSFER,
            src_access: AccessFlags::TRANSFER_WRITE,
            dst_stage: PipelineStage::FRAGMENT_SHADER,
            dst_access: AccessFlags::SHADER_READ,
            old_layout: TextureLayout::TransferDst,
            new_layout: TextureLayout::ShaderReadOnly,
            src_queue: src,
            dst_queue: dst,
        }
    }

    #[test]
    fn test_empty_barrier_records_nothing() {
        let mut list = CommandList::new();
        list.pipeline_barrier(Vec::new(), Vec::new());
        assert!(list.is_empty());
    }

    #[test]
    fn test_builder_chains_in_order() {
        let mut list = CommandList::new();
        list.begin_rendering(RenderingInfo {
            width: 4,
            height: 4,
            layer_count: 1,
        })
        .bind_pipeline(PipelineId::from_raw(3))
        .push_constants(ShaderStage::FRAGMENT, 8, &4u32)
        .end_rendering();

        assert_eq!(list.len(), 4);
        assert!(matches!(list.commands()[1], Command::BindPipeline(_)));
        match &list.commands()[2] {
            Command::PushConstants { offset, data, .. } => {
                assert_eq!(*offset, 8);
                assert_eq!(data.as_slice(), &4u32.to_ne_bytes());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_ownership_transfer_detection() {
        let transfer = QueueId::from_raw(1);
        let graphics = QueueId::from_raw(2);

        assert!(barrier(Some(transfer), Some(graphics)).is_ownership_transfer());
        assert!(!barrier(Some(graphics), Some(graphics)).is_ownership_transfer());
        assert!(!barrier(None, None).is_ownership_transfer());
    }

    #[test]
    fn test_texture_barriers_iterates_all_commands() {
        let mut list = CommandList::new();
        list.texture_barrier(barrier(None, None));
        list.copy_buffer(BufferId::from_raw(1), 0, BufferId::from_raw(2), 0, 4);
        list.pipeline_barrier(vec![barrier(None, None), barrier(None, None)], Vec::new());

        assert_eq!(list.texture_barriers().count(), 3);
    }
}
