//! # Software Device
//!
//! Synchronous CPU implementation of [`RenderDevice`]. Every submission
//! executes inside `submit`, so a fence is signalled by the time `submit`
//! returns. The device is the reference backend for tests and tools.
//!
//! ```text
//! ┌──────────────────────────── SoftwareDevice ────────────────────────────┐
//! │  Mutex<DeviceState>                                                    │
//! │    buffers / textures / pipelines / binding sets / pools / fences      │
//! │                                                                        │
//! │  submit(info, list) ──> validate ──> execute commands ──> signal fence │
//! │                              │                                         │
//! │                              ├─ copies + barriers: queue ownership     │
//! │                              └─ draws: raster::voxelize_triangle       │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! What it checks that a driver would otherwise only report through
//! validation layers:
//! - copies and barriers run on the queue that owns the texture
//! - barrier `old_layout` matches the tracked layout
//! - a submitted fence starts unsignalled
//! - command buffers are submitted to the queue their pool was made for
//!
//! Fault injection: [`SoftwareDevice::simulate_device_loss`],
//! [`SoftwareDevice::simulate_hang`] and
//! [`SoftwareDevice::simulate_count_undercount`].

pub mod raster;

use crate::command::{BufferBarrier, Command, CommandList, Rect2D, RenderingInfo, TextureBarrier};
use crate::device::RenderDevice;
use crate::error::{DeviceError, DeviceResult};
use crate::handle::{
    BindingSetId, BufferId, CommandBufferId, CommandPoolId, FenceId, PipelineId, QueueId,
    TextureId,
};
use crate::layout::{
    bindings, bindless_index, counter, push_constants, DrawIndexedIndirectCommand, GpuMaterial, GpuVertex,
    VoxelFragment, VOXEL_FRAGMENT_SIZE,
};
use crate::types::{
    Binding, BoundResource, BufferDescriptor, BufferUsage, CullMode, DeviceCapabilities,
    GraphicsPipelineDescriptor, MemoryLocation, QueueType, ShaderProgram, SubmitInfo,
    TextureDescriptor, TextureLayout, TextureUsage,
};
use bytemuck::Pod;
use parking_lot::Mutex;
use raster::{ClipRect, RasterParams};
use std::collections::HashMap;
use std::ops::Range;
use std::time::Duration;
use voxstream_core::math::{transform_point, Mat4};
use voxstream_core::MAX_VOXEL_RESOLUTION;

const GRAPHICS_QUEUE: QueueId = QueueId::from_raw(1);
const TRANSFER_QUEUE: QueueId = QueueId::from_raw(2);

/// Push constant block size.
const PUSH_CONSTANT_BYTES: usize = 128;

/// Software device settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareDeviceConfig {
    /// Total bytes of buffers + textures allowed. `None` is unlimited.
    pub memory_budget: Option<u64>,
    /// Advertise and honour conservative rasterization.
    pub conservative_rasterization: bool,
    /// Expose a transfer queue distinct from the graphics queue.
    pub separate_transfer_queue: bool,
    /// Largest texture edge.
    pub max_texture_dimension: u32,
}

impl Default for SoftwareDeviceConfig {
    fn default() -> Self {
        Self {
            memory_budget: None,
            conservative_rasterization: true,
            separate_transfer_queue: true,
            max_texture_dimension: 16_384,
        }
    }
}

/// Tracked texture state, for assertions in tests and tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSnapshot {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Current layout.
    pub layout: TextureLayout,
    /// Queue that currently owns the texture.
    pub owner: Option<QueueId>,
    /// Queue a release barrier handed the texture to, until it is acquired.
    pub pending_release: Option<QueueId>,
    /// Bindless index, once registered.
    pub bindless_index: Option<u32>,
    /// Buffer-to-texture copies executed into this texture.
    pub copy_count: u32,
}

struct BufferRecord {
    desc: BufferDescriptor,
    data: Vec<u8>,
}

struct TextureRecord {
    desc: TextureDescriptor,
    data: Vec<u8>,
    layout: TextureLayout,
    owner: Option<QueueId>,
    /// Released toward this queue, waiting for the acquire half.
    released_to: Option<QueueId>,
    bindless: Option<u32>,
    copies: u32,
}

struct BindingSetRecord {
    pipeline: PipelineId,
    bindings: Vec<Binding>,
}

struct PoolRecord {
    queue: QueueId,
    buffers: Vec<CommandBufferId>,
    resets: u32,
}

#[derive(Default)]
struct DeviceState {
    next_id: u32,
    buffers: HashMap<BufferId, BufferRecord>,
    textures: HashMap<TextureId, TextureRecord>,
    pipelines: HashMap<PipelineId, GraphicsPipelineDescriptor>,
    binding_sets: HashMap<BindingSetId, BindingSetRecord>,
    pools: HashMap<CommandPoolId, PoolRecord>,
    command_buffers: HashMap<CommandBufferId, CommandPoolId>,
    fences: HashMap<FenceId, bool>,
    live_bytes: u64,
    submissions: u64,
    lost: bool,
    hung: bool,
    count_undercount: u32,
}

/// Bound state while executing one command list.
struct ExecContext {
    queue: QueueId,
    render_pass: Option<RenderingInfo>,
    scissor: Option<Rect2D>,
    pipeline: Option<PipelineId>,
    sets: HashMap<u32, BindingSetId>,
    push: [u8; PUSH_CONSTANT_BYTES],
    index_buffer: Option<(BufferId, u64)>,
}

impl ExecContext {
    fn new(queue: QueueId) -> Self {
        Self {
            queue,
            render_pass: None,
            scissor: None,
            pipeline: None,
            sets: HashMap::new(),
            push: [0; PUSH_CONSTANT_BYTES],
            index_buffer: None,
        }
    }

    fn push_f32(&self, offset: u32) -> f32 {
        let at = offset as usize;
        bytemuck::pod_read_unaligned(&self.push[at..at + 4])
    }

    fn push_u32(&self, offset: u32) -> u32 {
        let at = offset as usize;
        bytemuck::pod_read_unaligned(&self.push[at..at + 4])
    }
}

/// Storage buffer slots a program reads and writes.
struct ProgramSlots {
    vertices: u32,
    transforms: u32,
    draw_commands: u32,
    counter: u32,
    materials: Option<u32>,
    fragments: Option<u32>,
}

impl ProgramSlots {
    const fn of(program: ShaderProgram) -> Self {
        match program {
            ShaderProgram::VoxelizeCount => Self {
                vertices: bindings::count_pass::VERTICES,
                transforms: bindings::count_pass::TRANSFORMS,
                draw_commands: bindings::count_pass::DRAW_COMMANDS,
                counter: bindings::count_pass::COUNTER,
                materials: None,
                fragments: None,
            },
            ShaderProgram::VoxelizeWrite => Self {
                vertices: bindings::write_pass::VERTICES,
                transforms: bindings::write_pass::TRANSFORMS,
                draw_commands: bindings::write_pass::DRAW_COMMANDS,
                counter: bindings::write_pass::COUNTER,
                materials: Some(bindings::write_pass::MATERIALS),
                fragments: Some(bindings::write_pass::FRAGMENTS),
            },
        }
    }
}

fn invalid(kind: &'static str, raw: u32) -> DeviceError {
    DeviceError::InvalidHandle { kind, raw }
}

fn layout_mismatch(id: TextureId, expected: TextureLayout, actual: TextureLayout) -> DeviceError {
    DeviceError::InvalidCommand(format!(
        "barrier on {id:?} expects {expected:?}, texture is {actual:?}"
    ))
}

fn byte_range(offset: u64, len: u64, size: u64) -> DeviceResult<Range<usize>> {
    let out_of_bounds = DeviceError::OutOfBounds { offset, len, size };
    let end = offset.checked_add(len).ok_or_else(|| out_of_bounds.clone())?;
    if end > size {
        return Err(out_of_bounds);
    }
    // size is a live Vec length, so both ends fit in usize
    Ok(offset as usize..end as usize)
}

fn read_pod_array<T: Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl DeviceState {
    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn check_alive(&self) -> DeviceResult<()> {
        if self.lost {
            Err(DeviceError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn reserve(&mut self, bytes: u64, budget: Option<u64>) -> DeviceResult<()> {
        if let Some(budget) = budget {
            let available = budget.saturating_sub(self.live_bytes);
            if bytes > available {
                return Err(DeviceError::OutOfMemory {
                    requested: bytes,
                    available,
                });
            }
        }
        self.live_bytes += bytes;
        Ok(())
    }

    fn buffer(&self, id: BufferId) -> DeviceResult<&BufferRecord> {
        self.buffers.get(&id).ok_or_else(|| invalid("buffer", id.raw()))
    }

    fn buffer_mut(&mut self, id: BufferId) -> DeviceResult<&mut BufferRecord> {
        self.buffers
            .get_mut(&id)
            .ok_or_else(|| invalid("buffer", id.raw()))
    }

    fn texture_mut(&mut self, id: TextureId) -> DeviceResult<&mut TextureRecord> {
        self.textures
            .get_mut(&id)
            .ok_or_else(|| invalid("texture", id.raw()))
    }

    fn require_usage(&self, id: BufferId, usage: BufferUsage) -> DeviceResult<()> {
        let record = self.buffer(id)?;
        if record.desc.usage.contains(usage) {
            Ok(())
        } else {
            Err(DeviceError::InvalidCommand(format!(
                "buffer {id:?} ({}) lacks {usage:?} usage",
                record.desc.label
            )))
        }
    }

    fn storage_slot(&self, set: &BindingSetRecord, slot: u32) -> DeviceResult<BufferId> {
        set.bindings
            .iter()
            .find_map(|b| match (b.slot == slot, b.resource) {
                (true, BoundResource::StorageBuffer(id)) => Some(id),
                _ => None,
            })
            .ok_or_else(|| {
                DeviceError::InvalidCommand(format!("no storage buffer bound at slot {slot}"))
            })
    }

    fn read_array<T: Pod>(&self, id: BufferId) -> DeviceResult<Vec<T>> {
        Ok(read_pod_array(&self.buffer(id)?.data))
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    fn execute(&mut self, queue: QueueId, commands: Vec<Command>) -> DeviceResult<()> {
        let mut ctx = ExecContext::new(queue);

        for command in commands {
            match command {
                Command::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => self.copy_buffer(src, src_offset, dst, dst_offset, size)?,
                Command::CopyBufferToTexture {
                    src,
                    src_offset,
                    dst,
                    width,
                    height,
                } => self.copy_buffer_to_texture(ctx.queue, src, src_offset, dst, width, height)?,
                Command::PipelineBarrier { textures, buffers } => {
                    for barrier in &textures {
                        self.texture_barrier(ctx.queue, barrier)?;
                    }
                    for barrier in &buffers {
                        self.buffer_barrier(ctx.queue, barrier)?;
                    }
                }
                Command::BeginRendering(info) => {
                    if ctx.render_pass.is_some() {
                        return Err(DeviceError::InvalidCommand(
                            "render pass already active".to_string(),
                        ));
                    }
                    if info.width == 0 || info.height == 0 {
                        return Err(DeviceError::InvalidSize(0));
                    }
                    ctx.render_pass = Some(info);
                }
                Command::EndRendering => {
                    if ctx.render_pass.take().is_none() {
                        return Err(DeviceError::InvalidCommand(
                            "end_rendering without begin_rendering".to_string(),
                        ));
                    }
                }
                Command::SetViewport(_) => {}
                Command::SetScissor(rect) => ctx.scissor = Some(rect),
                Command::BindPipeline(pipeline) => {
                    if !self.pipelines.contains_key(&pipeline) {
                        return Err(invalid("pipeline", pipeline.raw()));
                    }
                    ctx.pipeline = Some(pipeline);
                }
                Command::BindBindingSets { first_set, sets } => {
                    for (i, set) in (first_set..).zip(sets) {
                        if !self.binding_sets.contains_key(&set) {
                            return Err(invalid("binding set", set.raw()));
                        }
                        ctx.sets.insert(i, set);
                    }
                }
                Command::PushConstants { offset, data, .. } => {
                    let range = byte_range(
                        u64::from(offset),
                        data.len() as u64,
                        PUSH_CONSTANT_BYTES as u64,
                    )?;
                    ctx.push[range].copy_from_slice(&data);
                }
                Command::BindIndexBuffer { buffer, offset, .. } => {
                    self.require_usage(buffer, BufferUsage::INDEX)?;
                    ctx.index_buffer = Some((buffer, offset));
                }
                Command::DrawIndexedIndirect {
                    buffer,
                    offset,
                    draw_count,
                    stride,
                } => self.draw_indexed_indirect(&ctx, buffer, offset, draw_count, stride)?,
            }
        }

        if ctx.render_pass.is_some() {
            return Err(DeviceError::InvalidCommand(
                "command list ended inside a render pass".to_string(),
            ));
        }
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> DeviceResult<()> {
        self.require_usage(src, BufferUsage::TRANSFER_SRC)?;
        self.require_usage(dst, BufferUsage::TRANSFER_DST)?;

        let source = self.buffer(src)?;
        let range = byte_range(src_offset, size, source.desc.size)?;
        let bytes = source.data[range].to_vec();

        let target = self.buffer_mut(dst)?;
        let range = byte_range(dst_offset, size, target.desc.size)?;
        target.data[range].copy_from_slice(&bytes);
        Ok(())
    }

    fn copy_buffer_to_texture(
        &mut self,
        queue: QueueId,
        src: BufferId,
        src_offset: u64,
        dst: TextureId,
        width: u32,
        height: u32,
    ) -> DeviceResult<()> {
        self.require_usage(src, BufferUsage::TRANSFER_SRC)?;
        let source = self.buffer(src)?;
        let source_size = source.desc.size;

        let texture = self
            .textures
            .get(&dst)
            .ok_or_else(|| invalid("texture", dst.raw()))?;
        if !texture.desc.usage.contains(TextureUsage::TRANSFER_DST) {
            return Err(DeviceError::InvalidCommand(format!(
                "texture {dst:?} lacks TRANSFER_DST usage"
            )));
        }
        if texture.layout != TextureLayout::TransferDst {
            return Err(DeviceError::InvalidCommand(format!(
                "copy into texture {dst:?} in layout {:?}",
                texture.layout
            )));
        }
        if let Some(owner) = texture.owner {
            if owner != queue {
                return Err(DeviceError::OwnershipViolation(format!(
                    "texture {dst:?} owned by {owner:?}, copied on {queue:?}"
                )));
            }
        }
        if (width, height) != (texture.desc.width, texture.desc.height) {
            return Err(DeviceError::InvalidCommand(format!(
                "copy extent {width}x{height} does not match texture {}x{}",
                texture.desc.width, texture.desc.height
            )));
        }

        let range = byte_range(src_offset, texture.desc.byte_size(), source_size)?;
        let bytes = source.data[range].to_vec();

        let texture = self.texture_mut(dst)?;
        texture.data.copy_from_slice(&bytes);
        texture.owner = Some(queue);
        texture.copies += 1;
        Ok(())
    }

    fn texture_barrier(&mut self, queue: QueueId, barrier: &TextureBarrier) -> DeviceResult<()> {
        let id = barrier.texture;
        let texture = self.texture_mut(id)?;

        if let (Some(src), Some(dst)) = (barrier.src_queue, barrier.dst_queue) {
            if src == dst {
                return self.texture_transition(queue, barrier);
            }
            if texture.owner != Some(src) {
                return Err(DeviceError::OwnershipViolation(format!(
                    "{id:?} transferred from {src:?} but owned by {:?}",
                    texture.owner
                )));
            }
            if barrier.old_layout != TextureLayout::Undefined && barrier.old_layout != texture.layout {
                return Err(layout_mismatch(id, barrier.old_layout, texture.layout));
            }

            if queue == src {
                // Release half; the layout changes when the acquire executes
                texture.released_to = Some(dst);
            } else if queue == dst {
                texture.owner = Some(dst);
                texture.released_to = None;
                texture.layout = barrier.new_layout;
            } else {
                return Err(DeviceError::OwnershipViolation(format!(
                    "transfer barrier for {id:?} executed on unrelated {queue:?}"
                )));
            }
            return Ok(());
        }
        self.texture_transition(queue, barrier)
    }

    /// Layout transition without a queue change.
    fn texture_transition(&mut self, queue: QueueId, barrier: &TextureBarrier) -> DeviceResult<()> {
        let id = barrier.texture;
        let texture = self.texture_mut(id)?;
        if let Some(owner) = texture.owner {
            if owner != queue {
                return Err(DeviceError::OwnershipViolation(format!(
                    "{id:?} owned by {owner:?}, barrier executed on {queue:?}"
                )));
            }
        }
        if barrier.old_layout != TextureLayout::Undefined && barrier.old_layout != texture.layout {
            return Err(layout_mismatch(id, barrier.old_layout, texture.layout));
        }
        texture.owner = Some(queue);
        texture.layout = barrier.new_layout;
        Ok(())
    }

    fn buffer_barrier(&mut self, queue: QueueId, barrier: &BufferBarrier) -> DeviceResult<()> {
        self.buffer(barrier.buffer)?;
        match (barrier.src_queue, barrier.dst_queue) {
            (Some(src), Some(dst)) if src != dst && queue != src && queue != dst => {
                Err(DeviceError::OwnershipViolation(format!(
                    "transfer barrier for {:?} executed on unrelated {queue:?}",
                    barrier.buffer
                )))
            }
            _ => Ok(()),
        }
    }

    fn draw_indexed_indirect(
        &mut self,
        ctx: &ExecContext,
        args_buffer: BufferId,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> DeviceResult<()> {
        let missing = |what: &str| DeviceError::InvalidCommand(format!("draw without {what}"));

        let render_pass = ctx.render_pass.ok_or_else(|| missing("an active render pass"))?;
        let pipeline_id = ctx.pipeline.ok_or_else(|| missing("a bound pipeline"))?;
        let (index_buffer, index_offset) = ctx.index_buffer.ok_or_else(|| missing("an index buffer"))?;
        let set_id = *ctx
            .sets
            .get(&bindings::SCENE_SET)
            .ok_or_else(|| missing("the scene binding set"))?;

        let pipeline = self
            .pipelines
            .get(&pipeline_id)
            .ok_or_else(|| invalid("pipeline", pipeline_id.raw()))?;
        let program = pipeline.program;
        let conservative = pipeline.rasterization.conservative;

        let set = self
            .binding_sets
            .get(&set_id)
            .ok_or_else(|| invalid("binding set", set_id.raw()))?;
        if set.pipeline != pipeline_id {
            return Err(DeviceError::InvalidCommand(format!(
                "binding set {set_id:?} was created for {:?}, not {pipeline_id:?}",
                set.pipeline
            )));
        }

        let slots = ProgramSlots::of(program);
        let vertices_id = self.storage_slot(set, slots.vertices)?;
        let transforms_id = self.storage_slot(set, slots.transforms)?;
        self.storage_slot(set, slots.draw_commands)?;
        let counter_id = self.storage_slot(set, slots.counter)?;
        let materials_id = slots
            .materials
            .map(|slot| self.storage_slot(set, slot))
            .transpose()?;
        let fragments_id = slots
            .fragments
            .map(|slot| self.storage_slot(set, slot))
            .transpose()?;

        self.require_usage(args_buffer, BufferUsage::INDIRECT)?;
        let record_size = std::mem::size_of::<DrawIndexedIndirectCommand>() as u64;
        if u64::from(stride) < record_size && draw_count > 1 {
            return Err(DeviceError::InvalidCommand(format!(
                "indirect stride {stride} smaller than {record_size}"
            )));
        }
        let args_data = &self.buffer(args_buffer)?.data;
        let mut draws = Vec::with_capacity(draw_count as usize);
        for i in 0..u64::from(draw_count) {
            let at = offset + i * u64::from(stride);
            let range = byte_range(at, record_size, args_data.len() as u64)?;
            draws.push(bytemuck::pod_read_unaligned::<DrawIndexedIndirectCommand>(
                &args_data[range],
            ));
        }

        let index_data = &self.buffer(index_buffer)?.data;
        let index_range = byte_range(index_offset, 0, index_data.len() as u64)?;
        let indices: Vec<u32> = read_pod_array(&index_data[index_range.start..]);
        let vertices: Vec<GpuVertex> = self.read_array(vertices_id)?;
        let transforms: Vec<Mat4> = self.read_array(transforms_id)?;

        let resolution = ctx.push_u32(push_constants::RESOLUTION_OFFSET);
        if resolution == 0 || resolution > MAX_VOXEL_RESOLUTION {
            return Err(DeviceError::InvalidCommand(format!(
                "voxel resolution {resolution} out of range"
            )));
        }
        let mut clip = ClipRect {
            x0: 0,
            y0: 0,
            x1: render_pass.width,
            y1: render_pass.height,
        };
        if let Some(scissor) = ctx.scissor {
            let x0 = u32::try_from(scissor.x).unwrap_or(0);
            let y0 = u32::try_from(scissor.y).unwrap_or(0);
            clip.x0 = clip.x0.max(x0);
            clip.y0 = clip.y0.max(y0);
            clip.x1 = clip.x1.min(x0.saturating_add(scissor.width));
            clip.y1 = clip.y1.min(y0.saturating_add(scissor.height));
        }
        let params = RasterParams {
            resolution,
            extent_min: ctx.push_f32(push_constants::EXTENTS_OFFSET),
            extent_max: ctx.push_f32(push_constants::EXTENTS_OFFSET + 4),
            conservative,
            clip,
        };

        // (cell, draw_id) in rasterization order
        let mut covered: Vec<([u32; 3], u32)> = Vec::new();
        for draw in draws.iter().filter(|d| d.instance_count > 0) {
            let transform = transforms.get(draw.draw_id as usize).ok_or_else(|| {
                DeviceError::InvalidCommand(format!("draw id {} has no transform", draw.draw_id))
            })?;
            for tri in 0..draw.index_count / 3 {
                let mut triangle = [[0.0f32; 3]; 3];
                for (corner, slot) in triangle.iter_mut().enumerate() {
                    let at = draw.first_index as usize + tri as usize * 3 + corner;
                    let index = *indices.get(at).ok_or(DeviceError::OutOfBounds {
                        offset: at as u64,
                        len: 1,
                        size: indices.len() as u64,
                    })?;
                    let vertex = i64::from(draw.base_vertex) + i64::from(index);
                    let position = usize::try_from(vertex)
                        .ok()
                        .and_then(|v| vertices.get(v))
                        .ok_or(DeviceError::OutOfBounds {
                            offset: vertex.max(0) as u64,
                            len: 1,
                            size: vertices.len() as u64,
                        })?
                        .position;
                    *slot = transform_point(transform, position);
                }
                raster::voxelize_triangle(&triangle, &params, |cell| {
                    covered.push((cell, draw.draw_id));
                });
            }
        }

        match program {
            ShaderProgram::VoxelizeCount => {
                let visible = (covered.len() as u32).saturating_sub(self.count_undercount);
                let counts = self.buffer_mut(counter_id)?;
                let slot = byte_range((counter::COUNTED * 4) as u64, 4, counts.data.len() as u64)?;
                let current: u32 = bytemuck::pod_read_unaligned(&counts.data[slot.clone()]);
                let total = current.wrapping_add(visible);
                counts.data[slot].copy_from_slice(&total.to_ne_bytes());
            }
            ShaderProgram::VoxelizeWrite => {
                let materials: Vec<GpuMaterial> = match materials_id {
                    Some(id) => self.read_array(id)?,
                    None => Vec::new(),
                };
                let fragments_id =
                    fragments_id.ok_or_else(|| missing("a fragment buffer"))?;
                let capacity = self.buffer(fragments_id)?.desc.size / VOXEL_FRAGMENT_SIZE;

                let counts = self.buffer_mut(counter_id)?;
                let slot = byte_range((counter::WRITTEN * 4) as u64, 4, counts.data.len() as u64)?;
                let start: u32 = bytemuck::pod_read_unaligned(&counts.data[slot.clone()]);
                let end = start.wrapping_add(covered.len() as u32);
                counts.data[slot].copy_from_slice(&end.to_ne_bytes());

                let fragments = self.buffer_mut(fragments_id)?;
                for (next, (cell, draw_id)) in (u64::from(start)..).zip(&covered) {
                    // Bump allocation past the sized buffer is dropped
                    if next >= capacity {
                        break;
                    }
                    let albedo = materials
                        .get(*draw_id as usize)
                        .map_or([255; 3], |m| {
                            [unorm8(m.albedo[0]), unorm8(m.albedo[1]), unorm8(m.albedo[2])]
                        });
                    let record = VoxelFragment {
                        x: cell[0],
                        y: cell[1],
                        z: cell[2],
                        albedo,
                    }
                    .pack();
                    let at = (next * VOXEL_FRAGMENT_SIZE) as usize;
                    fragments.data[at..at + 8].copy_from_slice(&record.to_ne_bytes());
                }
            }
        }
        Ok(())
    }
}

/// Synchronous CPU device.
pub struct SoftwareDevice {
    config: SoftwareDeviceConfig,
    state: Mutex<DeviceState>,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    /// Device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SoftwareDeviceConfig::default())
    }

    /// Device with explicit settings.
    #[must_use]
    pub fn with_config(config: SoftwareDeviceConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// Marks the device lost. Every later submit, wait or allocation fails
    /// with [`DeviceError::DeviceLost`]; destroy calls still succeed.
    pub fn simulate_device_loss(&self) {
        tracing::warn!("software device: simulating device loss");
        self.state.lock().lost = true;
    }

    /// Makes the device accept submissions without ever executing them, so
    /// their fences never signal and waits time out.
    pub fn simulate_hang(&self) {
        tracing::warn!("software device: simulating GPU hang");
        self.state.lock().hung = true;
    }

    /// Makes every count-program draw report `cells` fewer covered cells
    /// than the write program emits, the way a driver whose two pipelines
    /// rasterize differently would.
    pub fn simulate_count_undercount(&self, cells: u32) {
        tracing::warn!(cells, "software device: simulating count undercount");
        self.state.lock().count_undercount = cells;
    }

    /// Returns true after [`simulate_device_loss`](Self::simulate_device_loss).
    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.state.lock().lost
    }

    /// Live buffers.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Live textures.
    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.state.lock().textures.len()
    }

    /// Live binding sets.
    #[must_use]
    pub fn binding_set_count(&self) -> usize {
        self.state.lock().binding_sets.len()
    }

    /// Live pipelines.
    #[must_use]
    pub fn pipeline_count(&self) -> usize {
        self.state.lock().pipelines.len()
    }

    /// Live fences.
    #[must_use]
    pub fn fence_count(&self) -> usize {
        self.state.lock().fences.len()
    }

    /// Bytes held by live buffers and textures.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.state.lock().live_bytes
    }

    /// Accepted submissions since creation.
    #[must_use]
    pub fn submission_count(&self) -> u64 {
        self.state.lock().submissions
    }

    /// Size of a live buffer.
    #[must_use]
    pub fn buffer_size(&self, buffer: BufferId) -> Option<u64> {
        self.state.lock().buffers.get(&buffer).map(|b| b.desc.size)
    }

    /// Copies out a buffer regardless of its memory location.
    #[must_use]
    pub fn buffer_contents(&self, buffer: BufferId) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer).map(|b| b.data.clone())
    }

    /// Tracked state of a live texture.
    #[must_use]
    pub fn texture_snapshot(&self, texture: TextureId) -> Option<TextureSnapshot> {
        self.state.lock().textures.get(&texture).map(|t| TextureSnapshot {
            width: t.desc.width,
            height: t.desc.height,
            layout: t.layout,
            owner: t.owner,
            pending_release: t.released_to,
            bindless_index: t.bindless,
            copy_count: t.copies,
        })
    }

    /// Copies out the texels of a live texture.
    #[must_use]
    pub fn texture_pixels(&self, texture: TextureId) -> Option<Vec<u8>> {
        self.state.lock().textures.get(&texture).map(|t| t.data.clone())
    }

    /// Times `reset_command_pool` was called on `pool`.
    #[must_use]
    pub fn command_pool_reset_count(&self, pool: CommandPoolId) -> Option<u32> {
        self.state.lock().pools.get(&pool).map(|p| p.resets)
    }

    fn known_queue(&self, queue: QueueId) -> bool {
        queue == GRAPHICS_QUEUE || (self.config.separate_transfer_queue && queue == TRANSFER_QUEUE)
    }
}

impl RenderDevice for SoftwareDevice {
    fn name(&self) -> &'static str {
        "software"
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            conservative_rasterization: self.config.conservative_rasterization,
            separate_transfer_queue: self.config.separate_transfer_queue,
            max_texture_dimension: self.config.max_texture_dimension,
        }
    }

    fn queue(&self, queue_type: QueueType) -> QueueId {
        match queue_type {
            QueueType::Transfer if self.config.separate_transfer_queue => TRANSFER_QUEUE,
            QueueType::Graphics | QueueType::Transfer => GRAPHICS_QUEUE,
        }
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> DeviceResult<BufferId> {
        if desc.size == 0 {
            return Err(DeviceError::InvalidSize(0));
        }
        let len = usize::try_from(desc.size).map_err(|_| DeviceError::InvalidSize(desc.size))?;

        let mut state = self.state.lock();
        state.check_alive()?;
        state.reserve(desc.size, self.config.memory_budget)?;
        let id = BufferId::from_raw(state.alloc_id());
        state.buffers.insert(
            id,
            BufferRecord {
                desc: desc.clone(),
                data: vec![0; len],
            },
        );
        tracing::trace!(buffer = id.raw(), size = desc.size, label = desc.label, "buffer created");
        Ok(id)
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.check_alive()?;
        let record = state.buffer_mut(buffer)?;
        if record.desc.memory != MemoryLocation::HostVisible {
            return Err(DeviceError::NotHostVisible(buffer));
        }
        let range = byte_range(offset, data.len() as u64, record.desc.size)?;
        record.data[range].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferId, offset: u64, len: u64) -> DeviceResult<Vec<u8>> {
        let state = self.state.lock();
        state.check_alive()?;
        let record = state.buffer(buffer)?;
        if record.desc.memory != MemoryLocation::HostVisible {
            return Err(DeviceError::NotHostVisible(buffer));
        }
        let range = byte_range(offset, len, record.desc.size)?;
        Ok(record.data[range].to_vec())
    }

    fn destroy_buffer(&self, buffer: BufferId) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let record = state
            .buffers
            .remove(&buffer)
            .ok_or_else(|| invalid("buffer", buffer.raw()))?;
        state.live_bytes -= record.desc.size;
        Ok(())
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> DeviceResult<TextureId> {
        let max = self.config.max_texture_dimension;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(DeviceError::InvalidSize(u64::from(desc.width.max(desc.height))));
        }
        let size = desc.byte_size();
        let len = usize::try_from(size).map_err(|_| DeviceError::InvalidSize(size))?;

        let mut state = self.state.lock();
        state.check_alive()?;
        state.reserve(size, self.config.memory_budget)?;
        let id = TextureId::from_raw(state.alloc_id());
        state.textures.insert(
            id,
            TextureRecord {
                desc: desc.clone(),
                data: vec![0; len],
                layout: TextureLayout::Undefined,
                owner: None,
                released_to: None,
                bindless: None,
                copies: 0,
            },
        );
        tracing::trace!(
            texture = id.raw(),
            width = desc.width,
            height = desc.height,
            "texture created"
        );
        Ok(id)
    }

    fn destroy_texture(&self, texture: TextureId) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let record = state
            .textures
            .remove(&texture)
            .ok_or_else(|| invalid("texture", texture.raw()))?;
        state.live_bytes -= record.desc.byte_size();
        Ok(())
    }

    fn texture_extent(&self, texture: TextureId) -> DeviceResult<(u32, u32)> {
        let state = self.state.lock();
        let record = state
            .textures
            .get(&texture)
            .ok_or_else(|| invalid("texture", texture.raw()))?;
        Ok((record.desc.width, record.desc.height))
    }

    fn update_bindless_texture(&self, texture: TextureId) -> DeviceResult<u32> {
        let mut state = self.state.lock();
        state.check_alive()?;
        let record = state.texture_mut(texture)?;
        let index = bindless_index(texture);
        record.bindless = Some(index);
        Ok(index)
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor,
    ) -> DeviceResult<PipelineId> {
        if desc.rasterization.conservative && !self.config.conservative_rasterization {
            return Err(DeviceError::Unsupported("conservative rasterization"));
        }
        if desc.rasterization.cull_mode != CullMode::None {
            return Err(DeviceError::Unsupported("face culling"));
        }
        if desc.depth.test || desc.depth.write {
            return Err(DeviceError::Unsupported("depth attachments"));
        }
        if !desc.color_formats.is_empty() {
            return Err(DeviceError::Unsupported("color attachments"));
        }

        let mut state = self.state.lock();
        state.check_alive()?;
        let id = PipelineId::from_raw(state.alloc_id());
        state.pipelines.insert(id, desc.clone());
        tracing::debug!(pipeline = id.raw(), label = desc.label, program = ?desc.program, "pipeline created");
        Ok(id)
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) -> DeviceResult<()> {
        self.state
            .lock()
            .pipelines
            .remove(&pipeline)
            .map(|_| ())
            .ok_or_else(|| invalid("pipeline", pipeline.raw()))
    }

    fn create_binding_set(
        &self,
        pipeline: PipelineId,
        set: u32,
        bindings: &[Binding],
        label: &'static str,
    ) -> DeviceResult<BindingSetId> {
        let mut state = self.state.lock();
        state.check_alive()?;
        if !state.pipelines.contains_key(&pipeline) {
            return Err(invalid("pipeline", pipeline.raw()));
        }
        for (i, binding) in bindings.iter().enumerate() {
            if bindings[..i].iter().any(|b| b.slot == binding.slot) {
                return Err(DeviceError::InvalidCommand(format!(
                    "{label}: slot {} bound twice",
                    binding.slot
                )));
            }
            match binding.resource {
                BoundResource::StorageBuffer(id) => state.require_usage(id, BufferUsage::STORAGE)?,
                BoundResource::UniformBuffer(id) => state.require_usage(id, BufferUsage::UNIFORM)?,
                BoundResource::Texture(id) => {
                    if !state.textures.contains_key(&id) {
                        return Err(invalid("texture", id.raw()));
                    }
                }
            }
        }

        let id = BindingSetId::from_raw(state.alloc_id());
        state.binding_sets.insert(
            id,
            BindingSetRecord {
                pipeline,
                bindings: bindings.to_vec(),
            },
        );
        tracing::debug!(set_index = set, binding_set = id.raw(), label, "binding set created");
        Ok(id)
    }

    fn destroy_binding_set(&self, set: BindingSetId) -> DeviceResult<()> {
        self.state
            .lock()
            .binding_sets
            .remove(&set)
            .map(|_| ())
            .ok_or_else(|| invalid("binding set", set.raw()))
    }

    fn create_command_pool(&self, queue: QueueId) -> DeviceResult<CommandPoolId> {
        if !self.known_queue(queue) {
            return Err(invalid("queue", queue.raw()));
        }
        let mut state = self.state.lock();
        state.check_alive()?;
        let id = CommandPoolId::from_raw(state.alloc_id());
        state.pools.insert(
            id,
            PoolRecord {
                queue,
                buffers: Vec::new(),
                resets: 0,
            },
        );
        Ok(id)
    }

    fn allocate_command_buffer(&self, pool: CommandPoolId) -> DeviceResult<CommandBufferId> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.check_alive()?;
        if !state.pools.contains_key(&pool) {
            return Err(invalid("command pool", pool.raw()));
        }
        let id = CommandBufferId::from_raw(state.alloc_id());
        state.command_buffers.insert(id, pool);
        if let Some(record) = state.pools.get_mut(&pool) {
            record.buffers.push(id);
        }
        Ok(id)
    }

    fn reset_command_pool(&self, pool: CommandPoolId) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let record = state
            .pools
            .get_mut(&pool)
            .ok_or_else(|| invalid("command pool", pool.raw()))?;
        record.resets += 1;
        Ok(())
    }

    fn destroy_command_pool(&self, pool: CommandPoolId) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let record = state
            .pools
            .remove(&pool)
            .ok_or_else(|| invalid("command pool", pool.raw()))?;
        for buffer in record.buffers {
            state.command_buffers.remove(&buffer);
        }
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> DeviceResult<FenceId> {
        let mut state = self.state.lock();
        state.check_alive()?;
        let id = FenceId::from_raw(state.alloc_id());
        state.fences.insert(id, signaled);
        Ok(id)
    }

    fn wait_for_fence(&self, fence: FenceId, timeout: Option<Duration>) -> DeviceResult<()> {
        let state = self.state.lock();
        state.check_alive()?;
        let signaled = *state
            .fences
            .get(&fence)
            .ok_or_else(|| invalid("fence", fence.raw()))?;
        if signaled {
            return Ok(());
        }
        // Work executes inside submit, so nothing pending can signal it later
        if timeout.is_none() {
            tracing::warn!(fence = fence.raw(), "infinite wait on a fence that can never signal");
        }
        Err(DeviceError::FenceTimeout(fence))
    }

    fn reset_fence(&self, fence: FenceId) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let slot = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| invalid("fence", fence.raw()))?;
        *slot = false;
        Ok(())
    }

    fn destroy_fence(&self, fence: FenceId) -> DeviceResult<()> {
        self.state
            .lock()
            .fences
            .remove(&fence)
            .map(|_| ())
            .ok_or_else(|| invalid("fence", fence.raw()))
    }

    fn submit(&self, info: &SubmitInfo, commands: CommandList) -> DeviceResult<()> {
        if !self.known_queue(info.queue) {
            return Err(invalid("queue", info.queue.raw()));
        }

        let mut state = self.state.lock();
        state.check_alive()?;

        let pool = *state
            .command_buffers
            .get(&info.command_buffer)
            .ok_or_else(|| invalid("command buffer", info.command_buffer.raw()))?;
        let pool_queue = state
            .pools
            .get(&pool)
            .map(|p| p.queue)
            .ok_or_else(|| invalid("command pool", pool.raw()))?;
        if pool_queue != info.queue {
            return Err(DeviceError::InvalidCommand(format!(
                "command buffer from a {pool_queue:?} pool submitted to {:?}",
                info.queue
            )));
        }
        if let Some(fence) = info.fence {
            match state.fences.get(&fence) {
                None => return Err(invalid("fence", fence.raw())),
                Some(true) => {
                    return Err(DeviceError::InvalidCommand(format!(
                        "fence {fence:?} submitted while signalled"
                    )))
                }
                Some(false) => {}
            }
        }

        state.submissions += 1;
        if state.hung {
            return Ok(());
        }

        let command_count = commands.len();
        state.execute(info.queue, commands.into_commands())?;
        if let Some(fence) = info.fence {
            state.fences.insert(fence, true);
        }
        tracing::trace!(queue = info.queue.raw(), commands = command_count, "submission executed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_buffer(device: &SoftwareDevice, size: u64, usage: BufferUsage) -> BufferId {
        device
            .create_buffer(&BufferDescriptor {
                size,
                usage,
                memory: MemoryLocation::HostVisible,
                label: "test",
            })
            .unwrap()
    }

    #[test]
    fn test_device_local_buffer_rejects_host_access() {
        let device = SoftwareDevice::new();
        let buffer = device
            .create_buffer(&BufferDescriptor {
                size: 8,
                usage: BufferUsage::STORAGE,
                memory: MemoryLocation::DeviceLocal,
                label: "local",
            })
            .unwrap();

        assert_eq!(
            device.write_buffer(buffer, 0, &[0; 4]),
            Err(DeviceError::NotHostVisible(buffer))
        );
    }

    #[test]
    fn test_out_of_bounds_write() {
        let device = SoftwareDevice::new();
        let buffer = host_buffer(&device, 8, BufferUsage::STORAGE);
        assert!(matches!(
            device.write_buffer(buffer, 6, &[0; 4]),
            Err(DeviceError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_memory_budget() {
        let device = SoftwareDevice::with_config(SoftwareDeviceConfig {
            memory_budget: Some(100),
            ..SoftwareDeviceConfig::default()
        });
        let a = host_buffer(&device, 60, BufferUsage::STORAGE);

        let err = device
            .create_buffer(&BufferDescriptor {
                size: 60,
                usage: BufferUsage::STORAGE,
                memory: MemoryLocation::HostVisible,
                label: "too big",
            })
            .unwrap_err();
        assert_eq!(
            err,
            DeviceError::OutOfMemory {
                requested: 60,
                available: 40
            }
        );

        device.destroy_buffer(a).unwrap();
        assert_eq!(device.live_bytes(), 0);
    }

    #[test]
    fn test_zero_sized_buffer_rejected() {
        let device = SoftwareDevice::new();
        let err = device
            .create_buffer(&BufferDescriptor {
                size: 0,
                usage: BufferUsage::STORAGE,
                memory: MemoryLocation::HostVisible,
                label: "empty",
            })
            .unwrap_err();
        assert_eq!(err, DeviceError::InvalidSize(0));
    }

    #[test]
    fn test_bindless_registration_is_stable() {
        let device = SoftwareDevice::new();
        let desc = TextureDescriptor {
            width: 2,
            height: 2,
            format: crate::types::TextureFormat::Rgba8Unorm,
            usage: TextureUsage::SAMPLED,
            label: "t".to_string(),
        };
        let a = device.create_texture(&desc).unwrap();
        let b = device.create_texture(&desc).unwrap();

        let ia = device.update_bindless_texture(a).unwrap();
        let ib = device.update_bindless_texture(b).unwrap();
        assert_ne!(ia, ib);
        assert_eq!(device.update_bindless_texture(a).unwrap(), ia);
    }

    #[test]
    fn test_unsupported_conservative_pipeline() {
        let device = SoftwareDevice::with_config(SoftwareDeviceConfig {
            conservative_rasterization: false,
            ..SoftwareDeviceConfig::default()
        });
        let err = device
            .create_graphics_pipeline(&GraphicsPipelineDescriptor {
                program: ShaderProgram::VoxelizeCount,
                rasterization: crate::types::RasterizationState {
                    cull_mode: CullMode::None,
                    conservative: true,
                },
                depth: crate::types::DepthState::default(),
                color_formats: Vec::new(),
                label: "count",
            })
            .unwrap_err();
        assert_eq!(err, DeviceError::Unsupported("conservative rasterization"));
    }

    #[test]
    fn test_shared_queue_when_no_transfer_family() {
        let device = SoftwareDevice::with_config(SoftwareDeviceConfig {
            separate_transfer_queue: false,
            ..SoftwareDeviceConfig::default()
        });
        assert_eq!(
            device.queue(QueueType::Transfer),
            device.queue(QueueType::Graphics)
        );
    }
}
