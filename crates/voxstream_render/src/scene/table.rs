//! # Scene Resource Table
//!
//! Device-side copy of a [`MeshGroup`]: five device-local buffers the
//! voxelizer binds read-only.
//!
//! ```text
//! MeshGroup (CPU)              staging (host-visible, max array size)
//!   vertices      ──write──>  ┌────────────┐ ──copy──> vertex buffer
//!   indices       ──write──>  │  reused    │ ──copy──> index buffer
//!   transforms    ──write──>  │  for each  │ ──copy──> transform buffer
//!   materials     ──write──>  │  array     │ ──copy──> material buffer
//!   draw commands ──write──>  └────────────┘ ──copy──> draw command buffer
//!                               fence wait between copies
//! ```
//!
//! Empty arrays still get a one-element allocation so every binding set
//! that references them stays valid.

use super::bounds::Aabb;
use super::mesh::MeshGroup;
use crate::error::SceneResult;
use std::time::Duration;
use voxstream_core::Mat4;
use voxstream_device::{
    BufferDescriptor, BufferId, BufferUsage, DeviceResult, DrawIndexedIndirectCommand,
    GpuMaterial, GpuVertex, MemoryLocation, QueueType, RenderDevice, SubmitInfo,
};

/// Uploaded scene buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneResourceTable {
    /// `GpuVertex[]`.
    pub vertex_buffer: BufferId,
    /// `u32[]`, primitive-local.
    pub index_buffer: BufferId,
    /// `Mat4[]`, one per draw.
    pub transform_buffer: BufferId,
    /// `GpuMaterial[]`, one per draw.
    pub material_buffer: BufferId,
    /// Indirect draw arguments.
    pub draw_command_buffer: BufferId,
    /// Draws in the command buffer.
    pub draw_count: u32,
    /// World-space scene bounds.
    pub bounds: Aabb,
}

struct ArrayUpload<'a> {
    bytes: &'a [u8],
    /// Allocation used when `bytes` is empty.
    min_size: u64,
    usage: BufferUsage,
    label: &'static str,
}

impl SceneResourceTable {
    /// Uploads `group`, waiting for each copy without a timeout.
    ///
    /// # Errors
    ///
    /// Propagates allocation, submission and fence errors. Buffers created
    /// before the failure are destroyed.
    pub fn upload<D: RenderDevice>(device: &D, group: &MeshGroup) -> SceneResult<Self> {
        Self::upload_with_timeout(device, group, None)
    }

    /// [`upload`](Self::upload) with a fence timeout per copy.
    ///
    /// # Errors
    ///
    /// Propagates allocation, submission and fence errors. Buffers created
    /// before the failure are destroyed.
    pub fn upload_with_timeout<D: RenderDevice>(
        device: &D,
        group: &MeshGroup,
        timeout: Option<Duration>,
    ) -> SceneResult<Self> {
        let shader = BufferUsage::STORAGE | BufferUsage::TRANSFER_DST;
        let arrays = [
            ArrayUpload {
                bytes: bytemuck::cast_slice(&group.vertices),
                min_size: std::mem::size_of::<GpuVertex>() as u64,
                usage: shader,
                label: "scene vertices",
            },
            ArrayUpload {
                bytes: bytemuck::cast_slice(&group.indices),
                min_size: std::mem::size_of::<u32>() as u64,
                usage: shader | BufferUsage::INDEX,
                label: "scene indices",
            },
            ArrayUpload {
                bytes: bytemuck::cast_slice(&group.transforms),
                min_size: std::mem::size_of::<Mat4>() as u64,
                usage: shader,
                label: "scene transforms",
            },
            ArrayUpload {
                bytes: bytemuck::cast_slice(&group.materials),
                min_size: std::mem::size_of::<GpuMaterial>() as u64,
                usage: shader,
                label: "scene materials",
            },
            ArrayUpload {
                bytes: bytemuck::cast_slice(&group.draw_commands),
                min_size: std::mem::size_of::<DrawIndexedIndirectCommand>() as u64,
                usage: shader | BufferUsage::INDIRECT,
                label: "scene draw commands",
            },
        ];

        let mut created = Vec::with_capacity(arrays.len());
        if let Err(err) = Self::upload_arrays(device, &arrays, timeout, &mut created) {
            for buffer in created {
                let _ = device.destroy_buffer(buffer);
            }
            return Err(err.into());
        }

        tracing::info!(
            draws = group.draw_count(),
            vertices = group.vertices.len(),
            triangles = group.triangle_count(),
            "scene uploaded"
        );

        Ok(Self {
            vertex_buffer: created[0],
            index_buffer: created[1],
            transform_buffer: created[2],
            material_buffer: created[3],
            draw_command_buffer: created[4],
            draw_count: group.draw_count(),
            bounds: group.bounds(),
        })
    }

    fn upload_arrays<D: RenderDevice>(
        device: &D,
        arrays: &[ArrayUpload<'_>],
        timeout: Option<Duration>,
        created: &mut Vec<BufferId>,
    ) -> DeviceResult<()> {
        for array in arrays {
            created.push(device.create_buffer(&BufferDescriptor {
                size: (array.bytes.len() as u64).max(array.min_size),
                usage: array.usage,
                memory: MemoryLocation::DeviceLocal,
                label: array.label,
            })?);
        }

        let largest = arrays.iter().map(|a| a.bytes.len()).max().unwrap_or(0) as u64;
        if largest == 0 {
            return Ok(());
        }
        let staging = device.create_buffer(&BufferDescriptor {
            size: largest,
            usage: BufferUsage::TRANSFER_SRC,
            memory: MemoryLocation::HostVisible,
            label: "scene staging",
        })?;
        let result = Self::copy_through_staging(device, arrays, created, staging, timeout);
        let _ = device.destroy_buffer(staging);
        result
    }

    /// Copies each non-empty array into its target, one fenced submission
    /// per array since they share the staging buffer.
    fn copy_through_staging<D: RenderDevice>(
        device: &D,
        arrays: &[ArrayUpload<'_>],
        targets: &[BufferId],
        staging: BufferId,
        timeout: Option<Duration>,
    ) -> DeviceResult<()> {
        let graphics = device.queue(QueueType::Graphics);
        let pool = device.create_command_pool(graphics)?;
        let fence = match device.create_fence(false) {
            Ok(fence) => fence,
            Err(err) => {
                let _ = device.destroy_command_pool(pool);
                return Err(err);
            }
        };

        let result = device
            .allocate_command_buffer(pool)
            .and_then(|command_buffer| {
                let info = SubmitInfo {
                    queue: graphics,
                    command_buffer,
                    fence: Some(fence),
                };
                for (array, &dst) in arrays.iter().zip(targets) {
                    if array.bytes.is_empty() {
                        continue;
                    }
                    let size = array.bytes.len() as u64;
                    device.write_buffer(staging, 0, array.bytes)?;
                    device.immediate_submit(&info, timeout, |commands| {
                        commands.copy_buffer(staging, 0, dst, 0, size);
                    })?;
                    tracing::trace!(label = array.label, size, "scene array copied");
                }
                Ok(())
            });

        let _ = device.destroy_fence(fence);
        let _ = device.destroy_command_pool(pool);
        result
    }

    /// Frees every buffer.
    pub fn destroy<D: RenderDevice>(&self, device: &D) {
        for buffer in [
            self.vertex_buffer,
            self.index_buffer,
            self.transform_buffer,
            self.material_buffer,
            self.draw_command_buffer,
        ] {
            if let Err(err) = device.destroy_buffer(buffer) {
                tracing::warn!(buffer = buffer.raw(), error = %err, "failed to destroy scene buffer");
            }
        }
    }
}
