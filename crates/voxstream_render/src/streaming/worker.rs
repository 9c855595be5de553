//! Loader thread body.
//!
//! The worker owns everything the transfer queue needs: the persistent
//! staging buffer, a command pool and buffer, and one fence. Requests are
//! processed strictly one at a time, so one staging region and one fence
//! suffice. The resources are released when the worker drops, which
//! happens on the loader thread when its loop ends, or on the owning thread
//! if the loader is never started.

use super::decoder::TextureDecoder;
use super::request::{CompletedUpload, UploadRequest};
use super::stats::{LoaderState, LoaderStats, StateCell};
use crate::error::{LoadError, LoadResult};
use crossbeam_channel::Sender;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use voxstream_core::{StreamingConfig, WorkQueue};
use voxstream_device::{
    AccessFlags, BufferBarrier, BufferDescriptor, BufferId, BufferUsage, CommandBufferId,
    CommandList, CommandPoolId, FenceId, MemoryLocation, PipelineStage, QueueId, QueueType,
    RenderDevice, SubmitInfo, TextureBarrier, TextureId, TextureLayout,
};

pub(crate) struct Worker<D: RenderDevice> {
    device: Arc<D>,
    decoder: Arc<dyn TextureDecoder>,
    staging: BufferId,
    staging_size: u64,
    pool: CommandPoolId,
    command_buffer: CommandBufferId,
    fence: FenceId,
    transfer: QueueId,
    graphics: QueueId,
    fence_timeout: Option<Duration>,
    /// Decode scratch, reused between requests.
    pixels: Vec<u8>,
}

/// Everything the loop shares with the owning [`AsyncLoader`](super::AsyncLoader).
pub(crate) struct WorkerLink {
    pub(crate) queue: Arc<WorkQueue<UploadRequest>>,
    pub(crate) completions: Sender<CompletedUpload>,
    pub(crate) state: Arc<StateCell>,
    pub(crate) stats: Arc<LoaderStats>,
}

impl<D: RenderDevice> Worker<D> {
    /// Allocates the staging buffer, command pool, command buffer and fence.
    pub(crate) fn new(
        device: Arc<D>,
        decoder: Arc<dyn TextureDecoder>,
        config: &StreamingConfig,
    ) -> LoadResult<Self> {
        let transfer = device.queue(QueueType::Transfer);
        let graphics = device.queue(QueueType::Graphics);

        let staging = device.create_buffer(&BufferDescriptor {
            size: config.staging_buffer_size,
            usage: BufferUsage::TRANSFER_SRC,
            memory: MemoryLocation::HostVisible,
            label: "loader staging",
        })?;
        let pool = match device.create_command_pool(transfer) {
            Ok(pool) => pool,
            Err(err) => {
                let _ = device.destroy_buffer(staging);
                return Err(err.into());
            }
        };
        let command_buffer = device
            .allocate_command_buffer(pool)
            .and_then(|command_buffer| Ok((command_buffer, device.create_fence(false)?)));
        let (command_buffer, fence) = match command_buffer {
            Ok(allocated) => allocated,
            Err(err) => {
                let _ = device.destroy_command_pool(pool);
                let _ = device.destroy_buffer(staging);
                return Err(err.into());
            }
        };

        tracing::debug!(
            staging_bytes = config.staging_buffer_size,
            separate_transfer_queue = transfer != graphics,
            "loader worker resources allocated"
        );

        Ok(Self {
            device,
            decoder,
            staging,
            staging_size: config.staging_buffer_size,
            pool,
            command_buffer,
            fence,
            transfer,
            graphics,
            fence_timeout: config.fence_timeout(),
            pixels: Vec::new(),
        })
    }

    /// Serves requests until the queue is stopped.
    pub(crate) fn run(mut self, link: &WorkerLink) {
        link.state.set(LoaderState::Idle);
        tracing::info!("loader thread running");

        while let Some(request) = link.queue.pop_blocking() {
            link.state.set(LoaderState::ProcessingRequest);
            let kind = request.kind();

            match self.process(request, &link.state) {
                Ok(completed) => {
                    link.state.set(LoaderState::RecordForOwnershipTransfer);
                    // The receiver lives as long as the loader that joins us
                    let _ = link.completions.send(completed);
                    LoaderStats::add(&link.stats.completed, 1);
                    tracing::debug!(kind, ?completed, "upload complete");
                }
                Err(err) => {
                    LoaderStats::add(&link.stats.failed, 1);
                    if err.is_fatal() {
                        tracing::error!(kind, error = %err, "upload failed, device lost");
                    } else {
                        tracing::warn!(kind, error = %err, "upload dropped");
                    }
                }
            }
            link.state.set(LoaderState::Idle);
        }

        link.state.set(LoaderState::Stopped);
        tracing::info!("loader thread stopping");
    }

    fn process(&mut self, request: UploadRequest, state: &StateCell) -> LoadResult<CompletedUpload> {
        match request {
            UploadRequest::Texture { path, texture } => {
                self.upload_texture(&path, texture, state)?;
                Ok(CompletedUpload::Texture(texture))
            }
            UploadRequest::Buffer {
                data,
                buffer,
                dst_offset,
            } => {
                self.upload_buffer(&data, buffer, dst_offset, state)?;
                Ok(CompletedUpload::Buffer(buffer))
            }
        }
    }

    fn check_fits(&self, size: u64) -> LoadResult<()> {
        if size > self.staging_size {
            return Err(LoadError::StagingOverflow {
                size,
                capacity: self.staging_size,
            });
        }
        Ok(())
    }

    fn upload_texture(&mut self, path: &Path, texture: TextureId, state: &StateCell) -> LoadResult<()> {
        let info = self.decoder.decode_rgba8(path, &mut self.pixels)?;
        let expected = self.device.texture_extent(texture)?;
        if expected != (info.width, info.height) {
            return Err(LoadError::DimensionMismatch {
                path: path.to_path_buf(),
                expected,
                actual: (info.width, info.height),
            });
        }
        self.check_fits(info.rgba8_size())?;

        state.set(LoaderState::StagingUpload);
        self.device.write_buffer(self.staging, 0, &self.pixels)?;

        state.set(LoaderState::DeviceCopy);
        let (staging, transfer, graphics) = (self.staging, self.transfer, self.graphics);
        self.submit_copy(|commands| {
            commands
                .texture_barrier(TextureBarrier {
                    texture,
                    src_stage: PipelineStage::TOP_OF_PIPE,
                    src_access: AccessFlags::empty(),
                    dst_stage: PipelineStage::TRANSFER,
                    dst_access: AccessFlags::TRANSFER_WRITE,
                    old_layout: TextureLayout::Undefined,
                    new_layout: TextureLayout::TransferDst,
                    src_queue: None,
                    dst_queue: None,
                })
                .copy_buffer_to_texture(staging, 0, texture, info.width, info.height);
            if transfer != graphics {
                commands.texture_barrier(TextureBarrier {
                    texture,
                    src_stage: PipelineStage::TRANSFER,
                    src_access: AccessFlags::TRANSFER_WRITE,
                    dst_stage: PipelineStage::FRAGMENT_SHADER,
                    dst_access: AccessFlags::empty(),
                    old_layout: TextureLayout::TransferDst,
                    new_layout: TextureLayout::ShaderReadOnly,
                    src_queue: Some(transfer),
                    dst_queue: Some(graphics),
                });
            }
        })
    }

    fn upload_buffer(
        &mut self,
        data: &[u8],
        buffer: BufferId,
        dst_offset: u64,
        state: &StateCell,
    ) -> LoadResult<()> {
        let size = data.len() as u64;
        self.check_fits(size)?;

        state.set(LoaderState::StagingUpload);
        self.device.write_buffer(self.staging, 0, data)?;

        state.set(LoaderState::DeviceCopy);
        let (staging, transfer, graphics) = (self.staging, self.transfer, self.graphics);
        self.submit_copy(|commands| {
            commands.copy_buffer(staging, 0, buffer, dst_offset, size);
            if transfer != graphics {
                commands.buffer_barrier(BufferBarrier {
                    buffer,
                    src_stage: PipelineStage::TRANSFER,
                    src_access: AccessFlags::TRANSFER_WRITE,
                    dst_stage: PipelineStage::VERTEX_SHADER,
                    dst_access: AccessFlags::empty(),
                    src_queue: Some(transfer),
                    dst_queue: Some(graphics),
                });
            }
        })
    }

    /// Submits on the transfer queue and waits for the fence.
    fn submit_copy<F>(&self, record: F) -> LoadResult<()>
    where
        F: FnOnce(&mut CommandList),
    {
        let info = SubmitInfo {
            queue: self.transfer,
            command_buffer: self.command_buffer,
            fence: Some(self.fence),
        };
        let result = self
            .device
            .immediate_submit(&info, self.fence_timeout, record)
            .and_then(|()| self.device.reset_command_pool(self.pool));
        if result.is_err() {
            // A timed-out fence must not poison the next submission
            let _ = self.device.reset_fence(self.fence);
        }
        result.map_err(LoadError::from)
    }
}

impl<D: RenderDevice> Drop for Worker<D> {
    fn drop(&mut self) {
        let device = &self.device;
        let results = [
            device.destroy_fence(self.fence),
            device.destroy_command_pool(self.pool),
            device.destroy_buffer(self.staging),
        ];
        for err in results.into_iter().filter_map(Result::err) {
            tracing::warn!(error = %err, "failed to release loader resource");
        }
        tracing::debug!("loader worker resources released");
    }
}
