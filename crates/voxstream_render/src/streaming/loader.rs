//! # Async Resource Loader
//!
//! Moves image decoding and transfer-queue copies off the render thread.
//!
//! ```text
//!  any thread                 loader thread                    render thread
//!  ──────────                 ─────────────                    ─────────────
//!  request_texture_load ──┐
//!  request_buffer_upload ─┼─> WorkQueue ──> decode ──> stage
//!                         │                  │
//!                         │                  v
//!                         │            copy on transfer queue
//!                         │            release barrier, fence wait
//!                         │                  │
//!                         │                  v
//!                         └──────── completion channel ──> drain_pending_texture_updates
//!                                                          acquire barrier on graphics
//!                                                          bindless registration
//! ```
//!
//! A texture handle exists from the moment it is requested, but it must not
//! be sampled until the drain has recorded its acquire barrier and that
//! command list has executed on the graphics queue.

use super::decoder::{ImageCrateDecoder, TextureDecoder};
use super::request::{CompletedUpload, UploadRequest};
use super::stats::{LoaderState, LoaderStats, LoaderStatsSnapshot, StateCell};
use super::worker::{Worker, WorkerLink};
use crate::error::{LoadError, LoadResult};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use voxstream_core::{StreamingConfig, WorkQueue};
use voxstream_device::{
    AccessFlags, BufferBarrier, BufferId, CommandList, PipelineStage, QueueId, QueueType,
    RenderDevice, TextureBarrier, TextureId, TextureLayout,
};

/// What one drain recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Textures acquired and registered in the bindless table.
    pub textures: Vec<TextureId>,
    /// Buffers acquired.
    pub buffers: Vec<BufferId>,
}

impl DrainReport {
    /// Total uploads acquired.
    #[must_use]
    pub fn len(&self) -> usize {
        self.textures.len() + self.buffers.len()
    }

    /// True if the drain recorded nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty() && self.buffers.is_empty()
    }
}

/// Background uploader.
///
/// # Lifecycle
///
/// 1. [`AsyncLoader::initialize`] allocates device resources; requests may
///    be queued immediately but nothing runs yet.
/// 2. [`AsyncLoader::start`] spawns the loader thread.
/// 3. The render thread calls
///    [`AsyncLoader::drain_pending_texture_updates`] once per frame.
/// 4. [`AsyncLoader::shutdown`] (or drop) discards queued requests, waits
///    for the in-flight one and releases device resources.
pub struct AsyncLoader<D: RenderDevice> {
    device: Arc<D>,
    decoder: Arc<dyn TextureDecoder>,
    queue: Arc<WorkQueue<UploadRequest>>,
    sender: Sender<CompletedUpload>,
    receiver: Receiver<CompletedUpload>,
    /// Present between `initialize` and `start`.
    idle_worker: Mutex<Option<Worker<D>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    state: Arc<StateCell>,
    stats: Arc<LoaderStats>,
    thread_name: String,
    transfer: QueueId,
    graphics: QueueId,
}

impl<D: RenderDevice> AsyncLoader<D> {
    /// Allocates the staging buffer, transfer command pool and fence, and
    /// creates the loader in the stopped state.
    ///
    /// # Errors
    ///
    /// [`LoadError::Device`] if any allocation fails.
    pub fn initialize(
        device: Arc<D>,
        config: &StreamingConfig,
        decoder: Arc<dyn TextureDecoder>,
    ) -> LoadResult<Self> {
        let worker = Worker::new(Arc::clone(&device), Arc::clone(&decoder), config)?;
        let (sender, receiver) = unbounded();

        tracing::info!(
            device = device.name(),
            staging_bytes = config.staging_buffer_size,
            "async loader initialized"
        );

        Ok(Self {
            transfer: device.queue(QueueType::Transfer),
            graphics: device.queue(QueueType::Graphics),
            device,
            decoder,
            queue: Arc::new(WorkQueue::new()),
            sender,
            receiver,
            idle_worker: Mutex::new(Some(worker)),
            thread: Mutex::new(None),
            state: Arc::new(StateCell::new(LoaderState::Stopped)),
            stats: Arc::new(LoaderStats::default()),
            thread_name: config.thread_name.clone(),
        })
    }

    /// [`initialize`](Self::initialize) with the `image` crate decoder.
    ///
    /// # Errors
    ///
    /// [`LoadError::Device`] if any allocation fails.
    pub fn with_image_decoder(device: Arc<D>, config: &StreamingConfig) -> LoadResult<Self> {
        Self::initialize(device, config, Arc::new(ImageCrateDecoder))
    }

    /// Spawns the loader thread.
    ///
    /// Starting twice is a programmer error: it asserts in debug builds and
    /// is logged and ignored otherwise.
    ///
    /// # Errors
    ///
    /// [`LoadError::ShutDown`] after [`shutdown`](Self::shutdown),
    /// [`LoadError::Spawn`] if the OS refuses the thread.
    pub fn start(&self) -> LoadResult<()> {
        let mut thread = self.thread.lock();
        debug_assert!(thread.is_none(), "AsyncLoader::start called twice");
        if thread.is_some() {
            tracing::error!("async loader already started, ignoring");
            return Ok(());
        }
        let Some(worker) = self.idle_worker.lock().take() else {
            return Err(LoadError::ShutDown);
        };

        let link = WorkerLink {
            queue: Arc::clone(&self.queue),
            completions: self.sender.clone(),
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
        };
        let handle = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || worker.run(&link))
            .map_err(LoadError::Spawn)?;
        *thread = Some(handle);

        tracing::info!(thread = %self.thread_name, "async loader started");
        Ok(())
    }

    /// Queues a texture load. Non-blocking; callable from any thread.
    ///
    /// `texture` must already exist at the image's final extent.
    ///
    /// # Errors
    ///
    /// [`LoadError::ShutDown`] if the loader has been shut down.
    pub fn request_texture_load(&self, path: impl Into<PathBuf>, texture: TextureId) -> LoadResult<()> {
        self.enqueue(UploadRequest::Texture {
            path: path.into(),
            texture,
        })
    }

    /// Queues a buffer upload. Non-blocking; callable from any thread.
    ///
    /// `buffer` needs `TRANSFER_DST` usage.
    ///
    /// # Errors
    ///
    /// [`LoadError::ShutDown`] if the loader has been shut down.
    pub fn request_buffer_upload(&self, data: Vec<u8>, buffer: BufferId, dst_offset: u64) -> LoadResult<()> {
        self.enqueue(UploadRequest::Buffer {
            data,
            buffer,
            dst_offset,
        })
    }

    fn enqueue(&self, request: UploadRequest) -> LoadResult<()> {
        // Counted first so a fast worker never settles more than was requested
        LoaderStats::add(&self.stats.requested, 1);
        self.queue.push(request).map_err(|rejected| {
            self.stats.requested.fetch_sub(1, Ordering::Relaxed);
            tracing::warn!(kind = rejected.kind(), "request after loader shutdown");
            LoadError::ShutDown
        })
    }

    /// Records the graphics-queue half of every finished upload into
    /// `commands` and registers finished textures in the bindless table.
    ///
    /// Render thread only. Never blocks: uploads that finish after the
    /// channel was emptied are picked up by the next call. The caller must
    /// submit `commands` on the graphics queue before sampling any texture
    /// in the report.
    pub fn drain_pending_texture_updates(&self, commands: &mut CommandList) -> DrainReport {
        let mut report = DrainReport::default();
        let mut texture_barriers = Vec::new();
        let mut buffer_barriers = Vec::new();

        for completed in self.receiver.try_iter() {
            match completed {
                CompletedUpload::Texture(texture) => {
                    texture_barriers.push(self.acquire_texture(texture));
                    match self.device.update_bindless_texture(texture) {
                        Ok(index) => {
                            tracing::trace!(texture = texture.raw(), index, "texture registered");
                            report.textures.push(texture);
                        }
                        Err(err) => tracing::error!(
                            texture = texture.raw(),
                            error = %err,
                            "bindless registration failed"
                        ),
                    }
                }
                CompletedUpload::Buffer(buffer) => {
                    buffer_barriers.push(self.acquire_buffer(buffer));
                    report.buffers.push(buffer);
                }
            }
        }

        commands.pipeline_barrier(texture_barriers, buffer_barriers);
        if !report.is_empty() {
            tracing::debug!(
                textures = report.textures.len(),
                buffers = report.buffers.len(),
                "pending uploads acquired"
            );
        }
        report
    }

    fn acquire_texture(&self, texture: TextureId) -> TextureBarrier {
        TextureBarrier {
            texture,
            src_stage: PipelineStage::TRANSFER,
            src_access: AccessFlags::TRANSFER_WRITE,
            dst_stage: PipelineStage::FRAGMENT_SHADER,
            dst_access: AccessFlags::SHADER_READ,
            old_layout: TextureLayout::TransferDst,
            new_layout: TextureLayout::ShaderReadOnly,
            src_queue: Some(self.transfer),
            dst_queue: Some(self.graphics),
        }
    }

    fn acquire_buffer(&self, buffer: BufferId) -> BufferBarrier {
        BufferBarrier {
            buffer,
            src_stage: PipelineStage::TRANSFER,
            src_access: AccessFlags::TRANSFER_WRITE,
            dst_stage: PipelineStage::VERTEX_SHADER,
            dst_access: AccessFlags::SHADER_READ,
            src_queue: Some(self.transfer),
            dst_queue: Some(self.graphics),
        }
    }

    /// Stops the loader: discards queued requests, waits for the in-flight
    /// one and releases device resources. Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        let discarded = self.queue.stop();
        if discarded > 0 {
            LoaderStats::add(&self.stats.discarded, discarded as u64);
            tracing::info!(discarded, "discarded queued upload requests");
        }

        // The lock must not be held across the join
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("loader thread panicked");
            }
            tracing::info!(stats = ?self.stats.snapshot(), "async loader shut down");
        }
        // Never started: release here
        drop(self.idle_worker.lock().take());
        self.state.set(LoaderState::Stopped);
    }

    /// Current state of the loader thread.
    #[must_use]
    pub fn state(&self) -> LoaderState {
        self.state.get()
    }

    /// Request counters.
    #[must_use]
    pub fn stats(&self) -> LoaderStatsSnapshot {
        self.stats.snapshot()
    }

    /// Decoder shared with the loader thread, for header probes.
    #[must_use]
    pub fn decoder(&self) -> &dyn TextureDecoder {
        self.decoder.as_ref()
    }

    /// Requests waiting for the loader thread.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// True once [`start`](Self::start) has spawned the thread and
    /// [`shutdown`](Self::shutdown) has not joined it yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }
}

impl<D: RenderDevice> Drop for AsyncLoader<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
