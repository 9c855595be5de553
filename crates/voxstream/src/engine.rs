//! # Engine
//!
//! Owns the device handle, the async loader and one graphics command pool,
//! and sequences a frame the way the render thread must:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ 1. PARSE   MeshGroup + TextureCache::request (loads queued)     │
//! │ 2. UPLOAD  SceneResourceTable::upload                           │
//! │ 3. DRAIN   acquire finished uploads on the graphics queue       │
//! │ 4. VOXEL   count ─> resize ─> write                             │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loader thread runs for the life of the engine. Every step above runs
//! on the thread that owns the engine.

use crate::error::EngineResult;
use std::path::PathBuf;
use std::sync::Arc;
use voxstream_core::EngineConfig;
use voxstream_device::{
    CommandBufferId, CommandList, CommandPoolId, FenceId, QueueType, RenderDevice, SubmitInfo,
    TextureId,
};
use voxstream_render::{
    AsyncLoader, DrainReport, LoadResult, MeshGroup, SceneResourceTable, SceneResult,
    SceneVoxelizer, TextureCache, VoxelizeOutcome, VoxelizeResult,
};

/// Streaming plus voxelization on one device.
pub struct Engine<D: RenderDevice> {
    device: Arc<D>,
    config: EngineConfig,
    loader: AsyncLoader<D>,
    pool: CommandPoolId,
    command_buffer: CommandBufferId,
    fence: FenceId,
}

impl<D: RenderDevice> Engine<D> {
    /// Validates `config`, initializes the loader, starts its thread and
    /// allocates the graphics command pool.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`](crate::EngineError::Config) for an invalid
    /// config, otherwise loader or device allocation errors.
    pub fn new(device: Arc<D>, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let loader = AsyncLoader::with_image_decoder(Arc::clone(&device), &config.streaming)?;
        loader.start()?;

        let pool = device.create_command_pool(device.queue(QueueType::Graphics))?;
        let frame = device
            .allocate_command_buffer(pool)
            .and_then(|command_buffer| Ok((command_buffer, device.create_fence(false)?)));
        let (command_buffer, fence) = match frame {
            Ok(frame) => frame,
            Err(err) => {
                let _ = device.destroy_command_pool(pool);
                return Err(err.into());
            }
        };

        tracing::info!(
            device = device.name(),
            resolution = config.voxelizer.resolution,
            "engine ready"
        );
        Ok(Self {
            device,
            config,
            loader,
            pool,
            command_buffer,
            fence,
        })
    }

    /// Device handle.
    #[must_use]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The async loader.
    #[must_use]
    pub fn loader(&self) -> &AsyncLoader<D> {
        &self.loader
    }

    /// Empty texture cache for a scene rooted at `base_path`.
    #[must_use]
    pub fn texture_cache(&self, base_path: impl Into<PathBuf>) -> TextureCache {
        TextureCache::new(base_path)
    }

    /// Queues a texture load on the loader thread.
    ///
    /// # Errors
    ///
    /// Fails only after [`shutdown`](Self::shutdown).
    pub fn request_texture_load(&self, path: impl Into<PathBuf>, texture: TextureId) -> LoadResult<()> {
        self.loader.request_texture_load(path, texture)
    }

    /// Uploads a parsed scene.
    ///
    /// # Errors
    ///
    /// Propagates allocation and copy failures.
    pub fn upload_scene(&self, group: &MeshGroup) -> SceneResult<SceneResourceTable> {
        SceneResourceTable::upload_with_timeout(
            self.device.as_ref(),
            group,
            self.config.voxelizer.fence_timeout(),
        )
    }

    /// Acquires every finished upload on the graphics queue and waits for it,
    /// so the reported textures are sampleable when this returns.
    ///
    /// # Errors
    ///
    /// Submission or fence failure. The drained uploads are lost in that
    /// case and their textures must be treated as unloaded. The fence and
    /// pool are recycled either way.
    pub fn drain_pending_texture_updates(&self) -> EngineResult<DrainReport> {
        let mut commands = CommandList::new();
        let report = self.loader.drain_pending_texture_updates(&mut commands);
        if commands.is_empty() {
            return Ok(report);
        }

        let info = SubmitInfo {
            queue: self.device.queue(QueueType::Graphics),
            command_buffer: self.command_buffer,
            fence: Some(self.fence),
        };
        let executed = self.device.submit(&info, commands).and_then(|()| {
            self.device
                .wait_for_fence(self.fence, self.config.streaming.fence_timeout())
        });
        let recycled = self
            .device
            .reset_fence(self.fence)
            .and_then(|()| self.device.reset_command_pool(self.pool));
        if let Err(err) = &executed {
            tracing::error!(error = %err, "texture acquire submission failed");
        }
        executed?;
        recycled?;
        Ok(report)
    }

    /// Voxelizer for `scene` using the configured resolution.
    ///
    /// # Errors
    ///
    /// Invalid resolution or allocation failure.
    pub fn voxelizer(&self, scene: &SceneResourceTable) -> VoxelizeResult<SceneVoxelizer<D>> {
        SceneVoxelizer::initialize(Arc::clone(&self.device), scene, &self.config.voxelizer)
    }

    /// Runs one voxelization on the engine's graphics command pool.
    ///
    /// # Errors
    ///
    /// Fatal device errors from any phase.
    pub fn voxelize(&self, voxelizer: &mut SceneVoxelizer<D>) -> VoxelizeResult<VoxelizeOutcome> {
        voxelizer.voxelize(self.pool, self.command_buffer)
    }

    /// Stops the loader. Device objects owned by the engine are released on
    /// drop.
    pub fn shutdown(&self) {
        self.loader.shutdown();
    }
}

impl<D: RenderDevice> Drop for Engine<D> {
    fn drop(&mut self) {
        self.loader.shutdown();
        if let Err(err) = self.device.destroy_fence(self.fence) {
            tracing::warn!(error = %err, "failed to destroy engine fence");
        }
        if let Err(err) = self.device.destroy_command_pool(self.pool) {
            tracing::warn!(error = %err, "failed to destroy engine command pool");
        }
    }
}
