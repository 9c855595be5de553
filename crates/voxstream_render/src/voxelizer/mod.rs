//! # Scene Voxelizer
//!
//! Two-pass GPU voxelization of an uploaded scene into a compact fragment
//! list sized to fit exactly.
//!
//! ```text
//!            ┌─────────────── graphics queue ───────────────┐
//! Phase A    │ reset counter ─> count draw ─> fence wait    │ counter[0] = N
//!            └──────────────────────────────────────────────┘
//! Phase B    N == 0 ─> Empty
//!            N  > 0 ─> fragment buffer (N * 8 bytes) + write binding set
//!            ┌──────────────────────────────────────────────┐
//! Phase C    │ write draw (bump-allocate counter[1]) ─> wait│ counter[1] = M
//!            └──────────────────────────────────────────────┘
//! ```
//!
//! Both passes render the same scene draw into an attachment-less
//! `resolution²` target. The write pass never writes past the buffer it was
//! given; if conservative coverage finds more cells on the second pass than
//! on the first, the report carries `overflowed` and the extra cells are
//! dropped.
//!
//! Phases run strictly in order on the calling thread. Any device error is
//! returned as is and ends the run.

pub mod counter;
mod pass;

pub use counter::VoxelCounter;

use crate::error::{VoxelizeError, VoxelizeResult};
use crate::scene::SceneResourceTable;
use pass::VoxelPass;
use std::sync::Arc;
use std::time::Duration;
use voxstream_core::{VoxelizerConfig, MAX_VOXEL_RESOLUTION};
use voxstream_device::layout::{bindings, counter as slots};
use voxstream_device::{
    Binding, BindingSetId, BufferDescriptor, BufferId, BufferUsage, CommandBufferId,
    CommandPoolId, CullMode, DepthState, FenceId, GraphicsPipelineDescriptor, MemoryLocation,
    PipelineId, QueueType, RasterizationState, RenderDevice, ShaderProgram, SubmitInfo,
    VOXEL_FRAGMENT_SIZE,
};

/// Counters of one populated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelizationReport {
    /// Cells found by the count pass.
    pub counted: u32,
    /// Cells the write pass allocated, including any dropped ones.
    pub written: u32,
    /// Fragment buffer size in bytes.
    pub buffer_size: u64,
    /// The write pass found more cells than there was room for.
    pub overflowed: bool,
    /// Grid edge length.
    pub resolution: u32,
}

impl VoxelizationReport {
    /// Fragments actually stored in the buffer.
    #[inline]
    #[must_use]
    pub fn stored(&self) -> u32 {
        self.written.min(self.counted)
    }
}

/// Result of [`SceneVoxelizer::voxelize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoxelizeOutcome {
    /// The scene covers no cell; no fragment buffer exists.
    Empty,
    /// Fragments were written.
    Populated(VoxelizationReport),
}

#[derive(Debug, Clone, Copy)]
struct FragmentStorage {
    buffer: BufferId,
    set: BindingSetId,
    size: u64,
    count: u32,
}

/// Voxelizes one uploaded scene, as often as asked.
///
/// Owns its pipelines, the count binding set, the counter and the latest
/// fragment buffer. The scene buffers stay owned by the caller and must
/// outlive the voxelizer.
pub struct SceneVoxelizer<D: RenderDevice> {
    device: Arc<D>,
    scene: SceneResourceTable,
    resolution: u32,
    conservative: bool,
    fence_timeout: Option<Duration>,
    counter: VoxelCounter,
    count_pipeline: PipelineId,
    write_pipeline: PipelineId,
    count_set: BindingSetId,
    fragments: Option<FragmentStorage>,
    shut_down: bool,
}

impl<D: RenderDevice> SceneVoxelizer<D> {
    /// Creates the pipelines, counter and count-pass binding set.
    ///
    /// Conservative rasterization is used only when both the config asks for
    /// it and the device supports it.
    ///
    /// # Errors
    ///
    /// [`VoxelizeError::InvalidResolution`] for a resolution outside
    /// `1..=4096`, otherwise device allocation errors. Nothing is leaked on
    /// failure.
    pub fn initialize(
        device: Arc<D>,
        scene: &SceneResourceTable,
        config: &VoxelizerConfig,
    ) -> VoxelizeResult<Self> {
        let resolution = config.resolution;
        if resolution == 0 || resolution > MAX_VOXEL_RESOLUTION {
            return Err(VoxelizeError::InvalidResolution(resolution));
        }

        let supported = device.capabilities().conservative_rasterization;
        if config.conservative_rasterization && !supported {
            tracing::warn!("conservative rasterization requested but unsupported, sampling centers");
        }
        let conservative = config.conservative_rasterization && supported;

        let counter = VoxelCounter::allocate(device.as_ref())?;
        let mut pipelines = Vec::with_capacity(2);
        let created = Self::create_pipeline(device.as_ref(), ShaderProgram::VoxelizeCount, conservative)
            .and_then(|count| {
                pipelines.push(count);
                let write =
                    Self::create_pipeline(device.as_ref(), ShaderProgram::VoxelizeWrite, conservative)?;
                pipelines.push(write);
                let set = device.create_binding_set(
                    count,
                    bindings::SCENE_SET,
                    &[
                        Binding::storage(bindings::count_pass::VERTICES, scene.vertex_buffer),
                        Binding::storage(
                            bindings::count_pass::DRAW_COMMANDS,
                            scene.draw_command_buffer,
                        ),
                        Binding::storage(bindings::count_pass::TRANSFORMS, scene.transform_buffer),
                        Binding::storage(bindings::count_pass::COUNTER, counter.buffer()),
                    ],
                    "voxel count set",
                )?;
                Ok((count, write, set))
            });

        let (count_pipeline, write_pipeline, count_set) = match created {
            Ok(handles) => handles,
            Err(err) => {
                for pipeline in pipelines {
                    let _ = device.destroy_pipeline(pipeline);
                }
                counter.destroy(device.as_ref());
                return Err(err.into());
            }
        };

        tracing::info!(resolution, conservative, draws = scene.draw_count, "voxelizer initialized");

        Ok(Self {
            device,
            scene: scene.clone(),
            resolution,
            conservative,
            fence_timeout: config.fence_timeout(),
            counter,
            count_pipeline,
            write_pipeline,
            count_set,
            fragments: None,
            shut_down: false,
        })
    }

    fn create_pipeline(
        device: &D,
        program: ShaderProgram,
        conservative: bool,
    ) -> voxstream_device::DeviceResult<PipelineId> {
        device.create_graphics_pipeline(&GraphicsPipelineDescriptor {
            program,
            rasterization: RasterizationState {
                cull_mode: CullMode::None,
                conservative,
            },
            depth: DepthState::default(),
            color_formats: Vec::new(),
            label: match program {
                ShaderProgram::VoxelizeCount => "voxelize count",
                ShaderProgram::VoxelizeWrite => "voxelize write",
            },
        })
    }

    /// Runs the count, resize and write phases.
    ///
    /// `command_buffer` must come from `command_pool`, which must belong to
    /// the graphics queue. The pool is reset once both phases finished.
    ///
    /// # Errors
    ///
    /// Any device error: allocation failure, fence timeout, device loss.
    /// The previous fragment buffer may already be released when an error
    /// is returned.
    pub fn voxelize(
        &mut self,
        command_pool: CommandPoolId,
        command_buffer: CommandBufferId,
    ) -> VoxelizeResult<VoxelizeOutcome> {
        debug_assert!(!self.shut_down, "voxelize after shutdown");
        let device = Arc::clone(&self.device);
        let fence = device.create_fence(false)?;

        let outcome = self.run_phases(command_buffer, fence);

        if let Err(err) = device.destroy_fence(fence) {
            tracing::warn!(error = %err, "failed to destroy voxelizer fence");
        }
        let reset = device.reset_command_pool(command_pool);
        let outcome = outcome?;
        reset?;
        Ok(outcome)
    }

    fn run_phases(
        &mut self,
        command_buffer: CommandBufferId,
        fence: FenceId,
    ) -> VoxelizeResult<VoxelizeOutcome> {
        let info = SubmitInfo {
            queue: self.device.queue(QueueType::Graphics),
            command_buffer,
            fence: Some(fence),
        };

        // Phase A
        self.counter.reset(self.device.as_ref())?;
        let count_pass = VoxelPass::new(&self.scene, self.count_pipeline, self.count_set, self.resolution);
        self.device
            .immediate_submit(&info, self.fence_timeout, |commands| count_pass.record(commands))?;
        let counted = self.counter.read(self.device.as_ref())?[slots::COUNTED];
        tracing::debug!(counted, "voxel count pass finished");

        // Phase B
        self.release_fragments();
        if counted == 0 {
            tracing::info!("nothing to voxelize");
            return Ok(VoxelizeOutcome::Empty);
        }
        let storage = self.allocate_fragments(counted)?;
        self.fragments = Some(storage);

        // Phase C
        self.write_fragments(&info)?;
        let written = self.counter.read(self.device.as_ref())?[slots::WRITTEN];
        let overflowed = written > counted;
        if overflowed {
            tracing::warn!(counted, written, "write pass found more cells than counted, extra dropped");
        }
        let report = VoxelizationReport {
            counted,
            written,
            buffer_size: storage.size,
            overflowed,
            resolution: self.resolution,
        };
        if let Some(fragments) = self.fragments.as_mut() {
            fragments.count = report.stored();
        }
        tracing::info!(
            counted,
            written,
            bytes = storage.size,
            resolution = self.resolution,
            conservative = self.conservative,
            "voxelization finished"
        );
        Ok(VoxelizeOutcome::Populated(report))
    }

    fn allocate_fragments(&self, counted: u32) -> VoxelizeResult<FragmentStorage> {
        let size = u64::from(counted) * VOXEL_FRAGMENT_SIZE;
        let buffer = self.device.create_buffer(&BufferDescriptor {
            size,
            usage: BufferUsage::STORAGE,
            memory: MemoryLocation::DeviceLocal,
            label: "voxel fragments",
        })?;

        let scene = &self.scene;
        let set = self.device.create_binding_set(
            self.write_pipeline,
            bindings::SCENE_SET,
            &[
                Binding::storage(bindings::write_pass::VERTICES, scene.vertex_buffer),
                Binding::storage(bindings::write_pass::DRAW_COMMANDS, scene.draw_command_buffer),
                Binding::storage(bindings::write_pass::TRANSFORMS, scene.transform_buffer),
                Binding::storage(bindings::write_pass::MATERIALS, scene.material_buffer),
                Binding::storage(bindings::write_pass::COUNTER, self.counter.buffer()),
                Binding::storage(bindings::write_pass::FRAGMENTS, buffer),
            ],
            "voxel write set",
        );
        match set {
            Ok(set) => Ok(FragmentStorage {
                buffer,
                set,
                size,
                count: 0,
            }),
            Err(err) => {
                let _ = self.device.destroy_buffer(buffer);
                Err(err.into())
            }
        }
    }

    fn write_fragments(&self, info: &SubmitInfo) -> VoxelizeResult<()> {
        debug_assert!(
            self.fragments.is_some(),
            "write pass recorded before the fragment buffer was sized"
        );
        let Some(storage) = self.fragments else {
            return Ok(());
        };
        let write_pass = VoxelPass::new(&self.scene, self.write_pipeline, storage.set, self.resolution);
        self.device
            .immediate_submit(info, self.fence_timeout, |commands| write_pass.record(commands))?;
        Ok(())
    }

    fn release_fragments(&mut self) {
        if let Some(storage) = self.fragments.take() {
            if let Err(err) = self.device.destroy_binding_set(storage.set) {
                tracing::warn!(error = %err, "failed to destroy voxel write set");
            }
            if let Err(err) = self.device.destroy_buffer(storage.buffer) {
                tracing::warn!(error = %err, "failed to destroy fragment buffer");
            }
        }
    }

    /// Fragment buffer of the latest populated run.
    #[inline]
    #[must_use]
    pub fn fragment_buffer(&self) -> Option<BufferId> {
        self.fragments.map(|storage| storage.buffer)
    }

    /// Fragments stored by the latest run, 0 when empty.
    #[inline]
    #[must_use]
    pub fn fragment_count(&self) -> u32 {
        self.fragments.map_or(0, |storage| storage.count)
    }

    /// The shared counter.
    #[inline]
    #[must_use]
    pub fn counter(&self) -> &VoxelCounter {
        &self.counter
    }

    /// Grid edge length.
    #[inline]
    #[must_use]
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Whether the passes rasterize conservatively.
    #[inline]
    #[must_use]
    pub fn is_conservative(&self) -> bool {
        self.conservative
    }

    /// Destroys pipelines, binding sets, the counter and the fragment
    /// buffer. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.release_fragments();

        let device = self.device.as_ref();
        if let Err(err) = device.destroy_binding_set(self.count_set) {
            tracing::warn!(error = %err, "failed to destroy voxel count set");
        }
        for pipeline in [self.count_pipeline, self.write_pipeline] {
            if let Err(err) = device.destroy_pipeline(pipeline) {
                tracing::warn!(pipeline = pipeline.raw(), error = %err, "failed to destroy pipeline");
            }
        }
        self.counter.destroy(device);
        tracing::debug!("voxelizer shut down");
    }
}

impl<D: RenderDevice> Drop for SceneVoxelizer<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
