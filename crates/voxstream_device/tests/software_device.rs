//! Integration tests for the software backend: queue ownership, fences,
//! fault injection and the voxelization programs.

use voxstream_core::math::IDENTITY;
use voxstream_device::layout::{bindings, counter, push_constants};
use voxstream_device::{
    AccessFlags, Binding, BufferDescriptor, BufferId, BufferUsage, CommandBufferId, CommandList,
    DeviceError, DrawIndexedIndirectCommand, GpuMaterial, GpuVertex, GraphicsPipelineDescriptor,
    IndexType, MemoryLocation, PipelineStage, QueueId, QueueType, RasterizationState,
    RenderDevice, RenderingInfo, ShaderProgram, ShaderStage, SoftwareDevice, SubmitInfo,
    TextureBarrier, TextureDescriptor, TextureFormat, TextureId, TextureLayout, TextureUsage,
    VoxelFragment, DRAW_COMMAND_STRIDE,
};

fn buffer_with(device: &SoftwareDevice, bytes: &[u8], usage: BufferUsage) -> BufferId {
    let buffer = device
        .create_buffer(&BufferDescriptor {
            size: bytes.len().max(4) as u64,
            usage,
            memory: MemoryLocation::HostVisible,
            label: "test",
        })
        .unwrap();
    device.write_buffer(buffer, 0, bytes).unwrap();
    buffer
}

fn command_buffer(device: &SoftwareDevice, queue: QueueId) -> CommandBufferId {
    let pool = device.create_command_pool(queue).unwrap();
    device.allocate_command_buffer(pool).unwrap()
}

fn rgba_texture(device: &SoftwareDevice) -> TextureId {
    device
        .create_texture(&TextureDescriptor {
            width: 2,
            height: 2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
            label: "albedo".to_string(),
        })
        .unwrap()
}

fn barrier(
    texture: TextureId,
    old_layout: TextureLayout,
    new_layout: TextureLayout,
    queues: Option<(QueueId, QueueId)>,
) -> TextureBarrier {
    TextureBarrier {
        texture,
        src_stage: PipelineStage::TRANSFER,
        src_access: AccessFlags::TRANSFER_WRITE,
        dst_stage: PipelineStage::FRAGMENT_SHADER,
        dst_access: AccessFlags::SHADER_READ,
        old_layout,
        new_layout,
        src_queue: queues.map(|q| q.0),
        dst_queue: queues.map(|q| q.1),
    }
}

/// Records the transfer-queue half of a texture upload.
fn record_upload(list: &mut CommandList, staging: BufferId, texture: TextureId) {
    list.texture_barrier(barrier(
        texture,
        TextureLayout::Undefined,
        TextureLayout::TransferDst,
        None,
    ))
    .copy_buffer_to_texture(staging, 0, texture, 2, 2);
}

#[test]
fn test_texture_upload_with_ownership_transfer() {
    let device = SoftwareDevice::new();
    let transfer = device.queue(QueueType::Transfer);
    let graphics = device.queue(QueueType::Graphics);
    assert_ne!(transfer, graphics);

    let pixels: Vec<u8> = (0..16).collect();
    let staging = buffer_with(&device, &pixels, BufferUsage::TRANSFER_SRC);
    let texture = rgba_texture(&device);
    let fence = device.create_fence(false).unwrap();

    let copy_cmd = command_buffer(&device, transfer);
    device
        .immediate_submit(
            &SubmitInfo {
                queue: transfer,
                command_buffer: copy_cmd,
                fence: Some(fence),
            },
            None,
            |list| {
                record_upload(list, staging, texture);
                list.texture_barrier(barrier(
                    texture,
                    TextureLayout::TransferDst,
                    TextureLayout::ShaderReadOnly,
                    Some((transfer, graphics)),
                ));
            },
        )
        .unwrap();

    let released = device.texture_snapshot(texture).unwrap();
    assert_eq!(released.owner, Some(transfer));
    assert_eq!(released.pending_release, Some(graphics));
    assert_eq!(released.layout, TextureLayout::TransferDst);
    assert_eq!(released.copy_count, 1);

    let mut acquire = CommandList::new();
    acquire.texture_barrier(barrier(
        texture,
        TextureLayout::TransferDst,
        TextureLayout::ShaderReadOnly,
        Some((transfer, graphics)),
    ));
    device
        .submit(
            &SubmitInfo {
                queue: graphics,
                command_buffer: command_buffer(&device, graphics),
                fence: None,
            },
            acquire,
        )
        .unwrap();

    let acquired = device.texture_snapshot(texture).unwrap();
    assert_eq!(acquired.owner, Some(graphics));
    assert_eq!(acquired.pending_release, None);
    assert_eq!(acquired.layout, TextureLayout::ShaderReadOnly);
    assert_eq!(device.texture_pixels(texture).unwrap(), pixels);
}

#[test]
fn test_plain_barrier_on_foreign_queue_is_rejected() {
    let device = SoftwareDevice::new();
    let transfer = device.queue(QueueType::Transfer);
    let graphics = device.queue(QueueType::Graphics);

    let staging = buffer_with(&device, &[0; 16], BufferUsage::TRANSFER_SRC);
    let texture = rgba_texture(&device);

    let mut upload = CommandList::new();
    record_upload(&mut upload, staging, texture);
    device
        .submit(
            &SubmitInfo {
                queue: transfer,
                command_buffer: command_buffer(&device, transfer),
                fence: None,
            },
            upload,
        )
        .unwrap();

    let mut steal = CommandList::new();
    steal.texture_barrier(barrier(
        texture,
        TextureLayout::TransferDst,
        TextureLayout::ShaderReadOnly,
        None,
    ));
    let err = device
        .submit(
            &SubmitInfo {
                queue: graphics,
                command_buffer: command_buffer(&device, graphics),
                fence: None,
            },
            steal,
        )
        .unwrap_err();
    assert!(matches!(err, DeviceError::OwnershipViolation(_)));
}

#[test]
fn test_copy_requires_transfer_layout() {
    let device = SoftwareDevice::new();
    let transfer = device.queue(QueueType::Transfer);
    let staging = buffer_with(&device, &[0; 16], BufferUsage::TRANSFER_SRC);
    let texture = rgba_texture(&device);

    let mut list = CommandList::new();
    list.copy_buffer_to_texture(staging, 0, texture, 2, 2);
    let err = device
        .submit(
            &SubmitInfo {
                queue: transfer,
                command_buffer: command_buffer(&device, transfer),
                fence: None,
            },
            list,
        )
        .unwrap_err();
    assert!(matches!(err, DeviceError::InvalidCommand(_)));
}

#[test]
fn test_signalled_fence_cannot_be_resubmitted() {
    let device = SoftwareDevice::new();
    let graphics = device.queue(QueueType::Graphics);
    let cmd = command_buffer(&device, graphics);
    let fence = device.create_fence(false).unwrap();
    let info = SubmitInfo {
        queue: graphics,
        command_buffer: cmd,
        fence: Some(fence),
    };

    device.submit(&info, CommandList::new()).unwrap();
    device.wait_for_fence(fence, None).unwrap();
    assert!(matches!(
        device.submit(&info, CommandList::new()),
        Err(DeviceError::InvalidCommand(_))
    ));

    device.reset_fence(fence).unwrap();
    device.submit(&info, CommandList::new()).unwrap();
}

#[test]
fn test_command_buffer_must_match_queue() {
    let device = SoftwareDevice::new();
    let transfer = device.queue(QueueType::Transfer);
    let graphics = device.queue(QueueType::Graphics);

    let err = device
        .submit(
            &SubmitInfo {
                queue: graphics,
                command_buffer: command_buffer(&device, transfer),
                fence: None,
            },
            CommandList::new(),
        )
        .unwrap_err();
    assert!(matches!(err, DeviceError::InvalidCommand(_)));
}

#[test]
fn test_device_loss_fails_every_submission() {
    let device = SoftwareDevice::new();
    let graphics = device.queue(QueueType::Graphics);
    let cmd = command_buffer(&device, graphics);
    let fence = device.create_fence(false).unwrap();

    device.simulate_device_loss();

    let info = SubmitInfo {
        queue: graphics,
        command_buffer: cmd,
        fence: Some(fence),
    };
    assert_eq!(
        device.submit(&info, CommandList::new()),
        Err(DeviceError::DeviceLost)
    );
    assert_eq!(
        device.wait_for_fence(fence, None),
        Err(DeviceError::DeviceLost)
    );
    // Teardown still works on a lost device
    device.destroy_fence(fence).unwrap();
}

#[test]
fn test_hang_leaves_fence_unsignalled() {
    let device = SoftwareDevice::new();
    let graphics = device.queue(QueueType::Graphics);
    let fence = device.create_fence(false).unwrap();
    device.simulate_hang();

    device
        .submit(
            &SubmitInfo {
                queue: graphics,
                command_buffer: command_buffer(&device, graphics),
                fence: Some(fence),
            },
            CommandList::new(),
        )
        .unwrap();

    assert_eq!(
        device.wait_for_fence(fence, Some(std::time::Duration::from_millis(5))),
        Err(DeviceError::FenceTimeout(fence))
    );
}

/// Unit quad in the z = 0.5 plane, uploaded as host-visible storage buffers.
struct QuadScene {
    vertices: BufferId,
    indices: BufferId,
    transforms: BufferId,
    materials: BufferId,
    draws: BufferId,
    counter: BufferId,
}

fn quad_scene(device: &SoftwareDevice) -> QuadScene {
    let corner = |x: f32, y: f32| GpuVertex {
        position: [x, y, 0.5],
        normal: [0.0, 0.0, 1.0],
        uv: [x, 1.0 - y],
    };
    let vertices = [
        corner(0.0, 0.0),
        corner(1.0, 0.0),
        corner(1.0, 1.0),
        corner(0.0, 1.0),
    ];
    let indices: [u32; 6] = [0, 1, 2, 0, 2, 3];
    let draw = DrawIndexedIndirectCommand {
        index_count: 6,
        instance_count: 1,
        first_index: 0,
        base_vertex: 0,
        base_instance: 0,
        draw_id: 0,
    };
    let material = GpuMaterial {
        albedo: [1.0, 0.0, 0.0, 1.0],
        ..GpuMaterial::default()
    };

    QuadScene {
        vertices: buffer_with(device, bytemuck::cast_slice(&vertices), BufferUsage::STORAGE),
        indices: buffer_with(device, bytemuck::cast_slice(&indices), BufferUsage::INDEX),
        transforms: buffer_with(device, bytemuck::bytes_of(&IDENTITY), BufferUsage::STORAGE),
        materials: buffer_with(device, bytemuck::bytes_of(&material), BufferUsage::STORAGE),
        draws: buffer_with(
            device,
            bytemuck::bytes_of(&draw),
            BufferUsage::STORAGE | BufferUsage::INDIRECT,
        ),
        counter: buffer_with(device, &[0; 8], BufferUsage::STORAGE),
    }
}

fn run_pass(
    device: &SoftwareDevice,
    scene: &QuadScene,
    program: ShaderProgram,
    slots: &[Binding],
    resolution: u32,
) {
    let graphics = device.queue(QueueType::Graphics);
    let pipeline = device
        .create_graphics_pipeline(&GraphicsPipelineDescriptor {
            program,
            rasterization: RasterizationState::default(),
            depth: voxstream_device::DepthState::default(),
            color_formats: Vec::new(),
            label: "voxelize",
        })
        .unwrap();
    let set = device
        .create_binding_set(pipeline, bindings::SCENE_SET, slots, "voxelize set")
        .unwrap();

    let mut list = CommandList::new();
    list.begin_rendering(RenderingInfo {
        width: resolution,
        height: resolution,
        layer_count: 1,
    })
    .bind_pipeline(pipeline)
    .bind_binding_sets(bindings::SCENE_SET, &[set])
    .push_constants(
        ShaderStage::GEOMETRY,
        push_constants::EXTENTS_OFFSET,
        &[0.0f32, 1.0f32],
    )
    .push_constants(
        ShaderStage::FRAGMENT,
        push_constants::RESOLUTION_OFFSET,
        &resolution,
    )
    .bind_index_buffer(scene.indices, 0, IndexType::U32)
    .draw_indexed_indirect(scene.draws, 0, 1, DRAW_COMMAND_STRIDE)
    .end_rendering();

    device
        .submit(
            &SubmitInfo {
                queue: graphics,
                command_buffer: command_buffer(device, graphics),
                fence: None,
            },
            list,
        )
        .unwrap();
}

fn read_counter(device: &SoftwareDevice, scene: &QuadScene) -> [u32; 2] {
    let bytes = device.read_buffer(scene.counter, 0, 8).unwrap();
    let slots: Vec<u32> = bytes
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned)
        .collect();
    [slots[counter::COUNTED], slots[counter::WRITTEN]]
}

#[test]
fn test_count_then_write_programs_on_unit_quad() {
    let device = SoftwareDevice::new();
    let scene = quad_scene(&device);
    let resolution = 16;

    run_pass(
        &device,
        &scene,
        ShaderProgram::VoxelizeCount,
        &[
            Binding::storage(bindings::count_pass::VERTICES, scene.vertices),
            Binding::storage(bindings::count_pass::DRAW_COMMANDS, scene.draws),
            Binding::storage(bindings::count_pass::TRANSFORMS, scene.transforms),
            Binding::storage(bindings::count_pass::COUNTER, scene.counter),
        ],
        resolution,
    );
    let [counted, written] = read_counter(&device, &scene);
    assert_eq!(counted, resolution * resolution);
    assert_eq!(written, 0);

    let fragments = device
        .create_buffer(&BufferDescriptor {
            size: u64::from(counted) * 8,
            usage: BufferUsage::STORAGE,
            memory: MemoryLocation::HostVisible,
            label: "fragments",
        })
        .unwrap();
    run_pass(
        &device,
        &scene,
        ShaderProgram::VoxelizeWrite,
        &[
            Binding::storage(bindings::write_pass::VERTICES, scene.vertices),
            Binding::storage(bindings::write_pass::DRAW_COMMANDS, scene.draws),
            Binding::storage(bindings::write_pass::TRANSFORMS, scene.transforms),
            Binding::storage(bindings::write_pass::MATERIALS, scene.materials),
            Binding::storage(bindings::write_pass::COUNTER, scene.counter),
            Binding::storage(bindings::write_pass::FRAGMENTS, fragments),
        ],
        resolution,
    );
    let [counted_again, written] = read_counter(&device, &scene);
    assert_eq!(counted_again, counted);
    assert_eq!(written, counted);

    let raw = device
        .read_buffer(fragments, 0, u64::from(counted) * 8)
        .unwrap();
    for chunk in raw.chunks_exact(8) {
        let fragment = VoxelFragment::unpack(bytemuck::pod_read_unaligned(chunk));
        assert_eq!(fragment.z, resolution / 2);
        assert_eq!(fragment.albedo, [255, 0, 0]);
    }
}

#[test]
fn test_write_program_stops_at_buffer_capacity() {
    let device = SoftwareDevice::new();
    let scene = quad_scene(&device);
    let resolution = 16;
    let capacity: u32 = 100;

    let fragments = device
        .create_buffer(&BufferDescriptor {
            size: u64::from(capacity) * 8,
            usage: BufferUsage::STORAGE,
            memory: MemoryLocation::HostVisible,
            label: "short fragments",
        })
        .unwrap();
    run_pass(
        &device,
        &scene,
        ShaderProgram::VoxelizeWrite,
        &[
            Binding::storage(bindings::write_pass::VERTICES, scene.vertices),
            Binding::storage(bindings::write_pass::DRAW_COMMANDS, scene.draws),
            Binding::storage(bindings::write_pass::TRANSFORMS, scene.transforms),
            Binding::storage(bindings::write_pass::MATERIALS, scene.materials),
            Binding::storage(bindings::write_pass::COUNTER, scene.counter),
            Binding::storage(bindings::write_pass::FRAGMENTS, fragments),
        ],
        resolution,
    );

    // The bump counter still sees every covered cell
    let [_, written] = read_counter(&device, &scene);
    assert_eq!(written, resolution * resolution);
    assert!(written > capacity);

    // Only the sized prefix holds records and the buffer did not grow
    assert!(device
        .read_buffer(fragments, 0, u64::from(capacity) * 8 + 8)
        .is_err());
    let raw = device
        .read_buffer(fragments, 0, u64::from(capacity) * 8)
        .unwrap();
    for chunk in raw.chunks_exact(8) {
        let fragment = VoxelFragment::unpack(bytemuck::pod_read_unaligned(chunk));
        assert_eq!(fragment.z, resolution / 2);
        assert_eq!(fragment.albedo, [255, 0, 0]);
    }
}

#[test]
fn test_count_undercount_injection() {
    let device = SoftwareDevice::new();
    let scene = quad_scene(&device);
    device.simulate_count_undercount(6);

    run_pass(
        &device,
        &scene,
        ShaderProgram::VoxelizeCount,
        &[
            Binding::storage(bindings::count_pass::VERTICES, scene.vertices),
            Binding::storage(bindings::count_pass::DRAW_COMMANDS, scene.draws),
            Binding::storage(bindings::count_pass::TRANSFORMS, scene.transforms),
            Binding::storage(bindings::count_pass::COUNTER, scene.counter),
        ],
        16,
    );
    assert_eq!(read_counter(&device, &scene), [16 * 16 - 6, 0]);
}

#[test]
fn test_draw_outside_render_pass_is_rejected() {
    let device = SoftwareDevice::new();
    let scene = quad_scene(&device);
    let graphics = device.queue(QueueType::Graphics);

    let mut list = CommandList::new();
    list.draw_indexed_indirect(scene.draws, 0, 1, DRAW_COMMAND_STRIDE);
    let err = device
        .submit(
            &SubmitInfo {
                queue: graphics,
                command_buffer: command_buffer(&device, graphics),
                fence: None,
            },
            list,
        )
        .unwrap_err();
    assert!(matches!(err, DeviceError::InvalidCommand(_)));
}
