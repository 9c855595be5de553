//! Integration tests for scene upload and the two-pass voxelizer on the
//! software device.

use std::collections::HashSet;
use std::sync::Arc;
use voxstream_core::VoxelizerConfig;
use voxstream_device::layout::counter;
use voxstream_device::{
    CommandBufferId, CommandPoolId, DeviceError, GpuMaterial, QueueType, RenderDevice,
    SoftwareDevice, VoxelFragment,
};
use voxstream_render::scene::node_transform;
use voxstream_render::{
    MeshGroup, MeshPrimitive, SceneResourceTable, SceneVoxelizer, VoxelizeError, VoxelizeOutcome,
};

const UNIT_QUAD: [[f32; 3]; 4] = [
    [0.0, 0.0, 0.5],
    [1.0, 0.0, 0.5],
    [1.0, 1.0, 0.5],
    [0.0, 1.0, 0.5],
];

fn quad(material: GpuMaterial) -> MeshPrimitive {
    MeshPrimitive {
        name: "quad".to_string(),
        positions: UNIT_QUAD.to_vec(),
        indices: vec![0, 1, 2, 0, 2, 3],
        material,
        ..MeshPrimitive::default()
    }
}

fn unit_triangle() -> MeshPrimitive {
    MeshPrimitive {
        name: "triangle".to_string(),
        positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        indices: vec![0, 1, 2],
        ..MeshPrimitive::default()
    }
}

fn colored(albedo: [f32; 4]) -> GpuMaterial {
    GpuMaterial {
        albedo,
        ..GpuMaterial::default()
    }
}

fn config(resolution: u32) -> VoxelizerConfig {
    VoxelizerConfig {
        resolution,
        conservative_rasterization: false,
        fence_timeout_ms: Some(100),
    }
}

fn graphics_commands(device: &SoftwareDevice) -> (CommandPoolId, CommandBufferId) {
    let pool = device
        .create_command_pool(device.queue(QueueType::Graphics))
        .unwrap();
    (pool, device.allocate_command_buffer(pool).unwrap())
}

fn upload(device: &SoftwareDevice, primitives: Vec<MeshPrimitive>) -> SceneResourceTable {
    let mut group = MeshGroup::new();
    for primitive in primitives {
        group.add_primitive(primitive).unwrap();
    }
    SceneResourceTable::upload(device, &group).unwrap()
}

fn fragments(device: &SoftwareDevice, voxelizer: &SceneVoxelizer<SoftwareDevice>) -> Vec<VoxelFragment> {
    let buffer = voxelizer.fragment_buffer().unwrap();
    let bytes = device.buffer_contents(buffer).unwrap();
    bytes
        .chunks_exact(8)
        .take(voxelizer.fragment_count() as usize)
        .map(|chunk| VoxelFragment::unpack(bytemuck::pod_read_unaligned(chunk)))
        .collect()
}

#[test]
fn test_unit_quad_fills_the_grid_exactly() {
    let device = Arc::new(SoftwareDevice::new());
    let scene = upload(&device, vec![quad(GpuMaterial::default())]);
    let mut voxelizer = SceneVoxelizer::initialize(Arc::clone(&device), &scene, &config(16)).unwrap();
    let (pool, command_buffer) = graphics_commands(&device);

    let VoxelizeOutcome::Populated(report) = voxelizer.voxelize(pool, command_buffer).unwrap() else {
        panic!("quad produced no fragments");
    };
    assert_eq!(report.counted, 16 * 16);
    assert_eq!(report.written, report.counted);
    assert!(!report.overflowed);
    assert_eq!(report.buffer_size, 16 * 16 * 8);
    assert_eq!(voxelizer.fragment_count(), 16 * 16);

    let cells: HashSet<[u32; 3]> = fragments(&device, &voxelizer)
        .iter()
        .map(|f| [f.x, f.y, f.z])
        .collect();
    assert_eq!(cells.len(), 16 * 16, "shared edge covered twice");
    assert!(cells.iter().all(|c| c[2] == 8));
}

#[test]
fn test_write_count_matches_count_pass() {
    let device = Arc::new(SoftwareDevice::new());
    let scene = upload(&device, vec![unit_triangle()]);
    let mut voxelizer = SceneVoxelizer::initialize(Arc::clone(&device), &scene, &config(32)).unwrap();
    let (pool, command_buffer) = graphics_commands(&device);

    voxelizer.voxelize(pool, command_buffer).unwrap();
    let slots = voxelizer.counter().read(device.as_ref()).unwrap();
    assert!(slots[counter::COUNTED] > 0);
    assert!(slots[counter::COUNTED] <= 32 * 32);
    assert_eq!(slots[counter::WRITTEN], slots[counter::COUNTED]);
}

#[test]
fn test_undercounted_scene_is_clamped_and_flagged() {
    let device = Arc::new(SoftwareDevice::new());
    let scene = upload(&device, vec![quad(colored([0.0, 0.0, 1.0, 1.0]))]);
    let mut voxelizer = SceneVoxelizer::initialize(Arc::clone(&device), &scene, &config(16)).unwrap();
    let (pool, command_buffer) = graphics_commands(&device);

    device.simulate_count_undercount(10);
    let VoxelizeOutcome::Populated(report) = voxelizer.voxelize(pool, command_buffer).unwrap() else {
        panic!("quad produced no fragments");
    };
    assert_eq!(report.counted, 16 * 16 - 10);
    assert_eq!(report.written, 16 * 16);
    assert!(report.overflowed);
    assert_eq!(report.stored(), report.counted);
    assert_eq!(report.buffer_size, u64::from(report.counted) * 8);
    assert_eq!(voxelizer.fragment_count(), report.counted);

    // Every stored record is complete; nothing landed past the buffer
    let stored = fragments(&device, &voxelizer);
    assert_eq!(stored.len() as u32, report.counted);
    assert_eq!(
        device.buffer_contents(voxelizer.fragment_buffer().unwrap()).unwrap().len() as u64,
        report.buffer_size
    );
    assert!(stored.iter().all(|f| f.z == 8 && f.albedo == [0, 0, 255]));
}

#[test]
fn test_empty_scene() {
    let device = Arc::new(SoftwareDevice::new());
    let scene = upload(&device, Vec::new());
    assert_eq!(scene.draw_count, 0);
    let mut voxelizer = SceneVoxelizer::initialize(Arc::clone(&device), &scene, &config(16)).unwrap();
    let (pool, command_buffer) = graphics_commands(&device);

    let outcome = voxelizer.voxelize(pool, command_buffer).unwrap();
    assert_eq!(outcome, VoxelizeOutcome::Empty);
    assert_eq!(voxelizer.fragment_buffer(), None);
    assert_eq!(voxelizer.fragment_count(), 0);
    assert_eq!(voxelizer.counter().read(device.as_ref()).unwrap()[counter::COUNTED], 0);
}

#[test]
fn test_transforms_and_materials_reach_fragments() {
    let device = Arc::new(SoftwareDevice::new());
    let mut shifted = quad(colored([0.0, 1.0, 0.0, 1.0]));
    shifted.transform = node_transform([1.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0], [1.0, 1.0, 1.0]);
    // Scene spans [0, 2] on x, so each quad covers 8x8 texels at R = 16
    let scene = upload(&device, vec![quad(colored([1.0, 0.0, 0.0, 1.0])), shifted]);
    let mut voxelizer = SceneVoxelizer::initialize(Arc::clone(&device), &scene, &config(16)).unwrap();
    let (pool, command_buffer) = graphics_commands(&device);

    voxelizer.voxelize(pool, command_buffer).unwrap();
    let fragments = fragments(&device, &voxelizer);
    assert_eq!(fragments.len(), 128);
    for fragment in fragments {
        let expected = if fragment.x < 8 { [255, 0, 0] } else { [0, 255, 0] };
        assert_eq!(fragment.albedo, expected, "{fragment:?}");
        assert_eq!(fragment.z, 4);
        assert!(fragment.y < 8);
    }
}

#[test]
fn test_conservative_covers_at_least_as_much() {
    let device = Arc::new(SoftwareDevice::new());
    let scene = upload(&device, vec![unit_triangle()]);
    let (pool, command_buffer) = graphics_commands(&device);

    let mut exact = SceneVoxelizer::initialize(Arc::clone(&device), &scene, &config(16)).unwrap();
    let exact_count = exact.voxelize(pool, command_buffer).unwrap();
    drop(exact);

    let conservative_config = VoxelizerConfig {
        conservative_rasterization: true,
        ..config(16)
    };
    let mut conservative =
        SceneVoxelizer::initialize(Arc::clone(&device), &scene, &conservative_config).unwrap();
    assert!(conservative.is_conservative());
    let conservative_count = conservative.voxelize(pool, command_buffer).unwrap();

    let (VoxelizeOutcome::Populated(exact), VoxelizeOutcome::Populated(wide)) =
        (exact_count, conservative_count)
    else {
        panic!("triangle produced no fragments");
    };
    assert!(wide.counted > exact.counted);
    assert!(!wide.overflowed);
}

#[test]
fn test_device_loss_is_fatal() {
    let device = Arc::new(SoftwareDevice::new());
    let scene = upload(&device, vec![unit_triangle()]);
    let mut voxelizer = SceneVoxelizer::initialize(Arc::clone(&device), &scene, &config(16)).unwrap();
    let (pool, command_buffer) = graphics_commands(&device);

    device.simulate_device_loss();
    let err = voxelizer.voxelize(pool, command_buffer).unwrap_err();
    assert!(matches!(err, VoxelizeError::Device(DeviceError::DeviceLost)));
}

#[test]
fn test_fence_timeout_is_fatal() {
    let device = Arc::new(SoftwareDevice::new());
    let scene = upload(&device, vec![unit_triangle()]);
    let mut voxelizer = SceneVoxelizer::initialize(Arc::clone(&device), &scene, &config(16)).unwrap();
    let (pool, command_buffer) = graphics_commands(&device);

    device.simulate_hang();
    let err = voxelizer.voxelize(pool, command_buffer).unwrap_err();
    assert!(matches!(err, VoxelizeError::Device(DeviceError::FenceTimeout(_))));
    assert_eq!(device.fence_count(), 0);
    assert_eq!(device.command_pool_reset_count(pool), Some(1));
}
