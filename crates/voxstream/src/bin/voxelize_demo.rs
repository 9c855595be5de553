//! # Voxelize Demo
//!
//! End-to-end run on the software device:
//!
//! 1. Writes a checkerboard PNG to a scratch directory
//! 2. Builds a unit cube whose faces reference it through the texture cache
//! 3. Streams the texture on the loader thread and acquires it
//! 4. Voxelizes the cube and prints the report
//!
//! Usage: `voxelize_demo [config.toml]`. Set `RUST_LOG=debug` for the
//! per-phase logs.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing_subscriber::{fmt, EnvFilter};
use voxstream::core::EngineConfig;
use voxstream::device::{GpuMaterial, SoftwareDevice};
use voxstream::render::scene::node_transform;
use voxstream::render::{MeshGroup, MeshPrimitive, VoxelizeOutcome};
use voxstream::{Engine, EngineResult};

const CHECKER_SIZE: u32 = 64;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn write_checker(path: &Path) -> image::ImageResult<()> {
    image::RgbaImage::from_fn(CHECKER_SIZE, CHECKER_SIZE, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            image::Rgba([230, 120, 40, 255])
        } else {
            image::Rgba([30, 30, 30, 255])
        }
    })
    .save(path)
}

/// One face of the unit cube as a quad facing `normal`.
fn face(corners: [[f32; 3]; 4], normal: [f32; 3], material: GpuMaterial) -> MeshPrimitive {
    MeshPrimitive {
        name: "cube face".to_string(),
        positions: corners.to_vec(),
        normals: Some(vec![normal; 4]),
        uvs: Some(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
        indices: vec![0, 1, 2, 0, 2, 3],
        material,
        ..MeshPrimitive::default()
    }
}

fn cube(material: GpuMaterial) -> Vec<MeshPrimitive> {
    let (lo, hi) = (0.0, 1.0);
    vec![
        face([[lo, lo, lo], [hi, lo, lo], [hi, hi, lo], [lo, hi, lo]], [0.0, 0.0, -1.0], material),
        face([[lo, lo, hi], [hi, lo, hi], [hi, hi, hi], [lo, hi, hi]], [0.0, 0.0, 1.0], material),
        face([[lo, lo, lo], [lo, hi, lo], [lo, hi, hi], [lo, lo, hi]], [-1.0, 0.0, 0.0], material),
        face([[hi, lo, lo], [hi, hi, lo], [hi, hi, hi], [hi, lo, hi]], [1.0, 0.0, 0.0], material),
        face([[lo, lo, lo], [hi, lo, lo], [hi, lo, hi], [lo, lo, hi]], [0.0, -1.0, 0.0], material),
        face([[lo, hi, lo], [hi, hi, lo], [hi, hi, hi], [lo, hi, hi]], [0.0, 1.0, 0.0], material),
    ]
}

fn run(config: EngineConfig) -> EngineResult<()> {
    let scratch = std::env::temp_dir().join(format!("voxstream_demo_{}", std::process::id()));
    if let Err(err) = std::fs::create_dir_all(&scratch)
        .map_err(|e| e.to_string())
        .and_then(|()| write_checker(&scratch.join("checker.png")).map_err(|e| e.to_string()))
    {
        tracing::warn!(error = %err, "could not write demo texture, cube stays untextured");
    }

    let device = Arc::new(SoftwareDevice::new());
    let engine = Engine::new(Arc::clone(&device), config)?;

    // PARSE
    let mut textures = engine.texture_cache(&scratch);
    let material = GpuMaterial {
        albedo: [0.9, 0.5, 0.2, 1.0],
        albedo_map: textures.request_bindless(device.as_ref(), engine.loader(), "checker.png"),
        ..GpuMaterial::default()
    };
    let mut group = MeshGroup::new();
    for mut primitive in cube(material) {
        // Slightly off-axis so the dominant-axis projection has work to do
        primitive.transform = node_transform([0.0; 3], [0.0, 0.0, 0.0998, 0.995], [1.0; 3]);
        group.add_primitive(primitive)?;
    }

    // UPLOAD
    let scene = engine.upload_scene(&group)?;

    // DRAIN
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut acquired = 0;
    while acquired < textures.len() && Instant::now() < deadline {
        acquired += engine.drain_pending_texture_updates()?.textures.len();
        thread::sleep(Duration::from_millis(1));
    }
    tracing::info!(acquired, requested = textures.len(), "textures streamed");

    // VOXEL
    let mut voxelizer = engine.voxelizer(&scene)?;
    let started = Instant::now();
    let outcome = engine.voxelize(&mut voxelizer)?;
    let elapsed = started.elapsed();

    match outcome {
        VoxelizeOutcome::Empty => println!("scene covers no voxels"),
        VoxelizeOutcome::Populated(report) => {
            println!("=== Voxelization Report ===");
            println!("resolution:  {0}x{0}x{0}", report.resolution);
            println!("counted:     {}", report.counted);
            println!("written:     {}", report.written);
            println!("buffer:      {} bytes", report.buffer_size);
            println!("overflowed:  {}", report.overflowed);
            println!("time:        {elapsed:?}");
        }
    }
    println!("loader:      {:?}", engine.loader().stats());

    drop(voxelizer);
    engine.shutdown();
    scene.destroy(device.as_ref());
    textures.destroy(device.as_ref());
    std::fs::remove_dir_all(&scratch).ok();
    Ok(())
}

fn main() {
    init_logging();

    let config = match std::env::args().nth(1) {
        Some(path) => match EngineConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(%path, error = %err, "invalid config");
                std::process::exit(2);
            }
        },
        None => EngineConfig {
            voxelizer: voxstream::core::VoxelizerConfig {
                resolution: 128,
                ..Default::default()
            },
            ..EngineConfig::default()
        },
    };

    if let Err(err) = run(config) {
        tracing::error!(error = %err, "demo failed");
        std::process::exit(1);
    }
}
