//! # HALCYON Headless Demo
//!
//! Runs the two-thread loop against the simulated GPU and prints the run
//! statistics. Takes an optional TOML configuration path.
//!
//! ```text
//! halcyon_headless [config.toml] [ticks]
//! ```

use std::sync::Arc;

use halcyon::gpu::{GpuExecutor, HeadlessExecutor};
use halcyon::render::{EntityDesc, MeshRange, PointLight, VoxelGrid};
use halcyon::core::Transform;
use halcyon::{Engine, EngineConfig, EngineResult};

const DEFAULT_TICKS: u64 = 300;
const ENTITIES: u32 = 2_000;

fn main() {
    if let Err(e) = run() {
        eprintln!("halcyon_headless: {e}");
        std::process::exit(1);
    }
}

#[allow(clippy::cast_precision_loss)]
fn run() -> EngineResult<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let ticks = args
        .next()
        .and_then(|t| t.parse().ok())
        .unwrap_or(DEFAULT_TICKS);

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║                    HALCYON HEADLESS DEMO                         ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();
    println!("  slots: {}  target fps: {}  ticks: {ticks}", config.slot_count, config.target_fps);
    println!("  background upload: {}", config.background_upload);
    println!();

    let executor: Arc<dyn GpuExecutor> = Arc::new(HeadlessExecutor::immediate());
    let mut engine = Engine::new(config, executor)?;

    let mut spinners = Vec::new();
    engine.update(|scene| {
        let cube = scene.add_mesh(MeshRange {
            first_index: 0,
            index_count: 36,
            base_vertex: 0,
        });
        let quad = scene.add_mesh(MeshRange {
            first_index: 36,
            index_count: 6,
            base_vertex: 24,
        });
        scene.add_grid(VoxelGrid {
            resolution: 128,
            scale: 0.25,
            texture_id: 0,
            position: [0.0; 3],
        });
        for i in 0..ENTITIES {
            let x = (i % 50) as f32 * 2.0;
            let z = (i / 50) as f32 * 2.0;
            let id = scene.spawn(
                Transform::from_translation([x, 0.0, z]),
                None,
                EntityDesc {
                    mesh: if i % 3 == 0 { quad } else { cube },
                    material: i % 8,
                    flags: 0,
                },
            );
            if i % 10 == 0 {
                spinners.push((id, [x, 0.0, z]));
            }
        }
    })?;

    let stats = engine.run(ticks, |scene, tick| {
        let phase = tick as f32 * 0.05;
        for (id, base) in &spinners {
            let lifted = [base[0], phase.sin(), base[2]];
            scene.set_transform(*id, Transform::from_translation(lifted));
        }
        // A new light every second of simulated time.
        if tick % 60 == 0 {
            scene.add_light(PointLight {
                position: [phase.cos() * 20.0, 5.0, phase.sin() * 20.0],
                radius: 15.0,
                color: [1.0, 0.9, 0.7],
                intensity: 2.0,
            });
        }
    })?;

    stats.print_summary();
    engine.shutdown()?;
    println!();
    println!("  done.");
    Ok(())
}
