//! Registry and extraction scenarios across threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use halcyon::core::{RenderStateRegistry, Transform};
use halcyon::gpu::HeadlessExecutor;
use halcyon::render::{EntityDesc, MeshRange, PointLight};
use halcyon::{Engine, EngineConfig};

#[test]
fn test_double_buffer_round_trip() {
    let mut builder = RenderStateRegistry::builder(2);
    let counter = builder.register(|| 0u32);
    let registry = builder.build();

    {
        let frame = registry.begin_extraction();
        *frame.current_write_state(&counter) = 42;
    }
    registry.advance();
    assert_eq!(*registry.begin_render().current_read_state(&counter), 42);

    let frame = registry.begin_extraction();
    {
        let mut slot = frame.current_write_state(&counter);
        assert_eq!(*slot, 0);
        *slot = 7;
    }
    assert_eq!(*registry.begin_render().current_read_state(&counter), 42);
    drop(frame);

    registry.advance();
    assert_eq!(*registry.begin_render().current_read_state(&counter), 7);
}

#[test]
fn test_read_slot_lags_write_slot_by_one_cycle() {
    for slots in [2, 3] {
        let mut builder = RenderStateRegistry::builder(slots);
        let value = builder.register(|| u64::MAX);
        let registry = builder.build();

        for cycle in 0..10u64 {
            {
                let frame = registry.begin_extraction();
                assert_eq!(frame.cycle(), cycle);
                *frame.current_write_state(&value) = cycle;
            }
            assert_eq!(registry.advance(), cycle + 1);
            let view = registry.begin_render();
            assert_eq!(view.snapshot_cycle(), Some(cycle));
            assert_eq!(*view.current_read_state(&value), cycle);
        }
    }
}

#[test]
fn test_render_thread_never_sees_partial_extraction() {
    let mut builder = RenderStateRegistry::builder(3);
    let a = builder.register(|| 0u64);
    let b = builder.register(|| 0u64);
    let registry = builder.build();
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let registry = Arc::clone(&registry);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut frames = 0u64;
            while !done.load(Ordering::Acquire) {
                let view = registry.begin_render();
                let (first, second) = (*view.current_read_state(&a), *view.current_read_state(&b));
                assert_eq!(first, second, "torn snapshot");
                if let Some(cycle) = view.snapshot_cycle() {
                    assert_eq!(first, cycle + 1);
                }
                frames += 1;
            }
            frames
        })
    };

    for cycle in 1..=2_000u64 {
        {
            let frame = registry.begin_extraction();
            *frame.current_write_state(&a) = cycle;
            std::thread::yield_now();
            *frame.current_write_state(&b) = cycle;
        }
        registry.advance();
    }
    done.store(true, Ordering::Release);
    assert!(reader.join().unwrap() > 0);
}

#[test]
fn test_engine_run_frames_are_consistent() {
    let config = EngineConfig {
        slot_count: 2,
        target_fps: 0,
        initial_entities: 4,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config, Arc::new(HeadlessExecutor::immediate())).unwrap();
    let mut spawned = Vec::new();
    engine
        .update(|scene| {
            let mesh = scene.add_mesh(MeshRange {
                first_index: 0,
                index_count: 36,
                base_vertex: 0,
            });
            for i in 0..16u8 {
                spawned.push(scene.spawn(
                    Transform::from_translation([f32::from(i), 0.0, 0.0]),
                    None,
                    EntityDesc {
                        mesh,
                        material: 0,
                        flags: 0,
                    },
                ));
            }
        })
        .unwrap();

    let stats = engine
        .run(200, |scene, tick| {
            #[allow(clippy::cast_precision_loss)]
            let y = tick as f32;
            for id in &spawned {
                scene.set_transform(*id, Transform::from_translation([0.0, y, 0.0]));
            }
            if tick % 25 == 0 {
                scene.add_light(PointLight {
                    position: [0.0, y, 0.0],
                    radius: 2.0,
                    color: [1.0; 3],
                    intensity: 1.0,
                });
            }
        })
        .unwrap();

    assert_eq!(stats.ticks, 200);
    assert_eq!(stats.published, 200);
    assert_eq!(stats.inconsistent_frames, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.last_rendered_cycle, Some(200));

    let view = engine.registry().begin_render();
    let lights = view.current_read_state(&engine.states().lights);
    assert_eq!(lights.len(), 8);
    let entities = view.current_read_state(&engine.states().entities);
    assert_eq!(entities.len(), 16);
    assert_eq!(entities.record(3).unwrap().world.translation(), [0.0, 199.0, 0.0]);
}

#[test]
fn test_paced_run_finishes() {
    let config = EngineConfig {
        target_fps: 500,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config, Arc::new(HeadlessExecutor::immediate())).unwrap();
    let start = std::time::Instant::now();
    let stats = engine.run(25, |_, _| {}).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(40));
    assert_eq!(stats.last_rendered_cycle, Some(24));
    assert!(stats.frames >= 1);
}
