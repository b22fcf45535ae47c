//! # Slot Rotation Benchmark
//!
//! Measures the cost of one update/render handshake:
//! 1. Open extraction frame, overwrite every state
//! 2. Advance
//! 3. Open render view, read every state
//!
//! Target: the handshake must stay negligible next to the extraction itself.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use halcyon_core::RenderStateRegistry;

/// Full cycle with a varying number of registered states
fn bench_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_rotation_cycle");

    for slots in [2usize, 3] {
        for state_count in [1usize, 8, 64] {
            let mut builder = RenderStateRegistry::builder(slots);
            let states: Vec<_> =
                (0..state_count).map(|_| builder.register(|| [0u64; 16])).collect();
            let registry = builder.build();

            group.bench_with_input(
                BenchmarkId::new(format!("{slots}_slots"), state_count),
                &state_count,
                |b, _| {
                    let mut value = 0u64;
                    b.iter(|| {
                        value += 1;
                        {
                            let frame = registry.begin_extraction();
                            for state in &states {
                                frame.current_write_state(state)[0] = value;
                            }
                        }
                        registry.advance();
                        let view = registry.begin_render();
                        for state in &states {
                            black_box(view.current_read_state(state)[0]);
                        }
                    });
                },
            );
        }
    }

    group.finish();
}

/// Advance alone (the publication point)
fn bench_advance(c: &mut Criterion) {
    let mut builder = RenderStateRegistry::builder(3);
    let _state = builder.register(|| 0u32);
    let registry = builder.build();

    c.bench_function("slot_rotation_advance", |b| {
        b.iter(|| black_box(registry.advance()));
    });
}

criterion_group!(benches, bench_cycle, bench_advance);
criterion_main!(benches);
