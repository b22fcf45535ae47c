//! # Buffer Growth Benchmark
//!
//! Growth is allocate-new, migrate-old. This measures what that costs:
//! 1. Enlarge with content migration
//! 2. Enlarge without migration (fresh storage)
//! 3. Record writes through a structured view

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use halcyon_core::{Field, Layout, RawBuffer, StructView};

struct LightLayout;

impl Layout for LightLayout {
    const NAME: &'static str = "BenchLight";
    const RECORD_SIZE: usize = 32;
}

const POSITION: Field<[f32; 3]> = Field::at(0);
const RADIUS: Field<f32> = Field::at(12);

/// Enlarge by 2x, with and without migration
fn bench_enlarge(c: &mut Criterion) {
    let mut group = c.benchmark_group("raw_buffer_enlarge");

    for size in [4 * 1024usize, 256 * 1024, 4 * 1024 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        let mut source = RawBuffer::with_capacity(size).unwrap();
        source.set_size(size).unwrap();

        for copy_content in [true, false] {
            group.bench_with_input(
                BenchmarkId::new(if copy_content { "migrate" } else { "fresh" }, size),
                &size,
                |b, &size| {
                    b.iter(|| {
                        let grown =
                            source.clone().enlarge_to_bytes(size * 2, copy_content).unwrap();
                        black_box(grown.capacity_in_bytes());
                    });
                },
            );
        }
    }

    group.finish();
}

/// Sequential record writes through scoped accessors
fn bench_record_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("struct_view_writes");

    for count in [1_000usize, 100_000] {
        let mut view = StructView::<LightLayout>::with_records(count).unwrap();
        group.throughput(Throughput::Bytes((count * LightLayout::RECORD_SIZE) as u64));

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                for i in 0..count {
                    view.for_index_mut(i, |r| {
                        r.set(POSITION, [i as f32, 0.0, 0.0]);
                        r.set(RADIUS, 4.0);
                    })
                    .unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_enlarge, bench_record_writes);
criterion_main!(benches);
