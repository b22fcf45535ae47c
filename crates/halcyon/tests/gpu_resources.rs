//! GPU buffer, fence and draw-buffer scenarios on the headless executor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use halcyon::core::CoreError;
use halcyon::gpu::{
    BufferKind, DrawCommand, Fence, FenceState, GpuBuffer, GpuError, GpuExecutor, HeadlessExecutor,
    IndirectDrawBuffer, StorageMode,
};

fn headless() -> (Arc<HeadlessExecutor>, Arc<dyn GpuExecutor>) {
    let headless = Arc::new(HeadlessExecutor::new());
    let executor: Arc<dyn GpuExecutor> = headless.clone();
    (headless, executor)
}

fn draw(i: u32) -> DrawCommand {
    DrawCommand {
        count: 3 * (i + 1),
        instance_count: 1,
        first_index: 100 * i,
        base_vertex: 0,
        base_instance: i,
    }
}

#[test]
fn test_indirect_draw_buffer_grows_from_four_to_five() {
    let (headless, executor) = headless();
    let mut draws = IndirectDrawBuffer::new(&executor, 4, StorageMode::Staged).unwrap();
    for i in 0..4 {
        draws.set(i as usize, draw(i)).unwrap();
    }
    assert_eq!(draws.buffer().capacity_in_bytes(), 80);

    assert!(draws.enlarge(5).unwrap());
    assert!(draws.buffer().capacity_in_bytes() >= 100);
    draws.set(4, draw(4)).unwrap();
    assert!(!draws.enlarge(5).unwrap());

    draws.publish().unwrap();
    headless.complete_all();
    let gpu = headless.read_buffer(draws.buffer().handle().unwrap()).unwrap();
    let expected: Vec<DrawCommand> = (0..5).map(draw).collect();
    assert_eq!(&gpu[..100], bytemuck::cast_slice::<DrawCommand, u8>(&expected));
}

#[test]
fn test_fence_signals_once_and_fires_callback_once() {
    let (headless, executor) = headless();
    let buffer = GpuBuffer::persistent(&executor, "fenced", BufferKind::Storage, 16).unwrap();
    let target = GpuBuffer::persistent(&executor, "target", BufferKind::Storage, 16).unwrap();
    buffer.copy_to(&target, 0).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut fence = Fence::insert(&executor, "test")
        .unwrap()
        .with_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    let probe = fence.probe();

    assert_eq!(fence.update().unwrap(), FenceState::Pending);
    assert!(!probe.is_signaled());

    headless.complete_all();
    assert_eq!(fence.update().unwrap(), FenceState::Signaled);
    assert_eq!(fence.update().unwrap(), FenceState::Signaled);
    assert!(probe.is_signaled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    fence.delete();
    fence.delete();
    assert!(matches!(fence.update(), Err(GpuError::UseAfterRelease { .. })));
}

#[test]
fn test_retired_storage_outlives_in_flight_work() {
    let (headless, executor) = headless();
    let mut buffer = GpuBuffer::staged(&executor, "grow", BufferKind::Storage, 8).unwrap();
    buffer.raw_mut().unwrap().write_bytes(&[9; 8]).unwrap();
    buffer.publish().unwrap();
    let live_before = headless.stats().live_buffers;

    assert!(buffer.ensure_capacity_in_bytes(64).unwrap());
    assert_eq!(buffer.generation(), 1);
    assert_eq!(buffer.retired_count(), 1);

    assert_eq!(buffer.poll().unwrap().released, 0);
    assert_eq!(headless.stats().live_buffers, live_before + 1);

    headless.complete_all();
    let polled = buffer.poll().unwrap();
    assert_eq!(polled.released, 1);
    assert_eq!(polled.uploads_completed, 1);
    assert_eq!(headless.stats().live_buffers, live_before);

    let gpu = headless.read_buffer(buffer.handle().unwrap()).unwrap();
    assert_eq!(&gpu[..8], &[9; 8]);
}

#[test]
fn test_staged_upload_blocks_staging_reuse() {
    let (headless, executor) = headless();
    let mut buffer = GpuBuffer::staged(&executor, "staged", BufferKind::Uniform, 32).unwrap();
    let staged = buffer.as_staged_mut().unwrap();
    assert!(staged.staging_available().unwrap());

    staged.staging_mut().unwrap().write_bytes(&[1; 32]).unwrap();
    let probe = staged.upload().unwrap();
    assert!(!staged.staging_available().unwrap());
    assert_eq!(staged.uploads_in_flight(), 1);

    assert!(matches!(staged.upload(), Err(GpuError::StagingInFlight { in_flight: 1, .. })));

    headless.complete_all();
    assert!(staged.staging_available().unwrap());
    assert!(probe.is_signaled());
    assert!(staged.upload().is_ok());
}

#[test]
fn test_copy_to_rejects_alias_and_small_target() {
    let (headless, executor) = headless();
    let mut source = GpuBuffer::persistent(&executor, "source", BufferKind::Storage, 32).unwrap();
    source.raw_mut().unwrap().write_bytes(&[5; 32]).unwrap();
    source.publish().unwrap();
    let small = GpuBuffer::persistent(&executor, "small", BufferKind::Storage, 16).unwrap();

    assert!(matches!(
        source.copy_to(&source, 0),
        Err(GpuError::Core(CoreError::Aliasing))
    ));
    assert!(matches!(
        source.copy_to(&small, 0),
        Err(GpuError::Core(CoreError::CapacityExceeded { .. }))
    ));
    assert_eq!(headless.read_buffer(small.handle().unwrap()).unwrap(), vec![0; 16]);
}

#[test]
fn test_deleted_buffer_reports_use_after_release() {
    let (headless, executor) = headless();
    let mut buffer = GpuBuffer::staged(&executor, "doomed", BufferKind::Vertex, 16).unwrap();
    buffer.publish().unwrap();

    headless.complete_all();
    buffer.delete().unwrap();
    buffer.delete().unwrap();
    assert!(buffer.is_deleted());
    assert!(matches!(buffer.raw_mut(), Err(GpuError::UseAfterRelease { .. })));
    assert!(matches!(buffer.publish(), Err(GpuError::UseAfterRelease { .. })));
    assert_eq!(headless.stats().live_buffers, 0);
}
