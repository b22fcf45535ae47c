//! In-memory GPU.
//!
//! Buffers are byte vectors. Every write or copy is one submission; a fence
//! remembers the submission count at insertion and signals once the
//! simulated GPU has completed that many. Completion only moves when the
//! test says so (`complete_all`), or on every query when `auto_complete` is
//! set.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::trace;

use super::{BufferDescriptor, BufferHandle, FenceHandle, GpuExecutor};
use crate::error::{GpuError, GpuResult};

/// Knobs for the simulated device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadlessConfig {
    /// Largest buffer [`GpuExecutor::create_buffer`] accepts.
    pub max_buffer_size: u64,
    /// Complete all outstanding work whenever a fence is queried.
    pub auto_complete: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 256 * 1024 * 1024,
            auto_complete: false,
        }
    }
}

/// Counters for assertions in tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Buffers currently alive.
    pub live_buffers: usize,
    /// Buffers destroyed so far.
    pub destroyed_buffers: usize,
    /// Fences currently alive.
    pub live_fences: usize,
    /// Write commands executed.
    pub writes: u64,
    /// Copy commands executed.
    pub copies: u64,
    /// Bytes moved by writes.
    pub bytes_written: u64,
}

#[derive(Debug, Default)]
struct Device {
    next_id: u64,
    buffers: HashMap<u64, Vec<u8>>,
    fences: HashMap<u64, u64>,
    submitted: u64,
    completed: u64,
    stats: HeadlessStats,
}

impl Device {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer(&self, handle: BufferHandle) -> GpuResult<&Vec<u8>> {
        self.buffers.get(&handle.0).ok_or(GpuError::UnknownHandle {
            kind: "buffer",
            id: handle.0,
        })
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> GpuResult<&mut Vec<u8>> {
        self.buffers.get_mut(&handle.0).ok_or(GpuError::UnknownHandle {
            kind: "buffer",
            id: handle.0,
        })
    }

    fn fence_target(&self, fence: FenceHandle) -> GpuResult<u64> {
        self.fences.get(&fence.0).copied().ok_or(GpuError::UnknownHandle {
            kind: "fence",
            id: fence.0,
        })
    }
}

/// Executor backed by host memory.
#[derive(Debug, Default)]
pub struct HeadlessExecutor {
    config: HeadlessConfig,
    device: Mutex<Device>,
}

impl HeadlessExecutor {
    /// Executor with manual completion.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HeadlessConfig::default())
    }

    /// Executor whose work completes as soon as anyone asks.
    #[must_use]
    pub fn immediate() -> Self {
        Self::with_config(HeadlessConfig {
            auto_complete: true,
            ..HeadlessConfig::default()
        })
    }

    /// Executor with explicit settings.
    #[must_use]
    pub fn with_config(config: HeadlessConfig) -> Self {
        Self {
            config,
            device: Mutex::new(Device::default()),
        }
    }

    /// Completes every submitted command.
    pub fn complete_all(&self) {
        let mut device = self.device.lock();
        device.completed = device.submitted;
    }

    /// Commands submitted but not yet completed.
    #[must_use]
    pub fn pending_submissions(&self) -> u64 {
        let device = self.device.lock();
        device.submitted - device.completed
    }

    /// Copy of a buffer's GPU-side bytes.
    #[must_use]
    pub fn read_buffer(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.device.lock().buffers.get(&buffer.0).cloned()
    }

    /// Whether `buffer` is still allocated.
    #[must_use]
    pub fn is_live(&self, buffer: BufferHandle) -> bool {
        self.device.lock().buffers.contains_key(&buffer.0)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> HeadlessStats {
        let device = self.device.lock();
        HeadlessStats {
            live_buffers: device.buffers.len(),
            live_fences: device.fences.len(),
            ..device.stats
        }
    }
}

fn range(offset: u64, len: u64, capacity: usize) -> GpuResult<std::ops::Range<usize>> {
    let start = usize::try_from(offset).map_err(|_| GpuError::Backend("offset overflow".into()))?;
    let len = usize::try_from(len).map_err(|_| GpuError::Backend("length overflow".into()))?;
    match start.checked_add(len) {
        Some(end) if end <= capacity => Ok(start..end),
        _ => Err(GpuError::Backend(format!(
            "range {start}+{len} outside buffer of {capacity} bytes"
        ))),
    }
}

impl GpuExecutor for HeadlessExecutor {
    fn name(&self) -> &str {
        "headless"
    }

    fn max_buffer_size(&self) -> u64 {
        self.config.max_buffer_size
    }

    fn create_buffer(&self, desc: &BufferDescriptor<'_>) -> GpuResult<BufferHandle> {
        let size = usize::try_from(desc.size)
            .ok()
            .filter(|_| desc.size <= self.config.max_buffer_size)
            .ok_or(GpuError::AllocationFailed {
                requested: desc.size,
                limit: self.config.max_buffer_size,
            })?;
        let mut device = self.device.lock();
        let id = device.next_id();
        device.buffers.insert(id, vec![0; size]);
        trace!(id, size, label = desc.label, kind = %desc.kind, "headless buffer created");
        Ok(BufferHandle(id))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GpuResult<()> {
        let mut device = self.device.lock();
        let storage = device.buffer_mut(buffer)?;
        let range = range(offset, data.len() as u64, storage.len())?;
        storage[range].copy_from_slice(data);
        device.submitted += 1;
        device.stats.writes += 1;
        device.stats.bytes_written += data.len() as u64;
        Ok(())
    }

    fn copy_buffer(
        &self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> GpuResult<()> {
        if src == dst {
            return Err(GpuError::Core(halcyon_core::CoreError::Aliasing));
        }
        let mut device = self.device.lock();
        let source = device.buffer(src)?;
        let bytes = source[range(src_offset, size, source.len())?].to_vec();
        let target = device.buffer_mut(dst)?;
        let dst_range = range(dst_offset, size, target.len())?;
        target[dst_range].copy_from_slice(&bytes);
        device.submitted += 1;
        device.stats.copies += 1;
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) -> GpuResult<()> {
        let mut device = self.device.lock();
        device.buffers.remove(&buffer.0).ok_or(GpuError::UnknownHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        device.stats.destroyed_buffers += 1;
        Ok(())
    }

    fn insert_fence(&self) -> GpuResult<FenceHandle> {
        let mut device = self.device.lock();
        let id = device.next_id();
        let target = device.submitted;
        device.fences.insert(id, target);
        Ok(FenceHandle(id))
    }

    fn fence_signaled(&self, fence: FenceHandle) -> GpuResult<bool> {
        let mut device = self.device.lock();
        let target = device.fence_target(fence)?;
        if self.config.auto_complete {
            device.completed = device.submitted;
        }
        Ok(device.completed >= target)
    }

    fn wait_fence(&self, fence: FenceHandle) -> GpuResult<()> {
        // Waiting drains the simulated queue up to the fence.
        let mut device = self.device.lock();
        let target = device.fence_target(fence)?;
        device.completed = device.completed.max(target);
        Ok(())
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        self.device.lock().fences.remove(&fence.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{BufferKind, StorageMode};

    fn desc(size: u64) -> BufferDescriptor<'static> {
        BufferDescriptor {
            label: "test",
            size,
            kind: BufferKind::Storage,
            mode: StorageMode::Staged,
        }
    }

    #[test]
    fn test_fence_covers_prior_submissions() {
        let gpu = HeadlessExecutor::new();
        let buffer = gpu.create_buffer(&desc(8)).unwrap();
        gpu.write_buffer(buffer, 0, &[1, 2, 3, 4]).unwrap();
        let fence = gpu.insert_fence().unwrap();

        assert!(!gpu.fence_signaled(fence).unwrap());
        assert_eq!(gpu.pending_submissions(), 1);
        gpu.complete_all();
        assert!(gpu.fence_signaled(fence).unwrap());
        assert_eq!(&gpu.read_buffer(buffer).unwrap()[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_fence_with_no_work_is_signaled() {
        let gpu = HeadlessExecutor::new();
        let fence = gpu.insert_fence().unwrap();
        assert!(gpu.fence_signaled(fence).unwrap());
    }

    #[test]
    fn test_copy_rejects_same_handle() {
        let gpu = HeadlessExecutor::new();
        let buffer = gpu.create_buffer(&desc(8)).unwrap();
        assert_eq!(
            gpu.copy_buffer(buffer, 0, buffer, 4, 4),
            Err(GpuError::Core(halcyon_core::CoreError::Aliasing))
        );
    }

    #[test]
    fn test_allocation_limit() {
        let gpu = HeadlessExecutor::with_config(HeadlessConfig {
            max_buffer_size: 64,
            auto_complete: false,
        });
        assert!(gpu.create_buffer(&desc(64)).is_ok());
        assert_eq!(
            gpu.create_buffer(&desc(65)),
            Err(GpuError::AllocationFailed { requested: 65, limit: 64 })
        );
    }

    #[test]
    fn test_destroyed_handle_unknown() {
        let gpu = HeadlessExecutor::new();
        let buffer = gpu.create_buffer(&desc(4)).unwrap();
        gpu.destroy_buffer(buffer).unwrap();
        assert!(matches!(
            gpu.write_buffer(buffer, 0, &[0]),
            Err(GpuError::UnknownHandle { kind: "buffer", .. })
        ));
        assert_eq!(gpu.stats().destroyed_buffers, 1);
        assert_eq!(gpu.stats().live_buffers, 0);
    }

    #[test]
    fn test_out_of_range_write_rejected() {
        let gpu = HeadlessExecutor::new();
        let buffer = gpu.create_buffer(&desc(4)).unwrap();
        assert!(matches!(gpu.write_buffer(buffer, 2, &[0; 4]), Err(GpuError::Backend(_))));
    }
}
