//! Executor over a `wgpu` device and queue.
//!
//! wgpu has no persistent mapping of device-local memory, so both storage
//! modes publish through `Queue::write_buffer`; the staged/persistent split
//! only changes when publishing happens. Fences are
//! `Queue::on_submitted_work_done` callbacks flipping a flag that
//! `Device::poll` drives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::{BufferDescriptor, BufferHandle, BufferKind, FenceHandle, GpuExecutor};
use crate::error::{GpuError, GpuResult};

/// Copy alignment required by wgpu for buffer sizes, offsets and writes.
const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

#[derive(Default)]
struct Objects {
    next_id: u64,
    buffers: HashMap<u64, wgpu::Buffer>,
    fences: HashMap<u64, Arc<AtomicBool>>,
}

/// Executor that forwards to wgpu.
pub struct WgpuExecutor {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    objects: Mutex<Objects>,
}

impl std::fmt::Debug for WgpuExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let objects = self.objects.lock();
        f.debug_struct("WgpuExecutor")
            .field("buffers", &objects.buffers.len())
            .field("fences", &objects.fences.len())
            .finish_non_exhaustive()
    }
}

impl WgpuExecutor {
    /// Wraps an existing device and queue.
    #[must_use]
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            objects: Mutex::new(Objects::default()),
        }
    }

    /// Underlying device, for binding buffers into pipelines.
    #[must_use]
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// Runs `f` with the native buffer behind `handle`.
    ///
    /// # Errors
    ///
    /// [`GpuError::UnknownHandle`] if the handle is gone.
    pub fn with_buffer<R>(
        &self,
        handle: BufferHandle,
        f: impl FnOnce(&wgpu::Buffer) -> R,
    ) -> GpuResult<R> {
        let objects = self.objects.lock();
        let buffer = objects.buffers.get(&handle.0).ok_or(GpuError::UnknownHandle {
            kind: "buffer",
            id: handle.0,
        })?;
        Ok(f(buffer))
    }

    fn fence_flag(&self, fence: FenceHandle) -> GpuResult<Arc<AtomicBool>> {
        self.objects
            .lock()
            .fences
            .get(&fence.0)
            .cloned()
            .ok_or(GpuError::UnknownHandle { kind: "fence", id: fence.0 })
    }
}

const fn usages(kind: BufferKind) -> wgpu::BufferUsages {
    let base = wgpu::BufferUsages::COPY_SRC.union(wgpu::BufferUsages::COPY_DST);
    base.union(match kind {
        BufferKind::Storage => wgpu::BufferUsages::STORAGE,
        BufferKind::Uniform => wgpu::BufferUsages::UNIFORM,
        BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
        BufferKind::Index => wgpu::BufferUsages::INDEX,
        BufferKind::Indirect => wgpu::BufferUsages::INDIRECT.union(wgpu::BufferUsages::STORAGE),
    })
}

const fn align_up(value: u64) -> u64 {
    value.div_ceil(COPY_ALIGNMENT) * COPY_ALIGNMENT
}

fn check_aligned(what: &str, offset: u64) -> GpuResult<()> {
    if offset % COPY_ALIGNMENT == 0 {
        Ok(())
    } else {
        Err(GpuError::Backend(format!("unaligned {what} offset {offset}")))
    }
}

impl GpuExecutor for WgpuExecutor {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn max_buffer_size(&self) -> u64 {
        self.device.limits().max_buffer_size
    }

    fn create_buffer(&self, desc: &BufferDescriptor<'_>) -> GpuResult<BufferHandle> {
        let limit = self.max_buffer_size();
        let size = align_up(desc.size.max(COPY_ALIGNMENT));
        if size > limit {
            return Err(GpuError::AllocationFailed {
                requested: desc.size,
                limit,
            });
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size,
            usage: usages(desc.kind),
            mapped_at_creation: false,
        });
        let mut objects = self.objects.lock();
        objects.next_id += 1;
        let id = objects.next_id;
        objects.buffers.insert(id, buffer);
        trace!(id, size, label = desc.label, "wgpu buffer created");
        Ok(BufferHandle(id))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GpuResult<()> {
        check_aligned("write", offset)?;
        if data.is_empty() {
            return Ok(());
        }
        self.with_buffer(buffer, |native| {
            if data.len() as u64 % COPY_ALIGNMENT == 0 {
                self.queue.write_buffer(native, offset, data);
            } else {
                let mut padded = data.to_vec();
                padded.resize(align_up(data.len() as u64) as usize, 0);
                self.queue.write_buffer(native, offset, &padded);
            }
        })
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
        check_aligned("copy source", src_offset)?;
        check_aligned("copy target", dst_offset)?;
        let objects = self.objects.lock();
        let lookup = |handle: BufferHandle| {
            objects.buffers.get(&handle.0).ok_or(GpuError::UnknownHandle {
                kind: "buffer",
                id: handle.0,
            })
        };
        let (source, target) = (lookup(src)?, lookup(dst)?);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("halcyon copy"),
        });
        encoder.copy_buffer_to_buffer(source, src_offset, target, dst_offset, align_up(size));
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) -> GpuResult<()> {
        let native = self.objects.lock().buffers.remove(&buffer.0).ok_or(GpuError::UnknownHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        native.destroy();
        Ok(())
    }

    fn insert_fence(&self) -> GpuResult<FenceHandle> {
        // Flushes pending queue writes so the callback covers them.
        self.queue.submit(std::iter::empty());
        let flag = Arc::new(AtomicBool::new(false));
        let signal = Arc::clone(&flag);
        self.queue.on_submitted_work_done(move || signal.store(true, Ordering::Release));

        let mut objects = self.objects.lock();
        objects.next_id += 1;
        let id = objects.next_id;
        objects.fences.insert(id, flag);
        Ok(FenceHandle(id))
    }

    fn fence_signaled(&self, fence: FenceHandle) -> GpuResult<bool> {
        let flag = self.fence_flag(fence)?;
        if !flag.load(Ordering::Acquire) {
            let _ = self.device.poll(wgpu::Maintain::Poll);
        }
        Ok(flag.load(Ordering::Acquire))
    }

    fn wait_fence(&self, fence: FenceHandle) -> GpuResult<()> {
        let flag = self.fence_flag(fence)?;
        while !flag.load(Ordering::Acquire) {
            let _ = self.device.poll(wgpu::Maintain::Wait);
        }
        Ok(())
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        self.objects.lock().fences.remove(&fence.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_must_be_copy_aligned() {
        assert!(check_aligned("copy target", 0).is_ok());
        assert!(check_aligned("copy target", COPY_ALIGNMENT * 3).is_ok());
        assert_eq!(
            check_aligned("copy target", 2),
            Err(GpuError::Backend("unaligned copy target offset 2".into()))
        );
    }
}
