//! CPU mirror + GPU allocation shared by both storage modes.
//!
//! Growth never frees the old allocation on the spot. The old handle goes
//! onto a retirement queue behind a fence inserted after the migration copy
//! and is destroyed only once that fence signals.

use std::sync::Arc;

use halcyon_core::{CoreError, RawBuffer};
use tracing::{debug, warn};

use crate::error::{GpuError, GpuResult};
use crate::executor::{BufferDescriptor, BufferHandle, BufferKind, GpuExecutor, StorageMode};
use crate::fence::{Fence, FenceState};

/// Old allocation waiting for in-flight GPU work.
#[derive(Debug)]
struct Retired {
    handle: BufferHandle,
    size: u64,
    fence: Fence,
}

#[derive(Debug)]
pub(crate) struct BufferStorage {
    executor: Arc<dyn GpuExecutor>,
    label: String,
    kind: BufferKind,
    mode: StorageMode,
    handle: Option<BufferHandle>,
    gpu_capacity: u64,
    pub(crate) mirror: RawBuffer,
    generation: u64,
    retired: Vec<Retired>,
}

impl BufferStorage {
    pub(crate) fn new(
        executor: &Arc<dyn GpuExecutor>,
        label: &str,
        kind: BufferKind,
        mode: StorageMode,
        capacity: usize,
    ) -> GpuResult<Self> {
        let requested = capacity as u64;
        let limit = executor.max_buffer_size();
        if requested > limit {
            return Err(GpuError::AllocationFailed { requested, limit });
        }
        let mirror = RawBuffer::with_capacity(capacity)?;
        let handle = executor.create_buffer(&BufferDescriptor {
            label,
            size: requested,
            kind,
            mode,
        })?;
        debug!(label, %kind, ?mode, capacity, "GPU buffer created");
        Ok(Self {
            executor: Arc::clone(executor),
            label: label.to_owned(),
            kind,
            mode,
            handle: Some(handle),
            gpu_capacity: requested,
            mirror,
            generation: 0,
            retired: Vec::new(),
        })
    }

    pub(crate) fn executor(&self) -> &Arc<dyn GpuExecutor> {
        &self.executor
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) const fn kind(&self) -> BufferKind {
        self.kind
    }

    pub(crate) const fn gpu_capacity(&self) -> u64 {
        self.gpu_capacity
    }

    pub(crate) const fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn retired_len(&self) -> usize {
        self.retired.len()
    }

    pub(crate) const fn is_deleted(&self) -> bool {
        self.handle.is_none()
    }

    pub(crate) fn handle(&self) -> GpuResult<BufferHandle> {
        self.handle.ok_or_else(|| GpuError::UseAfterRelease {
            resource: "buffer",
            label: self.label.clone(),
        })
    }

    pub(crate) fn check_live(&self) -> GpuResult<()> {
        self.handle().map(|_| ())
    }

    /// Grows both sides to at least `n` bytes. `true` if either side grew.
    pub(crate) fn ensure_capacity_in_bytes(&mut self, n: usize) -> GpuResult<bool> {
        self.check_live()?;
        let requested = n as u64;
        let limit = self.executor.max_buffer_size();
        if requested > limit {
            return Err(GpuError::AllocationFailed { requested, limit });
        }
        let cpu_grew = self.mirror.ensure_capacity(n, true)?;
        let gpu_grew = self.ensure_gpu_capacity(requested)?;
        Ok(cpu_grew || gpu_grew)
    }

    /// Brings the GPU allocation up to the mirror's capacity.
    pub(crate) fn sync_gpu_capacity(&mut self) -> GpuResult<bool> {
        self.ensure_gpu_capacity(self.mirror.capacity_in_bytes() as u64)
    }

    fn ensure_gpu_capacity(&mut self, n: u64) -> GpuResult<bool> {
        let old = self.handle()?;
        if self.gpu_capacity >= n {
            return Ok(false);
        }
        let limit = self.executor.max_buffer_size();
        if n > limit {
            return Err(GpuError::AllocationFailed { requested: n, limit });
        }

        let new = self.executor.create_buffer(&BufferDescriptor {
            label: &self.label,
            size: n,
            kind: self.kind,
            mode: self.mode,
        })?;
        if self.gpu_capacity > 0 {
            if let Err(e) = self.executor.copy_buffer(old, 0, new, 0, self.gpu_capacity) {
                let _ = self.executor.destroy_buffer(new);
                return Err(e);
            }
        }
        let fence = match Fence::insert(&self.executor, "buffer-retire") {
            Ok(fence) => fence,
            Err(e) => {
                let _ = self.executor.destroy_buffer(new);
                return Err(e);
            }
        };

        debug!(
            label = %self.label,
            from = self.gpu_capacity,
            to = n,
            generation = self.generation + 1,
            "GPU buffer reallocated"
        );
        self.retired.push(Retired {
            handle: old,
            size: self.gpu_capacity,
            fence,
        });
        self.handle = Some(new);
        self.gpu_capacity = n;
        self.generation += 1;
        Ok(true)
    }

    /// Writes `len` mirror bytes starting at `offset` to the GPU allocation.
    pub(crate) fn write_range(&mut self, offset: usize, len: usize) -> GpuResult<()> {
        let handle = self.handle()?;
        let end = offset.checked_add(len).ok_or(CoreError::CapacityExceeded {
            required: usize::MAX,
            available: self.mirror.capacity_in_bytes(),
        })?;
        if end > self.mirror.capacity_in_bytes() {
            return Err(CoreError::CapacityExceeded {
                required: end,
                available: self.mirror.capacity_in_bytes(),
            }
            .into());
        }
        if end as u64 > self.gpu_capacity {
            self.ensure_gpu_capacity(end as u64)?;
            return self.write_range(offset, len);
        }
        if len == 0 {
            return Ok(());
        }
        self.executor
            .write_buffer(handle, offset as u64, &self.mirror.as_bytes()[offset..end])
    }

    /// GPU-side copy of this allocation into `target` at `target_offset`.
    pub(crate) fn copy_to(&self, target: &Self, target_offset: u64) -> GpuResult<Fence> {
        let src = self.handle()?;
        let dst = target.handle()?;
        if src == dst {
            return Err(CoreError::Aliasing.into());
        }
        let available = target.gpu_capacity.saturating_sub(target_offset);
        if target_offset > target.gpu_capacity || available < self.gpu_capacity {
            return Err(CoreError::CapacityExceeded {
                required: usize::try_from(self.gpu_capacity).unwrap_or(usize::MAX),
                available: usize::try_from(available).unwrap_or(usize::MAX),
            }
            .into());
        }
        if self.gpu_capacity > 0 {
            self.executor
                .copy_buffer(src, 0, dst, target_offset, self.gpu_capacity)?;
        }
        Fence::insert(&self.executor, "buffer-copy")
    }

    /// Destroys retired allocations whose fences signaled.
    pub(crate) fn collect_retired(&mut self) -> GpuResult<usize> {
        let executor = &self.executor;
        let mut released = 0;
        let mut failure = None;
        self.retired.retain_mut(|retired| {
            if failure.is_some() {
                return true;
            }
            match retired.fence.update() {
                Ok(FenceState::Pending) => true,
                Ok(FenceState::Signaled) => {
                    if let Err(e) = executor.destroy_buffer(retired.handle) {
                        failure = Some(e);
                        return true;
                    }
                    debug!(
                        handle = retired.handle.id(),
                        size = retired.size,
                        "retired GPU storage released"
                    );
                    released += 1;
                    false
                }
                Err(e) => {
                    failure = Some(e);
                    true
                }
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(released),
        }
    }

    /// Waits for in-flight work, then releases every allocation.
    pub(crate) fn delete(&mut self) -> GpuResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let mut result = Ok(());
        for mut retired in self.retired.drain(..) {
            let step = retired
                .fence
                .wait()
                .and_then(|()| self.executor.destroy_buffer(retired.handle));
            if result.is_ok() {
                result = step;
            }
        }
        let step = self.executor.destroy_buffer(handle);
        if result.is_ok() {
            result = step;
        }
        self.mirror = RawBuffer::default();
        self.gpu_capacity = 0;
        debug!(label = %self.label, "GPU buffer deleted");
        result
    }
}

impl Drop for BufferStorage {
    fn drop(&mut self) {
        if let Err(e) = self.delete() {
            warn!(label = %self.label, error = %e, "GPU buffer release failed on drop");
        }
    }
}
