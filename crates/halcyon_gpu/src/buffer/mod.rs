//! # GPU Buffer Objects
//!
//! A [`GpuBuffer`] is a CPU mirror plus a GPU allocation. The storage mode is
//! picked once, at construction:
//!
//! ```text
//!              Persistent                      Staged
//!   write   →  mapped mirror                   staging mirror
//!   publish →  flush() (barrier, no fence)     upload() (copy + fence)
//!   reuse   →  immediately                     after the upload fence
//! ```
//!
//! Both modes grow the same way: allocate new GPU storage, copy the old
//! contents GPU-side, fence the copy, retire the old storage until the fence
//! signals. The `generation` counter bumps on every replacement so bind
//! groups referencing the old allocation can be rebuilt.

mod persistent;
mod staged;
mod storage;

use std::sync::Arc;

use halcyon_core::{Layout, RawBuffer, StructView};

pub use persistent::PersistentBuffer;
pub use staged::StagedBuffer;

use self::storage::BufferStorage;
use crate::error::GpuResult;
use crate::executor::{BufferHandle, BufferKind, GpuExecutor, StorageMode};
use crate::fence::{Fence, FenceProbe, FenceSet};

/// Construction parameters for a [`GpuBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuBufferDesc<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Binding kind.
    pub kind: BufferKind,
    /// Storage mode.
    pub mode: StorageMode,
    /// Initial capacity in bytes.
    pub capacity: usize,
}

/// What [`GpuBuffer::poll`] completed this frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferPoll {
    /// Retired allocations released.
    pub released: usize,
    /// Staged uploads that finished.
    pub uploads_completed: usize,
}

/// GPU buffer in one of the two storage modes.
#[derive(Debug)]
pub enum GpuBuffer {
    /// Coherent mapping.
    Persistent(PersistentBuffer),
    /// Staging copy plus explicit upload.
    Staged(StagedBuffer),
}

impl GpuBuffer {
    /// Allocates both sides at `desc.capacity` bytes.
    ///
    /// # Errors
    ///
    /// [`GpuError::AllocationFailed`](crate::GpuError::AllocationFailed) past
    /// the executor limit, or a host allocation failure.
    pub fn new(executor: &Arc<dyn GpuExecutor>, desc: &GpuBufferDesc<'_>) -> GpuResult<Self> {
        let storage =
            BufferStorage::new(executor, desc.label, desc.kind, desc.mode, desc.capacity)?;
        Ok(match desc.mode {
            StorageMode::Persistent => Self::Persistent(PersistentBuffer { storage }),
            StorageMode::Staged => Self::Staged(StagedBuffer {
                storage,
                uploads: FenceSet::new(),
            }),
        })
    }

    /// Persistent buffer of `kind`.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn persistent(
        executor: &Arc<dyn GpuExecutor>,
        label: &str,
        kind: BufferKind,
        capacity: usize,
    ) -> GpuResult<Self> {
        Self::new(
            executor,
            &GpuBufferDesc {
                label,
                kind,
                mode: StorageMode::Persistent,
                capacity,
            },
        )
    }

    /// Staged buffer of `kind`.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn staged(
        executor: &Arc<dyn GpuExecutor>,
        label: &str,
        kind: BufferKind,
        capacity: usize,
    ) -> GpuResult<Self> {
        Self::new(
            executor,
            &GpuBufferDesc {
                label,
                kind,
                mode: StorageMode::Staged,
                capacity,
            },
        )
    }

    fn storage(&self) -> &BufferStorage {
        match self {
            Self::Persistent(b) => &b.storage,
            Self::Staged(b) => &b.storage,
        }
    }

    fn storage_mut(&mut self) -> &mut BufferStorage {
        match self {
            Self::Persistent(b) => &mut b.storage,
            Self::Staged(b) => &mut b.storage,
        }
    }

    /// Storage mode.
    #[must_use]
    pub const fn mode(&self) -> StorageMode {
        match self {
            Self::Persistent(_) => StorageMode::Persistent,
            Self::Staged(_) => StorageMode::Staged,
        }
    }

    /// Binding kind.
    #[must_use]
    pub fn kind(&self) -> BufferKind {
        self.storage().kind()
    }

    /// Debug label.
    #[must_use]
    pub fn label(&self) -> &str {
        self.storage().label()
    }

    /// Bumps every time the GPU allocation is replaced.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.storage().generation()
    }

    /// CPU mirror capacity.
    #[must_use]
    pub fn capacity_in_bytes(&self) -> usize {
        self.storage().mirror.capacity_in_bytes()
    }

    /// CPU mirror logical size.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.storage().mirror.size_in_bytes()
    }

    /// Size of the current GPU allocation.
    #[must_use]
    pub fn gpu_capacity_in_bytes(&self) -> u64 {
        self.storage().gpu_capacity()
    }

    /// Old allocations still waiting on their fences.
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.storage().retired_len()
    }

    /// Whether [`delete`](Self::delete) was called.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.storage().is_deleted()
    }

    /// Current GPU allocation.
    ///
    /// # Errors
    ///
    /// [`GpuError::UseAfterRelease`](crate::GpuError::UseAfterRelease).
    pub fn handle(&self) -> GpuResult<BufferHandle> {
        self.storage().handle()
    }

    /// CPU mirror.
    ///
    /// # Errors
    ///
    /// [`GpuError::UseAfterRelease`](crate::GpuError::UseAfterRelease).
    pub fn raw(&self) -> GpuResult<&RawBuffer> {
        let storage = self.storage();
        storage.check_live()?;
        Ok(&storage.mirror)
    }

    /// Mutable CPU mirror.
    ///
    /// # Errors
    ///
    /// [`GpuError::UseAfterRelease`](crate::GpuError::UseAfterRelease).
    pub fn raw_mut(&mut self) -> GpuResult<&mut RawBuffer> {
        let storage = self.storage_mut();
        storage.check_live()?;
        Ok(&mut storage.mirror)
    }

    /// Grows CPU and GPU sides to at least `n` bytes, keeping content.
    ///
    /// Returns `true` if anything was reallocated.
    ///
    /// # Errors
    ///
    /// [`GpuError::AllocationFailed`](crate::GpuError::AllocationFailed) past
    /// the executor limit; use after release.
    pub fn ensure_capacity_in_bytes(&mut self, n: usize) -> GpuResult<bool> {
        self.storage_mut().ensure_capacity_in_bytes(n)
    }

    /// Runs `f` over the mirror interpreted as `L` records.
    ///
    /// Growth done through the view is mirrored on the GPU before returning.
    ///
    /// # Errors
    ///
    /// Use after release, or a failed GPU reallocation.
    pub fn with_view<L: Layout, R>(
        &mut self,
        f: impl FnOnce(&mut StructView<L>) -> R,
    ) -> GpuResult<R> {
        let storage = self.storage_mut();
        storage.check_live()?;
        let mut view = StructView::<L>::from_buffer(std::mem::take(&mut storage.mirror));
        let result = f(&mut view);
        storage.mirror = view.into_buffer();
        storage.sync_gpu_capacity()?;
        Ok(result)
    }

    /// Makes CPU writes visible to the GPU: `flush()` when persistent,
    /// `upload()` when staged.
    ///
    /// # Errors
    ///
    /// Use after release, or an executor failure.
    pub fn publish(&mut self) -> GpuResult<Option<FenceProbe>> {
        match self {
            Self::Persistent(b) => b.flush().map(|()| None),
            Self::Staged(b) => b.upload().map(Some),
        }
    }

    /// GPU-side copy of the whole allocation into `target` at `target_offset`.
    ///
    /// Only GPU storage is touched; `target`'s CPU mirror is not updated.
    ///
    /// # Errors
    ///
    /// [`CoreError::Aliasing`](halcyon_core::CoreError::Aliasing) when both
    /// are the same allocation;
    /// [`CoreError::CapacityExceeded`](halcyon_core::CoreError::CapacityExceeded)
    /// when the target is too small; use after release.
    pub fn copy_to(&self, target: &GpuBuffer, target_offset: u64) -> GpuResult<Fence> {
        self.storage().copy_to(target.storage(), target_offset)
    }

    /// Releases retired storage whose fence signaled.
    ///
    /// # Errors
    ///
    /// Executor failure.
    pub fn collect_retired(&mut self) -> GpuResult<usize> {
        self.storage_mut().collect_retired()
    }

    /// Per-frame maintenance: upload fences and retired storage.
    ///
    /// # Errors
    ///
    /// Executor failure.
    pub fn poll(&mut self) -> GpuResult<BufferPoll> {
        let uploads_completed = match self {
            Self::Persistent(_) => 0,
            Self::Staged(b) => b.uploads.poll()?,
        };
        Ok(BufferPoll {
            released: self.collect_retired()?,
            uploads_completed,
        })
    }

    /// Releases every allocation, waiting for in-flight work first.
    ///
    /// A second call is a no-op.
    ///
    /// # Errors
    ///
    /// Executor failure.
    pub fn delete(&mut self) -> GpuResult<()> {
        if let Self::Staged(b) = self {
            if !b.storage.is_deleted() {
                b.uploads.wait_all()?;
            }
        }
        self.storage_mut().delete()
    }

    /// Persistent variant, if this is one.
    pub fn as_persistent_mut(&mut self) -> Option<&mut PersistentBuffer> {
        match self {
            Self::Persistent(b) => Some(b),
            Self::Staged(_) => None,
        }
    }

    /// Staged variant, if this is one.
    pub fn as_staged_mut(&mut self) -> Option<&mut StagedBuffer> {
        match self {
            Self::Staged(b) => Some(b),
            Self::Persistent(_) => None,
        }
    }
}
