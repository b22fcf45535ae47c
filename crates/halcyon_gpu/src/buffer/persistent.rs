//! Coherently mapped buffers.

use halcyon_core::RawBuffer;
use tracing::trace;

use super::storage::BufferStorage;
use crate::error::GpuResult;

/// Buffer whose CPU mirror is the mapped region.
///
/// Writes land in the mirror and become visible to GPU commands issued after
/// the next [`flush`](Self::flush). There is no upload command and no fence.
#[derive(Debug)]
pub struct PersistentBuffer {
    pub(super) storage: BufferStorage,
}

impl PersistentBuffer {
    /// Mapped bytes.
    ///
    /// # Errors
    ///
    /// [`GpuError::UseAfterRelease`](crate::GpuError::UseAfterRelease) after
    /// `delete()`.
    pub fn mapped_mut(&mut self) -> GpuResult<&mut RawBuffer> {
        self.storage.check_live()?;
        Ok(&mut self.storage.mirror)
    }

    /// Memory barrier for the whole logical size.
    ///
    /// # Errors
    ///
    /// Use after release, or an executor failure.
    pub fn flush(&mut self) -> GpuResult<()> {
        let size = self.storage.mirror.size_in_bytes();
        self.flush_range(0, size)
    }

    /// Memory barrier for `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapacityExceeded`](halcyon_core::CoreError::CapacityExceeded)
    /// past the mapped capacity, use after release, or an executor failure.
    pub fn flush_range(&mut self, offset: usize, len: usize) -> GpuResult<()> {
        self.storage.write_range(offset, len)?;
        trace!(label = self.storage.label(), offset, len, "persistent buffer flushed");
        Ok(())
    }
}
