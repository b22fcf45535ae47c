//! Upload-on-demand buffers.

use halcyon_core::RawBuffer;
use tracing::trace;

use super::storage::BufferStorage;
use crate::error::{GpuError, GpuResult};
use crate::fence::{Fence, FenceProbe, FenceSet};

/// Buffer filled through a CPU staging copy and an explicit upload.
///
/// Each upload is guarded by a fence. Until it signals the staging region
/// may still be read by the copy, so [`staging_available`](Self::staging_available)
/// stays `false`.
#[derive(Debug)]
pub struct StagedBuffer {
    pub(super) storage: BufferStorage,
    pub(super) uploads: FenceSet,
}

impl StagedBuffer {
    /// Staging bytes.
    ///
    /// # Errors
    ///
    /// [`GpuError::UseAfterRelease`](crate::GpuError::UseAfterRelease) after
    /// `delete()`.
    pub fn staging_mut(&mut self) -> GpuResult<&mut RawBuffer> {
        self.storage.check_live()?;
        Ok(&mut self.storage.mirror)
    }

    /// Copies the staging buffer's logical size to the GPU.
    ///
    /// Returns a probe of the fence guarding the staging region.
    ///
    /// # Errors
    ///
    /// [`GpuError::StagingInFlight`] while an earlier upload may still read
    /// the staging region; use after release, allocation failure, or an
    /// executor failure.
    pub fn upload(&mut self) -> GpuResult<FenceProbe> {
        if !self.staging_available()? {
            return Err(GpuError::StagingInFlight {
                label: self.storage.label().to_owned(),
                in_flight: self.uploads.len(),
            });
        }
        let size = self.storage.mirror.size_in_bytes();
        self.storage.write_range(0, size)?;
        let fence = Fence::insert(self.storage.executor(), "staged-upload")?;
        let probe = fence.probe();
        self.uploads.push(fence);
        trace!(label = self.storage.label(), bytes = size, "staged upload submitted");
        Ok(probe)
    }

    /// Polls the upload fences; `true` once none is in flight.
    ///
    /// # Errors
    ///
    /// Use after release, or an executor failure.
    pub fn staging_available(&mut self) -> GpuResult<bool> {
        self.storage.check_live()?;
        self.uploads.poll()?;
        Ok(self.uploads.is_empty())
    }

    /// Uploads still in flight.
    #[must_use]
    pub fn uploads_in_flight(&self) -> usize {
        self.uploads.len()
    }

    /// Blocks until every upload has completed.
    ///
    /// # Errors
    ///
    /// Use after release, or an executor failure.
    pub fn wait_staging(&mut self) -> GpuResult<()> {
        self.storage.check_live()?;
        self.uploads.wait_all()
    }
}
