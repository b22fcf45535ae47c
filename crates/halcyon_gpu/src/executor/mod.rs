//! # GPU Executor Boundary
//!
//! Every graphics call funnels through a [`GpuExecutor`]. The executor owns
//! the native objects and serializes access to them; the rest of the engine
//! only ever holds opaque handles.
//!
//! ```text
//! GpuBuffer ──┐
//! Fence ──────┼──► GpuExecutor ──► native API (wgpu / headless memory)
//! Uploader ───┘        ▲
//!                      └── handles are plain ids, never native objects
//! ```
//!
//! A fence inserted with [`GpuExecutor::insert_fence`] covers every write and
//! copy submitted before it.

mod headless;
#[cfg(feature = "wgpu")]
mod wgpu_backend;

use std::fmt;

use crate::error::GpuResult;

pub use headless::{HeadlessConfig, HeadlessExecutor, HeadlessStats};
#[cfg(feature = "wgpu")]
pub use wgpu_backend::WgpuExecutor;

/// Opaque id of GPU buffer storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

impl BufferHandle {
    /// Raw id, for logging.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// Opaque id of a native fence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceHandle(pub(crate) u64);

impl FenceHandle {
    /// Raw id, for logging.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// What the GPU binds a buffer as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Shader storage buffer.
    Storage,
    /// Uniform buffer.
    Uniform,
    /// Vertex buffer.
    Vertex,
    /// Index buffer.
    Index,
    /// Indirect draw arguments.
    Indirect,
}

impl BufferKind {
    /// Short name for labels and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Uniform => "uniform",
            Self::Vertex => "vertex",
            Self::Index => "index",
            Self::Indirect => "indirect",
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How CPU writes reach the GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageMode {
    /// Coherent mapping; writes become visible after a flush barrier.
    Persistent,
    /// CPU staging copied by an explicit upload command.
    Staged,
}

/// Parameters for [`GpuExecutor::create_buffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDescriptor<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Size in bytes.
    pub size: u64,
    /// Binding kind.
    pub kind: BufferKind,
    /// Storage mode.
    pub mode: StorageMode,
}

/// The single funnel for graphics calls.
///
/// Implementations serialize internally, so handles may be used from the
/// render thread and the background upload context alike.
pub trait GpuExecutor: Send + Sync + fmt::Debug {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Largest buffer the backend can allocate.
    fn max_buffer_size(&self) -> u64;

    /// Allocates zero-initialized buffer storage.
    ///
    /// # Errors
    ///
    /// [`GpuError::AllocationFailed`](crate::GpuError::AllocationFailed) past
    /// [`max_buffer_size`](Self::max_buffer_size).
    fn create_buffer(&self, desc: &BufferDescriptor<'_>) -> GpuResult<BufferHandle>;

    /// Writes `data` into `buffer` at `offset`.
    ///
    /// # Errors
    ///
    /// Unknown handle or out-of-range write.
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GpuResult<()>;

    /// GPU-side copy of `size` bytes.
    ///
    /// # Errors
    ///
    /// Unknown handles, out-of-range ranges, or `src == dst`.
    fn copy_buffer(
        &self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> GpuResult<()>;

    /// Releases buffer storage.
    ///
    /// # Errors
    ///
    /// Unknown handle.
    fn destroy_buffer(&self, buffer: BufferHandle) -> GpuResult<()>;

    /// Inserts a fence after everything submitted so far.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn insert_fence(&self) -> GpuResult<FenceHandle>;

    /// Non-blocking completion check.
    ///
    /// # Errors
    ///
    /// Unknown handle.
    fn fence_signaled(&self, fence: FenceHandle) -> GpuResult<bool>;

    /// Blocks until the fence signals.
    ///
    /// # Errors
    ///
    /// Unknown handle.
    fn wait_fence(&self, fence: FenceHandle) -> GpuResult<()>;

    /// Releases a native fence. Unknown handles are ignored.
    fn destroy_fence(&self, fence: FenceHandle);
}
