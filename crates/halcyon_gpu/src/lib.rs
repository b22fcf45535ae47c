//! # HALCYON GPU
//!
//! GPU resource management behind a single executor boundary:
//! - [`GpuExecutor`]: the funnel every graphics call goes through
//! - [`GpuBuffer`]: CPU mirror + GPU allocation, persistent or staged
//! - [`Fence`]: completion signal, polled once per frame
//! - [`BackgroundUploader`]: secondary upload context on its own thread
//! - [`IndirectDrawBuffer`]: growable buffer of indexed indirect draws
//!
//! ## Architecture Rules
//!
//! 1. **Old storage outlives in-flight work** - reallocation retires, never frees
//! 2. **Poll, don't wait** - `Fence::wait` is for shutdown and forced sync only
//! 3. **One owner polls** - other threads read fences through probes
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use halcyon_gpu::{BufferKind, GpuBuffer, GpuExecutor, HeadlessExecutor};
//!
//! let executor: Arc<dyn GpuExecutor> = Arc::new(HeadlessExecutor::immediate());
//! let mut buffer = GpuBuffer::staged(&executor, "example", BufferKind::Storage, 16).unwrap();
//! buffer.raw_mut().unwrap().write_bytes(&[1, 2, 3, 4]).unwrap();
//! let probe = buffer.publish().unwrap().expect("staged buffers return a probe");
//!
//! buffer.poll().unwrap();
//! assert!(probe.is_signaled());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod buffer;
pub mod draw;
pub mod error;
pub mod executor;
pub mod fence;
pub mod upload;

pub use buffer::{BufferPoll, GpuBuffer, GpuBufferDesc, PersistentBuffer, StagedBuffer};
pub use draw::{DrawCommand, DrawCommandLayout, IndirectDrawBuffer};
pub use error::{GpuError, GpuResult};
pub use executor::{
    BufferDescriptor, BufferHandle, BufferKind, FenceHandle, GpuExecutor, HeadlessConfig,
    HeadlessExecutor, HeadlessStats, StorageMode,
};
#[cfg(feature = "wgpu")]
pub use executor::WgpuExecutor;
pub use fence::{Fence, FenceProbe, FenceSet, FenceState};
pub use upload::{BackgroundUploader, UploadState, UploadStats, UploadTicket};
