//! # Buffers
//!
//! Byte storage for everything that ends up on the GPU.
//!
//! ```text
//! RawBuffer ──wrapped by──> StructView<L> ──mirrored by──> GpuBuffer (halcyon_gpu)
//!   bytes                    record stride                   GPU handle
//! ```
//!
//! Growth is always allocate-new, migrate-old. A GPU allocation cannot be
//! resized, so neither can its CPU mirror.

mod raw;
mod view;

pub use raw::RawBuffer;
pub use view::{Field, Layout, RecordMut, RecordRef, StructView};
