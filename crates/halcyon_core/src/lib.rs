//! # HALCYON Core
//!
//! Render-state primitives shared by the update and render threads:
//! - Growable byte buffers whose growth mirrors GPU reallocation
//! - Byte-exact typed record views over those buffers
//! - A slot registry that double/triple-buffers every piece of render state
//! - Cycle counters that let consumers skip redundant uploads
//!
//! ## Architecture Rules
//!
//! 1. **Growth is allocate-new, migrate-old** - a buffer never resizes in place
//! 2. **Record layouts are wire formats** - no padding beyond what a layout declares
//! 3. **The slot rotation is the only barrier** - no field-level locks elsewhere
//!
//! ## Example
//!
//! ```rust
//! use halcyon_core::RenderStateRegistry;
//!
//! let mut builder = RenderStateRegistry::builder(2);
//! let counter = builder.register(|| 0u32);
//! let registry = builder.build();
//!
//! {
//!     let frame = registry.begin_extraction();
//!     *frame.current_write_state(&counter) = 42;
//! }
//! registry.advance();
//!
//! let view = registry.begin_render();
//! assert_eq!(*view.current_read_state(&counter), 42);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod buffer;
pub mod cycle;
pub mod error;
pub mod math;
pub mod sync;
pub mod transform;

pub use buffer::{Field, Layout, RawBuffer, RecordMut, RecordRef, StructView};
pub use cycle::{CycleCounter, CycleStamps, CycleTracker, UploadGate};
pub use error::{CoreError, CoreResult};
pub use math::Mat4;
pub use sync::{ExtractionFrame, RenderStateRegistry, RegistryBuilder, RenderView, StateRef};
pub use transform::{Transform, TransformArena, TransformId};
