//! # Core Error Types
//!
//! Precondition failures raised by buffers and record views.

use thiserror::Error;

/// Errors that can occur in the core buffer primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A copy or sequential access needed more bytes than the buffer holds.
    #[error("capacity exceeded: need {required} bytes, have {available}")]
    CapacityExceeded {
        /// Bytes the operation needed.
        required: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// Record index past the end of a structured view.
    #[error("record index {index} out of bounds for `{layout}` (capacity {capacity} records)")]
    IndexOutOfBounds {
        /// Requested record index.
        index: usize,
        /// Records the view can currently hold.
        capacity: usize,
        /// Name of the record layout.
        layout: &'static str,
    },

    /// The host could not provide the requested allocation.
    #[error("allocation of {requested} bytes failed")]
    AllocationFailed {
        /// Requested size in bytes.
        requested: usize,
    },

    /// Source and target of a copy are the same storage.
    #[error("copy source and target alias the same storage")]
    Aliasing,
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
