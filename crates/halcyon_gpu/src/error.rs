//! # GPU Error Types
//!
//! Everything that can go wrong between the CPU mirrors and the executor.

use halcyon_core::CoreError;
use thiserror::Error;

/// Errors raised by GPU resources and executors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// Precondition failure in a CPU-side mirror.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Operation on a buffer or fence after `delete()`.
    #[error("{resource} `{label}` used after release")]
    UseAfterRelease {
        /// Kind of resource ("buffer", "fence").
        resource: &'static str,
        /// Debug label of the resource.
        label: String,
    },

    /// The executor cannot provide storage of the requested size.
    #[error("GPU allocation of {requested} bytes exceeds the executor limit of {limit}")]
    AllocationFailed {
        /// Requested size in bytes.
        requested: u64,
        /// Largest buffer the executor supports.
        limit: u64,
    },

    /// A handle the executor does not know (already destroyed, or foreign).
    #[error("unknown {kind} handle {id}")]
    UnknownHandle {
        /// Kind of handle ("buffer", "fence").
        kind: &'static str,
        /// Raw handle id.
        id: u64,
    },

    /// A staged upload was requested while an earlier one still reads the
    /// staging region.
    #[error("staging region of `{label}` still has {in_flight} upload(s) in flight")]
    StagingInFlight {
        /// Debug label of the buffer.
        label: String,
        /// Uploads not yet signaled.
        in_flight: usize,
    },

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for GPU operations.
pub type GpuResult<T> = Result<T, GpuError>;
