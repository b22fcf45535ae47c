//! # Engine Error Types

use std::path::PathBuf;

use halcyon_core::CoreError;
use halcyon_gpu::GpuError;
use thiserror::Error;

/// Errors surfaced by the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid or unparsable configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// GPU resource failure.
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// Buffer or layout failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Reading a file failed.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A loop thread panicked.
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
