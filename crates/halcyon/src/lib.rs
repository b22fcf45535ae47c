//! # HALCYON
//!
//! Composition root of the render-state engine.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Engine                               │
//! │                                                                  │
//! │  EngineConfig ──► RenderStateRegistry (N slots per state)        │
//! │                     ▲                         │                  │
//! │        ExtractionPipeline                FrameRenderer           │
//! │        (update thread)                   (render thread)         │
//! │                                               │                  │
//! │                                    Arc<dyn GpuExecutor>          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing is global: the executor is injected and every other object is
//! built by [`Engine::new`].

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod engine;
pub mod error;
pub mod stats;

pub use halcyon_core as core;
pub use halcyon_gpu as gpu;
pub use halcyon_render as render;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use stats::RunStats;
