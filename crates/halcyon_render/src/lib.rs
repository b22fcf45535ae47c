//! # HALCYON Render
//!
//! Both ends of the render-state pipeline:
//!
//! ```text
//!   update thread                               render thread
//! ┌──────────────┐   extract    ┌──────────┐   read   ┌───────────────┐
//! │    Scene     │ ───────────► │ registry │ ───────► │ FrameRenderer │ ──► GPU
//! │ (mutations)  │  write slot  │ N slots  │ read slot│ (uploads,     │
//! └──────────────┘              └──────────┘          │  draw list)   │
//!                                                     └───────────────┘
//! ```
//!
//! - [`Scene`]: simulation data with per-collection cycle trackers
//! - [`ExtractionPipeline`]: runs [`Extractor`]s, then publishes the cycle
//! - [`FrameRenderer`]: uploads what changed and rebuilds indirect draws
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use halcyon_core::RenderStateRegistry;
//! use halcyon_gpu::{GpuExecutor, HeadlessExecutor};
//! use halcyon_render::{
//!     scene_pipeline, ExtractionReserve, FrameRenderer, PointLight, RendererConfig, Scene,
//!     SceneStates,
//! };
//!
//! let executor: Arc<dyn GpuExecutor> = Arc::new(HeadlessExecutor::immediate());
//! let mut builder = RenderStateRegistry::builder(3);
//! let states = SceneStates::register(&mut builder);
//! let registry = builder.build();
//!
//! let mut pipeline = scene_pipeline(Arc::clone(&registry), &states, ExtractionReserve::default());
//! let mut renderer = FrameRenderer::new(&executor, states, &RendererConfig::default()).unwrap();
//!
//! let mut scene = Scene::new();
//! scene.add_light(PointLight { position: [0.0; 3], radius: 1.0, color: [1.0; 3], intensity: 1.0 });
//! pipeline.run(&mut scene).unwrap();
//!
//! let report = renderer.render_frame(&registry);
//! assert_eq!(report.snapshot_cycle, Some(0));
//! assert!(report.consistent);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod extract;
pub mod renderer;
pub mod scene;
pub mod state;

pub use extract::{
    scene_pipeline, CameraExtractor, EntityExtractor, ExtractionPipeline, ExtractionReserve,
    Extractor, LightExtractor, PassTracked, SceneStates, VoxelGridExtractor,
};
pub use renderer::{FrameRenderer, FrameReport, RendererConfig, RendererStats};
pub use scene::{
    Camera, EntityDesc, EntityId, GridId, LightId, MeshId, PointLight, Scene, VoxelGrid,
};
pub use state::{
    CameraState, CameraUniform, CollectionHeader, EntityLayout, EntityRecord, EntityState,
    LightState, MeshBatch, MeshRange, PointLightLayout, VoxelGridLayout, VoxelGridRecord,
    VoxelGridState, NO_PARENT,
};
