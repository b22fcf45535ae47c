//! # Render States
//!
//! Snapshot types stored in the registry slots. Each one carries the change
//! stamps of its source and the registry cycle that extracted it, so the
//! render thread can skip redundant uploads and check frame consistency.
//!
//! Every state starts empty; extraction grows its records on demand. Light
//! and voxel-grid records reach the GPU behind a [`CollectionHeader`].

mod camera;
mod entities;
mod header;
mod lights;
mod voxel_grid;

pub use camera::{CameraState, CameraUniform};
pub use entities::{EntityLayout, EntityRecord, EntityState, MeshBatch, MeshRange, NO_PARENT};
pub use header::CollectionHeader;
pub use lights::{LightState, PointLightLayout};
pub use voxel_grid::{VoxelGridLayout, VoxelGridRecord, VoxelGridState};
