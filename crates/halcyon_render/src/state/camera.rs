//! Camera render state.

use bytemuck::{Pod, Zeroable};
use halcyon_core::{CycleStamps, Mat4};

/// Shader-side camera block: 144 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    /// World to view.
    pub view: Mat4,
    /// View to clip.
    pub projection: Mat4,
    /// Eye position, `w = 1`.
    pub position: [f32; 4],
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            position: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Camera as seen by the render thread.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraState {
    /// Uniform block ready for upload.
    pub uniform: CameraUniform,
    /// Change stamps of the source camera.
    pub stamps: CycleStamps,
    /// Registry cycle that produced this slot.
    pub extracted_cycle: u64,
}
