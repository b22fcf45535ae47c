//! Voxel-grid render state.
//!
//! ```text
//! offset  0   resolution         i32
//! offset  4   resolution_half    i32       (derived)
//! offset  8   scale              f32
//! offset 12   texture_id         u32
//! offset 16   position           [f32; 3]
//! offset 28   world_extent_half  f32       (derived)
//! ```
//!
//! Derived fields are written only through [`VoxelGridRecord`], which keeps
//! them in step with their inputs.

use halcyon_core::{CoreResult, CycleStamps, Field, Layout, RawBuffer, RecordMut, StructView};

/// Record layout of one voxel grid (32 bytes).
pub struct VoxelGridLayout;

impl Layout for VoxelGridLayout {
    const NAME: &'static str = "VoxelGrid";
    const RECORD_SIZE: usize = 32;
}

impl VoxelGridLayout {
    /// Voxels per edge.
    pub const RESOLUTION: Field<i32> = Field::at(0);
    /// `resolution / 2`.
    pub const RESOLUTION_HALF: Field<i32> = Field::at(4);
    /// World size of one voxel.
    pub const SCALE: Field<f32> = Field::at(8);
    /// 3D texture holding the voxels.
    pub const TEXTURE_ID: Field<u32> = Field::at(12);
    /// Grid center in world space.
    pub const POSITION: Field<[f32; 3]> = Field::at(16);
    /// `resolution * scale / 2`.
    pub const WORLD_EXTENT_HALF: Field<f32> = Field::at(28);
}

/// Setters that recompute derived fields.
pub trait VoxelGridRecord {
    /// Sets resolution and scale together.
    fn set_dimensions(&mut self, resolution: i32, scale: f32);
    /// Sets the resolution, keeping the scale.
    fn set_resolution(&mut self, resolution: i32);
    /// Sets the scale, keeping the resolution.
    fn set_scale(&mut self, scale: f32);
}

impl VoxelGridRecord for RecordMut<'_, VoxelGridLayout> {
    #[allow(clippy::cast_precision_loss)]
    fn set_dimensions(&mut self, resolution: i32, scale: f32) {
        self.set(VoxelGridLayout::RESOLUTION, resolution);
        self.set(VoxelGridLayout::RESOLUTION_HALF, resolution / 2);
        self.set(VoxelGridLayout::SCALE, scale);
        self.set(VoxelGridLayout::WORLD_EXTENT_HALF, resolution as f32 * scale * 0.5);
    }

    fn set_resolution(&mut self, resolution: i32) {
        let scale = self.get(VoxelGridLayout::SCALE);
        self.set_dimensions(resolution, scale);
    }

    fn set_scale(&mut self, scale: f32) {
        let resolution = self.get(VoxelGridLayout::RESOLUTION);
        self.set_dimensions(resolution, scale);
    }
}

/// All voxel grids of one snapshot.
#[derive(Debug)]
pub struct VoxelGridState {
    /// Packed grid records.
    pub records: StructView<VoxelGridLayout>,
    /// Change stamps of the source collection.
    pub stamps: CycleStamps,
    /// Registry cycle that produced this slot.
    pub extracted_cycle: u64,
}

impl Default for VoxelGridState {
    fn default() -> Self {
        Self {
            records: StructView::from_buffer(RawBuffer::default()),
            stamps: CycleStamps::default(),
            extracted_cycle: 0,
        }
    }
}

impl VoxelGridState {
    /// Number of grids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.record_count()
    }

    /// Whether there are no grids.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Packed bytes of all grids.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.records.buffer().logical_bytes()
    }

    /// Half the world-space edge of grid `index`.
    ///
    /// # Errors
    ///
    /// [`CoreError::IndexOutOfBounds`](halcyon_core::CoreError::IndexOutOfBounds).
    pub fn world_extent_half(&self, index: usize) -> CoreResult<f32> {
        self.records
            .for_index(index, |r| r.get(VoxelGridLayout::WORLD_EXTENT_HALF))
    }
}
