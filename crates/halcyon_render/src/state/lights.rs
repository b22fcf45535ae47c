//! Point-light render state.
//!
//! ```text
//! offset  0   position   [f32; 3]
//! offset 12   radius     f32
//! offset 16   color      [f32; 3]
//! offset 28   intensity  f32
//! ```

use halcyon_core::{CoreResult, CycleStamps, Field, Layout, StructView};

/// Record layout of one point light (32 bytes).
pub struct PointLightLayout;

impl Layout for PointLightLayout {
    const NAME: &'static str = "PointLight";
    const RECORD_SIZE: usize = 32;
}

impl PointLightLayout {
    /// World position.
    pub const POSITION: Field<[f32; 3]> = Field::at(0);
    /// Attenuation radius.
    pub const RADIUS: Field<f32> = Field::at(12);
    /// Linear RGB.
    pub const COLOR: Field<[f32; 3]> = Field::at(16);
    /// Intensity multiplier.
    pub const INTENSITY: Field<f32> = Field::at(28);
}

/// All point lights of one snapshot.
#[derive(Debug)]
pub struct LightState {
    /// Packed light records.
    pub records: StructView<PointLightLayout>,
    /// Change stamps of the source collection.
    pub stamps: CycleStamps,
    /// Registry cycle that produced this slot.
    pub extracted_cycle: u64,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            records: StructView::from_buffer(halcyon_core::RawBuffer::default()),
            stamps: CycleStamps::default(),
            extracted_cycle: 0,
        }
    }
}

impl LightState {
    /// Number of lights in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.record_count()
    }

    /// Whether the snapshot has no lights.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Packed bytes of all lights.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.records.buffer().logical_bytes()
    }

    /// Position of light `index`.
    ///
    /// # Errors
    ///
    /// [`CoreError::IndexOutOfBounds`](halcyon_core::CoreError::IndexOutOfBounds).
    pub fn position(&self, index: usize) -> CoreResult<[f32; 3]> {
        self.records.for_index(index, |r| r.get(PointLightLayout::POSITION))
    }
}
