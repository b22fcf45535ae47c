//! Record count that precedes the light and voxel-grid records on the GPU.
//!
//! ```text
//! offset  0   count     u32
//! offset  4   padding   [u32; 3]
//! offset 16   records
//! ```

use bytemuck::{Pod, Zeroable};

/// 16-byte prefix of a GPU record collection.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CollectionHeader {
    /// Records that follow the header.
    pub count: u32,
    _padding: [u32; 3],
}

impl CollectionHeader {
    /// Header size; keeps the records 16-byte aligned.
    pub const SIZE: usize = 16;

    /// Header for `count` records, saturating at `u32::MAX`.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            count: u32::try_from(count).unwrap_or(u32::MAX),
            _padding: [0; 3],
        }
    }
}
