//! Entity render state: per-instance records grouped into mesh batches.

use bytemuck::{Pod, Zeroable};
use halcyon_core::{CycleStamps, Layout, Mat4, RawBuffer, StructView};

/// Parent value of a root entity.
pub const NO_PARENT: u32 = u32::MAX;

/// Per-instance record consumed by the vertex shader (80 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct EntityRecord {
    /// Resolved world matrix.
    pub world: Mat4,
    /// Mesh id.
    pub mesh: u32,
    /// Material id.
    pub material: u32,
    /// Index of the parent transform, or [`NO_PARENT`].
    pub parent: u32,
    /// Free-form flags.
    pub flags: u32,
}

/// Record layout of [`EntityRecord`].
pub struct EntityLayout;

impl Layout for EntityLayout {
    const NAME: &'static str = "Entity";
    const RECORD_SIZE: usize = std::mem::size_of::<EntityRecord>();
}

/// Index range of a mesh inside the shared index buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MeshRange {
    /// First index.
    pub first_index: u32,
    /// Index count.
    pub index_count: u32,
    /// Added to every index.
    pub base_vertex: i32,
}

/// Consecutive instances that share a mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MeshBatch {
    /// Mesh id.
    pub mesh: u32,
    /// Index range of the mesh.
    pub range: MeshRange,
    /// First record of the batch.
    pub first_instance: u32,
    /// Records in the batch.
    pub instance_count: u32,
}

/// All entities of one snapshot.
#[derive(Debug)]
pub struct EntityState {
    /// Instance records, sorted by mesh.
    pub records: StructView<EntityLayout>,
    /// One batch per mesh with at least one instance.
    pub batches: Vec<MeshBatch>,
    /// Change stamps of the source collection.
    pub stamps: CycleStamps,
    /// Registry cycle that produced this slot.
    pub extracted_cycle: u64,
}

impl Default for EntityState {
    fn default() -> Self {
        Self {
            records: StructView::from_buffer(RawBuffer::default()),
            batches: Vec::new(),
            stamps: CycleStamps::default(),
            extracted_cycle: 0,
        }
    }
}

impl EntityState {
    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.record_count()
    }

    /// Whether there are no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Packed bytes of all instances.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.records.buffer().logical_bytes()
    }

    /// Copy of record `index`.
    #[must_use]
    pub fn record(&self, index: usize) -> Option<EntityRecord> {
        self.records
            .for_index(index, |r| bytemuck::pod_read_unaligned(r.as_bytes()))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_is_80_bytes() {
        assert_eq!(EntityLayout::RECORD_SIZE, 80);
    }
}
