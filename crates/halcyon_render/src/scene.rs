//! # Scene
//!
//! The live simulation data the update thread mutates. Every collection has
//! its own cycle tracker; [`Scene::begin_pass`] advances all of them once
//! per update pass and every mutation stamps the current cycle.
//!
//! Mutations belong to the pass that the next extraction reads. Publishing
//! an extraction starts the next pass:
//!
//! ```text
//! mutate (stamps cycle c) → extract → publish → begin_pass() → mutate (c + 1) → ...
//! ```

use halcyon_core::{CycleStamps, CycleTracker, Mat4, Transform, TransformArena, TransformId};

use crate::state::MeshRange;

/// Perspective camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Eye position.
    pub eye: [f32; 3],
    /// Look-at target.
    pub target: [f32; 3],
    /// Up direction.
    pub up: [f32; 3],
    /// Vertical field of view in radians.
    pub fov_y: f32,
    /// Width / height.
    pub aspect: f32,
    /// Near plane.
    pub near: f32,
    /// Far plane.
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: [0.0, 2.0, 10.0],
            target: [0.0; 3],
            up: [0.0, 1.0, 0.0],
            fov_y: std::f32::consts::FRAC_PI_3,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// World to view.
    #[must_use]
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    /// View to clip.
    #[must_use]
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }
}

/// Point light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    /// World position.
    pub position: [f32; 3],
    /// Attenuation radius.
    pub radius: f32,
    /// Linear RGB.
    pub color: [f32; 3],
    /// Intensity multiplier.
    pub intensity: f32,
}

/// Voxel grid placed in the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGrid {
    /// Voxels per edge.
    pub resolution: i32,
    /// World size of one voxel.
    pub scale: f32,
    /// 3D texture holding the voxels.
    pub texture_id: u32,
    /// Grid center.
    pub position: [f32; 3],
}

/// Light handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightId(u32);

/// Voxel grid handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridId(u32);

/// Mesh handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

/// Entity handle: the entity's transform in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(pub TransformId);

/// What an entity draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDesc {
    /// Mesh to draw.
    pub mesh: MeshId,
    /// Material id.
    pub material: u32,
    /// Free-form flags.
    pub flags: u32,
}

/// Simulation data owned by the update thread.
#[derive(Debug, Default)]
pub struct Scene {
    camera: Camera,
    camera_cycles: CycleTracker,
    lights: Vec<Option<PointLight>>,
    light_cycles: CycleTracker,
    grids: Vec<Option<VoxelGrid>>,
    grid_cycles: CycleTracker,
    transforms: TransformArena,
    entities: Vec<Option<EntityDesc>>,
    entity_cycles: CycleTracker,
    meshes: Vec<MeshRange>,
}

fn slot_id(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

impl Scene {
    /// Empty scene with a default camera.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts an update pass: every tracker moves one cycle.
    pub fn begin_pass(&mut self) -> u64 {
        self.camera_cycles.begin_pass();
        self.light_cycles.begin_pass();
        self.grid_cycles.begin_pass();
        self.entity_cycles.begin_pass()
    }

    /// Current update cycle.
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.entity_cycles.cycle()
    }

    // --- camera ---

    /// Current camera.
    #[must_use]
    pub const fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Replaces the camera.
    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
        self.camera_cycles.record_moved();
    }

    /// Camera change stamps.
    #[must_use]
    pub const fn camera_stamps(&self) -> CycleStamps {
        self.camera_cycles.stamps()
    }

    // --- lights ---

    /// Adds a light.
    pub fn add_light(&mut self, light: PointLight) -> LightId {
        self.light_cycles.record_added();
        let id = LightId(slot_id(self.lights.len()));
        self.lights.push(Some(light));
        id
    }

    /// Replaces a light. `false` if it is gone.
    pub fn set_light(&mut self, id: LightId, light: PointLight) -> bool {
        match self.lights.get_mut(id.0 as usize) {
            Some(Some(slot)) => {
                *slot = light;
                self.light_cycles.record_moved();
                true
            }
            _ => false,
        }
    }

    /// Removes a light. `false` if it was already gone.
    pub fn remove_light(&mut self, id: LightId) -> bool {
        match self.lights.get_mut(id.0 as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.light_cycles.record_removed();
                true
            }
            _ => false,
        }
    }

    /// Live lights in insertion order.
    pub fn lights(&self) -> impl Iterator<Item = &PointLight> + '_ {
        self.lights.iter().flatten()
    }

    /// Number of live lights.
    #[must_use]
    pub fn light_count(&self) -> usize {
        self.lights().count()
    }

    /// Light change stamps.
    #[must_use]
    pub const fn light_stamps(&self) -> CycleStamps {
        self.light_cycles.stamps()
    }

    // --- voxel grids ---

    /// Adds a voxel grid.
    pub fn add_grid(&mut self, grid: VoxelGrid) -> GridId {
        self.grid_cycles.record_added();
        let id = GridId(slot_id(self.grids.len()));
        self.grids.push(Some(grid));
        id
    }

    /// Edits a grid in place. `false` if it is gone.
    pub fn update_grid(&mut self, id: GridId, edit: impl FnOnce(&mut VoxelGrid)) -> bool {
        match self.grids.get_mut(id.0 as usize) {
            Some(Some(grid)) => {
                edit(grid);
                self.grid_cycles.record_moved();
                true
            }
            _ => false,
        }
    }

    /// Removes a grid. `false` if it was already gone.
    pub fn remove_grid(&mut self, id: GridId) -> bool {
        match self.grids.get_mut(id.0 as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.grid_cycles.record_removed();
                true
            }
            _ => false,
        }
    }

    /// Live grids in insertion order.
    pub fn grids(&self) -> impl Iterator<Item = &VoxelGrid> + '_ {
        self.grids.iter().flatten()
    }

    /// Number of live grids.
    #[must_use]
    pub fn grid_count(&self) -> usize {
        self.grids().count()
    }

    /// Grid change stamps.
    #[must_use]
    pub const fn grid_stamps(&self) -> CycleStamps {
        self.grid_cycles.stamps()
    }

    // --- meshes & entities ---

    /// Registers an index range. Entity batches depend on it, so the entity
    /// collection counts as changed.
    pub fn add_mesh(&mut self, range: MeshRange) -> MeshId {
        let id = MeshId(slot_id(self.meshes.len()));
        self.meshes.push(range);
        self.entity_cycles.record_moved();
        id
    }

    /// Index range of `mesh`.
    #[must_use]
    pub fn mesh(&self, mesh: MeshId) -> Option<MeshRange> {
        self.meshes.get(mesh.0 as usize).copied()
    }

    /// Spawns an entity. A dead parent is ignored.
    pub fn spawn(
        &mut self,
        local: Transform,
        parent: Option<EntityId>,
        desc: EntityDesc,
    ) -> EntityId {
        let id = self.transforms.insert(local, parent.map(|p| p.0));
        if self.entities.len() <= id.index() {
            self.entities.resize(id.index() + 1, None);
        }
        self.entities[id.index()] = Some(desc);
        self.entity_cycles.record_added();
        EntityId(id)
    }

    /// Moves an entity. Children follow. `false` if it is gone.
    pub fn set_transform(&mut self, id: EntityId, local: Transform) -> bool {
        let moved = self.transforms.set_local(id.0, local);
        if moved {
            self.entity_cycles.record_moved();
        }
        moved
    }

    /// Re-parents an entity. `false` if refused.
    pub fn set_parent(&mut self, id: EntityId, parent: Option<EntityId>) -> bool {
        let changed = self.transforms.set_parent(id.0, parent.map(|p| p.0));
        if changed {
            self.entity_cycles.record_moved();
        }
        changed
    }

    /// Despawns an entity; its children move up to its parent.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        if !self.transforms.remove(id.0) {
            return false;
        }
        self.entities[id.0.index()] = None;
        self.entity_cycles.record_removed();
        true
    }

    /// Live entities in arena order.
    pub fn entities(&self) -> impl Iterator<Item = (EntityId, EntityDesc)> + '_ {
        self.transforms.ids().filter_map(|id| {
            self.entities
                .get(id.index())
                .copied()
                .flatten()
                .map(|desc| (EntityId(id), desc))
        })
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.transforms.len()
    }

    /// Transform hierarchy.
    #[must_use]
    pub const fn transforms(&self) -> &TransformArena {
        &self.transforms
    }

    /// Entity change stamps.
    #[must_use]
    pub const fn entity_stamps(&self) -> CycleStamps {
        self.entity_cycles.stamps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light(x: f32) -> PointLight {
        PointLight {
            position: [x, 0.0, 0.0],
            radius: 5.0,
            color: [1.0; 3],
            intensity: 1.0,
        }
    }

    #[test]
    fn test_mutations_stamp_current_cycle() {
        let mut scene = Scene::new();
        scene.begin_pass();
        let a = scene.add_light(light(1.0));
        scene.begin_pass();
        scene.begin_pass();
        assert!(scene.set_light(a, light(2.0)));

        let stamps = scene.light_stamps();
        assert_eq!(stamps.added_in_cycle, 1);
        assert_eq!(stamps.moved_in_cycle, 3);
        assert_eq!(scene.grid_stamps().last_change(), 0);
    }

    #[test]
    fn test_removed_light_is_skipped() {
        let mut scene = Scene::new();
        let a = scene.add_light(light(1.0));
        let b = scene.add_light(light(2.0));
        assert!(scene.remove_light(a));
        assert!(!scene.remove_light(a));
        assert!(!scene.set_light(a, light(3.0)));
        assert_eq!(scene.light_count(), 1);
        assert_eq!(scene.lights().next().unwrap().position[0], 2.0);
        assert!(scene.set_light(b, light(4.0)));
    }

    #[test]
    fn test_entities_follow_arena() {
        let mut scene = Scene::new();
        let mesh = scene.add_mesh(MeshRange {
            first_index: 0,
            index_count: 36,
            base_vertex: 0,
        });
        let desc = EntityDesc {
            mesh,
            material: 0,
            flags: 0,
        };
        let root = scene.spawn(Transform::from_translation([1.0, 0.0, 0.0]), None, desc);
        let child = scene.spawn(Transform::IDENTITY, Some(root), desc);
        assert_eq!(scene.entity_count(), 2);

        assert!(scene.despawn(root));
        assert!(!scene.despawn(root));
        let live: Vec<_> = scene.entities().map(|(id, _)| id).collect();
        assert_eq!(live, vec![child]);
        assert_eq!(scene.transforms().parent(child.0), None);
    }
}
