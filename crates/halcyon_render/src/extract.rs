//! # Extraction
//!
//! Extractors copy live simulation data into the write slot. The pipeline
//! runs them in registration order inside one extraction frame and then
//! advances the registry, publishing all states at once:
//!
//! ```text
//! begin_extraction()
//!   ├── CameraExtractor
//!   ├── LightExtractor
//!   ├── VoxelGridExtractor
//!   └── EntityExtractor
//! drop(frame) → advance() → world.begin_pass()
//! ```
//!
//! A published cycle closes the world's pass, so a mutation made after
//! `run` always carries a newer stamp than anything already extracted.
//!
//! If any extractor fails the cycle is not published and the pass stays
//! open; the render thread keeps reading the previous snapshot.
//!
//! A slot holds data from N cycles ago, so every extractor rewrites its
//! state completely.

use std::sync::Arc;

use halcyon_core::{
    CoreResult, ExtractionFrame, Mat4, RegistryBuilder, RenderStateRegistry, StateRef,
};
use tracing::{error, trace};

use crate::scene::{EntityDesc, EntityId, Scene};
use crate::state::{
    CameraState, CameraUniform, EntityRecord, EntityState, LightState, MeshBatch, PointLightLayout,
    VoxelGridLayout, VoxelGridRecord, VoxelGridState, NO_PARENT,
};

/// Copies one piece of world data into its render state.
pub trait Extractor<W>: Send {
    /// Name for logs.
    fn name(&self) -> &'static str;

    /// Fills this extractor's states in `frame`.
    ///
    /// # Errors
    ///
    /// Allocation failures while growing record storage.
    fn extract(&mut self, world: &W, frame: &ExtractionFrame<'_>) -> CoreResult<()>;
}

/// World data whose change stamps are grouped into passes.
pub trait PassTracked {
    /// Closes the current pass and opens the next one. Returns the new cycle.
    fn begin_pass(&mut self) -> u64;
}

impl PassTracked for Scene {
    fn begin_pass(&mut self) -> u64 {
        Scene::begin_pass(self)
    }
}

/// Extractors run once per cycle, then one advance.
pub struct ExtractionPipeline<W> {
    registry: Arc<RenderStateRegistry>,
    extractors: Vec<Box<dyn Extractor<W>>>,
}

impl<W> ExtractionPipeline<W> {
    /// Empty pipeline over `registry`.
    #[must_use]
    pub fn new(registry: Arc<RenderStateRegistry>) -> Self {
        Self {
            registry,
            extractors: Vec::new(),
        }
    }

    /// Appends an extractor; it runs after those added before.
    pub fn add(&mut self, extractor: impl Extractor<W> + 'static) -> &mut Self {
        self.extractors.push(Box::new(extractor));
        self
    }

    /// Number of extractors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    /// Whether no extractor was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Registry this pipeline publishes to.
    #[must_use]
    pub fn registry(&self) -> &Arc<RenderStateRegistry> {
        &self.registry
    }
}

impl<W: PassTracked> ExtractionPipeline<W> {
    /// Runs every extractor, publishes the cycle and starts the world's next
    /// pass. Returns the new registry cycle.
    ///
    /// # Errors
    ///
    /// The first extractor failure. Nothing is published in that case.
    ///
    /// # Panics
    ///
    /// Panics if another extraction frame is open on the registry.
    pub fn run(&mut self, world: &mut W) -> CoreResult<u64> {
        {
            let frame = self.registry.begin_extraction();
            for extractor in &mut self.extractors {
                if let Err(e) = extractor.extract(&*world, &frame) {
                    error!(
                        extractor = extractor.name(),
                        cycle = frame.cycle(),
                        error = %e,
                        "extraction failed, cycle not published"
                    );
                    return Err(e);
                }
            }
        }
        let cycle = self.registry.advance();
        let pass = world.begin_pass();
        trace!(cycle, pass, extractors = self.extractors.len(), "extraction published");
        Ok(cycle)
    }
}

/// The four scene states, registered together.
#[derive(Debug, Clone, Copy)]
pub struct SceneStates {
    /// Camera.
    pub camera: StateRef<CameraState>,
    /// Point lights.
    pub lights: StateRef<LightState>,
    /// Voxel grids.
    pub grids: StateRef<VoxelGridState>,
    /// Entities.
    pub entities: StateRef<EntityState>,
}

impl SceneStates {
    /// Registers every scene state on `builder`.
    pub fn register(builder: &mut RegistryBuilder) -> Self {
        Self {
            camera: builder.register(CameraState::default),
            lights: builder.register(LightState::default),
            grids: builder.register(VoxelGridState::default),
            entities: builder.register(EntityState::default),
        }
    }
}

/// Initial record reservations per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionReserve {
    /// Lights.
    pub lights: usize,
    /// Voxel grids.
    pub grids: usize,
    /// Entities.
    pub entities: usize,
}

/// Pipeline extracting a [`Scene`] into `states`.
#[must_use]
pub fn scene_pipeline(
    registry: Arc<RenderStateRegistry>,
    states: &SceneStates,
    reserve: ExtractionReserve,
) -> ExtractionPipeline<Scene> {
    let mut pipeline = ExtractionPipeline::new(registry);
    pipeline
        .add(CameraExtractor { state: states.camera })
        .add(LightExtractor {
            state: states.lights,
            reserve: reserve.lights,
        })
        .add(VoxelGridExtractor {
            state: states.grids,
            reserve: reserve.grids,
        })
        .add(EntityExtractor::new(states.entities, reserve.entities));
    pipeline
}

/// Camera matrices.
#[derive(Debug)]
pub struct CameraExtractor {
    /// Target state.
    pub state: StateRef<CameraState>,
}

impl Extractor<Scene> for CameraExtractor {
    fn name(&self) -> &'static str {
        "camera"
    }

    fn extract(&mut self, world: &Scene, frame: &ExtractionFrame<'_>) -> CoreResult<()> {
        let camera = world.camera();
        let mut state = frame.current_write_state(&self.state);
        state.uniform = CameraUniform {
            view: camera.view(),
            projection: camera.projection(),
            position: [camera.eye[0], camera.eye[1], camera.eye[2], 1.0],
        };
        state.stamps = world.camera_stamps();
        state.extracted_cycle = frame.cycle();
        Ok(())
    }
}

/// Point lights.
#[derive(Debug)]
pub struct LightExtractor {
    /// Target state.
    pub state: StateRef<LightState>,
    /// Records reserved up front.
    pub reserve: usize,
}

impl Extractor<Scene> for LightExtractor {
    fn name(&self) -> &'static str {
        "lights"
    }

    fn extract(&mut self, world: &Scene, frame: &ExtractionFrame<'_>) -> CoreResult<()> {
        let mut state = frame.current_write_state(&self.state);
        let count = world.light_count();
        state.records.enlarge(count.max(self.reserve), false)?;
        state.records.set_record_count(0)?;
        for (i, light) in world.lights().enumerate() {
            state.records.for_index_mut(i, |r| {
                r.set(PointLightLayout::POSITION, light.position);
                r.set(PointLightLayout::RADIUS, light.radius);
                r.set(PointLightLayout::COLOR, light.color);
                r.set(PointLightLayout::INTENSITY, light.intensity);
            })?;
        }
        state.stamps = world.light_stamps();
        state.extracted_cycle = frame.cycle();
        Ok(())
    }
}

/// Voxel grids, with derived fields.
#[derive(Debug)]
pub struct VoxelGridExtractor {
    /// Target state.
    pub state: StateRef<VoxelGridState>,
    /// Records reserved up front.
    pub reserve: usize,
}

impl Extractor<Scene> for VoxelGridExtractor {
    fn name(&self) -> &'static str {
        "voxel-grids"
    }

    fn extract(&mut self, world: &Scene, frame: &ExtractionFrame<'_>) -> CoreResult<()> {
        let mut state = frame.current_write_state(&self.state);
        let count = world.grid_count();
        state.records.enlarge(count.max(self.reserve), false)?;
        state.records.set_record_count(0)?;
        for (i, grid) in world.grids().enumerate() {
            state.records.for_index_mut(i, |r| {
                r.set_dimensions(grid.resolution, grid.scale);
                r.set(VoxelGridLayout::TEXTURE_ID, grid.texture_id);
                r.set(VoxelGridLayout::POSITION, grid.position);
            })?;
        }
        state.stamps = world.grid_stamps();
        state.extracted_cycle = frame.cycle();
        Ok(())
    }
}

/// Entities: world matrices resolved, records sorted by mesh, one batch per
/// mesh.
#[derive(Debug)]
pub struct EntityExtractor {
    /// Target state.
    pub state: StateRef<EntityState>,
    /// Records reserved up front.
    pub reserve: usize,
    order: Vec<(EntityId, EntityDesc)>,
}

impl EntityExtractor {
    /// Extractor writing into `state`.
    #[must_use]
    pub fn new(state: StateRef<EntityState>, reserve: usize) -> Self {
        Self {
            state,
            reserve,
            order: Vec::new(),
        }
    }
}

impl Extractor<Scene> for EntityExtractor {
    fn name(&self) -> &'static str {
        "entities"
    }

    #[allow(clippy::cast_possible_truncation)]
    fn extract(&mut self, world: &Scene, frame: &ExtractionFrame<'_>) -> CoreResult<()> {
        let transforms = world.transforms();
        self.order.clear();
        self.order.extend(world.entities());
        self.order.sort_by_key(|(id, desc)| (desc.mesh, id.0.index()));

        let mut state = frame.current_write_state(&self.state);
        let state = &mut *state;
        state.records.enlarge(self.order.len().max(self.reserve), false)?;
        state.records.set_record_count(0)?;
        state.batches.clear();

        for (i, (id, desc)) in self.order.iter().enumerate() {
            let record = EntityRecord {
                world: transforms.world_matrix(id.0).unwrap_or(Mat4::IDENTITY),
                mesh: desc.mesh.0,
                material: desc.material,
                parent: transforms.parent(id.0).map_or(NO_PARENT, |p| p.index() as u32),
                flags: desc.flags,
            };
            state.records.put_record(i, &record)?;

            // `order` is sorted by mesh, so each batch is contiguous.
            match state.batches.last_mut() {
                Some(batch) if batch.mesh == desc.mesh.0 => batch.instance_count += 1,
                _ => state.batches.push(MeshBatch {
                    mesh: desc.mesh.0,
                    range: world.mesh(desc.mesh).unwrap_or_default(),
                    first_instance: i as u32,
                    instance_count: 1,
                }),
            }
        }
        state.stamps = world.entity_stamps();
        state.extracted_cycle = frame.cycle();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use halcyon_core::{CoreError, Transform};

    use super::*;
    use crate::scene::{MeshId, PointLight, VoxelGrid};
    use crate::state::MeshRange;

    fn setup(slots: usize) -> (Arc<RenderStateRegistry>, SceneStates, ExtractionPipeline<Scene>) {
        let mut builder = RenderStateRegistry::builder(slots);
        let states = SceneStates::register(&mut builder);
        let registry = builder.build();
        let pipeline = scene_pipeline(Arc::clone(&registry), &states, ExtractionReserve::default());
        (registry, states, pipeline)
    }

    fn light(x: f32) -> PointLight {
        PointLight {
            position: [x, 0.0, 0.0],
            radius: 4.0,
            color: [1.0, 0.5, 0.25],
            intensity: 2.0,
        }
    }

    fn entity(mesh: MeshId) -> EntityDesc {
        EntityDesc {
            mesh,
            material: 7,
            flags: 0,
        }
    }

    struct Failing;

    impl Extractor<Scene> for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn extract(&mut self, _world: &Scene, _frame: &ExtractionFrame<'_>) -> CoreResult<()> {
            Err(CoreError::AllocationFailed { requested: usize::MAX })
        }
    }

    #[test]
    fn test_all_states_share_the_published_cycle() {
        let (registry, states, mut pipeline) = setup(3);
        let mut scene = Scene::new();
        scene.add_light(light(1.0));
        scene.add_grid(VoxelGrid {
            resolution: 64,
            scale: 0.5,
            texture_id: 3,
            position: [0.0; 3],
        });

        for expected in 1..=4 {
            assert_eq!(pipeline.run(&mut scene).unwrap(), expected);
        }

        let view = registry.begin_render();
        let snapshot = view.snapshot_cycle().unwrap();
        assert_eq!(snapshot, 3);
        assert_eq!(view.current_read_state(&states.camera).extracted_cycle, snapshot);
        assert_eq!(view.current_read_state(&states.lights).extracted_cycle, snapshot);
        assert_eq!(view.current_read_state(&states.grids).extracted_cycle, snapshot);
        assert_eq!(view.current_read_state(&states.entities).extracted_cycle, snapshot);

        let grids = view.current_read_state(&states.grids);
        assert_eq!(grids.len(), 1);
        assert!((grids.world_extent_half(0).unwrap() - 16.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_failed_extractor_publishes_nothing() {
        let (registry, _states, mut pipeline) = setup(2);
        let mut scene = Scene::new();
        pipeline.run(&mut scene).unwrap();
        pipeline.add(Failing);

        assert!(pipeline.run(&mut scene).is_err());
        assert_eq!(registry.cycle(), 1);
        assert_eq!(scene.cycle(), 1);
        assert!(!registry.is_extracting());
    }

    #[test]
    fn test_mutation_after_run_carries_newer_stamp() {
        let (registry, states, mut pipeline) = setup(2);
        let mut scene = Scene::new();
        scene.add_light(light(1.0));
        pipeline.run(&mut scene).unwrap();
        let first = registry.begin_render().current_read_state(&states.lights).stamps;

        scene.add_light(light(2.0));
        pipeline.run(&mut scene).unwrap();
        let view = registry.begin_render();
        let lights = view.current_read_state(&states.lights);
        assert_eq!(lights.len(), 2);
        assert!(lights.stamps.changed_since(first.cycle));
    }

    #[test]
    fn test_reused_slot_drops_stale_records() {
        let (registry, states, mut pipeline) = setup(2);
        let mut scene = Scene::new();
        let ids: Vec<_> = (0..3u8).map(|i| scene.add_light(light(f32::from(i)))).collect();
        pipeline.run(&mut scene).unwrap();
        pipeline.run(&mut scene).unwrap();

        assert!(scene.remove_light(ids[0]));
        assert!(scene.remove_light(ids[2]));
        pipeline.run(&mut scene).unwrap();

        let view = registry.begin_render();
        let lights = view.current_read_state(&states.lights);
        assert_eq!(lights.len(), 1);
        assert_eq!(lights.position(0).unwrap(), [1.0, 0.0, 0.0]);
        assert_eq!(lights.as_bytes().len(), 32);
    }

    #[test]
    fn test_entities_batched_by_mesh_with_world_matrices() {
        let (registry, states, mut pipeline) = setup(2);
        let mut scene = Scene::new();
        let cube = scene.add_mesh(MeshRange {
            first_index: 0,
            index_count: 36,
            base_vertex: 0,
        });
        let quad = scene.add_mesh(MeshRange {
            first_index: 36,
            index_count: 6,
            base_vertex: 24,
        });
        let root = scene.spawn(Transform::from_translation([1.0, 0.0, 0.0]), None, entity(quad));
        scene.spawn(Transform::from_translation([0.0, 2.0, 0.0]), Some(root), entity(cube));
        scene.spawn(Transform::IDENTITY, None, entity(quad));
        pipeline.run(&mut scene).unwrap();

        let view = registry.begin_render();
        let entities = view.current_read_state(&states.entities);
        assert_eq!(entities.len(), 3);
        assert_eq!(
            entities.batches,
            vec![
                MeshBatch {
                    mesh: cube.0,
                    range: scene.mesh(cube).unwrap(),
                    first_instance: 0,
                    instance_count: 1,
                },
                MeshBatch {
                    mesh: quad.0,
                    range: scene.mesh(quad).unwrap(),
                    first_instance: 1,
                    instance_count: 2,
                },
            ]
        );

        let child = entities.record(0).unwrap();
        assert_eq!(child.world.translation(), [1.0, 2.0, 0.0]);
        assert_eq!(child.parent, root.0.index() as u32);
        assert_eq!(entities.record(1).unwrap().parent, NO_PARENT);
        assert_eq!(entities.record(2).unwrap().material, 7);
    }
}
