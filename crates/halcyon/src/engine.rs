//! # HALCYON Engine
//!
//! Composition root and the two-thread loop:
//!
//! ```text
//! update thread (owns Scene + pipeline)      render thread (owns FrameRenderer)
//! ┌───────────────────────────────────┐      ┌───────────────────────────────────┐
//! │ 1. user update (mutations)        │      │ 1. wait for a publish or the      │
//! │ 2. extract into the write slot    │      │    frame interval                 │
//! │ 3. advance ──────────────────────────────────► 2. begin_render() on the      │
//! │ 4. scene.begin_pass()             │      │    last completed cycle           │
//! │ 5. pace to target_fps             │      │ 3. upload, draw list, poll        │
//! └───────────────────────────────────┘      └───────────────────────────────────┘
//! ```
//!
//! The registry's slot rotation is the only state the two threads share.
//! Publications are signaled through a one-deep channel; the render thread
//! always renders the newest cycle, so a missed signal costs nothing.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{bounded, RecvTimeoutError, TrySendError};
use halcyon_core::RenderStateRegistry;
use halcyon_gpu::GpuExecutor;
use halcyon_render::{
    scene_pipeline, ExtractionPipeline, FrameRenderer, FrameReport, Scene, SceneStates,
};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::stats::RunStats;

/// The assembled engine.
pub struct Engine {
    config: EngineConfig,
    executor: Arc<dyn GpuExecutor>,
    registry: Arc<RenderStateRegistry>,
    states: SceneStates,
    scene: Scene,
    pipeline: ExtractionPipeline<Scene>,
    renderer: FrameRenderer,
}

impl Engine {
    /// Builds the registry, the extraction pipeline and the renderer.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] for an invalid configuration, or a GPU
    /// allocation failure.
    pub fn new(config: EngineConfig, executor: Arc<dyn GpuExecutor>) -> EngineResult<Self> {
        config.validate()?;
        let mut builder = RenderStateRegistry::builder(config.slot_count);
        let states = SceneStates::register(&mut builder);
        let registry = builder.build();
        let pipeline = scene_pipeline(Arc::clone(&registry), &states, config.reserve());
        let renderer = FrameRenderer::new(&executor, states, &config.renderer())?;
        info!(
            executor = executor.name(),
            slots = config.slot_count,
            target_fps = config.target_fps,
            background_upload = config.background_upload,
            "engine created"
        );
        Ok(Self {
            config,
            executor,
            registry,
            states,
            scene: Scene::new(),
            pipeline,
            renderer,
        })
    }

    /// Configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// GPU executor.
    #[must_use]
    pub fn executor(&self) -> &Arc<dyn GpuExecutor> {
        &self.executor
    }

    /// Render state registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<RenderStateRegistry> {
        &self.registry
    }

    /// Registered scene states.
    #[must_use]
    pub const fn states(&self) -> &SceneStates {
        &self.states
    }

    /// Simulation data. Mutate it through [`update`](Self::update).
    #[must_use]
    pub const fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Frame renderer.
    #[must_use]
    pub const fn renderer(&self) -> &FrameRenderer {
        &self.renderer
    }

    /// One update tick on the calling thread: apply `edit`, extract and
    /// publish. Returns the published cycle.
    ///
    /// # Errors
    ///
    /// The extraction failure; the tick is dropped and nothing is published.
    pub fn update(&mut self, edit: impl FnOnce(&mut Scene)) -> EngineResult<u64> {
        edit(&mut self.scene);
        Ok(self.pipeline.run(&mut self.scene)?)
    }

    /// One render frame on the calling thread.
    pub fn render_frame(&mut self) -> FrameReport {
        let report = self.renderer.render_frame(&self.registry);
        if report.frame_time_us > self.config.frame_budget_us {
            warn!(
                frame = report.frame,
                frame_time_us = report.frame_time_us,
                budget_us = self.config.frame_budget_us,
                "frame over budget"
            );
        }
        report
    }

    /// Runs `ticks` update ticks on an update thread while a render thread
    /// renders, then renders the last published cycle once more.
    ///
    /// `update` is called once per tick, before that tick's extraction.
    ///
    /// # Errors
    ///
    /// [`EngineError::ThreadPanicked`] if either thread panicked.
    pub fn run<F>(&mut self, ticks: u64, mut update: F) -> EngineResult<RunStats>
    where
        F: FnMut(&mut Scene, u64) + Send,
    {
        let interval = self.config.frame_interval();
        let budget_us = self.config.frame_budget_us;
        let Self {
            scene,
            pipeline,
            renderer,
            registry,
            ..
        } = self;
        let registry: &RenderStateRegistry = registry;
        let (published_tx, published_rx) = bounded::<u64>(1);
        info!(ticks, slots = registry.slot_count(), "engine run started");

        let (updates, render_stats) = std::thread::scope(|s| {
            let update_thread = s.spawn(move || {
                let mut executed = 0u64;
                let mut published = 0u64;
                for tick in 0..ticks {
                    let start = Instant::now();
                    update(&mut *scene, tick);
                    executed += 1;
                    if let Ok(cycle) = pipeline.run(&mut *scene) {
                        published += 1;
                        if let Err(TrySendError::Disconnected(_)) = published_tx.try_send(cycle) {
                            break;
                        }
                    }
                    if let Some(rest) = interval.and_then(|i| i.checked_sub(start.elapsed())) {
                        std::thread::sleep(rest);
                    }
                }
                (executed, published)
            });

            let render_thread = s.spawn(move || {
                let mut stats = RunStats::new();
                let mut render = |stats: &mut RunStats| {
                    let report = renderer.render_frame(registry);
                    if report.frame_time_us > budget_us {
                        warn!(
                            frame = report.frame,
                            frame_time_us = report.frame_time_us,
                            budget_us,
                            "frame over budget"
                        );
                    }
                    stats.record_frame(&report, budget_us);
                };
                loop {
                    let running = match interval {
                        Some(interval) => !matches!(
                            published_rx.recv_timeout(interval),
                            Err(RecvTimeoutError::Disconnected)
                        ),
                        None => published_rx.recv().is_ok(),
                    };
                    if !running {
                        break;
                    }
                    render(&mut stats);
                }
                render(&mut stats);
                stats
            });

            (update_thread.join(), render_thread.join())
        });

        let (executed, published) = updates.map_err(|_| EngineError::ThreadPanicked("update"))?;
        let mut stats = render_stats.map_err(|_| EngineError::ThreadPanicked("render"))?;
        stats.record_updates(executed, published);
        info!(
            ticks = stats.ticks,
            published = stats.published,
            frames = stats.frames,
            inconsistent = stats.inconsistent_frames,
            "engine run finished"
        );
        Ok(stats)
    }

    /// Stops the renderer and releases every GPU resource.
    ///
    /// # Errors
    ///
    /// The first GPU failure during release.
    pub fn shutdown(self) -> EngineResult<()> {
        let frames = self.renderer.stats().frames;
        self.renderer.shutdown()?;
        info!(frames, "engine shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use halcyon_gpu::HeadlessExecutor;
    use halcyon_render::PointLight;

    use super::*;

    fn engine(config: EngineConfig) -> Engine {
        Engine::new(config, Arc::new(HeadlessExecutor::immediate())).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            slot_count: 5,
            ..EngineConfig::default()
        };
        let result = Engine::new(config, Arc::new(HeadlessExecutor::immediate()));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_update_then_render_on_one_thread() {
        let mut engine = engine(EngineConfig::default());
        let cycle = engine
            .update(|scene| {
                scene.add_light(PointLight {
                    position: [0.0; 3],
                    radius: 1.0,
                    color: [1.0; 3],
                    intensity: 1.0,
                });
            })
            .unwrap();
        assert_eq!(cycle, 1);

        let report = engine.render_frame();
        assert_eq!(report.snapshot_cycle, Some(0));
        assert!(report.consistent);
        assert_eq!(report.uploads, 5);
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_unpaced_run_renders_last_cycle() {
        let mut engine = engine(EngineConfig {
            slot_count: 2,
            target_fps: 0,
            ..EngineConfig::default()
        });
        let stats = engine.run(20, |_, _| {}).unwrap();
        assert_eq!(stats.ticks, 20);
        assert_eq!(stats.published, 20);
        assert_eq!(stats.last_rendered_cycle, Some(19));
        assert_eq!(stats.inconsistent_frames, 0);
    }
}
