//! # Frame Renderer
//!
//! Render-thread side of the pipeline. Each frame opens a view on the last
//! published cycle and brings the GPU up to date with it:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      render_frame()                        │
//! ├────────────────────────────────────────────────────────────┤
//! │  begin_render()          pin the read slot                 │
//! │  ├── camera   ─┐                                           │
//! │  ├── lights    │ gate → ensure capacity → write → publish  │
//! │  ├── grids     │                                           │
//! │  ├── entities ─┘ (or background uploader)                  │
//! │  └── draws       one indexed indirect command per batch    │
//! │  poll()                  fences, retired storage           │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lights and voxel grids are prefixed with a [`CollectionHeader`] carrying
//! their count. When a resource shrinks, the bytes past its new end that
//! the previous upload wrote are zeroed in the same upload.
//!
//! A resource whose cycle stamps did not change since its last upload is
//! skipped. A staged resource whose previous upload is still in flight is
//! deferred to the next frame. A resource that fails to grow is logged and
//! skipped; the frame goes on with the rest.

use std::sync::Arc;
use std::time::Instant;

use halcyon_core::{CycleStamps, Layout, RenderStateRegistry, UploadGate};
use halcyon_gpu::{
    BackgroundUploader, BufferKind, BufferPoll, DrawCommand, GpuBuffer, GpuBufferDesc, GpuExecutor,
    GpuResult, IndirectDrawBuffer, StorageMode, UploadState, UploadTicket,
};
use tracing::{debug, error, trace, warn};

use crate::extract::SceneStates;
use crate::state::{
    CameraUniform, CollectionHeader, EntityLayout, MeshBatch, PointLightLayout, VoxelGridLayout,
};

/// Jobs the background uploader may queue before `submit` blocks.
const UPLOAD_QUEUE_DEPTH: usize = 4;

/// Initial GPU sizing and upload policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererConfig {
    /// Point lights the light buffer holds before growing.
    pub initial_lights: usize,
    /// Entities the instance buffer holds before growing.
    pub initial_entities: usize,
    /// Voxel grids the grid buffer holds before growing.
    pub initial_voxel_grids: usize,
    /// Draw commands the indirect buffer holds before growing.
    pub initial_draw_commands: usize,
    /// Map the entity buffer persistently instead of staging it.
    pub persistent_entities: bool,
    /// Upload entities from the background upload context.
    pub background_upload: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            initial_lights: 64,
            initial_entities: 1024,
            initial_voxel_grids: 8,
            initial_draw_commands: 64,
            persistent_entities: false,
            background_upload: false,
        }
    }
}

/// What one call to [`FrameRenderer::render_frame`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Frame number, starting at 1.
    pub frame: u64,
    /// Extraction cycle that was rendered, `None` before the first publish.
    pub snapshot_cycle: Option<u64>,
    /// Whether every state came from `snapshot_cycle`.
    pub consistent: bool,
    /// Resources uploaded.
    pub uploads: u32,
    /// Resources whose stamps had not changed.
    pub skipped: u32,
    /// Resources whose staging region was still in flight.
    pub deferred: u32,
    /// Resources that failed this frame.
    pub failed: u32,
    /// Indirect draw commands in the draw buffer.
    pub draw_commands: u32,
    /// GPU allocations replaced this frame.
    pub reallocations: u32,
    /// Retired allocations released this frame.
    pub retired_released: u32,
    /// Wall time of the frame in microseconds.
    pub frame_time_us: u32,
}

/// Totals across all frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    /// Frames rendered.
    pub frames: u64,
    /// Frames that saw states from different cycles.
    pub inconsistent_frames: u64,
    /// Uploads performed.
    pub uploads: u64,
    /// Uploads skipped by the cycle gates.
    pub skipped: u64,
    /// Uploads pushed to a later frame.
    pub deferred: u64,
    /// Failed resource updates.
    pub failed: u64,
    /// GPU reallocations.
    pub reallocations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Uploaded,
    Skipped,
    Deferred,
}

/// One GPU buffer fed from one render state.
#[derive(Debug)]
struct GpuResource {
    name: &'static str,
    buffer: GpuBuffer,
    gate: UploadGate,
    /// Bytes the last upload wrote.
    published: usize,
}

impl GpuResource {
    fn new(
        executor: &Arc<dyn GpuExecutor>,
        name: &'static str,
        kind: BufferKind,
        mode: StorageMode,
        capacity: usize,
    ) -> GpuResult<Self> {
        let buffer = GpuBuffer::new(
            executor,
            &GpuBufferDesc {
                label: name,
                kind,
                mode,
                capacity,
            },
        )?;
        Ok(Self {
            name,
            buffer,
            gate: UploadGate::new(),
            published: 0,
        })
    }

    /// Copies `parts` back to back into the buffer and publishes them,
    /// unless the gate or an in-flight staged upload says otherwise.
    fn upload(&mut self, stamps: &CycleStamps, parts: &[&[u8]]) -> GpuResult<Outcome> {
        if !self.gate.needs_upload(stamps) {
            return Ok(Outcome::Skipped);
        }
        if !staging_ready(&mut self.buffer)? {
            return Ok(Outcome::Deferred);
        }
        let len = self.stage(parts)?;
        self.buffer.publish()?;
        self.commit(stamps, len);
        Ok(Outcome::Uploaded)
    }

    /// Writes `parts` into the mirror followed by zeros up to the end of the
    /// previous upload. Returns the length of `parts`.
    fn stage(&mut self, parts: &[&[u8]]) -> GpuResult<usize> {
        let len: usize = parts.iter().map(|part| part.len()).sum();
        let end = len.max(self.published);
        self.buffer.ensure_capacity_in_bytes(end)?;
        let raw = self.buffer.raw_mut()?;
        raw.clear();
        for part in parts {
            raw.write_bytes(part)?;
        }
        raw.set_size(end)?;
        raw.as_bytes_mut()[len..end].fill(0);
        Ok(len)
    }

    fn commit(&mut self, stamps: &CycleStamps, len: usize) {
        if len < self.published {
            trace!(resource = self.name, from = self.published, to = len, "stale tail zeroed");
        }
        self.published = len;
        self.gate.mark_uploaded(stamps);
        trace!(resource = self.name, bytes = len, cycle = stamps.cycle, "uploaded");
    }

    fn buffer_mut_named(&mut self) -> (&'static str, &mut GpuBuffer) {
        (self.name, &mut self.buffer)
    }
}

fn staging_ready(buffer: &mut GpuBuffer) -> GpuResult<bool> {
    match buffer.as_staged_mut() {
        Some(staged) => staged.staging_available(),
        None => Ok(true),
    }
}

/// Per-frame tallies, folded into the report at the end.
#[derive(Debug, Default)]
struct Tally {
    uploads: u32,
    skipped: u32,
    deferred: u32,
    failed: u32,
}

impl Tally {
    fn record(&mut self, name: &'static str, outcome: GpuResult<Outcome>) {
        match outcome {
            Ok(Outcome::Uploaded) => self.uploads += 1,
            Ok(Outcome::Skipped) => self.skipped += 1,
            Ok(Outcome::Deferred) => {
                trace!(resource = name, "upload deferred, staging in flight");
                self.deferred += 1;
            }
            Err(e) => {
                error!(resource = name, error = %e, "resource skipped this frame");
                self.failed += 1;
            }
        }
    }
}

/// Entity uploads running on the background context.
#[derive(Debug)]
struct BackgroundEntities {
    uploader: BackgroundUploader,
    in_flight: Option<UploadTicket>,
}

/// Uploads read slots to GPU buffers and builds the indirect draw list.
///
/// Lives on the render thread; it is the only owner of its buffers.
#[derive(Debug)]
pub struct FrameRenderer {
    states: SceneStates,
    camera: GpuResource,
    lights: GpuResource,
    grids: GpuResource,
    entities: GpuResource,
    draws: IndirectDrawBuffer,
    draw_gate: UploadGate,
    background: Option<BackgroundEntities>,
    frame: u64,
    stats: RendererStats,
}

impl FrameRenderer {
    /// Allocates every GPU buffer at its configured size.
    ///
    /// # Errors
    ///
    /// Allocation failure, or a failure to start the background uploader.
    pub fn new(
        executor: &Arc<dyn GpuExecutor>,
        states: SceneStates,
        config: &RendererConfig,
    ) -> GpuResult<Self> {
        let entity_mode = if config.persistent_entities && !config.background_upload {
            StorageMode::Persistent
        } else {
            StorageMode::Staged
        };
        let background = if config.background_upload {
            Some(BackgroundEntities {
                uploader: BackgroundUploader::spawn(Arc::clone(executor), UPLOAD_QUEUE_DEPTH)?,
                in_flight: None,
            })
        } else {
            None
        };

        let renderer = Self {
            states,
            camera: GpuResource::new(
                executor,
                "camera",
                BufferKind::Uniform,
                StorageMode::Staged,
                std::mem::size_of::<CameraUniform>(),
            )?,
            lights: GpuResource::new(
                executor,
                "point-lights",
                BufferKind::Storage,
                StorageMode::Staged,
                CollectionHeader::SIZE + config.initial_lights * PointLightLayout::RECORD_SIZE,
            )?,
            grids: GpuResource::new(
                executor,
                "voxel-grids",
                BufferKind::Storage,
                StorageMode::Staged,
                CollectionHeader::SIZE + config.initial_voxel_grids * VoxelGridLayout::RECORD_SIZE,
            )?,
            entities: GpuResource::new(
                executor,
                "entities",
                BufferKind::Vertex,
                entity_mode,
                config.initial_entities * EntityLayout::RECORD_SIZE,
            )?,
            draws: IndirectDrawBuffer::new(
                executor,
                config.initial_draw_commands,
                StorageMode::Staged,
            )?,
            draw_gate: UploadGate::new(),
            background,
            frame: 0,
            stats: RendererStats::default(),
        };
        debug!(
            executor = executor.name(),
            entity_mode = ?entity_mode,
            background_upload = config.background_upload,
            "frame renderer created"
        );
        Ok(renderer)
    }

    /// Renders the last published cycle of `registry`.
    ///
    /// Failures of individual resources are logged and counted in the
    /// report; they never abort the frame.
    ///
    /// # Panics
    ///
    /// Panics if `registry` is not the one the states were registered on.
    pub fn render_frame(&mut self, registry: &RenderStateRegistry) -> FrameReport {
        let start = Instant::now();
        self.frame += 1;
        let generations = self.generations();
        let mut tally = Tally::default();
        let mut report = FrameReport {
            frame: self.frame,
            ..FrameReport::default()
        };

        {
            let view = registry.begin_render();
            report.snapshot_cycle = view.snapshot_cycle();
            if let Some(snapshot) = report.snapshot_cycle {
                let camera = view.current_read_state(&self.states.camera);
                let lights = view.current_read_state(&self.states.lights);
                let grids = view.current_read_state(&self.states.grids);
                let entities = view.current_read_state(&self.states.entities);

                report.consistent = [
                    camera.extracted_cycle,
                    lights.extracted_cycle,
                    grids.extracted_cycle,
                    entities.extracted_cycle,
                ]
                .iter()
                .all(|&cycle| cycle == snapshot);
                if !report.consistent {
                    warn!(snapshot, frame = self.frame, "render states from different cycles");
                }

                let outcome = self
                    .camera
                    .upload(&camera.stamps, &[bytemuck::bytes_of(&camera.uniform)]);
                tally.record("camera", outcome);
                let header = CollectionHeader::new(lights.len());
                let outcome = self
                    .lights
                    .upload(&lights.stamps, &[bytemuck::bytes_of(&header), lights.as_bytes()]);
                tally.record("point-lights", outcome);
                let header = CollectionHeader::new(grids.len());
                let outcome = self
                    .grids
                    .upload(&grids.stamps, &[bytemuck::bytes_of(&header), grids.as_bytes()]);
                tally.record("voxel-grids", outcome);
                let outcome = self.upload_entities(&entities.stamps, entities.as_bytes());
                tally.record("entities", outcome);
                let outcome = self.write_draws(&entities.stamps, &entities.batches);
                tally.record("indirect-draws", outcome);
            } else {
                report.consistent = true;
            }
        }

        let polled = self.poll();
        report.uploads = tally.uploads;
        report.skipped = tally.skipped;
        report.deferred = tally.deferred;
        report.failed = tally.failed;
        report.draw_commands = u32::try_from(self.draws.len()).unwrap_or(u32::MAX);
        report.reallocations = self
            .generations()
            .iter()
            .zip(generations.iter())
            .map(|(after, before)| u32::try_from(after - before).unwrap_or(u32::MAX))
            .sum();
        report.retired_released = u32::try_from(polled.released).unwrap_or(u32::MAX);
        report.frame_time_us = u32::try_from(start.elapsed().as_micros()).unwrap_or(u32::MAX);

        self.accumulate(&report);
        trace!(
            frame = report.frame,
            snapshot = ?report.snapshot_cycle,
            uploads = report.uploads,
            skipped = report.skipped,
            deferred = report.deferred,
            "frame rendered"
        );
        report
    }

    fn upload_entities(&mut self, stamps: &CycleStamps, bytes: &[u8]) -> GpuResult<Outcome> {
        let Some(background) = self.background.as_mut() else {
            return self.entities.upload(stamps, &[bytes]);
        };
        let resource = &mut self.entities;

        if let Some(ticket) = &background.in_flight {
            match ticket.state() {
                UploadState::Queued | UploadState::Submitted => return Ok(Outcome::Deferred),
                UploadState::Failed => {
                    warn!(bytes = ticket.bytes(), "background entity upload failed, retrying");
                    resource.gate.invalidate();
                }
                UploadState::Complete => {}
            }
            background.in_flight = None;
        }
        if !resource.gate.needs_upload(stamps) {
            return Ok(Outcome::Skipped);
        }

        // No ticket is in flight, so the target may be reallocated.
        let len = resource.stage(&[bytes])?;
        let staged = resource.buffer.raw()?.logical_bytes().to_vec();
        let ticket = background.uploader.submit(resource.buffer.handle()?, 0, staged)?;
        background.in_flight = Some(ticket);
        resource.commit(stamps, len);
        Ok(Outcome::Uploaded)
    }

    fn write_draws(&mut self, stamps: &CycleStamps, batches: &[MeshBatch]) -> GpuResult<Outcome> {
        if !self.draw_gate.needs_upload(stamps) {
            return Ok(Outcome::Skipped);
        }
        if !staging_ready(self.draws.buffer_mut())? {
            return Ok(Outcome::Deferred);
        }
        self.draws.clear()?;
        if batches.len() > self.draws.capacity() {
            self.draws.enlarge(batches.len())?;
        }
        for (i, batch) in batches.iter().enumerate() {
            self.draws.set(
                i,
                DrawCommand {
                    count: batch.range.index_count,
                    instance_count: batch.instance_count,
                    first_index: batch.range.first_index,
                    base_vertex: batch.range.base_vertex,
                    base_instance: batch.first_instance,
                },
            )?;
        }
        self.draws.publish()?;
        self.draw_gate.mark_uploaded(stamps);
        Ok(Outcome::Uploaded)
    }

    fn poll(&mut self) -> BufferPoll {
        let mut total = BufferPoll::default();
        let buffers = [
            self.camera.buffer_mut_named(),
            self.lights.buffer_mut_named(),
            self.grids.buffer_mut_named(),
            self.entities.buffer_mut_named(),
            ("indirect-draws", self.draws.buffer_mut()),
        ];
        for (name, buffer) in buffers {
            match buffer.poll() {
                Ok(polled) => {
                    total.released += polled.released;
                    total.uploads_completed += polled.uploads_completed;
                }
                Err(e) => error!(resource = name, error = %e, "buffer poll failed"),
            }
        }
        total
    }

    fn generations(&self) -> [u64; 5] {
        [
            self.camera.buffer.generation(),
            self.lights.buffer.generation(),
            self.grids.buffer.generation(),
            self.entities.buffer.generation(),
            self.draws.buffer().generation(),
        ]
    }

    fn accumulate(&mut self, report: &FrameReport) {
        let stats = &mut self.stats;
        stats.frames += 1;
        stats.inconsistent_frames += u64::from(!report.consistent);
        stats.uploads += u64::from(report.uploads);
        stats.skipped += u64::from(report.skipped);
        stats.deferred += u64::from(report.deferred);
        stats.failed += u64::from(report.failed);
        stats.reallocations += u64::from(report.reallocations);
    }

    /// Totals so far.
    #[must_use]
    pub const fn stats(&self) -> RendererStats {
        self.stats
    }

    /// States this renderer reads.
    #[must_use]
    pub const fn states(&self) -> &SceneStates {
        &self.states
    }

    /// Camera uniform buffer.
    #[must_use]
    pub fn camera_buffer(&self) -> &GpuBuffer {
        &self.camera.buffer
    }

    /// Point-light storage buffer.
    #[must_use]
    pub fn light_buffer(&self) -> &GpuBuffer {
        &self.lights.buffer
    }

    /// Voxel-grid storage buffer.
    #[must_use]
    pub fn grid_buffer(&self) -> &GpuBuffer {
        &self.grids.buffer
    }

    /// Per-instance entity buffer.
    #[must_use]
    pub fn entity_buffer(&self) -> &GpuBuffer {
        &self.entities.buffer
    }

    /// Indirect draw commands.
    #[must_use]
    pub const fn draws(&self) -> &IndirectDrawBuffer {
        &self.draws
    }

    /// Blocks until all uploads are on the GPU.
    ///
    /// # Errors
    ///
    /// Executor failure.
    pub fn flush(&mut self) -> GpuResult<()> {
        for buffer in [
            &mut self.camera.buffer,
            &mut self.lights.buffer,
            &mut self.grids.buffer,
            &mut self.entities.buffer,
            self.draws.buffer_mut(),
        ] {
            if let Some(staged) = buffer.as_staged_mut() {
                staged.wait_staging()?;
            }
        }
        Ok(())
    }

    /// Stops the background uploader and releases every GPU buffer.
    ///
    /// # Errors
    ///
    /// The first failure; the remaining buffers are still released.
    pub fn shutdown(mut self) -> GpuResult<()> {
        let mut result = Ok(());
        if let Some(background) = self.background.take() {
            result = background.uploader.shutdown();
        }
        for buffer in [
            &mut self.camera.buffer,
            &mut self.lights.buffer,
            &mut self.grids.buffer,
            &mut self.entities.buffer,
            self.draws.buffer_mut(),
        ] {
            let deleted = buffer.delete();
            if result.is_ok() {
                result = deleted;
            }
        }
        debug!(frames = self.stats.frames, "frame renderer released");
        result
    }
}
