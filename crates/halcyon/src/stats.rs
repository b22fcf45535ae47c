//! # Run Statistics
//!
//! Totals of a two-thread run, folded from per-frame reports on the render
//! thread and per-tick results on the update thread.

use halcyon_render::FrameReport;

/// Accumulated statistics of one [`Engine::run`](crate::Engine::run).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunStats {
    /// Update ticks executed.
    pub ticks: u64,
    /// Ticks whose extraction was published.
    pub published: u64,
    /// Ticks whose extraction failed and was dropped.
    pub dropped: u64,
    /// Render frames executed.
    pub frames: u64,
    /// Frames that rendered a published snapshot.
    pub frames_with_snapshot: u64,
    /// Frames that saw states from different cycles.
    pub inconsistent_frames: u64,
    /// Last extraction cycle that was rendered.
    pub last_rendered_cycle: Option<u64>,
    /// Resource uploads.
    pub uploads: u64,
    /// Uploads skipped by unchanged cycle stamps.
    pub skipped: u64,
    /// Uploads deferred behind in-flight staging.
    pub deferred: u64,
    /// Failed resource updates.
    pub failed: u64,
    /// GPU reallocations.
    pub reallocations: u64,
    /// Sum of frame times.
    pub frame_us_sum: u64,
    /// Fastest frame.
    pub min_frame_us: u64,
    /// Slowest frame.
    pub max_frame_us: u64,
    /// Frames over the configured budget.
    pub frames_over_budget: u64,
}

impl RunStats {
    /// Empty statistics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ticks: 0,
            published: 0,
            dropped: 0,
            frames: 0,
            frames_with_snapshot: 0,
            inconsistent_frames: 0,
            last_rendered_cycle: None,
            uploads: 0,
            skipped: 0,
            deferred: 0,
            failed: 0,
            reallocations: 0,
            frame_us_sum: 0,
            min_frame_us: u64::MAX,
            max_frame_us: 0,
            frames_over_budget: 0,
        }
    }

    /// Folds one render frame in.
    pub fn record_frame(&mut self, report: &FrameReport, budget_us: u32) {
        let frame_us = u64::from(report.frame_time_us);
        self.frames += 1;
        self.frames_with_snapshot += u64::from(report.snapshot_cycle.is_some());
        self.inconsistent_frames += u64::from(!report.consistent);
        if report.snapshot_cycle.is_some() {
            self.last_rendered_cycle = report.snapshot_cycle;
        }
        self.uploads += u64::from(report.uploads);
        self.skipped += u64::from(report.skipped);
        self.deferred += u64::from(report.deferred);
        self.failed += u64::from(report.failed);
        self.reallocations += u64::from(report.reallocations);
        self.frame_us_sum += frame_us;
        self.min_frame_us = self.min_frame_us.min(frame_us);
        self.max_frame_us = self.max_frame_us.max(frame_us);
        if report.frame_time_us > budget_us {
            self.frames_over_budget += 1;
        }
    }

    /// Folds the update thread's counters in.
    pub fn record_updates(&mut self, ticks: u64, published: u64) {
        self.ticks += ticks;
        self.published += published;
        self.dropped += ticks - published;
    }

    /// Average frame time in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_frame_ms(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        (self.frame_us_sum as f64 / self.frames as f64) / 1000.0
    }

    /// Prints a summary table.
    #[allow(clippy::cast_precision_loss)]
    pub fn print_summary(&self) {
        let min_frame_us = if self.frames == 0 { 0 } else { self.min_frame_us };
        println!("┌─ UPDATE ─────────────────────────────────────────────────────────┐");
        println!("│ Ticks:              {}", self.ticks);
        println!("│ Published:          {}", self.published);
        println!("│ Dropped:            {}", self.dropped);
        println!("└──────────────────────────────────────────────────────────────────┘");
        println!();
        println!("┌─ RENDER ─────────────────────────────────────────────────────────┐");
        println!(
            "│ Frames:             {} ({} with snapshot)",
            self.frames, self.frames_with_snapshot
        );
        println!("│ Inconsistent:       {}", self.inconsistent_frames);
        println!("│ Last cycle:         {:?}", self.last_rendered_cycle);
        println!("│ Average Frame:      {:.3} ms", self.avg_frame_ms());
        println!(
            "│ Min / Max Frame:    {:.3} / {:.3} ms",
            min_frame_us as f64 / 1000.0,
            self.max_frame_us as f64 / 1000.0
        );
        println!("│ Over Budget:        {}", self.frames_over_budget);
        println!("└──────────────────────────────────────────────────────────────────┘");
        println!();
        println!("┌─ GPU ────────────────────────────────────────────────────────────┐");
        println!("│ Uploads:            {}", self.uploads);
        println!("│ Skipped:            {}", self.skipped);
        println!("│ Deferred:           {}", self.deferred);
        println!("│ Failed:             {}", self.failed);
        println!("│ Reallocations:      {}", self.reallocations);
        println!("└──────────────────────────────────────────────────────────────────┘");
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}
