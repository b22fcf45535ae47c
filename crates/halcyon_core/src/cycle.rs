//! # Cycle Counters
//!
//! Coarse-grained dirty tracking. Every processing pass of a system bumps
//! its counter by exactly one, whether or not anything changed. Items carry
//! the cycle in which they were added or moved, extraction copies those
//! stamps into render state, and the render side compares them against the
//! cycle it last uploaded.
//!
//! False positives (an upload that was not needed) are acceptable. False
//! negatives (a skipped upload of changed data) are not.

/// Monotonically increasing pass counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CycleCounter {
    value: u64,
}

impl CycleCounter {
    /// Counter at cycle zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    /// Current cycle.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.value
    }

    /// Moves to the next cycle and returns it. Saturates instead of wrapping.
    #[inline]
    pub fn advance(&mut self) -> u64 {
        self.value = self.value.saturating_add(1);
        self.value
    }
}

/// Change stamps of a tracked collection, as copied into render state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CycleStamps {
    /// Cycle of the pass that produced these stamps.
    pub cycle: u64,
    /// Last cycle an item was added.
    pub added_in_cycle: u64,
    /// Last cycle an item moved or changed.
    pub moved_in_cycle: u64,
    /// Last cycle an item was removed.
    pub removed_in_cycle: u64,
}

impl CycleStamps {
    /// Latest cycle with any change.
    #[must_use]
    pub fn last_change(&self) -> u64 {
        self.added_in_cycle
            .max(self.moved_in_cycle)
            .max(self.removed_in_cycle)
    }

    /// Whether anything changed after `cycle`.
    #[must_use]
    pub fn changed_since(&self, cycle: u64) -> bool {
        self.last_change() > cycle
    }

    /// Whether the collection changed its membership after `cycle`.
    #[must_use]
    pub fn structure_changed_since(&self, cycle: u64) -> bool {
        self.added_in_cycle.max(self.removed_in_cycle) > cycle
    }
}

/// Counter plus change stamps for one mutable collection.
#[derive(Debug, Clone, Default)]
pub struct CycleTracker {
    counter: CycleCounter,
    stamps: CycleStamps,
}

impl CycleTracker {
    /// Tracker at cycle zero with no recorded changes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a processing pass. Call exactly once per pass.
    pub fn begin_pass(&mut self) -> u64 {
        let cycle = self.counter.advance();
        self.stamps.cycle = cycle;
        cycle
    }

    /// Current cycle.
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.counter.value()
    }

    /// Records an insertion; returns the stamp to store on the item.
    pub fn record_added(&mut self) -> u64 {
        self.stamps.added_in_cycle = self.cycle();
        self.cycle()
    }

    /// Records a move or change; returns the stamp to store on the item.
    pub fn record_moved(&mut self) -> u64 {
        self.stamps.moved_in_cycle = self.cycle();
        self.cycle()
    }

    /// Records a removal.
    pub fn record_removed(&mut self) {
        self.stamps.removed_in_cycle = self.cycle();
    }

    /// Snapshot of the stamps for extraction.
    #[must_use]
    pub const fn stamps(&self) -> CycleStamps {
        self.stamps
    }
}

/// Render-side memory of what was last uploaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadGate {
    last_uploaded: Option<u64>,
}

impl UploadGate {
    /// Gate that has never uploaded.
    #[must_use]
    pub const fn new() -> Self {
        Self { last_uploaded: None }
    }

    /// Whether data carrying `stamps` has to be uploaded.
    #[must_use]
    pub fn needs_upload(&self, stamps: &CycleStamps) -> bool {
        match self.last_uploaded {
            None => true,
            Some(cycle) => stamps.changed_since(cycle),
        }
    }

    /// Remembers that data carrying `stamps` is now on the GPU.
    pub fn mark_uploaded(&mut self, stamps: &CycleStamps) {
        self.last_uploaded = Some(stamps.cycle);
    }

    /// Forgets the last upload, e.g. after the GPU storage was replaced.
    pub fn invalidate(&mut self) {
        self.last_uploaded = None;
    }

    /// Cycle of the last upload.
    #[must_use]
    pub const fn last_uploaded(&self) -> Option<u64> {
        self.last_uploaded
    }
}
