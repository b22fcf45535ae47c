//! # Render State Registry
//!
//! Every piece of render state lives in N slots (N = 2 or 3). The update
//! thread extracts into the write slot, one `advance` publishes it, and the
//! render thread reads the slot that was completed last.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌───────────────────────────────────────┐
//!                    │          RenderStateRegistry          │
//!                    │                                       │
//!                    │  camera:  [slot 0] [slot 1] [slot 2]  │
//!                    │  lights:  [slot 0] [slot 1] [slot 2]  │
//!                    │  grids:   [slot 0] [slot 1] [slot 2]  │
//!                    │                                       │
//!                    │  cycle c:  write = c % N              │
//!                    │            read  = (c - 1) % N        │
//!                    └───────────────────────────────────────┘
//!                              │                  │
//!                    ┌─────────┴──────┐  ┌────────┴───────┐
//!                    │ExtractionFrame │  │   RenderView   │
//!                    │ (update thread)│  │ (render thread)│
//!                    └────────────────┘  └────────────────┘
//! ```
//!
//! ## Thread Safety
//!
//! - `ExtractionFrame`: exclusive, one at a time, must be dropped before `advance`
//! - `RenderView`: shared, many allowed, pinned to one completed cycle
//! - `advance`: the single publication point
//!
//! Slot indices never leave this module. Extraction code can only reach the
//! write slot and render code can only reach the read slot.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

/// Smallest supported slot count.
pub const MIN_SLOTS: usize = 2;
/// Largest supported slot count.
pub const MAX_SLOTS: usize = 4;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Typed handle to a registered state.
///
/// Carries no slot index, only the identity of the state.
pub struct StateRef<T> {
    registry: u64,
    index: usize,
    _ty: PhantomData<fn() -> T>,
}

impl<T> StateRef<T> {
    /// Position of the state in registration order.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for StateRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StateRef<T> {}

impl<T> PartialEq for StateRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.registry == other.registry && self.index == other.index
    }
}

impl<T> Eq for StateRef<T> {}

impl<T> fmt::Debug for StateRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateRef")
            .field("registry", &self.registry)
            .field("index", &self.index)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// The N slots of one state.
struct StateSlots<T> {
    slots: Box<[RwLock<T>]>,
}

struct RegisteredState {
    name: &'static str,
    slots: Box<dyn Any + Send + Sync>,
}

/// Startup-time registration. Frozen into a registry by [`build`](Self::build).
pub struct RegistryBuilder {
    id: u64,
    slot_count: usize,
    states: Vec<RegisteredState>,
}

impl RegistryBuilder {
    /// Registers a state, calling `factory` exactly once per slot, now.
    ///
    /// The factory must only allocate the state's own resources.
    pub fn register<T, F>(&mut self, mut factory: F) -> StateRef<T>
    where
        T: Send + Sync + 'static,
        F: FnMut() -> T,
    {
        let slots: Box<[RwLock<T>]> =
            (0..self.slot_count).map(|_| RwLock::new(factory())).collect();
        let index = self.states.len();
        let name = std::any::type_name::<T>();
        self.states.push(RegisteredState {
            name,
            slots: Box::new(StateSlots { slots }),
        });
        debug!(state = name, index, slots = self.slot_count, "render state registered");
        StateRef {
            registry: self.id,
            index,
            _ty: PhantomData,
        }
    }

    /// Number of slots every state gets.
    #[must_use]
    pub const fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Number of states registered so far.
    #[must_use]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Freezes the registry. No state can be added afterwards.
    #[must_use]
    pub fn build(self) -> Arc<RenderStateRegistry> {
        debug!(states = self.states.len(), slots = self.slot_count, "render state registry built");
        Arc::new(RenderStateRegistry {
            id: self.id,
            slot_count: self.slot_count,
            states: self.states,
            leases: Mutex::new(Leases {
                cycle: 0,
                writer: None,
                readers: vec![0; self.slot_count],
            }),
            released: Condvar::new(),
            published: AtomicU64::new(0),
        })
    }
}

/// Who currently holds which slot. Guarded by one short-lived mutex so that
/// computing a slot and claiming it is a single step.
struct Leases {
    /// Completed `advance` calls.
    cycle: u64,
    /// Slot held by the open extraction frame.
    writer: Option<usize>,
    /// Open render views per slot.
    readers: Vec<usize>,
}

/// Fixed set of N-buffered render states.
pub struct RenderStateRegistry {
    id: u64,
    slot_count: usize,
    states: Vec<RegisteredState>,
    leases: Mutex<Leases>,
    released: Condvar,
    /// Mirror of `Leases::cycle` for lock-free queries.
    published: AtomicU64,
}

impl RenderStateRegistry {
    /// Starts registration for a registry with `slot_count` slots per state.
    ///
    /// # Panics
    ///
    /// Panics unless `MIN_SLOTS <= slot_count <= MAX_SLOTS`.
    #[must_use]
    pub fn builder(slot_count: usize) -> RegistryBuilder {
        assert!(
            (MIN_SLOTS..=MAX_SLOTS).contains(&slot_count),
            "slot count must be between {MIN_SLOTS} and {MAX_SLOTS}, got {slot_count}"
        );
        RegistryBuilder {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            slot_count,
            states: Vec::new(),
        }
    }

    /// Number of slots per state.
    #[must_use]
    pub const fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Number of registered states.
    #[must_use]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Type names of the registered states, in registration order.
    pub fn state_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.states.iter().map(|s| s.name)
    }

    /// Number of completed `advance` calls.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    /// Whether an extraction frame is currently open.
    #[must_use]
    pub fn is_extracting(&self) -> bool {
        self.leases.lock().writer.is_some()
    }

    /// Number of open render views.
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.leases.lock().readers.iter().sum()
    }

    /// Opens the extraction frame for the current cycle.
    ///
    /// Waits if a lagging render view still holds the slot that is about to
    /// be overwritten.
    ///
    /// # Panics
    ///
    /// Panics if an extraction frame is already open.
    #[must_use]
    pub fn begin_extraction(&self) -> ExtractionFrame<'_> {
        let mut leases = self.leases.lock();
        assert!(
            leases.writer.is_none(),
            "Double extraction frame! Only one extraction frame allowed at a time."
        );
        let slot = self.write_slot(leases.cycle);
        while leases.readers[slot] > 0 {
            trace!(slot, "extraction waiting for render view to release slot");
            self.released.wait(&mut leases);
        }
        leases.writer = Some(slot);
        ExtractionFrame {
            registry: self,
            slot,
            cycle: leases.cycle,
        }
    }

    /// Opens the extraction frame only if its slot is free right now.
    ///
    /// # Panics
    ///
    /// Panics if an extraction frame is already open.
    #[must_use]
    pub fn try_begin_extraction(&self) -> Option<ExtractionFrame<'_>> {
        let mut leases = self.leases.lock();
        assert!(
            leases.writer.is_none(),
            "Double extraction frame! Only one extraction frame allowed at a time."
        );
        let slot = self.write_slot(leases.cycle);
        if leases.readers[slot] > 0 {
            return None;
        }
        leases.writer = Some(slot);
        Some(ExtractionFrame {
            registry: self,
            slot,
            cycle: leases.cycle,
        })
    }

    /// Publishes the slot written by the last extraction frame.
    ///
    /// After this call the render side reads exactly that slot and the next
    /// extraction frame writes the following one. Returns the new cycle.
    ///
    /// # Panics
    ///
    /// Panics if an extraction frame is still open.
    pub fn advance(&self) -> u64 {
        let mut leases = self.leases.lock();
        assert!(
            leases.writer.is_none(),
            "Cannot advance while an extraction frame is open!"
        );
        leases.cycle += 1;
        self.published.store(leases.cycle, Ordering::Release);
        trace!(cycle = leases.cycle, "render state advanced");
        leases.cycle
    }

    /// Opens a render view on the most recently completed cycle.
    ///
    /// Before the first `advance` the view reads factory-fresh state.
    #[must_use]
    pub fn begin_render(&self) -> RenderView<'_> {
        let mut leases = self.leases.lock();
        let slot = self.read_slot(leases.cycle);
        leases.readers[slot] += 1;
        RenderView {
            registry: self,
            slot,
            cycle: leases.cycle,
        }
    }

    fn write_slot(&self, cycle: u64) -> usize {
        slot_of(cycle, self.slot_count)
    }

    fn read_slot(&self, cycle: u64) -> usize {
        slot_of(cycle + self.slot_count as u64 - 1, self.slot_count)
    }

    fn slots<T: 'static>(&self, state: &StateRef<T>) -> &[RwLock<T>] {
        assert_eq!(
            state.registry, self.id,
            "StateRef belongs to a different registry"
        );
        let registered = &self.states[state.index];
        match registered.slots.downcast_ref::<StateSlots<T>>() {
            Some(slots) => &slots.slots,
            None => panic!(
                "StateRef type {} does not match registered state {}",
                std::any::type_name::<T>(),
                registered.name
            ),
        }
    }

    fn release_writer(&self) {
        self.leases.lock().writer = None;
    }

    fn release_reader(&self, slot: usize) {
        let mut leases = self.leases.lock();
        leases.readers[slot] -= 1;
        if leases.readers[slot] == 0 {
            self.released.notify_all();
        }
    }
}

impl fmt::Debug for RenderStateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderStateRegistry")
            .field("slot_count", &self.slot_count)
            .field("states", &self.states.iter().map(|s| s.name).collect::<Vec<_>>())
            .field("cycle", &self.cycle())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn slot_of(cycle: u64, slot_count: usize) -> usize {
    (cycle % slot_count as u64) as usize
}

/// Exclusive write access to the current write slot of every state.
///
/// ## Usage
///
/// ```rust
/// # use halcyon_core::RenderStateRegistry;
/// # let mut builder = RenderStateRegistry::builder(2);
/// # let camera = builder.register(|| [0.0f32; 3]);
/// # let registry = builder.build();
/// {
///     let frame = registry.begin_extraction();
///     *frame.current_write_state(&camera) = [1.0, 2.0, 3.0];
/// } // dropped before advance
/// registry.advance();
/// ```
pub struct ExtractionFrame<'a> {
    registry: &'a RenderStateRegistry,
    slot: usize,
    cycle: u64,
}

impl ExtractionFrame<'_> {
    /// Write access to `state` in this frame's slot.
    ///
    /// The slot holds data from N cycles ago: overwrite every field that
    /// matters. Requesting the same state twice at once deadlocks.
    ///
    /// # Panics
    ///
    /// Panics if `state` comes from another registry.
    #[must_use]
    pub fn current_write_state<T: 'static>(&self, state: &StateRef<T>) -> RwLockWriteGuard<'_, T> {
        self.registry.slots(state)[self.slot].write()
    }

    /// The cycle being extracted (completed advances so far).
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Slot index being written (for debugging).
    #[must_use]
    pub const fn slot_index(&self) -> usize {
        self.slot
    }
}

impl Drop for ExtractionFrame<'_> {
    fn drop(&mut self) {
        self.registry.release_writer();
    }
}

/// Shared read access to the last completed slot of every state.
///
/// The slot is fixed when the view opens, so every state read through one
/// view comes from the same extraction cycle.
pub struct RenderView<'a> {
    registry: &'a RenderStateRegistry,
    slot: usize,
    cycle: u64,
}

impl RenderView<'_> {
    /// Read access to `state` in this view's slot.
    ///
    /// # Panics
    ///
    /// Panics if `state` comes from another registry.
    #[must_use]
    pub fn current_read_state<T: 'static>(&self, state: &StateRef<T>) -> RwLockReadGuard<'_, T> {
        self.registry.slots(state)[self.slot].read()
    }

    /// Extraction cycle whose output this view shows, `None` before the
    /// first advance.
    #[must_use]
    pub fn snapshot_cycle(&self) -> Option<u64> {
        self.cycle.checked_sub(1)
    }

    /// Whether anything has been published yet.
    #[must_use]
    pub const fn has_snapshot(&self) -> bool {
        self.cycle > 0
    }

    /// Slot index being read (for debugging).
    #[must_use]
    pub const fn slot_index(&self) -> usize {
        self.slot
    }
}

impl Drop for RenderView<'_> {
    fn drop(&mut self) {
        self.registry.release_reader(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_factory_runs_once_per_slot() {
        for slots in [2, 3] {
            let calls = AtomicUsize::new(0);
            let mut builder = RenderStateRegistry::builder(slots);
            let _state = builder.register(|| {
                calls.fetch_add(1, Ordering::Relaxed);
                Vec::<u8>::new()
            });
            assert_eq!(calls.load(Ordering::Relaxed), slots);
            let registry = builder.build();
            for _ in 0..10 {
                drop(registry.begin_extraction());
                registry.advance();
                drop(registry.begin_render());
            }
            assert_eq!(calls.load(Ordering::Relaxed), slots);
        }
    }

    #[test]
    fn test_double_buffer_round_trip() {
        let mut builder = RenderStateRegistry::builder(2);
        let counter = builder.register(|| 0i32);
        let registry = builder.build();

        {
            let frame = registry.begin_extraction();
            *frame.current_write_state(&counter) = 42;
        }
        registry.advance();
        {
            let view = registry.begin_render();
            assert_eq!(*view.current_read_state(&counter), 42);
        }

        let frame = registry.begin_extraction();
        {
            let mut write = frame.current_write_state(&counter);
            assert_eq!(*write, 0);
            *write = 7;
        }
        {
            let view = registry.begin_render();
            assert_eq!(*view.current_read_state(&counter), 42);
        }
        drop(frame);
        registry.advance();
        let view = registry.begin_render();
        assert_eq!(*view.current_read_state(&counter), 7);
    }

    #[test]
    fn test_read_lags_write_by_one() {
        for slots in [2, 3, 4] {
            let mut builder = RenderStateRegistry::builder(slots);
            let state = builder.register(|| u64::MAX);
            let registry = builder.build();

            for k in 1..=12u64 {
                {
                    let frame = registry.begin_extraction();
                    assert_eq!(frame.cycle(), k - 1);
                    *frame.current_write_state(&state) = frame.cycle();
                }
                registry.advance();
                let view = registry.begin_render();
                assert_eq!(view.snapshot_cycle(), Some(k - 1));
                assert_eq!(*view.current_read_state(&state), k - 1);
            }
        }
    }

    #[test]
    fn test_render_before_first_advance_sees_factory_state() {
        let mut builder = RenderStateRegistry::builder(3);
        let state = builder.register(|| String::from("fresh"));
        let registry = builder.build();
        let view = registry.begin_render();
        assert!(!view.has_snapshot());
        assert_eq!(view.snapshot_cycle(), None);
        assert_eq!(view.current_read_state(&state).as_str(), "fresh");
    }

    #[test]
    fn test_view_is_pinned_across_advance() {
        let mut builder = RenderStateRegistry::builder(3);
        let a = builder.register(|| 0u32);
        let b = builder.register(|| 0u32);
        let registry = builder.build();

        let extract = |value: u32| {
            let frame = registry.begin_extraction();
            *frame.current_write_state(&a) = value;
            *frame.current_write_state(&b) = value;
        };

        extract(1);
        registry.advance();
        let view = registry.begin_render();
        assert_eq!(*view.current_read_state(&a), 1);

        extract(2);
        registry.advance();

        // Same view, still cycle 0's slot for both states.
        assert_eq!(*view.current_read_state(&b), 1);
        drop(view);

        let view = registry.begin_render();
        assert_eq!(*view.current_read_state(&a), 2);
        assert_eq!(*view.current_read_state(&b), 2);
    }

    #[test]
    fn test_try_begin_extraction_respects_reader() {
        let mut builder = RenderStateRegistry::builder(2);
        let _state = builder.register(|| 0u8);
        let registry = builder.build();

        drop(registry.begin_extraction());
        registry.advance();
        let view = registry.begin_render(); // slot 0
        drop(registry.begin_extraction()); // slot 1 is free
        registry.advance();

        // Next write slot is 0, still held by `view`.
        assert!(registry.try_begin_extraction().is_none());
        drop(view);
        assert!(registry.try_begin_extraction().is_some());
    }

    #[test]
    fn test_reader_counting() {
        let mut builder = RenderStateRegistry::builder(2);
        let _state = builder.register(|| 0u8);
        let registry = builder.build();

        let r1 = registry.begin_render();
        let r2 = registry.begin_render();
        assert_eq!(registry.reader_count(), 2);
        drop(r1);
        assert_eq!(registry.reader_count(), 1);
        drop(r2);
        assert_eq!(registry.reader_count(), 0);
    }

    #[test]
    #[should_panic(expected = "Double extraction frame")]
    fn test_double_extraction_panics() {
        let mut builder = RenderStateRegistry::builder(2);
        let _state = builder.register(|| 0u8);
        let registry = builder.build();
        let _first = registry.begin_extraction();
        let _second = registry.begin_extraction();
    }

    #[test]
    #[should_panic(expected = "Cannot advance while an extraction frame is open")]
    fn test_advance_during_extraction_panics() {
        let mut builder = RenderStateRegistry::builder(2);
        let _state = builder.register(|| 0u8);
        let registry = builder.build();
        let _frame = registry.begin_extraction();
        registry.advance();
    }

    #[test]
    #[should_panic(expected = "different registry")]
    fn test_foreign_state_ref_panics() {
        let mut first = RenderStateRegistry::builder(2);
        let foreign = first.register(|| 0u8);
        let mut second = RenderStateRegistry::builder(2);
        let _own = second.register(|| 0u8);
        let registry = second.build();
        let view = registry.begin_render();
        let _ = view.current_read_state(&foreign);
    }

    #[test]
    #[should_panic(expected = "slot count")]
    fn test_single_slot_rejected() {
        let _ = RenderStateRegistry::builder(1);
    }

    #[test]
    fn test_threads_never_see_torn_snapshot() {
        let mut builder = RenderStateRegistry::builder(2);
        let left = builder.register(|| 0u64);
        let right = builder.register(|| 0u64);
        let registry = builder.build();

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for cycle in 1..=2_000u64 {
                    {
                        let frame = registry.begin_extraction();
                        *frame.current_write_state(&left) = cycle;
                        *frame.current_write_state(&right) = cycle;
                    }
                    registry.advance();
                }
            })
        };

        let mut last = 0;
        while last < 2_000 {
            let view = registry.begin_render();
            let l = *view.current_read_state(&left);
            let r = *view.current_read_state(&right);
            assert_eq!(l, r, "torn snapshot");
            assert!(l >= last, "snapshot went backwards");
            last = l;
        }
        writer.join().unwrap();
    }
}
