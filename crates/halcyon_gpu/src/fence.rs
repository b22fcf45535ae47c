//! # Command Fences
//!
//! A fence guards the GPU commands submitted before it. It is created right
//! after the submission it should guard and polled once per frame:
//!
//! ```text
//! submit ──► Fence::insert ──► update() ... update() ──► Signaled
//!                              Pending      Pending      └─ callback, once
//! ```
//!
//! Only the thread that owns a [`Fence`] polls it. Other threads get a
//! [`FenceProbe`], which can read the state but never change it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{GpuError, GpuResult};
use crate::executor::{FenceHandle, GpuExecutor};

/// Fence state. Moves from `Pending` to `Signaled` once and never back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FenceState {
    /// GPU work not finished.
    Pending,
    /// GPU work finished.
    Signaled,
}

type Callback = Box<dyn FnOnce() + Send>;

/// GPU completion signal.
pub struct Fence {
    executor: Arc<dyn GpuExecutor>,
    handle: Option<FenceHandle>,
    label: &'static str,
    state: FenceState,
    signaled: Arc<AtomicBool>,
    on_signaled: Option<Callback>,
}

impl Fence {
    /// Inserts a fence after everything submitted so far.
    ///
    /// # Errors
    ///
    /// Backend failure while inserting.
    pub fn insert(executor: &Arc<dyn GpuExecutor>, label: &'static str) -> GpuResult<Self> {
        let handle = executor.insert_fence()?;
        Ok(Self {
            executor: Arc::clone(executor),
            handle: Some(handle),
            label,
            state: FenceState::Pending,
            signaled: Arc::new(AtomicBool::new(false)),
            on_signaled: None,
        })
    }

    /// Registers a callback fired exactly once when the fence signals.
    ///
    /// Fires immediately if the fence has already signaled.
    pub fn on_signaled(&mut self, callback: impl FnOnce() + Send + 'static) {
        if self.state == FenceState::Signaled {
            callback();
        } else {
            self.on_signaled = Some(Box::new(callback));
        }
    }

    /// Builder flavour of [`on_signaled`](Self::on_signaled).
    #[must_use]
    pub fn with_callback(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_signaled(callback);
        self
    }

    /// Current state, as of the last poll.
    #[must_use]
    pub const fn state(&self) -> FenceState {
        self.state
    }

    /// Whether the last poll saw completion.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.state == FenceState::Signaled
    }

    /// Whether [`delete`](Self::delete) was called.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.handle.is_none()
    }

    /// Read-only view for other threads.
    #[must_use]
    pub fn probe(&self) -> FenceProbe {
        FenceProbe {
            signaled: Arc::clone(&self.signaled),
        }
    }

    /// Polls the executor. Transitions at most once.
    ///
    /// # Errors
    ///
    /// [`GpuError::UseAfterRelease`] after `delete()`; executor failures.
    pub fn update(&mut self) -> GpuResult<FenceState> {
        let handle = self.live_handle()?;
        if self.state == FenceState::Pending && self.executor.fence_signaled(handle)? {
            self.signal();
        }
        Ok(self.state)
    }

    /// Blocks until the fence signals. Shutdown and forced sync points only.
    ///
    /// # Errors
    ///
    /// [`GpuError::UseAfterRelease`] after `delete()`; executor failures.
    pub fn wait(&mut self) -> GpuResult<()> {
        let handle = self.live_handle()?;
        if self.state == FenceState::Pending {
            self.executor.wait_fence(handle)?;
            self.signal();
        }
        Ok(())
    }

    /// Releases the native fence. Later calls are no-ops.
    pub fn delete(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.executor.destroy_fence(handle);
            self.on_signaled = None;
        }
    }

    fn live_handle(&self) -> GpuResult<FenceHandle> {
        self.handle.ok_or_else(|| GpuError::UseAfterRelease {
            resource: "fence",
            label: self.label.to_owned(),
        })
    }

    fn signal(&mut self) {
        self.state = FenceState::Signaled;
        self.signaled.store(true, Ordering::Release);
        debug!(label = self.label, "fence signaled");
        if let Some(callback) = self.on_signaled.take() {
            callback();
        }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.delete();
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("label", &self.label)
            .field("state", &self.state)
            .field("deleted", &self.is_deleted())
            .finish_non_exhaustive()
    }
}

/// Cross-thread, read-only view of a fence.
#[derive(Clone, Debug)]
pub struct FenceProbe {
    signaled: Arc<AtomicBool>,
}

impl FenceProbe {
    /// Probe that is already signaled.
    #[must_use]
    pub fn signaled() -> Self {
        Self {
            signaled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the owning thread has observed completion.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }
}

/// In-flight fences of one owner, polled every frame.
#[derive(Debug, Default)]
pub struct FenceSet {
    fences: Vec<Fence>,
}

impl FenceSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a fence until it signals.
    pub fn push(&mut self, fence: Fence) {
        self.fences.push(fence);
    }

    /// Fences still in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fences.len()
    }

    /// Whether nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    /// Polls every fence and drops the signaled ones. Returns how many
    /// completed.
    ///
    /// # Errors
    ///
    /// The first executor failure; fences polled before it keep their state.
    pub fn poll(&mut self) -> GpuResult<usize> {
        let before = self.fences.len();
        let mut result = Ok(());
        self.fences.retain_mut(|fence| {
            if result.is_err() {
                return true;
            }
            match fence.update() {
                Ok(FenceState::Signaled) => false,
                Ok(FenceState::Pending) => true,
                Err(e) => {
                    result = Err(e);
                    true
                }
            }
        });
        result?;
        Ok(before - self.fences.len())
    }

    /// Blocks until every fence signals.
    ///
    /// # Errors
    ///
    /// The first executor failure.
    pub fn wait_all(&mut self) -> GpuResult<()> {
        for fence in &mut self.fences {
            fence.wait()?;
        }
        self.fences.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::executor::{BufferDescriptor, BufferKind, HeadlessExecutor, StorageMode};

    fn pending_fence() -> (Arc<HeadlessExecutor>, Fence) {
        let headless = Arc::new(HeadlessExecutor::new());
        let executor: Arc<dyn GpuExecutor> = headless.clone();
        let buffer = executor
            .create_buffer(&BufferDescriptor {
                label: "fence-test",
                size: 16,
                kind: BufferKind::Storage,
                mode: StorageMode::Staged,
            })
            .unwrap();
        executor.write_buffer(buffer, 0, &[7; 16]).unwrap();
        let fence = Fence::insert(&executor, "fence-test").unwrap();
        (headless, fence)
    }

    #[test]
    fn test_fence_monotonic_callback_once() {
        let (gpu, fence) = pending_fence();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let mut fence = fence.with_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..5 {
            assert_eq!(fence.update().unwrap(), FenceState::Pending);
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        gpu.complete_all();
        assert_eq!(fence.update().unwrap(), FenceState::Signaled);
        for _ in 0..5 {
            assert_eq!(fence.update().unwrap(), FenceState::Signaled);
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_after_signal_fires_immediately() {
        let (gpu, mut fence) = pending_fence();
        gpu.complete_all();
        fence.update().unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        fence.on_signaled(move || flag.store(true, Ordering::SeqCst));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_probe_follows_owner() {
        let (gpu, mut fence) = pending_fence();
        let probe = fence.probe();
        let remote = std::thread::spawn({
            let probe = probe.clone();
            move || probe.is_signaled()
        });
        assert!(!remote.join().unwrap());

        gpu.complete_all();
        assert!(!probe.is_signaled(), "only the owner's poll publishes");
        fence.update().unwrap();
        assert!(probe.is_signaled());
    }

    #[test]
    fn test_wait_blocks_until_signaled() {
        let (_gpu, mut fence) = pending_fence();
        fence.wait().unwrap();
        assert!(fence.is_signaled());
    }

    #[test]
    fn test_delete_idempotent_then_use_fails() {
        let (gpu, mut fence) = pending_fence();
        fence.delete();
        fence.delete();
        assert!(fence.is_deleted());
        assert_eq!(gpu.stats().live_fences, 0);
        assert!(matches!(
            fence.update(),
            Err(GpuError::UseAfterRelease { resource: "fence", .. })
        ));
        assert!(matches!(fence.wait(), Err(GpuError::UseAfterRelease { .. })));
    }

    #[test]
    fn test_fence_set_drops_signaled() {
        let gpu = Arc::new(HeadlessExecutor::new());
        let executor: Arc<dyn GpuExecutor> = gpu.clone();
        let buffer = executor
            .create_buffer(&BufferDescriptor {
                label: "set",
                size: 4,
                kind: BufferKind::Uniform,
                mode: StorageMode::Staged,
            })
            .unwrap();

        let mut set = FenceSet::new();
        executor.write_buffer(buffer, 0, &[1; 4]).unwrap();
        set.push(Fence::insert(&executor, "first").unwrap());
        gpu.complete_all();
        executor.write_buffer(buffer, 0, &[2; 4]).unwrap();
        set.push(Fence::insert(&executor, "second").unwrap());

        assert_eq!(set.poll().unwrap(), 1);
        assert_eq!(set.len(), 1);
        set.wait_all().unwrap();
        assert!(set.is_empty());
    }
}
