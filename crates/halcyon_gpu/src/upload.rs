//! # Background Upload Context
//!
//! Large uploads should not stall frame submission. The uploader owns a
//! worker thread that shares the executor's object namespace:
//!
//! ```text
//! render thread ──submit()──► [bounded channel] ──► upload worker
//!      ▲                                              │ write_buffer
//!      │                                              │ Fence::insert
//!      └──────── UploadTicket::is_complete() ◄────────┘ poll → callback
//! ```
//!
//! The worker owns its fences and is the only thread that polls them.
//! Tickets only read the outcome.
//!
//! Targets must not be reallocated while a ticket for them is in flight.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::error::{GpuError, GpuResult};
use crate::executor::{BufferHandle, GpuExecutor};
use crate::fence::{Fence, FenceSet};

/// How often the worker polls in-flight fences while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

const QUEUED: u8 = 0;
const SUBMITTED: u8 = 1;
const COMPLETE: u8 = 2;
const FAILED: u8 = 3;

/// Progress of one background upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UploadState {
    /// Waiting in the channel.
    Queued,
    /// Written; fence pending.
    Submitted,
    /// Fence signaled.
    Complete,
    /// The executor rejected the write.
    Failed,
}

/// Read-only handle on a background upload.
#[derive(Clone, Debug)]
pub struct UploadTicket {
    state: Arc<AtomicU8>,
    bytes: usize,
}

impl UploadTicket {
    /// Current state.
    #[must_use]
    pub fn state(&self) -> UploadState {
        match self.state.load(Ordering::Acquire) {
            QUEUED => UploadState::Queued,
            SUBMITTED => UploadState::Submitted,
            COMPLETE => UploadState::Complete,
            _ => UploadState::Failed,
        }
    }

    /// Whether the GPU finished the upload.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state() == UploadState::Complete
    }

    /// Whether the upload is done, one way or the other.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self.state(), UploadState::Complete | UploadState::Failed)
    }

    /// Payload size.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.bytes
    }
}

struct Job {
    target: BufferHandle,
    offset: u64,
    bytes: Vec<u8>,
    state: Arc<AtomicU8>,
}

/// Counters shared with the worker.
#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
}

/// Snapshot of uploader counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// Uploads whose fence signaled.
    pub completed: u64,
    /// Uploads the executor rejected.
    pub failed: u64,
    /// Bytes written.
    pub bytes: u64,
}

/// Secondary upload context running on its own thread.
#[derive(Debug)]
pub struct BackgroundUploader {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl BackgroundUploader {
    /// Spawns the worker. `queue_depth` bounds jobs waiting in the channel.
    ///
    /// # Errors
    ///
    /// [`GpuError::Backend`] if the thread cannot be spawned.
    pub fn spawn(executor: Arc<dyn GpuExecutor>, queue_depth: usize) -> GpuResult<Self> {
        let (sender, receiver) = bounded(queue_depth.max(1));
        let counters = Arc::new(Counters::default());
        let worker_counters = Arc::clone(&counters);
        let worker = std::thread::Builder::new()
            .name("halcyon-upload".into())
            .spawn(move || run_worker(&executor, &receiver, &worker_counters))
            .map_err(|e| GpuError::Backend(format!("failed to spawn upload worker: {e}")))?;
        debug!(queue_depth, "background uploader started");
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            counters,
        })
    }

    /// Queues `bytes` for `target` at `offset`. Blocks while the queue is full.
    ///
    /// # Errors
    ///
    /// [`GpuError::Backend`] once the worker has stopped.
    pub fn submit(
        &self,
        target: BufferHandle,
        offset: u64,
        bytes: Vec<u8>,
    ) -> GpuResult<UploadTicket> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| GpuError::Backend("upload worker stopped".into()))?;
        let state = Arc::new(AtomicU8::new(QUEUED));
        let ticket = UploadTicket {
            state: Arc::clone(&state),
            bytes: bytes.len(),
        };
        sender
            .send(Job {
                target,
                offset,
                bytes,
                state,
            })
            .map_err(|_| GpuError::Backend("upload worker stopped".into()))?;
        Ok(ticket)
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> UploadStats {
        UploadStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            bytes: self.counters.bytes.load(Ordering::Relaxed),
        }
    }

    /// Drains the queue, waits for in-flight fences and joins the worker.
    ///
    /// # Errors
    ///
    /// [`GpuError::Backend`] if the worker panicked.
    pub fn shutdown(mut self) -> GpuResult<()> {
        self.stop()
    }

    fn stop(&mut self) -> GpuResult<()> {
        drop(self.sender.take());
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| GpuError::Backend("upload worker panicked".into())),
            None => Ok(()),
        }
    }
}

impl Drop for BackgroundUploader {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "background uploader stopped uncleanly");
        }
    }
}

fn run_worker(executor: &Arc<dyn GpuExecutor>, receiver: &Receiver<Job>, counters: &Arc<Counters>) {
    let mut in_flight = FenceSet::new();
    loop {
        let job = if in_flight.is_empty() {
            match receiver.recv() {
                Ok(job) => Some(job),
                Err(_) => break,
            }
        } else {
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(job) => Some(job),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };

        if let Some(job) = job {
            if let Some(fence) = execute(executor, job, counters) {
                in_flight.push(fence);
            }
        }
        if let Err(e) = in_flight.poll() {
            warn!(error = %e, "upload fence poll failed");
        }
    }

    if let Err(e) = in_flight.wait_all() {
        warn!(error = %e, "upload fences failed during shutdown");
    }
    debug!("background uploader stopped");
}

fn execute(executor: &Arc<dyn GpuExecutor>, job: Job, counters: &Arc<Counters>) -> Option<Fence> {
    let fail = |e: GpuError| {
        warn!(target_buffer = job.target.id(), error = %e, "background upload failed");
        job.state.store(FAILED, Ordering::Release);
        counters.failed.fetch_add(1, Ordering::Relaxed);
    };
    if let Err(e) = executor.write_buffer(job.target, job.offset, &job.bytes) {
        fail(e);
        return None;
    }
    match Fence::insert(executor, "background-upload") {
        Ok(fence) => {
            counters.bytes.fetch_add(job.bytes.len() as u64, Ordering::Relaxed);
            job.state.store(SUBMITTED, Ordering::Release);
            let state = Arc::clone(&job.state);
            let counters = Arc::clone(counters);
            Some(fence.with_callback(move || {
                state.store(COMPLETE, Ordering::Release);
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }))
        }
        Err(e) => {
            fail(e);
            None
        }
    }
}
