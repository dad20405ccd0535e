//! Bounded worker pool that decodes tiles.
//!
//! # Threading
//!
//! The scheduler is driven from a single owner thread (the compositor). It
//! pushes [`DecodeTask`]s onto a shared queue; worker threads pop them, call the
//! [`DecodeProvider`], and post a [`TaskReport`] back to the owner over an
//! unbounded channel. Workers never touch tiles.
//!
//! ```text
//!   owner thread                     worker threads
//! ┌──────────────┐  execute()   ┌──────────────────────┐
//! │  Compositor  │ ───────────▶ │ queue ─▶ provider    │
//! │              │ ◀─────────── │        .decode()     │
//! └──────────────┘  SchedulerEvent (mpsc)              │
//!                               └──────────────────────┘
//! ```
//!
//! # Batches
//!
//! A batch opens when a task is submitted to an idle pool and gets a fresh id.
//! Every task is stamped with the id of the batch it joined. When the last
//! outstanding task of a batch finishes, a single
//! [`SchedulerEvent::BatchComplete`] carrying that id is posted, after every
//! report of that batch. [`DecodeScheduler::cancel_all`] abandons the current
//! batch, so a cancelled batch never completes.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::DecodeError;
use crate::provider::{DecodeProvider, DecodedImage};

use super::model::{Tile, TileDescriptor, TileKey};

// =============================================================================
// Pool Configuration
// =============================================================================

/// Worker pool size bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Threads started up front
    pub min_workers: usize,

    /// Upper bound the pool may grow to under backlog
    pub max_workers: usize,
}

impl PoolConfig {
    /// Bounds derived from available parallelism: half the cores up front,
    /// all of them at most.
    pub fn from_available_parallelism() -> Self {
        let cores = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self::new((cores / 2).max(1), cores)
    }

    /// Explicit bounds. Both are raised to at least 1 and `max >= min`.
    pub fn new(min_workers: usize, max_workers: usize) -> Self {
        let min_workers = min_workers.max(1);
        Self {
            min_workers,
            max_workers: max_workers.max(min_workers),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_available_parallelism()
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// Identifier of one decode submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// A queued or running decode.
///
/// Shared between the queue and the running worker; tiles hold only a weak
/// link to it.
#[derive(Debug)]
pub struct DecodeTask {
    id: TaskId,
    batch: u64,
    descriptor: TileDescriptor,
    cancel: CancellationToken,
    complete: AtomicBool,
}

impl DecodeTask {
    fn new(id: TaskId, batch: u64, descriptor: TileDescriptor) -> Self {
        Self {
            id,
            batch,
            descriptor,
            cancel: CancellationToken::new(),
            complete: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn key(&self) -> TileKey {
        self.descriptor.key
    }

    /// Id of the batch the task was submitted to.
    pub fn batch(&self) -> u64 {
        self.batch
    }

    pub fn descriptor(&self) -> &TileDescriptor {
        &self.descriptor
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once a worker has finished with the task, whatever the outcome.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }
}

/// Result of one decode task.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// Pixels are ready
    Decoded(DecodedImage),

    /// The provider failed; the tile should return to `Unassigned`
    Failed(DecodeError),

    /// Cancelled before or during the decode; nothing to apply
    Incomplete,
}

/// Report posted by a worker when a task finishes.
#[derive(Debug)]
pub struct TaskReport {
    pub key: TileKey,
    pub task_id: TaskId,
    pub outcome: DecodeOutcome,
}

/// Messages from the pool to its owner.
#[derive(Debug)]
pub enum SchedulerEvent {
    /// One task finished
    Task(TaskReport),

    /// The last outstanding task of a batch finished
    BatchComplete { batch: u64 },
}

/// Result of [`DecodeScheduler::queue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueReport {
    /// Tiles newly handed to the pool
    pub submitted: usize,

    /// Queued or running tasks cancelled because their tile left the visible set
    pub coalesced: usize,

    /// True when this call opened a new batch
    pub batch_started: bool,

    /// Id of the batch the submitted tiles belong to
    pub batch: u64,
}

// =============================================================================
// Shared Pool State
// =============================================================================

struct PoolState {
    pending: VecDeque<Arc<DecodeTask>>,
    running: Vec<Arc<DecodeTask>>,
    batch: u64,
    outstanding: usize,
    idle: usize,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
    provider: Arc<dyn DecodeProvider>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
}

// =============================================================================
// Decode Scheduler
// =============================================================================

/// Fixed-bound pool of decode workers.
///
/// Dropping the scheduler cancels every task and joins the workers.
pub struct DecodeScheduler {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
    config: PoolConfig,
    next_task_id: u64,
}

impl DecodeScheduler {
    /// Start a pool and return it with the receiving end of its event channel.
    pub fn new(
        provider: Arc<dyn DecodeProvider>,
        config: PoolConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                pending: VecDeque::new(),
                running: Vec::new(),
                batch: 0,
                outstanding: 0,
                idle: 0,
                shutdown: false,
            }),
            available: Condvar::new(),
            provider,
            events,
        });

        let mut scheduler = Self {
            shared,
            workers: Vec::with_capacity(config.max_workers),
            config,
            next_task_id: 1,
        };
        for _ in 0..config.min_workers {
            scheduler.spawn_worker();
        }

        (scheduler, receiver)
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Number of worker threads started so far.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Id of the most recently opened (or abandoned) batch.
    pub fn batch(&self) -> u64 {
        self.shared.state.lock().batch
    }

    /// Tasks of the current batch that have not finished yet.
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }

    /// Tasks waiting for a worker.
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Submit a visible set.
    ///
    /// First every queued or running task whose tile is not in `visible` is
    /// cancelled, so stale off-screen work stops occupying workers. Then every
    /// `Unassigned` tile in `visible` is submitted, in row-major order.
    pub fn queue(&mut self, visible: &mut HashMap<TileKey, Tile>) -> QueueReport {
        let mut report = QueueReport::default();

        let opened_before = {
            let state = self.shared.state.lock();
            for task in state.pending.iter().chain(state.running.iter()) {
                if task.is_complete() || task.is_cancelled() {
                    continue;
                }
                if !visible.contains_key(&task.key()) {
                    trace!(tile = %task.key(), "cancelling stale decode");
                    task.cancel();
                    report.coalesced += 1;
                }
            }
            state.batch
        };

        let mut keys: Vec<TileKey> = visible.keys().copied().collect();
        keys.sort_by_key(|key| (key.row, key.column));

        for key in keys {
            if self.shared.state.lock().shutdown {
                break;
            }
            if let Some(tile) = visible.get_mut(&key) {
                if tile.submit(self) {
                    report.submitted += 1;
                }
            }
        }

        // a batch may also open mid-call if the previous one drained meanwhile
        report.batch = self.batch();
        report.batch_started = report.submitted > 0 && report.batch != opened_before;
        if report.batch_started {
            debug!(batch = report.batch, tiles = report.submitted, "decode batch started");
        }
        report
    }

    /// Enqueue a single decode. Used by [`Tile::submit`].
    pub fn execute(&mut self, descriptor: TileDescriptor) -> Arc<DecodeTask> {
        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;

        let (task, needs_worker) = {
            let mut state = self.shared.state.lock();
            if state.outstanding == 0 {
                state.batch += 1;
            }
            let task = Arc::new(DecodeTask::new(id, state.batch, descriptor));
            state.pending.push_back(Arc::clone(&task));
            state.outstanding += 1;
            let needs_worker = state.pending.len() > state.idle;
            (task, needs_worker)
        };

        if needs_worker && self.workers.len() < self.config.max_workers {
            self.spawn_worker();
        }
        self.shared.available.notify_one();

        trace!(tile = %task.key(), task = id.0, "decode queued");
        task
    }

    /// Drain the queue, cancel running tasks and abandon the current batch.
    ///
    /// Returns the keys of the drained (never started) tasks.
    pub fn cancel_all(&mut self) -> Vec<TileKey> {
        let mut state = self.shared.state.lock();

        let drained: Vec<TileKey> = state
            .pending
            .drain(..)
            .map(|task| {
                task.cancel();
                task.key()
            })
            .collect();
        for task in &state.running {
            task.cancel();
        }

        // stale tasks no longer match the current batch
        state.batch += 1;
        state.outstanding = 0;

        debug!(
            batch = state.batch,
            drained = drained.len(),
            running = state.running.len(),
            "decode batch cancelled"
        );
        drained
    }

    fn spawn_worker(&mut self) {
        let index = self.workers.len();
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name(format!("tile-decode-{}", index))
            .spawn(move || worker_loop(shared))
        {
            Ok(handle) => self.workers.push(handle),
            Err(e) => warn!(error = %e, "failed to spawn decode worker"),
        }
    }
}

impl Drop for DecodeScheduler {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            for task in state.pending.drain(..) {
                task.cancel();
            }
            for task in &state.running {
                task.cancel();
            }
        }
        self.shared.available.notify_all();

        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

fn worker_loop(shared: Arc<PoolShared>) {
    while let Some(task) = next_task(&shared) {
        let outcome = run_task(shared.provider.as_ref(), &task);
        task.complete.store(true, Ordering::Release);

        // receiver gone means the owner was dropped; nothing to report to
        let _ = shared.events.send(SchedulerEvent::Task(TaskReport {
            key: task.key(),
            task_id: task.id(),
            outcome,
        }));

        finish_task(&shared, &task);
    }
}

fn next_task(shared: &PoolShared) -> Option<Arc<DecodeTask>> {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return None;
        }
        if let Some(task) = state.pending.pop_front() {
            state.running.push(Arc::clone(&task));
            return Some(task);
        }
        state.idle += 1;
        shared.available.wait(&mut state);
        state.idle -= 1;
    }
}

fn finish_task(shared: &PoolShared, task: &Arc<DecodeTask>) {
    let mut state = shared.state.lock();
    state.running.retain(|running| running.id() != task.id());

    if task.batch != state.batch {
        return;
    }
    state.outstanding = state.outstanding.saturating_sub(1);
    if state.outstanding == 0 && state.pending.is_empty() {
        // sent under the lock so no new batch can open before it is queued
        debug!(batch = state.batch, "decode batch complete");
        let _ = shared
            .events
            .send(SchedulerEvent::BatchComplete { batch: state.batch });
    }
}

/// Run one decode with cancellation checkpoints on both sides of the call.
fn run_task(provider: &dyn DecodeProvider, task: &DecodeTask) -> DecodeOutcome {
    if task.is_cancelled() {
        return DecodeOutcome::Incomplete;
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        provider.decode(&task.descriptor, &task.cancel)
    }));

    if task.is_cancelled() {
        return DecodeOutcome::Incomplete;
    }

    match result {
        Ok(Ok(Some(image))) => DecodeOutcome::Decoded(image),
        Ok(Ok(None)) => DecodeOutcome::Failed(DecodeError::NotFound {
            descriptor: format!("{} ({})", task.key(), task.descriptor.source),
        }),
        Ok(Err(DecodeError::Cancelled)) => DecodeOutcome::Incomplete,
        Ok(Err(e)) => DecodeOutcome::Failed(e),
        Err(payload) => DecodeOutcome::Failed(DecodeError::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
