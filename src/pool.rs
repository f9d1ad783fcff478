//! Elastic worker pool.
//!
//! ## Why OS threads and a slot table?
//!
//! Engines are synchronous and often CPU-bound, and the HTTP fetches they
//! trigger are blocking. Running them on dedicated threads keeps them off any
//! async runtime the caller may be using. The async facade only awaits the
//! per-job completion channel.
//!
//! The pool is a table of [`Slot`]s, one per worker thread, plus one FIFO
//! queue. Resizing never touches a thread directly:
//!
//! ```text
//!   Starting ──warm-up──▶ Idle ◀──────▶ Busy
//!      │                   │              │ shrink
//!      └──── shrink ───────┴──▶ removed   ▼
//!                                ▲     Draining ──job done──┘
//! ```
//!
//! A removed slot's thread notices on its next wake-up and exits. A Draining
//! worker finishes its current job, delivers the result and exits without
//! taking another job. In-flight work is never preempted and queued work is
//! never dropped: the queue is shared, so whichever worker survives picks it
//! up.

use crate::access::{AccessContext, ResourceFetcher};
use crate::engine::{Artifact, ConversionEngine, ConvertRequest};
use crate::error::ConvertError;
use serde::Serialize;
use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type JobResult = Result<Artifact, ConvertError>;

// ── Slots ────────────────────────────────────────────────────────────────

/// Lifecycle state of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotState {
    /// Thread spawned, engine warm-up still running.
    Starting,
    Idle,
    Busy,
    /// Marked for removal while busy; exits after its current job.
    Draining,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    id: usize,
    state: SlotState,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Requested number of workers.
    pub target_size: usize,
    /// Workers that are not draining. Converges to `target_size`.
    pub active: usize,
    pub starting: usize,
    pub idle: usize,
    pub busy: usize,
    pub draining: usize,
    /// Jobs waiting for a worker.
    pub queued: usize,
    /// Jobs finished since the pool was created, including those whose
    /// caller stopped waiting.
    pub completed: u64,
}

// ── Shared state ─────────────────────────────────────────────────────────

struct Job {
    id: u64,
    request: ConvertRequest,
    context: AccessContext,
    reply: oneshot::Sender<JobResult>,
}

struct PoolState {
    slots: Vec<Slot>,
    queue: VecDeque<Job>,
    target_size: usize,
    next_worker_id: usize,
    next_job_id: u64,
    completed: u64,
    shutting_down: bool,
}

impl PoolState {
    fn slot_state(&self, id: usize) -> Option<SlotState> {
        self.slots.iter().find(|s| s.id == id).map(|s| s.state)
    }

    fn set_state(&mut self, id: usize, state: SlotState) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.id == id) {
            slot.state = state;
        }
    }

    fn remove_slot(&mut self, id: usize) {
        self.slots.retain(|s| s.id != id);
    }

    fn count(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }

    fn active(&self) -> usize {
        self.slots.len() - self.count(SlotState::Draining)
    }
}

struct Shared {
    state: Mutex<PoolState>,
    /// Signalled when a job is queued, a slot is removed, or on shutdown.
    work_ready: Condvar,
    /// Signalled whenever a slot changes state or disappears.
    workers_changed: Condvar,
    engine: Arc<dyn ConversionEngine>,
}

impl Shared {
    // Every critical section leaves `PoolState` consistent before it can
    // panic, and engine code never runs under the lock.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Pool ─────────────────────────────────────────────────────────────────

/// A resizable set of worker threads running one [`ConversionEngine`].
///
/// Dropping the pool lets the workers finish every queued job, then exit.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Start a pool with `size` workers (`size >= 1`).
    pub fn new(engine: Arc<dyn ConversionEngine>, size: usize) -> Result<Self, ConvertError> {
        validate_size(size)?;
        let pool = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    slots: Vec::with_capacity(size),
                    queue: VecDeque::new(),
                    target_size: 0,
                    next_worker_id: 0,
                    next_job_id: 0,
                    completed: 0,
                    shutting_down: false,
                }),
                work_ready: Condvar::new(),
                workers_changed: Condvar::new(),
                engine,
            }),
        };
        pool.resize(size)?;
        Ok(pool)
    }

    /// Queue a job. The returned handle can be waited on or awaited.
    pub fn submit(&self, request: ConvertRequest, context: AccessContext) -> JobHandle {
        let (reply, receiver) = oneshot::channel();
        let mut state = self.shared.lock();
        let id = state.next_job_id;
        state.next_job_id += 1;
        debug!("Queued job {}: {}", id, request.operation.name());
        state.queue.push_back(Job {
            id,
            request,
            context,
            reply,
        });
        self.shared.work_ready.notify_one();
        JobHandle { id, receiver }
    }

    /// Change the number of workers.
    ///
    /// Growing spawns fresh workers right away. Shrinking removes idle (and
    /// still-starting) workers first and marks busy ones as draining; nothing
    /// waits for in-flight jobs.
    pub fn resize(&self, size: usize) -> Result<(), ConvertError> {
        validate_size(size)?;
        let mut state = self.shared.lock();
        let previous = state.target_size;
        state.target_size = size;

        let active = state.active();
        if size > active {
            for _ in active..size {
                if let Err(e) = spawn_worker(&self.shared, &mut state) {
                    state.target_size = previous;
                    return Err(e);
                }
            }
        } else if size < active {
            let mut excess = active - size;
            for victim in [SlotState::Idle, SlotState::Starting] {
                while excess > 0 {
                    let Some(pos) = state.slots.iter().rposition(|s| s.state == victim) else {
                        break;
                    };
                    let slot = state.slots.remove(pos);
                    debug!("Retiring {:?} worker {}", victim, slot.id);
                    excess -= 1;
                }
            }
            for slot in state.slots.iter_mut().rev() {
                if excess == 0 {
                    break;
                }
                if slot.state == SlotState::Busy {
                    slot.state = SlotState::Draining;
                    debug!("Draining busy worker {}", slot.id);
                    excess -= 1;
                }
            }
            // Removed workers are parked on `work_ready`; wake them so they exit.
            self.shared.work_ready.notify_all();
        }

        if previous != size {
            info!("Worker pool resized: {} -> {} workers", previous, size);
        }
        self.shared.workers_changed.notify_all();
        Ok(())
    }

    /// Block until no worker is still warming up.
    pub fn warm_up(&self) {
        let started = Instant::now();
        let mut state = self.shared.lock();
        while state.count(SlotState::Starting) > 0 {
            state = self
                .shared
                .workers_changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        debug!(
            "Workers warm: {} ready after {}ms",
            state.active(),
            started.elapsed().as_millis()
        );
    }

    pub fn target_size(&self) -> usize {
        self.shared.lock().target_size
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            target_size: state.target_size,
            active: state.active(),
            starting: state.count(SlotState::Starting),
            idle: state.count(SlotState::Idle),
            busy: state.count(SlotState::Busy),
            draining: state.count(SlotState::Draining),
            queued: state.queue.len(),
            completed: state.completed,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.shutting_down = true;
        debug!(
            "Worker pool shutting down ({} queued jobs will still run)",
            state.queue.len()
        );
        self.shared.work_ready.notify_all();
        self.shared.workers_changed.notify_all();
    }
}

fn validate_size(size: usize) -> Result<(), ConvertError> {
    if size == 0 {
        return Err(ConvertError::InvalidArgument(
            "num_workers must be >= 1".into(),
        ));
    }
    Ok(())
}

fn spawn_worker(shared: &Arc<Shared>, state: &mut PoolState) -> Result<(), ConvertError> {
    let id = state.next_worker_id;
    state.next_worker_id += 1;
    state.slots.push(Slot {
        id,
        state: SlotState::Starting,
    });

    let worker_shared = Arc::clone(shared);
    let spawned = std::thread::Builder::new()
        .name(format!("chartconv-worker-{id}"))
        .spawn(move || worker_loop(worker_shared, id));

    if let Err(e) = spawned {
        state.remove_slot(id);
        return Err(ConvertError::Internal(format!(
            "failed to spawn worker thread: {e}"
        )));
    }
    debug!("Spawned worker {}", id);
    Ok(())
}

// ── Worker ───────────────────────────────────────────────────────────────

fn worker_loop(shared: Arc<Shared>, id: usize) {
    match catch_unwind(AssertUnwindSafe(|| shared.engine.warm_up())) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Worker {} engine warm-up failed: {}", id, e),
        Err(panic) => warn!(
            "Worker {} engine warm-up panicked: {}",
            id,
            panic_message(panic.as_ref())
        ),
    }

    let mut state = shared.lock();
    if state.slot_state(id) == Some(SlotState::Starting) {
        state.set_state(id, SlotState::Idle);
    }
    shared.workers_changed.notify_all();

    loop {
        if state.slot_state(id).is_none() {
            break;
        }

        if let Some(job) = state.queue.pop_front() {
            state.set_state(id, SlotState::Busy);
            shared.workers_changed.notify_all();
            drop(state);

            execute(&shared, job, id);

            state = shared.lock();
            state.completed += 1;
            if state.slot_state(id) != Some(SlotState::Busy) {
                break;
            }
            state.set_state(id, SlotState::Idle);
            shared.workers_changed.notify_all();
            continue;
        }

        if state.shutting_down {
            break;
        }
        state = shared
            .work_ready
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner);
    }

    state.remove_slot(id);
    shared.workers_changed.notify_all();
    // This thread may have consumed a `notify_one` meant for a job that is
    // still queued; hand it to a surviving worker.
    if !state.queue.is_empty() {
        shared.work_ready.notify_one();
    }
    debug!("Worker {} exited", id);
}

fn execute(shared: &Shared, job: Job, worker: usize) {
    let Job {
        id,
        request,
        context,
        reply,
    } = job;
    let operation = request.operation.name();
    let started = Instant::now();
    debug!("Worker {} starting job {}: {}", worker, id, operation);

    let fetcher = ResourceFetcher::new(context);
    let outcome = catch_unwind(AssertUnwindSafe(|| shared.engine.convert(&request, &fetcher)));
    let denials = fetcher.take_denials();

    let result = match outcome {
        Err(panic) => Err(ConvertError::Internal(format!(
            "conversion engine panicked: {}",
            panic_message(panic.as_ref())
        ))),
        Ok(Err(e)) => match ConvertError::from(e) {
            denied @ ConvertError::PermissionDenied { .. } => Err(denied),
            other => match denials.into_iter().next() {
                Some(reason) => Err(ConvertError::PermissionDenied { reason }),
                None => Err(other),
            },
        },
        // The engine swallowed a denial and rendered anyway.
        Ok(Ok(_)) if !denials.is_empty() => Err(ConvertError::PermissionDenied {
            reason: denials.join("; "),
        }),
        Ok(Ok(artifact)) => Ok(artifact),
    };

    debug!(
        "Worker {} finished job {} ({}) in {}ms: {}",
        worker,
        id,
        operation,
        started.elapsed().as_millis(),
        if result.is_ok() { "ok" } else { "error" }
    );

    if reply.send(result).is_err() {
        debug!("Discarding result of job {}: caller stopped waiting", id);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ── Handles ──────────────────────────────────────────────────────────────

/// Completion handle of a submitted job.
///
/// Use [`JobHandle::wait`] from synchronous code or `.await` it from async
/// code. Dropping the handle detaches the caller only: the job still runs to
/// completion and its result is discarded.
#[derive(Debug)]
pub struct JobHandle {
    id: u64,
    receiver: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block the current thread until the job finishes.
    ///
    /// # Panics
    /// When called from within an async runtime; `.await` the handle there.
    pub fn wait(mut self) -> JobResult {
        self.receiver.blocking_recv().unwrap_or_else(|_| Err(worker_gone(self.id)))
    }
}

impl Future for JobHandle {
    type Output = JobResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(worker_gone(id))))
    }
}

fn worker_gone(id: u64) -> ConvertError {
    ConvertError::Internal(format!("worker exited before job {id} completed"))
}
