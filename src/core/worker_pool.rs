//! Worker supervision: fixed-capacity pools of dedicated worker threads
//! fed from a blocking task queue.
//!
//! The pool spawns exactly `capacity` workers eagerly and keeps that
//! headcount: a worker that exits, panics, or retires at its task limit
//! posts an exit event on its way out, and a maintenance thread reacts
//! by pruning the dead handle and spawning a replacement with the same
//! settings. Tasks a lost worker had in flight are not re-delivered;
//! delivery is at-most-once.
//!
//! # Design
//!
//! - **No polling**: workers block on channel recv, result waiters block
//!   on a Condvar, and the maintenance thread blocks on the exit-event
//!   channel.
//! - **Blocking intake**: `submit` suspends when the bounded queue is
//!   full; that is the back-pressure mechanism.
//! - **Two-phase teardown**: `close` stops intake and unblocks idle
//!   workers by dropping the senders; `join` then waits for every
//!   worker and the maintenance thread.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::infra::coord;

use super::error::PoolError;
use super::executor::{TaskContext, WorkerExecutor};

/// Per-worker initialization hook, run once before the worker consumes
/// tasks. Receives the worker's sequential id.
pub type WorkerInit = Arc<dyn Fn(u64) + Send + Sync>;

/// Handle for retrieving one submitted task's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskTicket {
    id: u64,
}

impl TaskTicket {
    /// The pool-unique task identifier behind this ticket.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

/// Outcome a worker pushes for one task: the value, or the captured
/// panic message when the pool wraps panics.
type TaskOutcome<R> = Result<R, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    Ready,
}

struct ResultSlot<R> {
    outcome: Option<TaskOutcome<R>>,
    state: SlotState,
}

/// Result table keyed by task id, with Condvar-based notification so
/// retrieval never polls.
struct ResultStorage<R> {
    slots: RwLock<HashMap<u64, Arc<(Mutex<ResultSlot<R>>, Condvar)>>>,
}

impl<R> ResultStorage<R> {
    fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn create_slot(&self, id: u64) {
        let slot = ResultSlot {
            outcome: None,
            state: SlotState::Pending,
        };
        self.slots
            .write()
            .insert(id, Arc::new((Mutex::new(slot), Condvar::new())));
    }

    fn store(&self, id: u64, outcome: TaskOutcome<R>) {
        let slots = self.slots.read();
        if let Some(pair) = slots.get(&id) {
            let (slot_mutex, condvar) = pair.as_ref();
            let mut slot = slot_mutex.lock();
            slot.outcome = Some(outcome);
            slot.state = SlotState::Ready;
            condvar.notify_all();
        }
        // A missing slot means the caller already gave up on the task.
    }

    fn try_take(&self, id: u64) -> Option<TaskOutcome<R>> {
        let slots = self.slots.read();
        let pair = slots.get(&id)?;
        let (slot_mutex, _) = pair.as_ref();
        let mut slot = slot_mutex.lock();
        if slot.state == SlotState::Ready {
            slot.outcome.take()
        } else {
            None
        }
    }

    /// Wait for a result with a deadline. Loops around the Condvar so a
    /// spurious wakeup does not count as completion.
    fn wait_for(&self, id: u64, timeout: Duration) -> Result<TaskOutcome<R>, PoolError> {
        let pair = {
            let slots = self.slots.read();
            slots.get(&id).cloned()
        };
        let Some(pair) = pair else {
            return Err(PoolError::ResultNotFound);
        };

        let deadline = Instant::now() + timeout;
        let (slot_mutex, condvar) = pair.as_ref();
        let mut slot = slot_mutex.lock();
        while slot.state != SlotState::Ready {
            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::Timeout);
            }
            let wait = condvar.wait_for(&mut slot, deadline - now);
            if wait.timed_out() && slot.state != SlotState::Ready {
                return Err(PoolError::Timeout);
            }
        }
        slot.outcome.take().ok_or(PoolError::ResultNotFound)
    }

    fn remove(&self, id: u64) {
        self.slots.write().remove(&id);
    }
}

/// Statistics about pool population and task flow.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Configured worker capacity.
    pub capacity: usize,
    /// Workers currently alive (spawned and not yet exited).
    pub live_workers: usize,
    /// Total workers ever spawned, including replacements.
    pub spawned_workers: u64,
    /// Workers that exited without retiring voluntarily.
    pub lost_workers: u64,
    /// Total tasks accepted by `submit`.
    pub submitted_tasks: u64,
    /// Tasks completed with a value.
    pub completed_tasks: u64,
    /// Tasks that panicked and were forwarded as failures.
    pub failed_tasks: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    spawned_workers: AtomicU64,
    lost_workers: AtomicU64,
    submitted_tasks: AtomicU64,
    completed_tasks: AtomicU64,
    failed_tasks: AtomicU64,
}

struct WorkerTask<P> {
    id: u64,
    payload: P,
}

/// Posted by a worker's exit guard as its last act, panicking exits
/// included; the maintenance thread turns it into a repopulation pass.
struct WorkerExit {
    worker_id: u64,
}

/// One supervised worker: a dedicated OS thread identified by a
/// sequential id and a human-readable role name. Workers are daemonic;
/// dropping the pool detaches them and they never outlive the process.
struct WorkerHandle {
    id: u64,
    name: String,
    /// Set by the worker on voluntary exit (channel closed or task limit
    /// reached). A dead handle without this flag is a worker loss.
    retired: Arc<AtomicBool>,
    /// Set by the exit guard just before the exit event is posted, so
    /// the maintenance thread sees the handle as dead even while the OS
    /// thread is still unwinding.
    exited: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    fn is_dead(&self) -> bool {
        self.exited.load(Ordering::Acquire) || self.join.is_finished()
    }
}

/// Shared state between the pool facade, its workers, and the
/// maintenance thread.
struct PoolCore<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    config: WorkerPoolConfig,
    executor: E,
    initializer: Option<WorkerInit>,
    /// Task sender; `close` drops it so idle workers unblock.
    task_tx: Mutex<Option<Sender<WorkerTask<P>>>>,
    /// Kept so replacement workers can be attached to the same queue.
    task_rx: Receiver<WorkerTask<P>>,
    /// Exit-event sender; `close` drops it so the maintenance thread can
    /// observe full disconnection once the last worker is gone.
    exit_tx: Mutex<Option<Sender<WorkerExit>>>,
    results: Arc<ResultStorage<R>>,
    counters: Arc<PoolCounters>,
    workers: Mutex<Vec<WorkerHandle>>,
    worker_seq: AtomicU64,
    task_seq: AtomicU64,
    closed: AtomicBool,
}

impl<P, R, E> PoolCore<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    /// Bring the worker headcount back up to capacity. Returns the
    /// number of workers spawned; no-op at capacity or after close.
    fn repopulate(&self) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        let mut workers = self.workers.lock();

        let mut alive = Vec::with_capacity(self.config.capacity);
        for handle in workers.drain(..) {
            if handle.is_dead() {
                self.reap(handle);
            } else {
                alive.push(handle);
            }
        }
        *workers = alive;

        let missing = self.config.capacity.saturating_sub(workers.len());
        for _ in 0..missing {
            workers.push(self.spawn_worker());
        }
        missing
    }

    /// Join a handle and account for how it ended. The retired flag is
    /// read after the join so a worker exiting cleanly while we wait is
    /// not miscounted as a loss.
    fn reap(&self, handle: WorkerHandle) {
        let joined = handle.join.join();
        let voluntary = handle.retired.load(Ordering::Acquire);
        if let Err(panic_payload) = joined {
            warn!(
                worker = %handle.name,
                reason = %panic_message(panic_payload.as_ref()),
                "worker lost to panic; in-flight task is not recovered"
            );
            self.counters.lost_workers.fetch_add(1, Ordering::Relaxed);
        } else if voluntary {
            debug!(worker = %handle.name, "worker retired");
        } else {
            warn!(worker = %handle.name, "worker lost; in-flight task is not recovered");
            self.counters.lost_workers.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn spawn_worker(&self) -> WorkerHandle {
        let id = self.worker_seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("pool-worker-{id}");
        let retired = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicBool::new(false));
        let exit_tx = self.exit_tx.lock().clone();

        let join = spawn_worker_thread(WorkerSpec {
            id,
            name: name.clone(),
            task_rx: self.task_rx.clone(),
            results: Arc::clone(&self.results),
            counters: Arc::clone(&self.counters),
            retired: Arc::clone(&retired),
            exited: Arc::clone(&exited),
            exit_tx,
            executor: self.executor.clone(),
            initializer: self.initializer.clone(),
            wrap_panics: self.config.wrap_panics,
            max_tasks: self.config.max_tasks_per_worker,
            ipc_release: self.config.ipc_release,
            stack_size: self.config.thread_stack_size,
        });

        self.counters.spawned_workers.fetch_add(1, Ordering::Relaxed);
        WorkerHandle {
            id,
            name,
            retired,
            exited,
            join,
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(capacity = self.config.capacity, "closing worker pool");
        *self.task_tx.lock() = None;
        *self.exit_tx.lock() = None;
    }
}

/// Fixed-capacity worker pool bound to one task queue and result table.
///
/// See the module docs for the supervision and teardown contract.
pub struct WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    core: Arc<PoolCore<P, R, E>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl<P, R, E> WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    /// Create a pool and eagerly spawn its full worker complement.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidArgument` when the configuration is
    /// invalid (zero capacity, zero queue depth, zero task limit).
    pub fn new(config: WorkerPoolConfig, executor: E) -> Result<Self, PoolError> {
        Self::with_initializer(config, executor, None)
    }

    /// Create a pool whose workers run `initializer` once before
    /// consuming tasks. Replacement workers run it too.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidArgument` when the configuration is
    /// invalid.
    pub fn with_initializer(
        config: WorkerPoolConfig,
        executor: E,
        initializer: Option<WorkerInit>,
    ) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidArgument)?;

        let (task_tx, task_rx) = bounded::<WorkerTask<P>>(config.max_queue_depth);
        let (exit_tx, exit_rx) = unbounded::<WorkerExit>();
        let core = Arc::new(PoolCore {
            config,
            executor,
            initializer,
            task_tx: Mutex::new(Some(task_tx)),
            task_rx,
            exit_tx: Mutex::new(Some(exit_tx)),
            results: Arc::new(ResultStorage::new()),
            counters: Arc::new(PoolCounters::default()),
            workers: Mutex::new(Vec::new()),
            worker_seq: AtomicU64::new(0),
            task_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let spawned = core.repopulate();
        let maintenance = spawn_maintenance_thread(Arc::downgrade(&core), exit_rx);
        info!(
            capacity = core.config.capacity,
            spawned,
            max_queue_depth = core.config.max_queue_depth,
            "worker pool initialized"
        );
        Ok(Self {
            core,
            maintenance: Mutex::new(Some(maintenance)),
        })
    }

    /// Bring the worker headcount back up to capacity.
    ///
    /// The maintenance thread already does this after every worker exit;
    /// the method exists for callers that want a synchronous guarantee
    /// (or a spawn count) at a point of their choosing. Idempotent.
    pub fn repopulate(&self) -> usize {
        self.core.repopulate()
    }

    /// Submit a task, blocking while the queue is at capacity.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::PoolShutdown` after `close`.
    pub fn submit(&self, payload: P) -> Result<TaskTicket, PoolError> {
        if self.core.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }

        let id = self.core.task_seq.fetch_add(1, Ordering::Relaxed);
        self.core.results.create_slot(id);

        // Clone the sender out of the lock so a blocking send does not
        // hold the mutex against close().
        let tx = self.core.task_tx.lock().clone();
        let Some(tx) = tx else {
            self.core.results.remove(id);
            return Err(PoolError::PoolShutdown);
        };

        match tx.send(WorkerTask { id, payload }) {
            Ok(()) => {
                self.core
                    .counters
                    .submitted_tasks
                    .fetch_add(1, Ordering::Relaxed);
                debug!(task_id = id, "task submitted");
                Ok(TaskTicket { id })
            }
            Err(_) => {
                self.core.results.remove(id);
                Err(PoolError::PoolShutdown)
            }
        }
    }

    /// Wait for a task's result, up to `timeout`. On success or task
    /// failure the ticket is consumed; on timeout the slot stays so a
    /// later retry can still pick the result up.
    ///
    /// # Errors
    ///
    /// - `PoolError::TaskFailed` if the task panicked in the worker.
    /// - `PoolError::Timeout` if no result arrived in time.
    /// - `PoolError::ResultNotFound` for an unknown or already-consumed
    ///   ticket.
    pub fn retrieve(&self, ticket: &TaskTicket, timeout: Duration) -> Result<R, PoolError> {
        match self.core.results.wait_for(ticket.id, timeout) {
            Ok(outcome) => {
                self.core.results.remove(ticket.id);
                outcome.map_err(PoolError::TaskFailed)
            }
            Err(PoolError::Timeout) => Err(PoolError::Timeout),
            Err(e) => {
                self.core.results.remove(ticket.id);
                Err(e)
            }
        }
    }

    /// Take a task's result if it is already available, without blocking.
    pub fn try_retrieve(&self, ticket: &TaskTicket) -> Option<Result<R, PoolError>> {
        let outcome = self.core.results.try_take(ticket.id)?;
        self.core.results.remove(ticket.id);
        Some(outcome.map_err(PoolError::TaskFailed))
    }

    /// Submit a batch and collect results re-associated by input index,
    /// regardless of completion order. `timeout` bounds each retrieval.
    ///
    /// # Errors
    ///
    /// Propagates the first submission or retrieval error.
    pub fn map(&self, inputs: Vec<P>, timeout: Duration) -> Result<Vec<R>, PoolError> {
        let tickets: Vec<TaskTicket> = inputs
            .into_iter()
            .map(|payload| self.submit(payload))
            .collect::<Result<_, _>>()?;
        tickets
            .iter()
            .map(|ticket| self.retrieve(ticket, timeout))
            .collect()
    }

    /// Stop accepting tasks and unblock idle workers. Queued tasks are
    /// still drained by workers before they exit. Idempotent.
    pub fn close(&self) {
        self.core.close();
    }

    /// Block until every worker and the maintenance thread have
    /// terminated. Call after [`close`]; joining an already-joined pool
    /// returns immediately.
    ///
    /// [`close`]: WorkerPool::close
    pub fn join(&self) {
        let handles: Vec<WorkerHandle> = {
            let mut workers = self.core.workers.lock();
            workers.drain(..).collect()
        };
        let count = handles.len();
        for handle in handles {
            self.core.reap(handle);
        }

        if let Some(maintenance) = self.maintenance.lock().take() {
            if maintenance.join().is_err() {
                warn!("maintenance thread panicked");
            }
        }
        if count > 0 {
            info!(joined = count, "worker pool joined");
        }
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let live_workers = {
            let workers = self.core.workers.lock();
            workers.iter().filter(|w| !w.is_dead()).count()
        };
        let counters = &self.core.counters;
        PoolStats {
            capacity: self.core.config.capacity,
            live_workers,
            spawned_workers: counters.spawned_workers.load(Ordering::Relaxed),
            lost_workers: counters.lost_workers.load(Ordering::Relaxed),
            submitted_tasks: counters.submitted_tasks.load(Ordering::Relaxed),
            completed_tasks: counters.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: counters.failed_tasks.load(Ordering::Relaxed),
        }
    }

    /// Names of the currently tracked workers, in spawn order.
    #[must_use]
    pub fn worker_names(&self) -> Vec<String> {
        self.core
            .workers
            .lock()
            .iter()
            .map(|w| w.name.clone())
            .collect()
    }

    /// Sequential ids of the currently tracked workers.
    #[must_use]
    pub fn worker_ids(&self) -> Vec<u64> {
        self.core.workers.lock().iter().map(|w| w.id).collect()
    }
}

impl<P, R, E> Drop for WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    fn drop(&mut self) {
        // Workers are daemonic: stop intake and detach, never block a
        // drop. Explicit close + join is the graceful path.
        if !self.core.closed.load(Ordering::Acquire) {
            self.core.close();
            debug!("worker pool dropped without close; workers detached");
        }
    }
}

/// The maintenance thread sleeps on the exit-event channel and reacts
/// to each worker exit with a repopulation pass. It ends when the
/// channel fully disconnects: close() drops the pool's sender and the
/// last worker's guard drops the rest.
fn spawn_maintenance_thread<P, R, E>(
    core: Weak<PoolCore<P, R, E>>,
    exit_rx: Receiver<WorkerExit>,
) -> JoinHandle<()>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    thread::Builder::new()
        .name("pool-maintenance".into())
        .spawn(move || {
            while let Ok(exit) = exit_rx.recv() {
                debug!(worker_id = exit.worker_id, "worker exit observed");
                let Some(core) = core.upgrade() else { break };
                core.repopulate();
            }
            debug!("maintenance thread exiting");
        })
        .unwrap_or_else(|e| panic!("failed to spawn maintenance thread: {e}"))
}

/// Everything a worker thread needs, bundled so the spawn call stays flat.
struct WorkerSpec<P, R, E> {
    id: u64,
    name: String,
    task_rx: Receiver<WorkerTask<P>>,
    results: Arc<ResultStorage<R>>,
    counters: Arc<PoolCounters>,
    retired: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    exit_tx: Option<Sender<WorkerExit>>,
    executor: E,
    initializer: Option<WorkerInit>,
    wrap_panics: bool,
    max_tasks: Option<usize>,
    ipc_release: bool,
    stack_size: usize,
}

/// Marks the worker dead and posts the exit event. Lives at the top of
/// the worker's stack so it also fires when a task panic unwinds the
/// thread.
struct ExitGuard {
    worker_id: u64,
    exited: Arc<AtomicBool>,
    exit_tx: Option<Sender<WorkerExit>>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.exited.store(true, Ordering::Release);
        if let Some(tx) = self.exit_tx.take() {
            let _ = tx.send(WorkerExit {
                worker_id: self.worker_id,
            });
        }
    }
}

fn spawn_worker_thread<P, R, E>(spec: WorkerSpec<P, R, E>) -> JoinHandle<()>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    let thread_name = spec.name.clone();
    thread::Builder::new()
        .name(thread_name)
        .stack_size(spec.stack_size)
        .spawn(move || run_worker(spec))
        .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}"))
}

fn run_worker<P, R, E>(mut spec: WorkerSpec<P, R, E>)
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    let _exit_guard = ExitGuard {
        worker_id: spec.id,
        exited: Arc::clone(&spec.exited),
        exit_tx: spec.exit_tx.take(),
    };
    debug!(worker_id = spec.id, "worker started");

    if let Some(init) = &spec.initializer {
        init(spec.id);
    }

    if spec.ipc_release && !coord::available() {
        warn!(
            worker_id = spec.id,
            "coordination resource unavailable; worker running uncoordinated"
        );
    }

    // Each worker owns a single-threaded runtime so async executors run
    // without touching the caller's runtime.
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(worker_id = spec.id, error = %e, "failed to create worker runtime");
            return;
        }
    };

    let mut processed = 0usize;
    loop {
        if let Some(limit) = spec.max_tasks {
            if processed >= limit {
                debug!(
                    worker_id = spec.id,
                    processed, "worker reached task limit, retiring"
                );
                break;
            }
        }

        // Blocking wait; a closed channel is the clean exit signal.
        let Ok(task) = spec.task_rx.recv() else {
            debug!(worker_id = spec.id, "task channel closed, worker exiting");
            break;
        };

        let ctx = TaskContext {
            task_id: task.id,
            worker_id: spec.id,
        };

        if spec.wrap_panics {
            let executor = spec.executor.clone();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                rt.block_on(executor.execute(task.payload, ctx))
            }));
            match outcome {
                Ok(value) => {
                    spec.results.store(task.id, Ok(value));
                    spec.counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(worker_id = spec.id, task_id = task.id, %message, "task panicked");
                    spec.results.store(task.id, Err(message));
                    spec.counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
                }
            }
        } else {
            // Unwrapped mode: a panic unwinds through here, kills the
            // worker, and surfaces as a worker loss at repopulation.
            let value = rt.block_on(spec.executor.execute(task.payload, ctx));
            spec.results.store(task.id, Ok(value));
            spec.counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
        }
        processed += 1;
    }

    spec.retired.store(true, Ordering::Release);

    if spec.ipc_release {
        if let Err(e) = coord::release_resources() {
            warn!(worker_id = spec.id, error = %e, "cannot release coordination resources");
        }
    }
    debug!(worker_id = spec.id, processed, "worker exited");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload.downcast_ref::<&str>().map_or_else(
        || {
            payload
                .downcast_ref::<String>()
                .cloned()
                .unwrap_or_else(|| "task panicked".into())
        },
        |s| (*s).to_string(),
    )
}
