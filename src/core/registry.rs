//! Context-scoped pool factory registry.
//!
//! Instead of rebinding global pool constructors, callers request a
//! factory from this registry under a symbolic name. The registry is the
//! only process-wide mutable state of the activation layer; the
//! activation scope swaps coordinated factories in on entry and restores
//! the prior bindings on exit, so code that asks for a pool inside a
//! scope transparently gets a budget-aware one.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::{PoolOptions, WorkerPoolConfig};

use super::budget;
use super::error::PoolError;
use super::executor::{TaskContext, WorkerExecutor};
use super::worker_pool::{PoolStats, TaskTicket, WorkerPool};

/// Binding name for the process-pool flavor.
pub const PROCESS_POOL: &str = "process_pool";
/// Binding name for the thread-pool flavor.
pub const THREAD_POOL: &str = "thread_pool";

/// Type-erased unit of work for [`TaskPool`].
type Job = Box<dyn FnOnce() -> Box<dyn Any + Send> + Send + 'static>;

#[derive(Clone)]
struct ClosureExecutor;

#[async_trait]
impl WorkerExecutor<Job, Box<dyn Any + Send>> for ClosureExecutor {
    async fn execute(&self, payload: Job, _ctx: TaskContext) -> Box<dyn Any + Send> {
        payload()
    }
}

/// A worker pool that runs arbitrary closures and hands results back as
/// their concrete types.
///
/// This is the pool flavor the registry serves: submission takes any
/// `FnOnce() -> T + Send` and retrieval downcasts back to `T`. The
/// supervision contract (eager spawn, repopulation, two-phase teardown)
/// is inherited from [`WorkerPool`].
pub struct TaskPool {
    inner: WorkerPool<Job, Box<dyn Any + Send>, ClosureExecutor>,
}

impl TaskPool {
    /// Build a closure pool from a full worker-pool configuration.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidArgument` for an invalid configuration.
    pub fn from_config(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        Ok(Self {
            inner: WorkerPool::new(config, ClosureExecutor)?,
        })
    }

    /// Submit a closure for execution.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::PoolShutdown` after close.
    pub fn submit<T, F>(&self, f: F) -> Result<TaskTicket, PoolError>
    where
        T: Any + Send,
        F: FnOnce() -> T + Send + 'static,
    {
        self.inner
            .submit(Box::new(move || Box::new(f()) as Box<dyn Any + Send>))
    }

    /// Wait for a submitted closure's result and downcast it to `T`.
    ///
    /// # Errors
    ///
    /// Everything [`WorkerPool::retrieve`] reports, plus
    /// `PoolError::Internal` when `T` is not the type the closure
    /// returned.
    pub fn retrieve<T: Any>(&self, ticket: &TaskTicket, timeout: Duration) -> Result<T, PoolError> {
        let boxed = self.inner.retrieve(ticket, timeout)?;
        boxed
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| PoolError::Internal("result type mismatch on retrieval".into()))
    }

    /// Run a batch of closures and collect their results in input order,
    /// regardless of completion order.
    ///
    /// # Errors
    ///
    /// Propagates the first submission or retrieval error.
    pub fn map<T, F>(&self, fs: Vec<F>, timeout: Duration) -> Result<Vec<T>, PoolError>
    where
        T: Any + Send,
        F: FnOnce() -> T + Send + 'static,
    {
        let tickets: Vec<TaskTicket> = fs
            .into_iter()
            .map(|f| self.submit(f))
            .collect::<Result<_, _>>()?;
        tickets
            .iter()
            .map(|ticket| self.retrieve(ticket, timeout))
            .collect()
    }

    /// Bring the worker headcount back up to capacity; see
    /// [`WorkerPool::repopulate`].
    pub fn repopulate(&self) -> usize {
        self.inner.repopulate()
    }

    /// Stop accepting tasks; see [`WorkerPool::close`].
    pub fn close(&self) {
        self.inner.close();
    }

    /// Wait for every worker to terminate; see [`WorkerPool::join`].
    pub fn join(&self) {
        self.inner.join();
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }
}

/// Produces [`TaskPool`]s. Implementations decide how caller options are
/// reconciled with the process-wide budget.
pub trait PoolFactory: Send + Sync {
    /// Create a pool for the given options.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidArgument` for unusable options.
    fn create(&self, opts: PoolOptions) -> Result<TaskPool, PoolError>;
}

/// Default factory: honors the caller's options as-is, hardware-sized
/// capacity when unspecified, no coordination hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainPoolFactory;

impl PoolFactory for PlainPoolFactory {
    fn create(&self, opts: PoolOptions) -> Result<TaskPool, PoolError> {
        let mut config =
            WorkerPoolConfig::new().with_capacity(opts.capacity.unwrap_or_else(budget::default_num_threads));
        config.max_tasks_per_worker = opts.max_tasks_per_worker;
        TaskPool::from_config(config)
    }
}

/// Budget-aware factory installed by the activation scope. Requested
/// capacity is clamped to the active budget, and workers run the
/// coordination release hook when IPC is enabled.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatedPoolFactory {
    /// Whether created pools participate in inter-process coordination.
    pub ipc: bool,
}

impl PoolFactory for CoordinatedPoolFactory {
    fn create(&self, opts: PoolOptions) -> Result<TaskPool, PoolError> {
        let requested = opts.capacity.unwrap_or_else(budget::effective_parallelism);
        let capacity = budget::current_max_parallelism()
            .map_or(requested, |cap| requested.min(cap))
            .max(1);
        if capacity != requested {
            debug!(requested, capacity, "pool capacity clamped to budget");
        }
        let mut config = WorkerPoolConfig::new()
            .with_capacity(capacity)
            .with_ipc_release(self.ipc);
        config.max_tasks_per_worker = opts.max_tasks_per_worker;
        TaskPool::from_config(config)
    }
}

type Bindings = HashMap<&'static str, Arc<dyn PoolFactory>>;

static REGISTRY: OnceLock<RwLock<Bindings>> = OnceLock::new();

fn registry() -> &'static RwLock<Bindings> {
    REGISTRY.get_or_init(|| {
        let mut bindings: Bindings = HashMap::new();
        bindings.insert(PROCESS_POOL, Arc::new(PlainPoolFactory));
        bindings.insert(THREAD_POOL, Arc::new(PlainPoolFactory));
        RwLock::new(bindings)
    })
}

/// Look up a factory binding by name.
#[must_use]
pub fn factory(name: &str) -> Option<Arc<dyn PoolFactory>> {
    registry().read().get(name).cloned()
}

/// The factory currently bound for the process-pool flavor.
///
/// # Panics
///
/// Never panics in practice: the default binding is installed on first
/// registry access and scopes restore what they replace.
#[must_use]
pub fn process_pool_factory() -> Arc<dyn PoolFactory> {
    factory(PROCESS_POOL).unwrap_or_else(|| Arc::new(PlainPoolFactory))
}

/// The factory currently bound for the thread-pool flavor.
#[must_use]
pub fn thread_pool_factory() -> Arc<dyn PoolFactory> {
    factory(THREAD_POOL).unwrap_or_else(|| Arc::new(PlainPoolFactory))
}

/// Bind a factory under a symbolic name, returning the prior binding.
pub fn bind(name: &'static str, factory: Arc<dyn PoolFactory>) -> Option<Arc<dyn PoolFactory>> {
    registry().write().insert(name, factory)
}

/// Restore a binding captured earlier by [`bind`]; a `None` capture
/// removes the name.
pub fn restore(name: &'static str, prior: Option<Arc<dyn PoolFactory>>) {
    let mut bindings = registry().write();
    match prior {
        Some(factory) => {
            bindings.insert(name, factory);
        }
        None => {
            bindings.remove(name);
        }
    }
}
