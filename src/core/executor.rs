//! Task execution seam for worker pools.

use async_trait::async_trait;

/// Where and as what a task is running. Handed to the executor so task
/// results can be correlated with the worker that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    /// Pool-unique task identifier (submission order).
    pub task_id: u64,
    /// Sequential identifier of the executing worker.
    pub worker_id: u64,
}

/// Abstraction for executing a task payload and producing a result.
///
/// On native platforms the executor runs on a dedicated worker thread with
/// its own single-threaded tokio runtime, so blocking and CPU-bound work
/// never touches the caller's async runtime. Result types carry no
/// serialization requirement; channels and handles are fine.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use coordpool::core::{TaskContext, WorkerExecutor};
///
/// #[derive(Clone)]
/// struct Square;
///
/// #[async_trait]
/// impl WorkerExecutor<u64, u64> for Square {
///     async fn execute(&self, payload: u64, _ctx: TaskContext) -> u64 {
///         payload * payload
///     }
/// }
/// ```
#[async_trait]
pub trait WorkerExecutor<P, R>: Send + Sync + Clone + 'static
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Execute a task payload and return the result.
    ///
    /// A panic here is captured and forwarded to the caller when the pool
    /// is configured to wrap panics; otherwise it tears down the worker,
    /// which the supervisor then replaces.
    async fn execute(&self, payload: P, ctx: TaskContext) -> R;
}
