//! Error types for pool and activation operations.

use thiserror::Error;

/// Errors produced by pools, the budget controller, and activation scopes.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A caller-supplied value is out of range (zero capacity, zero budget).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The inter-process coordination resource is missing or unloadable.
    /// Callers log this and continue uncoordinated; it is never fatal.
    #[error("coordination resource unavailable: {0}")]
    WorkerUnavailable(String),
    /// A task panicked inside a worker; the panic payload is forwarded
    /// to the caller as data rather than crashing the worker.
    #[error("task failed: {0}")]
    TaskFailed(String),
    /// The pool has been closed and no longer accepts or serves work.
    #[error("pool has been shut down")]
    PoolShutdown,
    /// A result did not arrive within the caller's deadline.
    #[error("operation timed out")]
    Timeout,
    /// No result slot exists for the given ticket.
    #[error("result not found")]
    ResultNotFound,
    /// Internal failure (channel disconnect, result type mismatch).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
