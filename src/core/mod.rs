//! Budget control, worker supervision, scoped activation, and errors.

pub mod budget;
pub mod error;
pub mod executor;
pub mod registry;
pub mod scope;
pub mod worker_pool;

pub use budget::{
    activation_depth, current_max_parallelism, default_num_threads, effective_parallelism,
    set_max_parallelism, BudgetGuard,
};
pub use error::{AppResult, PoolError};
pub use executor::{TaskContext, WorkerExecutor};
pub use registry::{CoordinatedPoolFactory, PlainPoolFactory, PoolFactory, TaskPool};
pub use scope::ActivationScope;
pub use worker_pool::{PoolStats, TaskTicket, WorkerInit, WorkerPool};

/// Serializes unit tests that touch process-global state (budget,
/// registry, environment variables).
#[cfg(test)]
pub(crate) static GLOBAL_STATE_TEST_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());
