//! Builder assembling worker pools from configuration plus the
//! non-serializable pieces (executor, initializer closure).

use std::sync::Arc;

use crate::config::WorkerPoolConfig;
use crate::core::error::PoolError;
use crate::core::executor::WorkerExecutor;
use crate::core::worker_pool::{WorkerInit, WorkerPool};

/// Staged construction of a [`WorkerPool`].
///
/// ```rust,ignore
/// let pool = PoolBuilder::new()
///     .config(WorkerPoolConfig::new().with_capacity(4))
///     .initializer(|worker_id| setup_thread_locals(worker_id))
///     .build(my_executor)?;
/// ```
#[derive(Default)]
pub struct PoolBuilder {
    config: WorkerPoolConfig,
    initializer: Option<WorkerInit>,
}

impl PoolBuilder {
    /// Builder with default configuration and no initializer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pool configuration.
    #[must_use]
    pub fn config(mut self, config: WorkerPoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `init` once in each worker (including replacements) before it
    /// consumes tasks.
    #[must_use]
    pub fn initializer<F>(mut self, init: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(init));
        self
    }

    /// Build the pool, spawning its full worker complement.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidArgument` for an invalid configuration.
    pub fn build<P, R, E>(self, executor: E) -> Result<WorkerPool<P, R, E>, PoolError>
    where
        P: Send + 'static,
        R: Send + 'static,
        E: WorkerExecutor<P, R>,
    {
        WorkerPool::with_initializer(self.config, executor, self.initializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::TaskContext;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Clone)]
    struct Echo;

    #[async_trait]
    impl WorkerExecutor<String, String> for Echo {
        async fn execute(&self, payload: String, _ctx: TaskContext) -> String {
            payload
        }
    }

    #[test]
    fn test_builder_produces_working_pool() {
        let pool = PoolBuilder::new()
            .config(WorkerPoolConfig::new().with_capacity(2))
            .initializer(|_worker_id| {})
            .build(Echo)
            .unwrap();
        let ticket = pool.submit("ping".to_string()).unwrap();
        assert_eq!(pool.retrieve(&ticket, Duration::from_secs(5)).unwrap(), "ping");
        pool.close();
        pool.join();
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = PoolBuilder::new()
            .config(WorkerPoolConfig::new().with_capacity(0))
            .build::<String, String, _>(Echo);
        assert!(matches!(result, Err(PoolError::InvalidArgument(_))));
    }
}
