//! Scoped activation of the coordinated execution layer.
//!
//! Entering a scope swaps coordinated pool factories into the registry,
//! points the numeric-library environment at the coordinated backend,
//! and (optionally) caps the process-wide budget and initializes
//! inter-process coordination. Every one of those effects is reverted
//! when the scope drops, on every exit path including unwinds. Scopes
//! nest: an inner scope saves and restores the state the outer one
//! installed, not the process defaults.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ScopeOptions;
use crate::infra::{coord, env};

use super::budget::{self, BudgetGuard};
use super::error::PoolError;
use super::registry::{self, CoordinatedPoolFactory, PoolFactory};

/// One entry into the coordinated region. Create with
/// [`ActivationScope::enter`]; restoration happens on drop and is
/// consumed exactly once.
pub struct ActivationScope {
    saved_layer: Option<String>,
    /// Prior factory bindings, in save order; restored in reverse.
    saved_bindings: Vec<(&'static str, Option<Arc<dyn PoolFactory>>)>,
    _budget: Option<BudgetGuard>,
    ipc: bool,
}

impl ActivationScope {
    /// Enter the coordinated region.
    ///
    /// A failure to initialize inter-process coordination is logged and
    /// the scope proceeds uncoordinated; it never propagates.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidArgument` when `max_parallelism` is
    /// zero.
    pub fn enter(options: ScopeOptions) -> Result<Self, PoolError> {
        let _budget = options
            .max_parallelism
            .map(budget::set_max_parallelism)
            .transpose()?;

        let saved_layer = env::select_threading_layer();
        env::apply_block_time_default();
        env::set_ipc_flag(options.ipc);

        if options.ipc {
            match coord::init_semaphores() {
                Ok(()) => debug!("coordination semaphores initialized"),
                Err(e) => warn!(error = %e, "cannot initialize coordination semaphores; continuing uncoordinated"),
            }
        }

        let coordinated = CoordinatedPoolFactory { ipc: options.ipc };
        let saved_bindings = vec![
            (
                registry::PROCESS_POOL,
                registry::bind(registry::PROCESS_POOL, Arc::new(coordinated)),
            ),
            (
                registry::THREAD_POOL,
                registry::bind(registry::THREAD_POOL, Arc::new(coordinated)),
            ),
        ];

        debug!(
            max_parallelism = ?options.max_parallelism,
            ipc = options.ipc,
            "activation scope entered"
        );
        Ok(Self {
            saved_layer,
            saved_bindings,
            _budget,
            ipc: options.ipc,
        })
    }

    /// Leave the scope explicitly. Equivalent to dropping it.
    pub fn exit(self) {
        drop(self);
    }
}

impl Drop for ActivationScope {
    fn drop(&mut self) {
        // Restoration must run on every exit path, panicking regions
        // included, and must itself never panic.
        for (name, prior) in self.saved_bindings.drain(..).rev() {
            registry::restore(name, prior);
        }
        env::restore(env::THREADING_LAYER_VAR, self.saved_layer.as_deref());

        if self.ipc {
            if let Err(e) = coord::release_semaphores() {
                warn!(error = %e, "cannot release coordination semaphores");
            }
        }
        debug!("activation scope exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::time::Duration;

    use crate::config::PoolOptions;
    use crate::core::GLOBAL_STATE_TEST_LOCK;

    fn layer() -> Option<String> {
        env::capture(env::THREADING_LAYER_VAR)
    }

    #[test]
    fn test_enter_exit_restores_environment() {
        let _l = GLOBAL_STATE_TEST_LOCK.lock();
        std::env::remove_var(env::THREADING_LAYER_VAR);

        let scope = ActivationScope::enter(ScopeOptions::new()).unwrap();
        assert_eq!(layer(), Some(env::THREADING_LAYER_VALUE.into()));
        scope.exit();
        assert_eq!(layer(), None);
    }

    #[test]
    fn test_prior_layer_value_restored() {
        let _l = GLOBAL_STATE_TEST_LOCK.lock();
        std::env::set_var(env::THREADING_LAYER_VAR, "GNU");

        {
            let _scope = ActivationScope::enter(ScopeOptions::new()).unwrap();
            assert_eq!(layer(), Some(env::THREADING_LAYER_VALUE.into()));
        }
        assert_eq!(layer(), Some("GNU".into()));
        std::env::remove_var(env::THREADING_LAYER_VAR);
    }

    #[test]
    fn test_bindings_restored_after_panic() {
        let _l = GLOBAL_STATE_TEST_LOCK.lock();
        std::env::remove_var(env::THREADING_LAYER_VAR);
        let before = registry::process_pool_factory();

        let result = catch_unwind(AssertUnwindSafe(|| {
            let _scope = ActivationScope::enter(ScopeOptions::new().with_max_parallelism(2)).unwrap();
            panic!("failure inside the protected region");
        }));
        assert!(result.is_err());

        assert!(Arc::ptr_eq(&before, &registry::process_pool_factory()));
        assert_eq!(layer(), None);
        assert_eq!(budget::current_max_parallelism(), None);
    }

    #[test]
    fn test_zero_tasks_scope_restores() {
        let _l = GLOBAL_STATE_TEST_LOCK.lock();
        std::env::remove_var(env::THREADING_LAYER_VAR);
        let before = registry::thread_pool_factory();
        {
            let _scope = ActivationScope::enter(ScopeOptions::new()).unwrap();
            // No pools requested, no tasks submitted.
        }
        assert!(Arc::ptr_eq(&before, &registry::thread_pool_factory()));
        assert_eq!(layer(), None);
    }

    #[test]
    fn test_budget_applied_and_pool_clamped() {
        let _l = GLOBAL_STATE_TEST_LOCK.lock();
        let _scope = ActivationScope::enter(ScopeOptions::new().with_max_parallelism(2)).unwrap();
        assert_eq!(budget::current_max_parallelism(), Some(2));

        let pool = registry::process_pool_factory()
            .create(PoolOptions::new().with_capacity(8))
            .unwrap();
        assert_eq!(pool.stats().capacity, 2);

        let results = pool
            .map((0..6).map(|i| move || i + 1).collect(), Duration::from_secs(10))
            .unwrap();
        assert_eq!(results, vec![1, 2, 3, 4, 5, 6]);
        pool.close();
        pool.join();
    }

    #[test]
    fn test_nested_scopes_restore_in_order() {
        let _l = GLOBAL_STATE_TEST_LOCK.lock();
        let outer = ActivationScope::enter(ScopeOptions::new().with_max_parallelism(6)).unwrap();
        {
            let inner = ActivationScope::enter(ScopeOptions::new().with_max_parallelism(3)).unwrap();
            assert_eq!(budget::current_max_parallelism(), Some(3));
            inner.exit();
        }
        assert_eq!(budget::current_max_parallelism(), Some(6));
        outer.exit();
        assert_eq!(budget::current_max_parallelism(), None);
    }

    #[test]
    fn test_zero_max_parallelism_rejected() {
        let _l = GLOBAL_STATE_TEST_LOCK.lock();
        let result = ActivationScope::enter(ScopeOptions::new().with_max_parallelism(0));
        assert!(matches!(result, Err(PoolError::InvalidArgument(_))));
    }
}
