//! Integration tests for the activation scope.
//!
//! Covered scenarios:
//! - the full coordinated workflow: enter a scope, obtain a pool from
//!   the registry, run a batch, leave, and observe full restoration
//! - environment selectors visible inside the scope and gone after it
//! - restoration after a panic inside the coordinated region
//! - nested scope budgets
//! - requesting IPC when the coordination library is absent degrades to
//!   uncoordinated execution instead of failing

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use coordpool::config::{PoolOptions, ScopeOptions};
use coordpool::core::{budget, registry, ActivationScope};
use coordpool::infra::env;

/// Scope effects are process-global, so the tests in this binary must
/// not interleave.
static SCOPE_TEST_LOCK: Mutex<()> = Mutex::new(());

fn layer() -> Option<String> {
    env::capture(env::THREADING_LAYER_VAR)
}

#[test]
fn test_coordinated_workflow_end_to_end() {
    let _l = SCOPE_TEST_LOCK.lock();
    std::env::remove_var(env::THREADING_LAYER_VAR);
    let plain = registry::process_pool_factory();

    let scope = ActivationScope::enter(ScopeOptions::new().with_max_parallelism(2)).unwrap();

    // Inside the scope the registry serves the coordinated factory and
    // the environment points numeric libraries at the coordinated layer.
    assert!(!Arc::ptr_eq(&plain, &registry::process_pool_factory()));
    assert_eq!(layer(), Some(env::THREADING_LAYER_VALUE.into()));
    assert_eq!(budget::current_max_parallelism(), Some(2));

    let pool = registry::process_pool_factory()
        .create(PoolOptions::new().with_capacity(8))
        .unwrap();
    // Capacity was clamped to the budget, not the request.
    assert_eq!(pool.stats().capacity, 2);

    let jobs: Vec<_> = (0u64..32).map(|i| move || i * 3).collect();
    let results = pool.map(jobs, Duration::from_secs(30)).unwrap();
    assert_eq!(results, (0u64..32).map(|i| i * 3).collect::<Vec<_>>());
    pool.close();
    pool.join();

    scope.exit();

    assert!(Arc::ptr_eq(&plain, &registry::process_pool_factory()));
    assert_eq!(layer(), None);
    assert_eq!(budget::current_max_parallelism(), None);
}

#[test]
fn test_environment_selectors_inside_scope() {
    let _l = SCOPE_TEST_LOCK.lock();
    std::env::remove_var(env::THREADING_LAYER_VAR);
    std::env::remove_var(env::BLOCK_TIME_VAR);

    {
        let _scope = ActivationScope::enter(ScopeOptions::new()).unwrap();
        assert_eq!(layer(), Some(env::THREADING_LAYER_VALUE.into()));
        assert_eq!(
            env::capture(env::BLOCK_TIME_VAR),
            Some(env::BLOCK_TIME_DEFAULT.into())
        );
        assert_eq!(env::capture(env::IPC_FLAG_VAR), Some("0".into()));
    }
    assert_eq!(layer(), None);
}

#[test]
fn test_panic_inside_scope_still_restores() {
    let _l = SCOPE_TEST_LOCK.lock();
    std::env::remove_var(env::THREADING_LAYER_VAR);
    let plain = registry::thread_pool_factory();

    let outcome = std::panic::catch_unwind(|| {
        let _scope =
            ActivationScope::enter(ScopeOptions::new().with_max_parallelism(3)).unwrap();
        panic!("caller failure inside the coordinated region");
    });
    assert!(outcome.is_err());

    assert!(Arc::ptr_eq(&plain, &registry::thread_pool_factory()));
    assert_eq!(layer(), None);
    assert_eq!(budget::current_max_parallelism(), None);
}

#[test]
fn test_nested_scope_budgets() {
    let _l = SCOPE_TEST_LOCK.lock();

    let outer = ActivationScope::enter(ScopeOptions::new().with_max_parallelism(8)).unwrap();
    assert_eq!(budget::current_max_parallelism(), Some(8));
    {
        let inner = ActivationScope::enter(ScopeOptions::new().with_max_parallelism(2)).unwrap();
        assert_eq!(budget::current_max_parallelism(), Some(2));
        inner.exit();
    }
    assert_eq!(budget::current_max_parallelism(), Some(8));
    outer.exit();
    assert_eq!(budget::current_max_parallelism(), None);
}

/// The coordination library is not installed on test machines; asking
/// for IPC must degrade with a warning, not fail the scope or the work.
#[test]
fn test_missing_coordination_library_degrades_gracefully() {
    let _l = SCOPE_TEST_LOCK.lock();

    let scope = ActivationScope::enter(ScopeOptions::new().with_ipc(true)).unwrap();
    assert_eq!(env::capture(env::IPC_FLAG_VAR), Some("1".into()));

    let pool = registry::thread_pool_factory()
        .create(PoolOptions::new().with_capacity(2))
        .unwrap();
    let jobs: Vec<_> = (0u64..8).map(|i| move || i + 100).collect();
    let results = pool.map(jobs, Duration::from_secs(30)).unwrap();
    assert_eq!(results, (100u64..108).collect::<Vec<_>>());
    pool.close();
    pool.join();

    scope.exit();
}
