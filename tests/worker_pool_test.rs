//! Integration tests for worker pool supervision.
//!
//! Covered scenarios:
//! - eager spawn to capacity and headcount reporting
//! - batch execution across a small pool with result re-association
//! - worker retirement at the per-worker task limit
//! - worker loss on an unwrapped panic, automatic repopulation, and the
//!   at-most-once fate of the task the lost worker was holding
//! - two-phase teardown (close then join) and its idempotence

use std::time::Duration;

use async_trait::async_trait;

use coordpool::config::WorkerPoolConfig;
use coordpool::core::{PoolError, TaskContext, WorkerExecutor, WorkerPool};

// ---------------------------------------------------------------------
// Test executors
// ---------------------------------------------------------------------

#[derive(Clone)]
struct SquareExecutor;

#[async_trait]
impl WorkerExecutor<u64, u64> for SquareExecutor {
    async fn execute(&self, payload: u64, _ctx: TaskContext) -> u64 {
        payload * payload
    }
}

/// Panics on a sentinel payload, answers everything else. Used with
/// `wrap_panics` disabled to kill a worker mid-task.
#[derive(Clone)]
struct CrashOnSentinel;

const SENTINEL: u64 = u64::MAX;

#[async_trait]
impl WorkerExecutor<u64, u64> for CrashOnSentinel {
    async fn execute(&self, payload: u64, _ctx: TaskContext) -> u64 {
        assert!(payload != SENTINEL, "sentinel payload received");
        payload + 1
    }
}

fn config(capacity: usize) -> WorkerPoolConfig {
    WorkerPoolConfig::new()
        .with_capacity(capacity)
        .with_max_queue_depth(128)
}

/// Poll a condition with a deadline. Only used to observe asynchronous
/// supervision effects from outside the pool.
fn wait_until<F: FnMut() -> bool>(mut cond: F, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

// ---------------------------------------------------------------------
// Population
// ---------------------------------------------------------------------

#[test]
fn test_pool_spawns_full_complement_eagerly() {
    let pool = WorkerPool::new(config(4), SquareExecutor).unwrap();
    let stats = pool.stats();
    assert_eq!(stats.capacity, 4);
    assert_eq!(stats.live_workers, 4);
    assert_eq!(stats.spawned_workers, 4);

    let ids = pool.worker_ids();
    assert_eq!(ids.len(), 4);

    pool.close();
    pool.join();
}

#[test]
fn test_batch_on_small_pool_yields_expected_results() {
    let pool = WorkerPool::new(config(4), SquareExecutor).unwrap();
    let inputs: Vec<u64> = (0..50).collect();
    let results = pool.map(inputs, Duration::from_secs(30)).unwrap();
    assert_eq!(results, (0..50).map(|i| i * i).collect::<Vec<u64>>());

    let stats = pool.stats();
    assert_eq!(stats.submitted_tasks, 50);
    assert_eq!(stats.completed_tasks, 50);
    assert_eq!(stats.lost_workers, 0);

    pool.close();
    pool.join();
}

#[test]
fn test_task_limit_forces_worker_turnover() {
    let pool = WorkerPool::new(
        config(2).with_max_tasks_per_worker(1),
        SquareExecutor,
    )
    .unwrap();

    let inputs: Vec<u64> = (0..10).collect();
    let results = pool.map(inputs, Duration::from_secs(30)).unwrap();
    assert_eq!(results, (0..10).map(|i| i * i).collect::<Vec<u64>>());

    // One task per worker lifetime means at least one spawn per task.
    assert!(pool.stats().spawned_workers >= 10);

    pool.close();
    pool.join();
}

// ---------------------------------------------------------------------
// Worker loss and recovery
// ---------------------------------------------------------------------

#[test]
fn test_lost_worker_is_replaced_and_task_is_not_redelivered() {
    let cfg = config(2).with_wrap_panics(false);
    let pool = WorkerPool::new(cfg, CrashOnSentinel).unwrap();

    let doomed = pool.submit(SENTINEL).unwrap();

    // Supervision notices the death and restores the headcount without
    // any call from this side.
    assert!(
        wait_until(
            || pool.stats().lost_workers == 1 && pool.stats().live_workers == 2,
            Duration::from_secs(10)
        ),
        "lost worker was not replaced: {:?}",
        pool.stats()
    );

    // The task the dead worker was holding is gone for good.
    assert!(matches!(
        pool.retrieve(&doomed, Duration::from_millis(200)),
        Err(PoolError::Timeout)
    ));

    // The replacement worker serves new tasks normally.
    let ticket = pool.submit(7).unwrap();
    assert_eq!(pool.retrieve(&ticket, Duration::from_secs(5)).unwrap(), 8);

    pool.close();
    pool.join();
}

#[test]
fn test_direct_repopulate_restores_capacity_and_is_idempotent() {
    let cfg = config(2).with_wrap_panics(false);
    let pool = WorkerPool::new(cfg, CrashOnSentinel).unwrap();

    let _doomed = pool.submit(SENTINEL).unwrap();

    // Drive recovery through the direct call until the loss is
    // accounted and the headcount is back at capacity.
    assert!(
        wait_until(
            || {
                pool.repopulate();
                pool.stats().lost_workers == 1 && pool.stats().live_workers == 2
            },
            Duration::from_secs(10)
        ),
        "direct repopulate did not restore capacity: {:?}",
        pool.stats()
    );

    // At full headcount another pass spawns nothing.
    assert_eq!(pool.repopulate(), 0);
    assert_eq!(pool.stats().live_workers, 2);

    pool.close();
    assert_eq!(pool.repopulate(), 0);
    pool.join();
}

#[test]
fn test_wrapped_panic_keeps_worker_alive() {
    let pool = WorkerPool::new(config(1), CrashOnSentinel).unwrap();

    let ticket = pool.submit(SENTINEL).unwrap();
    let err = pool.retrieve(&ticket, Duration::from_secs(5)).unwrap_err();
    assert!(matches!(err, PoolError::TaskFailed(_)));

    let stats = pool.stats();
    assert_eq!(stats.live_workers, 1);
    assert_eq!(stats.lost_workers, 0);
    assert_eq!(stats.failed_tasks, 1);

    let ticket = pool.submit(1).unwrap();
    assert_eq!(pool.retrieve(&ticket, Duration::from_secs(5)).unwrap(), 2);

    pool.close();
    pool.join();
}

// ---------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------

#[test]
fn test_close_drains_queued_tasks_before_workers_exit() {
    let pool = WorkerPool::new(config(2), SquareExecutor).unwrap();
    let tickets: Vec<_> = (0..8).map(|i| pool.submit(i).unwrap()).collect();

    pool.close();
    assert!(matches!(pool.submit(99), Err(PoolError::PoolShutdown)));

    // Already-queued work still completes.
    for (i, ticket) in tickets.iter().enumerate() {
        let value = pool.retrieve(ticket, Duration::from_secs(10)).unwrap();
        assert_eq!(value, (i as u64) * (i as u64));
    }

    pool.join();
    assert_eq!(pool.stats().live_workers, 0);
}

#[test]
fn test_close_and_join_are_idempotent() {
    let pool = WorkerPool::new(config(3), SquareExecutor).unwrap();
    pool.close();
    pool.close();
    pool.join();
    pool.join();
    assert_eq!(pool.stats().live_workers, 0);
}
