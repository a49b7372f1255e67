//! # coordpool
//!
//! A coordinated worker-pool execution layer that multiplexes many
//! independent pools over a single process-wide concurrency budget.
//!
//! Numeric workloads routinely stack several layers of parallelism: the
//! application spawns a pool of workers, each worker calls into a numeric
//! library that spins up its own threads, and suddenly a 16-core machine is
//! running hundreds of runnable threads. This crate provides the glue layer
//! that keeps those layers honest:
//!
//! - **Concurrency budget**: a process-wide, scope-guarded cap on parallel
//!   execution width that every pool created through this crate respects.
//! - **Worker supervision**: fixed-capacity pools of dedicated workers fed
//!   from a blocking task queue, with automatic repopulation after a worker
//!   exits, crashes, or retires at its task limit.
//! - **Environment coordination**: threading-layer environment variables are
//!   set for the duration of an activation scope (and propagated to child
//!   processes) so third-party numeric runtimes pick a matching backend.
//! - **Scoped activation**: a nestable, guaranteed-restoring context that
//!   swaps coordinated pool factories into a process-wide registry and
//!   restores every prior binding on exit, normal or panicking.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use coordpool::core::{registry, ActivationScope};
//! use coordpool::config::{PoolOptions, ScopeOptions};
//! use std::time::Duration;
//!
//! let _scope = ActivationScope::enter(ScopeOptions::new().with_max_parallelism(4))?;
//!
//! // Pools requested through the registry are now budget-aware.
//! let pool = registry::process_pool_factory().create(PoolOptions::new())?;
//! let ticket = pool.submit(|| 21 * 2)?;
//! let answer: i32 = pool.retrieve(&ticket, Duration::from_secs(5))?;
//! assert_eq!(answer, 42);
//! // Scope drop restores the environment and the prior factory bindings.
//! ```
//!
//! ## Delivery guarantee
//!
//! Tasks in flight when a worker is lost are **not** retried: delivery is
//! at-most-once. A task that panics inside a worker is captured and
//! forwarded to the caller as `PoolError::TaskFailed` rather than crashing
//! the worker, unless panic wrapping is disabled in the pool configuration,
//! in which case the worker dies and is repopulated.
//!
//! For complete examples, see `tests/worker_pool_test.rs` and
//! `tests/scope_test.rs`.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Budget control, worker supervision, scoped activation, and errors.
pub mod core;
/// Configuration models for pools and activation scopes.
pub mod config;
/// Builders to construct worker pools from configuration.
pub mod builders;
/// Infrastructure adapters: the environment contract and the optional
/// inter-process coordination library.
pub mod infra;
/// Launching target programs under a coordinated environment.
pub mod runtime;
/// Shared utilities.
pub mod util;
