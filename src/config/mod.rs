//! Configuration models for pools and activation scopes.

pub mod pool;

pub use pool::{PoolOptions, ScopeOptions, WorkerPoolConfig};
