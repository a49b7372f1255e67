//! Pool and activation-scope configuration structures.

use serde::{Deserialize, Serialize};

const DEFAULT_QUEUE_DEPTH: usize = 256;
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

fn hardware_workers() -> usize {
    num_cpus::get().max(1)
}

/// Worker pool configuration.
///
/// `capacity` defaults to the hardware worker count; every other field has
/// a conservative default, so `WorkerPoolConfig::new()` is a usable pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of workers the pool keeps alive.
    pub capacity: usize,
    /// Maximum queued tasks before `submit` blocks.
    pub max_queue_depth: usize,
    /// Tasks a worker processes before it retires and is replaced.
    /// `None` means workers live for the pool's lifetime.
    pub max_tasks_per_worker: Option<usize>,
    /// Capture task panics and forward them to the caller as failures.
    /// When disabled, a panicking task kills its worker.
    pub wrap_panics: bool,
    /// Stack size for worker threads, in bytes.
    pub thread_stack_size: usize,
    /// Run the inter-process coordination release hook when a worker exits.
    pub ipc_release: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            capacity: hardware_workers(),
            max_queue_depth: DEFAULT_QUEUE_DEPTH,
            max_tasks_per_worker: None,
            wrap_panics: true,
            thread_stack_size: DEFAULT_STACK_SIZE,
            ipc_release: false,
        }
    }
}

impl WorkerPoolConfig {
    /// Configuration with hardware-sized capacity and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the task queue depth.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Retire each worker after it has processed `n` tasks.
    #[must_use]
    pub const fn with_max_tasks_per_worker(mut self, n: usize) -> Self {
        self.max_tasks_per_worker = Some(n);
        self
    }

    /// Control whether task panics are captured or kill the worker.
    #[must_use]
    pub const fn with_wrap_panics(mut self, wrap: bool) -> Self {
        self.wrap_panics = wrap;
        self
    }

    /// Set the worker thread stack size in bytes.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Enable the coordination release hook on worker exit.
    #[must_use]
    pub const fn with_ipc_release(mut self, enabled: bool) -> Self {
        self.ipc_release = enabled;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.max_tasks_per_worker == Some(0) {
            return Err("max_tasks_per_worker must be greater than 0".into());
        }
        if self.thread_stack_size == 0 {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse a pool configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Options a caller hands to a registry pool factory. Unset fields fall
/// back to the factory's coordinated defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Requested worker capacity; factories may clamp it to the budget.
    pub capacity: Option<usize>,
    /// Retire each worker after this many tasks.
    pub max_tasks_per_worker: Option<usize>,
}

impl PoolOptions {
    /// Options with every field unset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a specific worker capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Retire each worker after it has processed `n` tasks.
    #[must_use]
    pub const fn with_max_tasks_per_worker(mut self, n: usize) -> Self {
        self.max_tasks_per_worker = Some(n);
        self
    }
}

/// Options for entering an activation scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeOptions {
    /// Cap on process-wide parallelism for the scope's duration.
    pub max_parallelism: Option<usize>,
    /// Enable inter-process coordination (Linux only; elsewhere a no-op).
    pub ipc: bool,
}

impl ScopeOptions {
    /// Options with no parallelism cap and IPC disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap process-wide parallelism while the scope is active.
    #[must_use]
    pub const fn with_max_parallelism(mut self, n: usize) -> Self {
        self.max_parallelism = Some(n);
        self
    }

    /// Enable inter-process coordination.
    #[must_use]
    pub const fn with_ipc(mut self, enabled: bool) -> Self {
        self.ipc = enabled;
        self
    }
}
