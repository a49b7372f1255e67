//! Environment contract shared with child processes and numeric runtimes.
//!
//! Three variables make up the contract:
//!
//! - [`THREADING_LAYER_VAR`] selects the coordinated threading backend in
//!   numeric libraries (MKL reads it). Scoped: the activation scope saves
//!   the prior value and restores it, including restore-to-unset.
//! - [`BLOCK_TIME_VAR`] tunes how long OpenMP worker threads spin before
//!   sleeping. Defaulted to `0` once, never overridden when already set.
//! - [`IPC_FLAG_VAR`] tells children whether inter-process coordination
//!   is on.

use std::env;

/// Numeric-library threading-layer selector.
pub const THREADING_LAYER_VAR: &str = "MKL_THREADING_LAYER";
/// Value selecting the coordinated work-stealing backend.
pub const THREADING_LAYER_VALUE: &str = "TBB";
/// OpenMP block-time tuning variable.
pub const BLOCK_TIME_VAR: &str = "KMP_BLOCKTIME";
/// Block-time applied when the variable is absent.
pub const BLOCK_TIME_DEFAULT: &str = "0";
/// Inter-process coordination flag communicated to children.
pub const IPC_FLAG_VAR: &str = "IPC_ENABLE";

/// Current value of an environment variable, `None` when absent.
#[must_use]
pub fn capture(name: &str) -> Option<String> {
    env::var(name).ok()
}

/// Restore a variable to a previously captured value, removing it when
/// the capture was `None`.
pub fn restore(name: &str, prior: Option<&str>) {
    match prior {
        Some(value) => env::set_var(name, value),
        None => env::remove_var(name),
    }
}

/// Point numeric libraries at the coordinated threading backend.
/// Returns the prior value for the scope to restore.
#[must_use]
pub fn select_threading_layer() -> Option<String> {
    let prior = capture(THREADING_LAYER_VAR);
    env::set_var(THREADING_LAYER_VAR, THREADING_LAYER_VALUE);
    prior
}

/// Default the block time to zero so coordinated workers yield their
/// cores promptly. A value already present is left untouched. Returns
/// whether the default was applied.
pub fn apply_block_time_default() -> bool {
    if capture(BLOCK_TIME_VAR).is_some() {
        return false;
    }
    env::set_var(BLOCK_TIME_VAR, BLOCK_TIME_DEFAULT);
    true
}

/// Communicate the IPC flag to children of this process.
pub fn set_ipc_flag(enabled: bool) {
    env::set_var(IPC_FLAG_VAR, if enabled { "1" } else { "0" });
}

/// The variables a coordinated child process should start with.
#[must_use]
pub fn child_env(ipc: bool) -> Vec<(&'static str, String)> {
    vec![
        (THREADING_LAYER_VAR, THREADING_LAYER_VALUE.to_string()),
        (
            BLOCK_TIME_VAR,
            capture(BLOCK_TIME_VAR).unwrap_or_else(|| BLOCK_TIME_DEFAULT.to_string()),
        ),
        (IPC_FLAG_VAR, (if ipc { "1" } else { "0" }).to_string()),
    ]
}
