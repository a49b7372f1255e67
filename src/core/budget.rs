//! Process-wide concurrency budget with scope-guarded overrides.
//!
//! The budget is the single value the external work-stealing scheduler
//! queries to decide how many hardware threads it may use. It is mutated
//! only through [`set_max_parallelism`], which returns a guard restoring
//! the immediately prior value on drop. Guards compose correctly when
//! their lifetimes nest like a stack; releasing overlapping guards out of
//! nesting order yields a last-writer-wins value. That is a documented
//! limitation, never a panic.

use parking_lot::Mutex;
use tracing::debug;

use super::error::PoolError;

/// Process-wide budget state. `value` is unset until the first override;
/// `depth` counts active guards so the outermost release clears the value.
struct BudgetState {
    value: Option<usize>,
    depth: usize,
}

static BUDGET: Mutex<BudgetState> = Mutex::new(BudgetState {
    value: None,
    depth: 0,
});

/// Guard returned by [`set_max_parallelism`]. Dropping it restores the
/// budget to the value observed immediately before the override.
#[derive(Debug)]
pub struct BudgetGuard {
    prior: Option<usize>,
}

impl Drop for BudgetGuard {
    fn drop(&mut self) {
        let mut state = BUDGET.lock();
        state.value = self.prior;
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            // Outermost release: back to "no override requested".
            state.value = None;
        }
        debug!(restored = ?state.value, depth = state.depth, "budget override released");
    }
}

/// Override the process-wide maximum parallelism for the guard's lifetime.
///
/// # Errors
///
/// Returns `PoolError::InvalidArgument` when `n == 0`. No upper bound is
/// enforced here; the external scheduler clamps to hardware limits.
pub fn set_max_parallelism(n: usize) -> Result<BudgetGuard, PoolError> {
    if n == 0 {
        return Err(PoolError::InvalidArgument(
            "max parallelism must be greater than 0".into(),
        ));
    }
    let mut state = BUDGET.lock();
    let prior = state.value;
    state.value = Some(n);
    state.depth += 1;
    debug!(max_parallelism = n, prior = ?prior, depth = state.depth, "budget override set");
    Ok(BudgetGuard { prior })
}

/// The currently requested maximum parallelism, if any override is active.
#[must_use]
pub fn current_max_parallelism() -> Option<usize> {
    BUDGET.lock().value
}

/// The width pools should actually use: the active override, or the
/// hardware default when no override is in effect.
#[must_use]
pub fn effective_parallelism() -> usize {
    current_max_parallelism().unwrap_or_else(default_num_threads)
}

/// Number of active budget guards.
#[must_use]
pub fn activation_depth() -> usize {
    BUDGET.lock().depth
}

/// Hardware default worker count, as the external scheduler reports it.
#[must_use]
pub fn default_num_threads() -> usize {
    num_cpus::get().max(1)
}
