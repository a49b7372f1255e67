//! Launching target programs under a coordinated environment.
//!
//! The launcher is transparent to the child: it applies the environment
//! contract, runs the program inside an activation scope, and hands the
//! child's own exit status straight back. No additional exit codes are
//! introduced by this layer.

use std::process::Command;

use anyhow::Context;
use tracing::{debug, info};

use crate::config::ScopeOptions;
use crate::core::error::AppResult;
use crate::core::scope::ActivationScope;
use crate::infra::env;

/// What to run and under which coordination settings.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments passed through verbatim.
    pub args: Vec<String>,
    /// Cap on parallelism advertised to the child's process tree.
    pub max_parallelism: Option<usize>,
    /// Enable inter-process coordination (Linux only).
    pub ipc: bool,
}

/// Run the target program to completion and return its exit code.
///
/// The activation scope brackets the child's lifetime, so the parent's
/// environment is restored once the child exits; the child keeps the
/// coordinated variables it was started with.
///
/// # Errors
///
/// Fails when the program cannot be spawned or the scope options are
/// invalid. A child that runs and exits nonzero is not an error here;
/// its code is returned for the caller to propagate.
pub fn run(spec: &LaunchSpec) -> AppResult<i32> {
    let mut options = ScopeOptions::new().with_ipc(spec.ipc);
    if let Some(n) = spec.max_parallelism {
        options = options.with_max_parallelism(n);
    }
    let scope = ActivationScope::enter(options)?;

    info!(program = %spec.program, ipc = spec.ipc, "launching coordinated child");
    let status = Command::new(&spec.program)
        .args(&spec.args)
        .envs(env::child_env(spec.ipc))
        .status()
        .with_context(|| format!("failed to launch `{}`", spec.program))?;
    scope.exit();

    // A signal-terminated child has no code; report conventional 128+n
    // behavior as a plain failure code.
    let code = status.code().unwrap_or(1);
    debug!(program = %spec.program, code, "child exited");
    Ok(code)
}
