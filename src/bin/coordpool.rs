//! Run a program inside a coordinated activation scope.
//!
//! ```text
//! coordpool [--ipc] [-p P] <program> [args...]
//! ```
//!
//! The target inherits the coordinated environment (threading-layer
//! selector, block-time default, IPC flag) and its exit code is
//! propagated unchanged, so the wrapper is transparent to scripts and
//! CI pipelines.

use std::process::ExitCode;

use clap::Parser;

use coordpool::core::budget::default_num_threads;
use coordpool::runtime::{run, LaunchSpec};
use coordpool::util::init_tracing;

#[derive(Debug, Parser)]
#[command(
    name = "coordpool",
    version,
    about = "Run a program with coordinated pools and a shared concurrency budget",
    long_about = "Runs the target program inside a coordinated activation scope. \
                  Pools created through the coordpool registry share one concurrency \
                  budget, and the numeric-library threading layer is pointed at the \
                  coordinated backend, avoiding oversubscription when several \
                  parallel layers stack up."
)]
struct Cli {
    /// Enable inter-process (IPC) synchronization (Linux only).
    #[cfg(target_os = "linux")]
    #[arg(long)]
    ipc: bool,

    /// Limit the process to at most P parallel threads.
    #[arg(
        short = 'p',
        long = "max-num-threads",
        value_name = "P",
        default_value_t = default_num_threads()
    )]
    max_num_threads: usize,

    /// Program to run.
    program: String,

    /// Arguments passed to the program verbatim.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl Cli {
    const fn ipc_enabled(&self) -> bool {
        #[cfg(target_os = "linux")]
        {
            self.ipc
        }
        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    }
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let spec = LaunchSpec {
        program: cli.program.clone(),
        args: cli.args.clone(),
        max_parallelism: Some(cli.max_num_threads),
        ipc: cli.ipc_enabled(),
    };

    match run(&spec) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("coordpool: {e:#}");
            ExitCode::FAILURE
        }
    }
}
