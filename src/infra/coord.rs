//! Optional inter-process coordination library, modeled as a capability.
//!
//! On Linux, sibling processes can coordinate their live worker counts
//! through a pair of named semaphores managed by a dynamically loaded
//! resource-manager library. The library may legitimately be absent;
//! every entry point returns a `Result` so callers treat absence as a
//! normal, logged, degraded-mode control path. Nothing here is ever
//! allowed to crash a worker or a scope.
//!
//! FFI boundary: calls into the loaded library are the only unsafe code
//! in the crate.

#![allow(unsafe_code)]

use crate::core::error::PoolError;

/// Soname of the coordination library this shim binds to.
pub const COORD_LIBRARY: &str = "libirml.so.1";

#[cfg(target_os = "linux")]
mod imp {
    use std::sync::OnceLock;

    use libloading::Library;
    use tracing::debug;

    use super::{PoolError, COORD_LIBRARY};

    static LIBRARY: OnceLock<Result<Library, String>> = OnceLock::new();

    fn library() -> Result<&'static Library, PoolError> {
        let loaded = LIBRARY.get_or_init(|| {
            // SAFETY: loading runs the library's constructors; the
            // coordination library is designed to be loaded this way.
            match unsafe { Library::new(COORD_LIBRARY) } {
                Ok(lib) => {
                    debug!(library = COORD_LIBRARY, "coordination library loaded");
                    Ok(lib)
                }
                Err(e) => Err(e.to_string()),
            }
        });
        loaded
            .as_ref()
            .map_err(|e| PoolError::WorkerUnavailable(format!("{COORD_LIBRARY}: {e}")))
    }

    fn call(symbol: &[u8]) -> Result<(), PoolError> {
        let lib = library()?;
        // SAFETY: all exposed entry points are zero-argument C functions.
        let func = unsafe { lib.get::<unsafe extern "C" fn()>(symbol) }.map_err(|e| {
            PoolError::WorkerUnavailable(format!(
                "{COORD_LIBRARY}: missing symbol {}: {e}",
                String::from_utf8_lossy(symbol)
            ))
        })?;
        // SAFETY: the symbol matches the declared signature.
        unsafe { func() };
        Ok(())
    }

    pub fn available() -> bool {
        library().is_ok()
    }

    pub fn init_semaphores() -> Result<(), PoolError> {
        call(b"set_active_sem_name\0")?;
        call(b"set_stop_sem_name\0")
    }

    pub fn release_resources() -> Result<(), PoolError> {
        call(b"release_resources\0")
    }

    pub fn release_semaphores() -> Result<(), PoolError> {
        call(b"release_semaphores\0")
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::PoolError;

    fn unsupported() -> PoolError {
        PoolError::WorkerUnavailable("inter-process coordination is only supported on Linux".into())
    }

    pub fn available() -> bool {
        false
    }

    pub fn init_semaphores() -> Result<(), PoolError> {
        Err(unsupported())
    }

    pub fn release_resources() -> Result<(), PoolError> {
        Err(unsupported())
    }

    pub fn release_semaphores() -> Result<(), PoolError> {
        Err(unsupported())
    }
}

/// Whether the coordination library could be loaded on this host.
#[must_use]
pub fn available() -> bool {
    imp::available()
}

/// Name the shared "active" and "stop" semaphores so sibling processes
/// can find them. Called when a scope enables IPC.
///
/// # Errors
///
/// `PoolError::WorkerUnavailable` when the library is absent or lacks
/// the expected symbols. Callers log this and continue uncoordinated.
pub fn init_semaphores() -> Result<(), PoolError> {
    imp::init_semaphores()
}

/// Give back this process's share of coordinated resources. Run by
/// workers as their exit hook.
///
/// # Errors
///
/// `PoolError::WorkerUnavailable` when the library is absent; never
/// fatal to the worker.
pub fn release_resources() -> Result<(), PoolError> {
    imp::release_resources()
}

/// Best-effort release of the shared semaphores at teardown.
///
/// # Errors
///
/// `PoolError::WorkerUnavailable` when the library is absent; callers
/// log and proceed.
pub fn release_semaphores() -> Result<(), PoolError> {
    imp::release_semaphores()
}

#[cfg(test)]
mod tests {
    use super::*;

    // The coordination library is not installed on development or CI
    // hosts; every entry point must degrade to an error value, never a
    // panic or a crash.
    #[test]
    fn test_missing_library_degrades_gracefully() {
        if available() {
            // Host actually has the library; nothing to assert here.
            return;
        }
        assert!(matches!(
            init_semaphores(),
            Err(PoolError::WorkerUnavailable(_))
        ));
        assert!(matches!(
            release_resources(),
            Err(PoolError::WorkerUnavailable(_))
        ));
        assert!(matches!(
            release_semaphores(),
            Err(PoolError::WorkerUnavailable(_))
        ));
    }
}
