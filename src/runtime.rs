//! Async runtime management for FFI
//!
//! Rust callers drive the supervisor from their own Tokio runtime. C callers
//! have none, so the library owns one global multi-threaded runtime between
//! `chatlink_init` and `chatlink_cleanup`.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::{Error, ErrorCode, Result};

/// Grace period granted to background tasks on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

lazy_static::lazy_static! {
    /// Global Tokio runtime for async operations
    static ref RUNTIME: Mutex<Option<Runtime>> = Mutex::new(None);
}

/// Initialize the async runtime
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_runtime() -> Result<()> {
    let mut runtime_guard = RUNTIME
        .lock()
        .map_err(|_| Error::new(ErrorCode::Unknown, "Failed to acquire runtime lock"))?;

    if runtime_guard.is_none() {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("chatlink-rt")
            .build()
            .map_err(|e| Error::new(ErrorCode::Unknown, format!("Failed to create Tokio runtime: {e}")))?;
        *runtime_guard = Some(runtime);
        tracing::debug!("runtime started");
    }

    Ok(())
}

/// Shutdown the async runtime
///
/// Background transports still running are cancelled after a short grace
/// period.
pub fn shutdown_runtime() {
    if let Ok(mut runtime_guard) = RUNTIME.lock() {
        if let Some(runtime) = runtime_guard.take() {
            runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
            tracing::debug!("runtime stopped");
        }
    }
}

/// Get a handle to the runtime
///
/// Fails with `InvalidState` when `init_runtime` has not been called.
pub fn handle() -> Result<Handle> {
    let runtime_guard = RUNTIME
        .lock()
        .map_err(|_| Error::new(ErrorCode::Unknown, "Failed to acquire runtime lock"))?;
    runtime_guard
        .as_ref()
        .map(|rt| rt.handle().clone())
        .ok_or_else(|| Error::new(ErrorCode::InvalidState, "Runtime not initialized"))
}

/// Execute an async future synchronously on the global runtime
///
/// The runtime lock is released before the future runs, so the future may
/// itself spawn tasks.
pub fn block_on<F>(future: F) -> Result<F::Output>
where
    F: Future,
{
    let handle = handle()?;
    Ok(handle.block_on(future))
}
