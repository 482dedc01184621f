//! Runtime management for the HTTP engine.
//!
//! Transfers run as tasks on a process-wide tokio runtime, so the thread
//! that owns the event loop only ever steps the pool and never polls
//! futures itself.

use std::sync::OnceLock;

use tokio::runtime::Runtime;

use crate::error::EngineError;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Initialize the transfer runtime.
///
/// The first call decides the worker count; later calls return the
/// existing runtime.
pub fn init(worker_threads: usize) -> Result<&'static Runtime, EngineError> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads.max(1))
        .thread_name("courier-transfer")
        .enable_all()
        .build()
        .map_err(|e| EngineError::Runtime(e.to_string()))?;
    // A concurrent initializer may have won; its runtime is kept.
    Ok(RUNTIME.get_or_init(|| runtime))
}
