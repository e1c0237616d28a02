//! # Shared Runtime
//!
//! Global async runtime used by the adapter for deferred work (waiting on a
//! serialized handle before issuing an async call) and by [`TokioContext::shared`].
//!
//! [`TokioContext::shared`]: crate::context::TokioContext::shared

use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Runtime};

use crate::error::{Error, Result};

/// Global async runtime for adapter work
static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Worker threads used when the runtime is first created
static WORKER_THREADS: AtomicUsize = AtomicUsize::new(2);

/// Set the worker count; no effect once the runtime exists
pub(crate) fn configure(worker_threads: usize) {
    if RUNTIME.get().is_some() {
        tracing::debug!("Shared runtime already running, ignoring worker count");
        return;
    }
    WORKER_THREADS.store(worker_threads.max(1), Ordering::SeqCst);
}

pub(crate) fn get_runtime() -> Result<&'static Runtime> {
    RUNTIME.get_or_try_init(|| {
        Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS.load(Ordering::SeqCst))
            .thread_name("nostr-bridge-rt")
            .enable_all()
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create Tokio runtime: {}", e)))
    })
}
