//! # Host Contexts
//!
//! Where host-visible continuations run.
//!
//! Completions and notifications arrive on threads owned by the native
//! core. They are never run there: the adapter posts them as jobs to a
//! [`HostContext`], which runs them where the host's concurrency model
//! allows.
//!
//! ```text
//!  core thread ──post(job)──► [ channel / runtime queue ] ──► host context
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// A continuation to run on the host side
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Execution context for host continuations
pub trait HostContext: Send + Sync {
    /// Queue `job`; must not run it inline on the calling thread
    fn dispatch(&self, job: Job);

    /// Name used in logs
    fn name(&self) -> &'static str;
}

// ============================================================================
// TOKIO CONTEXT
// ============================================================================

/// Runs continuations as tasks on a tokio runtime
///
/// Continuations run on the runtime's workers, so they must not block.
#[derive(Clone)]
pub struct TokioContext {
    handle: tokio::runtime::Handle,
}

impl TokioContext {
    /// Use a specific runtime
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime of the calling task
    pub fn current() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::Internal(format!("no tokio runtime: {}", e)))
    }

    /// Use the bridge's shared runtime
    pub fn shared() -> Result<Self> {
        Ok(Self::new(crate::runtime::get_runtime()?.handle().clone()))
    }
}

impl HostContext for TokioContext {
    fn dispatch(&self, job: Job) {
        self.handle.spawn(async move { job() });
    }

    fn name(&self) -> &'static str {
        "tokio"
    }
}

// ============================================================================
// SERIAL QUEUE
// ============================================================================

/// A dedicated thread draining a job channel in order
///
/// Models a single-threaded main/UI queue: every continuation runs on the
/// same thread, one at a time, in post order.
pub struct SerialQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl SerialQueue {
    /// Start the queue thread
    pub fn spawn(name: &str) -> Result<Arc<Self>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    job();
                }
                tracing::debug!("Serial queue drained, exiting");
            })
            .map_err(|e| Error::Internal(format!("failed to spawn serial queue: {}", e)))?;

        Ok(Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            thread_id: thread.thread().id(),
            thread: Mutex::new(Some(thread)),
        }))
    }

    /// Whether the caller is running on the queue thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stop accepting jobs, let queued ones finish, join the thread
    pub fn shutdown(&self) {
        self.tx.lock().take();
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

impl HostContext for SerialQueue {
    fn dispatch(&self, job: Job) {
        match self.tx.lock().as_ref() {
            Some(tx) => {
                if tx.send(job).is_err() {
                    tracing::warn!("Serial queue thread is gone, dropping continuation");
                }
            }
            None => tracing::warn!("Serial queue shut down, dropping continuation"),
        }
    }

    fn name(&self) -> &'static str {
        "serial"
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn test_serial_queue_runs_in_order_on_its_thread() {
        let queue = SerialQueue::spawn("test-serial").unwrap();
        let (tx, rx) = std_mpsc::channel();

        for i in 0..10 {
            let tx = tx.clone();
            let q = queue.clone();
            queue.dispatch(Box::new(move || {
                tx.send((i, q.is_current())).unwrap();
            }));
        }

        let got: Vec<_> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(got.iter().map(|(i, _)| *i).collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
        assert!(got.iter().all(|(_, on_queue)| *on_queue));
        assert!(!queue.is_current());
    }

    #[test]
    fn test_serial_queue_after_shutdown_drops_jobs() {
        let queue = SerialQueue::spawn("test-serial-stop").unwrap();
        queue.shutdown();
        let (tx, rx) = std_mpsc::channel::<()>();
        queue.dispatch(Box::new(move || tx.send(()).unwrap()));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[tokio::test]
    async fn test_tokio_context_runs_job() {
        let context = TokioContext::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        context.dispatch(Box::new(move || {
            let _ = tx.send(42);
        }));
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[test]
    fn test_shared_context_runs_off_caller_thread() {
        let context = TokioContext::shared().unwrap();
        let caller = thread::current().id();
        let (tx, rx) = tokio::sync::oneshot::channel();
        context.dispatch(Box::new(move || {
            let _ = tx.send(thread::current().id());
        }));
        assert_ne!(tokio_test::block_on(rx).unwrap(), caller);
    }
}
