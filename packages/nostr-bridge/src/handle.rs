//! # Native Handles
//!
//! Host-side proxies for opaque objects owned by the native core.
//!
//! ## Free Guard
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        HANDLE LIFECYCLE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   live ──dispose()──► freed ──(in_flight == 0)──► released              │
//! │    │                    ▲                            ▲                  │
//! │    └──── last Drop ─────┘                            │                  │
//! │                                                      │                  │
//! │   leases (calls in flight) ──last lease drop─────────┘                  │
//! │                                                                         │
//! │   • `freed` flips once: second dispose() is a DoubleFree error          │
//! │   • `released` flips once: the core sees exactly one free               │
//! │   • a freed handle refuses new leases: UseAfterFree                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Explicit dispose and drop-finalization share the same atomic path, so
//! non-deterministic drop timing never frees twice. A free requested while
//! calls are still running is deferred until the last one finishes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::contract::{HandleKind, ThreadSafety};
use crate::error::{Error, Result};

/// Issues the native free for a handle
pub trait HandleReleaser: Send + Sync {
    /// Called exactly once per handle
    fn release(&self, id: u64, kind: HandleKind);
}

struct HandleInner {
    id: u64,
    kind: HandleKind,
    freed: AtomicBool,
    released: AtomicBool,
    in_flight: AtomicUsize,
    serial: Option<Arc<Mutex<()>>>,
    releaser: Arc<dyn HandleReleaser>,
}

impl HandleInner {
    fn try_release(&self) {
        if self.in_flight.load(Ordering::SeqCst) != 0 {
            return;
        }
        if !self.released.swap(true, Ordering::SeqCst) {
            tracing::debug!(handle = self.id, kind = %self.kind, "Releasing native handle");
            self.releaser.release(self.id, self.kind);
        }
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        // Finalizer path: only acts if nobody disposed explicitly.
        if !self.freed.swap(true, Ordering::SeqCst) {
            self.try_release();
        }
    }
}

/// Proxy for a native object
///
/// Clones share the same guard. The native free happens on the first
/// [`NativeHandle::dispose`] or when the last clone is dropped, whichever
/// comes first, and never more than once.
#[derive(Clone)]
pub struct NativeHandle {
    inner: Arc<HandleInner>,
}

impl NativeHandle {
    /// Wrap a handle id returned by the core
    pub fn new(id: u64, kind: HandleKind, releaser: Arc<dyn HandleReleaser>) -> Self {
        let serial = match kind.thread_safety() {
            ThreadSafety::Internal => None,
            ThreadSafety::Serialized => Some(Arc::new(Mutex::new(()))),
        };

        Self {
            inner: Arc::new(HandleInner {
                id,
                kind,
                freed: AtomicBool::new(false),
                released: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                serial,
                releaser,
            }),
        }
    }

    /// Native handle id
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Kind of native object
    pub fn kind(&self) -> HandleKind {
        self.inner.kind
    }

    /// Whether dispose has been requested (or the handle was finalized)
    pub fn is_freed(&self) -> bool {
        self.inner.freed.load(Ordering::SeqCst)
    }

    /// Whether the core has been told to free the object
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Release the native object now
    ///
    /// Returns [`Error::DoubleFree`] if the handle was already disposed; the
    /// core is not called again in that case.
    pub fn dispose(&self) -> Result<()> {
        if self.inner.freed.swap(true, Ordering::SeqCst) {
            return Err(Error::DoubleFree(self.inner.id).surfaced());
        }
        self.inner.try_release();
        Ok(())
    }

    /// Check the handle is of `expected` kind
    pub fn expect_kind(&self, expected: HandleKind) -> Result<()> {
        if self.inner.kind != expected {
            return Err(Error::WrongHandleKind {
                handle: self.inner.id,
                expected: expected.to_string(),
                found: self.inner.kind.to_string(),
            }
            .surfaced());
        }
        Ok(())
    }

    /// Pin the handle for the duration of a call
    pub(crate) fn lease(&self) -> Result<HandleLease> {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let lease = HandleLease {
            inner: self.inner.clone(),
            serial: None,
        };
        if self.is_freed() {
            drop(lease);
            return Err(Error::UseAfterFree(self.inner.id).surfaced());
        }
        Ok(lease)
    }

    /// Serialization lock for `Serialized` kinds
    pub(crate) fn serial_lock(&self) -> Option<Arc<Mutex<()>>> {
        self.inner.serial.clone()
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("freed", &self.is_freed())
            .finish()
    }
}

/// Keeps a handle alive and un-released while a call uses it
pub(crate) struct HandleLease {
    inner: Arc<HandleInner>,
    serial: Option<OwnedMutexGuard<()>>,
}

impl HandleLease {
    /// Hold the handle's serialization guard until the lease ends
    pub(crate) fn hold(&mut self, guard: OwnedMutexGuard<()>) {
        self.serial = Some(guard);
    }
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        // Unlock before a possible deferred release.
        self.serial.take();
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1
            && self.inner.freed.load(Ordering::SeqCst)
        {
            self.inner.try_release();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;

    /// Records every release
    #[derive(Default)]
    pub(crate) struct CountingReleaser {
        pub released: SyncMutex<Vec<u64>>,
    }

    impl HandleReleaser for CountingReleaser {
        fn release(&self, id: u64, _kind: HandleKind) {
            self.released.lock().push(id);
        }
    }

    fn handle(id: u64, kind: HandleKind) -> (NativeHandle, Arc<CountingReleaser>) {
        let releaser = Arc::new(CountingReleaser::default());
        (NativeHandle::new(id, kind, releaser.clone()), releaser)
    }

    #[test]
    fn test_double_dispose_frees_once() {
        let (h, releaser) = handle(1, HandleKind::Client);
        assert!(h.dispose().is_ok());
        assert_eq!(h.dispose(), Err(Error::DoubleFree(1)));
        drop(h);
        assert_eq!(*releaser.released.lock(), vec![1]);
    }

    #[test]
    fn test_drop_finalizes() {
        let (h, releaser) = handle(2, HandleKind::Signer);
        let clone = h.clone();
        drop(h);
        assert!(releaser.released.lock().is_empty());
        drop(clone);
        assert_eq!(*releaser.released.lock(), vec![2]);
    }

    #[test]
    fn test_dispose_then_drop_frees_once() {
        let (h, releaser) = handle(3, HandleKind::Client);
        let clone = h.clone();
        clone.dispose().unwrap();
        drop(clone);
        drop(h);
        assert_eq!(releaser.released.lock().len(), 1);
    }

    #[test]
    fn test_lease_after_free_is_use_after_free() {
        let (h, _releaser) = handle(4, HandleKind::Client);
        h.dispose().unwrap();
        assert_eq!(h.lease().err(), Some(Error::UseAfterFree(4)));
    }

    #[test]
    fn test_free_deferred_while_leased() {
        let (h, releaser) = handle(5, HandleKind::Client);
        let lease = h.lease().unwrap();
        h.dispose().unwrap();
        assert!(h.is_freed());
        assert!(!h.is_released());
        assert!(releaser.released.lock().is_empty());

        drop(lease);
        assert!(h.is_released());
        assert_eq!(*releaser.released.lock(), vec![5]);
    }

    #[test]
    fn test_serialized_kinds_get_a_lock() {
        let (stream, _) = handle(6, HandleKind::EventStream);
        let (client, _) = handle(7, HandleKind::Client);
        assert!(stream.serial_lock().is_some());
        assert!(client.serial_lock().is_none());
    }

    #[test]
    fn test_expect_kind() {
        let (h, _) = handle(8, HandleKind::Signer);
        assert!(h.expect_kind(HandleKind::Signer).is_ok());
        assert!(matches!(
            h.expect_kind(HandleKind::Client),
            Err(Error::WrongHandleKind { handle: 8, .. })
        ));
    }

    #[test]
    fn test_concurrent_dispose_and_drop_race() {
        for id in 0..200 {
            let (h, releaser) = handle(id, HandleKind::Client);
            let clones: Vec<_> = (0..4).map(|_| h.clone()).collect();
            let threads: Vec<_> = clones
                .into_iter()
                .enumerate()
                .map(|(i, c)| {
                    std::thread::spawn(move || {
                        if i % 2 == 0 {
                            let _ = c.dispose();
                        }
                        if let Ok(lease) = c.lease() {
                            drop(lease);
                        }
                    })
                })
                .collect();
            for t in threads {
                t.join().unwrap();
            }
            drop(h);
            assert_eq!(releaser.released.lock().len(), 1, "handle {}", id);
        }
    }
}
