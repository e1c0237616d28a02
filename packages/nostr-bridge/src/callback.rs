//! # Pending Callback Registry
//!
//! Bookkeeping for async calls in flight.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      ASYNC CALL TOKENS                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   register() ──► pending ──take()──► resolved (success / failure)       │
//! │                     │                                                   │
//! │                     └──take()──► resolved-with-cancellation             │
//! │                                                                         │
//! │   `take` is the only way out of the map. Whichever of completion and    │
//! │   cancellation gets there first wins; the other finds nothing.          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tokens come from one process-wide counter, so adapters sharing a core
//! never hand it the same token twice.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::contract::TypeTag;
use crate::error::Result;

/// Identifies one pending async call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackToken(pub u64);

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a resolution goes
pub(crate) enum Completion {
    /// A [`PendingCall`](crate::adapter::PendingCall) future is waiting
    Future(oneshot::Sender<Result<serde_json::Value>>),
    /// A host callback, run through the host context
    Callback(Box<dyn FnOnce(Result<serde_json::Value>) + Send + 'static>),
}

/// One registered async call
pub(crate) struct PendingEntry {
    pub function: String,
    pub returns: TypeTag,
    pub completion: Completion,
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Pending async calls, keyed by token
pub(crate) struct PendingRegistry {
    entries: Mutex<HashMap<u64, PendingEntry>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a call and hand out its token
    pub fn register(&self, entry: PendingEntry) -> CallbackToken {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(token, entry);
        CallbackToken(token)
    }

    /// Remove the entry; `None` if it was already resolved or cancelled
    pub fn take(&self, token: CallbackToken) -> Option<PendingEntry> {
        self.entries.lock().remove(&token.0)
    }

    /// Whether the token is still pending
    pub fn contains(&self, token: CallbackToken) -> bool {
        self.entries.lock().contains_key(&token.0)
    }

    /// Number of calls in flight
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Drain everything, e.g. on adapter shutdown
    pub fn drain(&self) -> Vec<(CallbackToken, PendingEntry)> {
        self.entries
            .lock()
            .drain()
            .map(|(token, entry)| (CallbackToken(token), entry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry() -> (PendingEntry, oneshot::Receiver<Result<serde_json::Value>>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingEntry {
                function: "client_connect".into(),
                returns: TypeTag::Unit,
                completion: Completion::Future(tx),
            },
            rx,
        )
    }

    #[test]
    fn test_tokens_are_unique() {
        let registry = PendingRegistry::new();
        let a = registry.register(entry().0);
        let b = registry.register(entry().0);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_tokens_are_unique_across_registries() {
        let first = PendingRegistry::new();
        let second = PendingRegistry::new();
        let a = first.register(entry().0);
        let b = second.register(entry().0);
        assert_ne!(a, b);
        assert!(second.take(a).is_none());
        assert!(first.take(a).is_some());
    }

    #[test]
    fn test_take_is_exactly_once() {
        let registry = PendingRegistry::new();
        let token = registry.register(entry().0);
        assert!(registry.take(token).is_some());
        assert!(registry.take(token).is_none());
        assert!(!registry.contains(token));
    }

    #[test]
    fn test_concurrent_take_single_winner() {
        let registry = Arc::new(PendingRegistry::new());
        let tokens: Vec<_> = (0..500).map(|_| registry.register(entry().0)).collect();
        let tokens = Arc::new(tokens);

        let winners: usize = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let tokens = tokens.clone();
                std::thread::spawn(move || tokens.iter().filter(|t| registry.take(**t).is_some()).count())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap())
            .sum();

        assert_eq!(winners, 500);
        assert_eq!(registry.len(), 0);
    }
}
