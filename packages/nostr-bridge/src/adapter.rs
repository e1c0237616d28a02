//! # Per-Runtime Adapter
//!
//! Loads a native core, checks it against the contract, and carries every
//! call across the boundary.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          CALL PATHS                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  call()          encode ─► [serial lock] ─► core.call ─► decode         │
//! │                  (caller's thread, blocking)                            │
//! │                                                                         │
//! │  call_async()    encode ─► register token ─► [serial lock] ─►           │
//! │                  core.call_async ──────────────┐                        │
//! │                  returns PendingCall now       │ core thread            │
//! │                                                ▼                        │
//! │                  pending.take(token) ─► decode ─► oneshot / context     │
//! │                                                                         │
//! │  cancel()        pending.take(token) ─► core.cancel ─► Err(Cancelled)   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Completion and cancellation both go through `PendingRegistry::take`, so
//! whichever arrives first resolves the token and the other is discarded.
//!
//! Handle leases and the receiver's serialization guard ride inside the
//! completion sink. They are dropped when the core reports completion, not
//! when the host stops waiting, so a cancelled call still keeps its handles
//! alive and serialized until the core is actually done with them.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex, OwnedMutexGuard};

use crate::callback::{CallbackToken, Completion, PendingEntry, PendingRegistry};
use crate::config::BridgeConfig;
use crate::context::HostContext;
use crate::contract::{json_shape, nostr_sdk, ContractManifest, ExportedFunction, HandleKind, TypeTag};
use crate::descriptor::CallDescriptor;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::events::{deliver, Addressed, HandleNotification};
use crate::ffi::NO_HANDLE;
use crate::handle::{HandleLease, HandleReleaser, NativeHandle};
use crate::marshal::{decode_return, encode_call, CallArg, Marshaled};
use crate::native::{CompletionSink, DynamicCore, NativeCore};

// ============================================================================
// STATS
// ============================================================================

#[derive(Default)]
struct Counters {
    calls: AtomicU64,
    async_calls: AtomicU64,
    resolved: AtomicU64,
    cancelled: AtomicU64,
    late_completions: AtomicU64,
    adopted: AtomicU64,
    frees: AtomicU64,
    notifications: AtomicU64,
}

/// Snapshot of adapter bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdapterStats {
    /// Sync calls made
    pub calls: u64,
    /// Async calls registered
    pub async_calls: u64,
    /// Async calls currently pending
    pub pending: usize,
    /// Async calls resolved by the core
    pub resolved: u64,
    /// Async calls resolved by cancellation
    pub cancelled: u64,
    /// Completions that arrived for an already resolved token
    pub late_completions: u64,
    /// Handles adopted and not yet released
    pub live_handles: u64,
    /// Native frees issued
    pub frees: u64,
    /// Notifications received from the core
    pub notifications: u64,
    /// Client listeners currently registered
    pub listeners: usize,
}

// ============================================================================
// ADAPTER
// ============================================================================

struct AdapterInner {
    core: Arc<dyn NativeCore>,
    contract: Arc<ContractManifest>,
    context: Arc<dyn HostContext>,
    pending: PendingRegistry,
    notifications: RwLock<Option<Arc<dyn HandleNotification>>>,
    listeners: RwLock<HashMap<u64, Vec<Listener>>>,
    next_listener: AtomicU64,
    counters: Counters,
}

/// Handler registered for one client handle
struct Listener {
    id: u64,
    handler: Arc<dyn HandleNotification>,
}

/// Registration returned by [`Adapter::add_client_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId {
    client: u64,
    id: u64,
}

/// Loaded native core plus the bookkeeping around it
///
/// Cheap to clone; clones share the same core and registry.
#[derive(Clone)]
pub struct Adapter {
    inner: Arc<AdapterInner>,
}

impl Adapter {
    /// Check `core` against `contract` and wrap it
    ///
    /// Fails with a load error on any version or fingerprint drift. There
    /// is no partially loaded state.
    pub fn load(
        core: Arc<dyn NativeCore>,
        contract: &ContractManifest,
        context: Arc<dyn HostContext>,
    ) -> Result<Self> {
        let version = core.abi_version()?;
        let fingerprint = core.contract_fingerprint()?;

        if let Err(e) = contract.check_compatible(&version, &fingerprint) {
            tracing::error!("Refusing to load {}: {}", core.describe(), e);
            return Err(e);
        }

        tracing::info!(
            "Loaded {} (ABI {}, context {})",
            core.describe(),
            version,
            context.name()
        );

        let inner = Arc::new(AdapterInner {
            core,
            contract: Arc::new(contract.clone()),
            context,
            pending: PendingRegistry::new(),
            notifications: RwLock::new(None),
            listeners: RwLock::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
            counters: Counters::default(),
        });

        let weak: Weak<AdapterInner> = Arc::downgrade(&inner);
        inner.core.set_event_sink(Some(Arc::new(move |topic: &str, payload: &[u8]| {
            if let Some(inner) = weak.upgrade() {
                inner.on_notification(topic, payload);
            }
        })));

        Ok(Self { inner })
    }

    /// Locate, validate and open the shared library described by `config`
    ///
    /// Installs the bridge logger at `config.log_level` unless the host
    /// already set a subscriber. Hosts that link the core statically have
    /// nothing to open here; they go through [`Adapter::load`] with a core
    /// built from an exported table.
    pub fn load_dynamic(config: &BridgeConfig) -> Result<Self> {
        crate::logging::init_logger(config.log_level);
        if config.host.links_statically() {
            return Err(Error::UnsupportedPlatform(format!(
                "{} links the core statically",
                config.host
            )));
        }
        let path = crate::platform::locate_artifact(config)?;
        crate::platform::check_architecture(&path, config.arch)?;
        let core = DynamicCore::open(&path)?;
        let context = config.context.build(config.worker_threads)?;
        Self::load(Arc::new(core), nostr_sdk::contract(), context)
    }

    /// Contract this adapter was built against
    pub fn contract(&self) -> &ContractManifest {
        &self.inner.contract
    }

    fn function(&self, name: &str) -> Result<&ExportedFunction> {
        self.inner
            .contract
            .function(name)
            .ok_or_else(|| Error::UnknownFunction(name.to_string()).surfaced())
    }

    // ------------------------------------------------------------------------
    // Sync calls
    // ------------------------------------------------------------------------

    /// Blocking call on the caller's thread
    pub fn call(&self, name: &str, receiver: Option<&NativeHandle>, args: Vec<CallArg>) -> Result<Value> {
        let function = self.function(name)?;
        if function.is_async {
            return Err(Error::CallStyle {
                function: name.to_string(),
                actual: "async",
            }
            .surfaced());
        }

        let Marshaled {
            mut descriptor,
            mut leases,
            receiver,
        } = encode_call(function, receiver, args)?;

        if let Some(lock) = receiver.as_ref().and_then(NativeHandle::serial_lock) {
            let guard = lock_blocking(lock);
            if let Some(lease) = leases.first_mut() {
                lease.hold(guard);
            }
        }

        tracing::trace!(function = name, "Sync call");
        self.inner.counters.calls.fetch_add(1, Ordering::Relaxed);
        let envelope = self.inner.core.call(&descriptor);
        drop(leases);

        descriptor.complete(envelope);
        descriptor.unmarshal().map_err(log_native)
    }

    // ------------------------------------------------------------------------
    // Async calls
    // ------------------------------------------------------------------------

    /// Issue an async call and return a future for its result
    ///
    /// Dropping the future before it resolves cancels the call.
    pub fn call_async(
        &self,
        name: &str,
        receiver: Option<&NativeHandle>,
        args: Vec<CallArg>,
    ) -> Result<PendingCall> {
        let (tx, rx) = oneshot::channel();
        let token = self.start_async(name, receiver, args, Completion::Future(tx))?;
        Ok(PendingCall {
            token,
            rx,
            inner: self.inner.clone(),
            finished: false,
        })
    }

    /// Issue an async call; `callback` runs once on the host context
    pub fn call_with_callback<F>(
        &self,
        name: &str,
        receiver: Option<&NativeHandle>,
        args: Vec<CallArg>,
        callback: F,
    ) -> Result<CallbackToken>
    where
        F: FnOnce(Result<Value>) + Send + 'static,
    {
        self.start_async(name, receiver, args, Completion::Callback(Box::new(callback)))
    }

    /// Cancel a pending call; false if it already resolved
    pub fn cancel(&self, token: CallbackToken) -> bool {
        self.inner.cancel(token)
    }

    fn start_async(
        &self,
        name: &str,
        receiver: Option<&NativeHandle>,
        args: Vec<CallArg>,
        completion: Completion,
    ) -> Result<CallbackToken> {
        let function = self.function(name)?;
        if !function.is_async {
            return Err(Error::CallStyle {
                function: name.to_string(),
                actual: "sync",
            }
            .surfaced());
        }

        let Marshaled {
            descriptor,
            leases,
            receiver,
        } = encode_call(function, receiver, args)?;

        let token = self.inner.pending.register(PendingEntry {
            function: function.name.clone(),
            returns: function.returns.clone(),
            completion,
        });
        self.inner.counters.async_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(function = name, %token, "Async call registered");

        match receiver.as_ref().and_then(NativeHandle::serial_lock) {
            None => self.inner.issue(token, descriptor, leases, None),
            Some(lock) => match lock.clone().try_lock_owned() {
                Ok(guard) => self.inner.issue(token, descriptor, leases, Some(guard)),
                Err(_) => self.inner.defer(token, descriptor, leases, lock),
            },
        }

        Ok(token)
    }

    // ------------------------------------------------------------------------
    // Handles & notifications
    // ------------------------------------------------------------------------

    /// Wrap a handle id returned by the core
    pub fn adopt(&self, kind: HandleKind, value: &Value) -> Result<NativeHandle> {
        let id = value
            .as_u64()
            .filter(|id| *id != NO_HANDLE)
            .ok_or_else(|| {
                Error::ReturnType {
                    function: format!("handle<{}>", kind),
                    expected: TypeTag::Handle(kind).to_string(),
                    found: json_shape(value).to_string(),
                }
                .surfaced()
            })?;

        self.inner.counters.adopted.fetch_add(1, Ordering::Relaxed);
        let releaser: Arc<dyn HandleReleaser> = self.inner.clone();
        Ok(NativeHandle::new(id, kind, releaser))
    }

    /// Like [`Adapter::adopt`], with `null` meaning no object
    pub fn adopt_optional(&self, kind: HandleKind, value: &Value) -> Result<Option<NativeHandle>> {
        if value.is_null() {
            return Ok(None);
        }
        self.adopt(kind, value).map(Some)
    }

    /// Receive every core notification on the host context
    pub fn set_notification_handler(&self, handler: Arc<dyn HandleNotification>) {
        *self.inner.notifications.write() = Some(handler);
    }

    pub fn clear_notification_handler(&self) {
        *self.inner.notifications.write() = None;
    }

    /// Receive notifications addressed to `client` (and unaddressed ones)
    ///
    /// Any number of listeners may watch the same client; each is removed
    /// only through its own [`ListenerId`].
    pub fn add_client_listener(&self, client: &NativeHandle, handler: Arc<dyn HandleNotification>) -> ListenerId {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .entry(client.id())
            .or_default()
            .push(Listener { id, handler });
        tracing::trace!(client = client.id(), listener = id, "Client listener added");
        ListenerId { client: client.id(), id }
    }

    /// Remove one listener; false if it was already gone
    pub fn remove_client_listener(&self, listener: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let Some(registered) = listeners.get_mut(&listener.client) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|l| l.id != listener.id);
        let removed = registered.len() != before;
        if registered.is_empty() {
            listeners.remove(&listener.client);
        }
        removed
    }

    /// Snapshot of the bookkeeping counters
    pub fn stats(&self) -> AdapterStats {
        let c = &self.inner.counters;
        let adopted = c.adopted.load(Ordering::SeqCst);
        let frees = c.frees.load(Ordering::SeqCst);
        AdapterStats {
            calls: c.calls.load(Ordering::SeqCst),
            async_calls: c.async_calls.load(Ordering::SeqCst),
            pending: self.inner.pending.len(),
            resolved: c.resolved.load(Ordering::SeqCst),
            cancelled: c.cancelled.load(Ordering::SeqCst),
            late_completions: c.late_completions.load(Ordering::SeqCst),
            live_handles: adopted.saturating_sub(frees),
            frees,
            notifications: c.notifications.load(Ordering::SeqCst),
            listeners: self.inner.listeners.read().values().map(Vec::len).sum(),
        }
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("core", &self.inner.core.describe())
            .field("context", &self.inner.context.name())
            .finish()
    }
}

/// Native failures are expected; everything else was already surfaced
fn log_native(error: Error) -> Error {
    if let Error::Native { kind, message } = &error {
        tracing::debug!(kind, "Native call failed: {}", message);
    }
    error
}

/// Lock a serialization mutex from sync code
///
/// `blocking_lock` panics inside a runtime. On a multi-thread worker the
/// wait moves out with `block_in_place`; a current-thread runtime can't do
/// that, so the wait happens on a scoped helper thread instead.
fn lock_blocking(lock: Arc<Mutex<()>>) -> OwnedMutexGuard<()> {
    use tokio::runtime::{Handle, RuntimeFlavor};

    match Handle::try_current() {
        Err(_) => lock.blocking_lock_owned(),
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(move || lock.blocking_lock_owned())
        }
        Ok(_) => std::thread::scope(|scope| {
            match scope.spawn(move || lock.blocking_lock_owned()).join() {
                Ok(guard) => guard,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }),
    }
}

// ============================================================================
// INNER
// ============================================================================

impl AdapterInner {
    /// Hand the call to the core
    ///
    /// The sink owns the leases (and the receiver's guard) until the core
    /// reports completion.
    fn issue(
        self: &Arc<Self>,
        token: CallbackToken,
        descriptor: CallDescriptor,
        mut leases: Vec<HandleLease>,
        guard: Option<OwnedMutexGuard<()>>,
    ) {
        if let (Some(guard), Some(lease)) = (guard, leases.first_mut()) {
            lease.hold(guard);
        }

        let weak = Arc::downgrade(self);
        let sink: CompletionSink = Box::new(move |envelope| {
            match weak.upgrade() {
                Some(inner) => inner.complete(token, envelope),
                None => tracing::debug!(%token, "Completion after adapter was dropped"),
            }
            drop(leases);
        });

        if let Err(e) = self.core.call_async(&descriptor, token.0, sink) {
            tracing::warn!(function = %descriptor.function, "Core refused async call: {}", e);
            if let Some(entry) = self.pending.take(token) {
                self.resolve(entry, Err(e));
            }
        }
    }

    /// Wait for a busy serialized receiver, then issue
    fn defer(
        self: &Arc<Self>,
        token: CallbackToken,
        descriptor: CallDescriptor,
        leases: Vec<HandleLease>,
        lock: Arc<Mutex<()>>,
    ) {
        let runtime = match crate::runtime::get_runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                if let Some(entry) = self.pending.take(token) {
                    self.resolve(entry, Err(e));
                }
                return;
            }
        };

        tracing::trace!(%token, "Receiver busy, deferring call");
        let inner = self.clone();
        runtime.spawn(async move {
            let guard = lock.lock_owned().await;
            if !inner.pending.contains(token) {
                tracing::trace!(%token, "Deferred call cancelled before issue");
                return;
            }
            inner.issue(token, descriptor, leases, Some(guard));
        });
    }

    /// Completion from the core
    fn complete(&self, token: CallbackToken, envelope: Envelope) {
        let Some(entry) = self.pending.take(token) else {
            self.counters.late_completions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%token, "Discarding completion for resolved token");
            return;
        };

        self.counters.resolved.fetch_add(1, Ordering::Relaxed);
        let result = decode_return(&entry.function, &entry.returns, envelope).map_err(log_native);
        self.resolve(entry, result);
    }

    fn cancel(&self, token: CallbackToken) -> bool {
        let Some(entry) = self.pending.take(token) else {
            return false;
        };

        tracing::debug!(%token, function = %entry.function, "Cancelling async call");
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        self.core.cancel(token.0);
        self.resolve(entry, Err(Error::Cancelled));
        true
    }

    fn resolve(&self, entry: PendingEntry, result: Result<Value>) {
        match entry.completion {
            Completion::Future(tx) => {
                // Receiver gone means the future was dropped; nothing to do.
                let _ = tx.send(result);
            }
            Completion::Callback(callback) => {
                self.context.dispatch(Box::new(move || callback(result)));
            }
        }
    }

    fn on_notification(&self, topic: &str, payload: &[u8]) {
        self.counters.notifications.fetch_add(1, Ordering::Relaxed);

        let addressed = match Addressed::parse(topic, payload) {
            Ok(addressed) => addressed,
            Err(e) => {
                tracing::warn!("Dropping notification: {}", e);
                return;
            }
        };

        let mut handlers: Vec<Arc<dyn HandleNotification>> = Vec::new();
        if let Some(handler) = self.notifications.read().clone() {
            handlers.push(handler);
        }
        {
            let listeners = self.listeners.read();
            match addressed.client {
                Some(client) => {
                    if let Some(registered) = listeners.get(&client) {
                        handlers.extend(registered.iter().map(|l| l.handler.clone()));
                    }
                }
                None => {
                    for registered in listeners.values() {
                        handlers.extend(registered.iter().map(|l| l.handler.clone()));
                    }
                }
            }
        }
        if handlers.is_empty() {
            return;
        }

        let notification = addressed.notification;
        self.context.dispatch(Box::new(move || {
            for handler in &handlers {
                deliver(handler.as_ref(), &notification);
            }
        }));
    }
}

impl HandleReleaser for AdapterInner {
    fn release(&self, id: u64, kind: HandleKind) {
        self.counters.frees.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.core.free_handle(id) {
            tracing::warn!(handle = id, kind = %kind, "Native free failed: {}", e);
        }
    }
}

impl Drop for AdapterInner {
    fn drop(&mut self) {
        self.core.set_event_sink(None);
        for (token, entry) in self.pending.drain() {
            tracing::debug!(%token, "Resolving pending call on adapter drop");
            self.resolve(entry, Err(Error::CoreUnavailable("adapter dropped".into())));
        }
    }
}

// ============================================================================
// PENDING CALL
// ============================================================================

/// Future for one async call
///
/// Resolves exactly once: with the core's result, or with
/// [`Error::Cancelled`] after [`PendingCall::cancel`].
pub struct PendingCall {
    token: CallbackToken,
    rx: oneshot::Receiver<Result<Value>>,
    inner: Arc<AdapterInner>,
    finished: bool,
}

impl PendingCall {
    pub fn token(&self) -> CallbackToken {
        self.token
    }

    /// Cancel the call; false if it already resolved
    pub fn cancel(&self) -> bool {
        self.inner.cancel(self.token)
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                self.finished = true;
                Poll::Ready(result.unwrap_or_else(|_| {
                    Err(Error::Internal("completion channel closed".into()))
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.cancel(self.token);
        }
    }
}
