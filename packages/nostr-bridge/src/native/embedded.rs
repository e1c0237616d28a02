//! # Embedded Core
//!
//! An in-process native core assembled from a handler table.
//!
//! Used where the core is statically linked into the host binary (the Apple
//! xcframework and Kotlin/Native cases), behind [`export_native_core!`] to
//! build a C ABI artifact from Rust, and in tests.
//!
//! Async handlers run on the core's own multi-thread runtime, so completions
//! always arrive on core-owned threads, never on the caller's.
//!
//! [`export_native_core!`]: crate::export_native_core

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

use super::{CompletionSink, EventSink, NativeCore};
use crate::contract::{ContractManifest, ExportedFunction};
use crate::descriptor::CallDescriptor;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::ffi::CANCELLED_KIND;

/// Kind reported for malformed arguments and handler panics
const GENERIC_KIND: i32 = 1;

/// Failure returned by a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFailure {
    /// Contract error kind
    pub kind: i32,
    /// Human-readable message
    pub message: String,
}

impl NativeFailure {
    pub fn new(kind: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Arguments of one call, as seen by a handler
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Receiver handle (0 for free functions)
    pub handle: u64,
    /// Decoded, type-checked arguments
    pub args: Vec<Value>,
}

impl Invocation {
    fn missing(index: usize, what: &str) -> NativeFailure {
        NativeFailure::new(GENERIC_KIND, format!("argument {} is not {}", index, what))
    }

    pub fn arg(&self, index: usize) -> &Value {
        self.args.get(index).unwrap_or(&Value::Null)
    }

    pub fn str(&self, index: usize) -> std::result::Result<&str, NativeFailure> {
        self.arg(index).as_str().ok_or_else(|| Self::missing(index, "a string"))
    }

    pub fn u64(&self, index: usize) -> std::result::Result<u64, NativeFailure> {
        self.arg(index).as_u64().ok_or_else(|| Self::missing(index, "an unsigned integer"))
    }

    pub fn bool(&self, index: usize) -> std::result::Result<bool, NativeFailure> {
        self.arg(index).as_bool().ok_or_else(|| Self::missing(index, "a boolean"))
    }

    /// `None` for `null`
    pub fn opt_u64(&self, index: usize) -> Option<u64> {
        self.arg(index).as_u64()
    }
}

/// What a handler returns
pub type HandlerResult = std::result::Result<Value, NativeFailure>;
type SyncHandler = Arc<dyn Fn(Invocation) -> HandlerResult + Send + Sync>;
type AsyncHandler = Arc<dyn Fn(Invocation) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
type FreeHook = Arc<dyn Fn(u64) -> bool + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

struct Entry {
    function: ExportedFunction,
    handler: Option<Handler>,
}

/// Cancellation handle of one running async call
///
/// `serial` tells this call apart from a later one that reuses its token.
struct InFlight {
    serial: u64,
    cancel: oneshot::Sender<()>,
}

/// Pushes notifications to whatever sink the adapter registered
#[derive(Clone, Default)]
pub struct EventEmitter {
    sink: Arc<RwLock<Option<EventSink>>>,
}

impl EventEmitter {
    /// Publish `payload` under `topic`; dropped if nobody listens
    pub fn emit(&self, topic: &str, payload: &Value) {
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink(topic, payload.to_string().as_bytes());
        }
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Assembles an [`EmbeddedCore`]
pub struct EmbeddedCoreBuilder {
    version: String,
    fingerprint: String,
    functions: Vec<ExportedFunction>,
    handlers: HashMap<String, Handler>,
    on_free: Option<FreeHook>,
    worker_threads: usize,
    events: EventEmitter,
}

impl EmbeddedCoreBuilder {
    /// Start from a contract; version and fingerprint default to its own
    pub fn new(contract: &ContractManifest) -> Self {
        Self {
            version: contract.abi_version.clone(),
            fingerprint: contract.fingerprint(),
            functions: contract.functions.clone(),
            handlers: HashMap::new(),
            on_free: None,
            worker_threads: 2,
            events: EventEmitter::default(),
        }
    }

    /// Report another ABI version
    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Report another contract fingerprint
    pub fn fingerprint(mut self, fingerprint: &str) -> Self {
        self.fingerprint = fingerprint.to_string();
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Handle a sync function
    pub fn on_sync<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Invocation) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Handler::Sync(Arc::new(handler)));
        self
    }

    /// Handle an async function
    pub fn on_async<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.insert(
            name.to_string(),
            Handler::Async(Arc::new(move |inv| handler(inv).boxed())),
        );
        self
    }

    /// Called on every handle free; return false for unknown handles
    pub fn on_free<F>(mut self, hook: F) -> Self
    where
        F: Fn(u64) -> bool + Send + Sync + 'static,
    {
        self.on_free = Some(Arc::new(hook));
        self
    }

    /// Emitter wired to the core being built
    pub fn emitter(&self) -> EventEmitter {
        self.events.clone()
    }

    /// Check handlers against the contract and start the runtime
    pub fn build(mut self) -> Result<EmbeddedCore> {
        let mut entries = HashMap::with_capacity(self.functions.len());
        for function in self.functions {
            let handler = self.handlers.remove(&function.name);
            match (&handler, function.is_async) {
                (Some(Handler::Sync(_)), true) => {
                    return Err(Error::CallStyle {
                        function: function.name,
                        actual: "async",
                    })
                }
                (Some(Handler::Async(_)), false) => {
                    return Err(Error::CallStyle {
                        function: function.name,
                        actual: "sync",
                    })
                }
                _ => {}
            }
            entries.insert(function.selector, Entry { function, handler });
        }

        if let Some(name) = self.handlers.keys().next() {
            return Err(Error::UnknownFunction(name.clone()));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.worker_threads)
            .thread_name("nostr-core")
            .enable_all()
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create core runtime: {}", e)))?;

        let version = CString::new(self.version)
            .map_err(|_| Error::Internal("ABI version contains NUL".into()))?;
        let fingerprint = CString::new(self.fingerprint)
            .map_err(|_| Error::Internal("fingerprint contains NUL".into()))?;

        Ok(EmbeddedCore {
            version,
            fingerprint,
            entries,
            on_free: self.on_free,
            runtime: Some(runtime),
            in_flight: Arc::new(DashMap::new()),
            next_serial: AtomicU64::new(1),
            events: self.events,
            frees: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }
}

// ============================================================================
// CORE
// ============================================================================

/// In-process native core
pub struct EmbeddedCore {
    version: CString,
    fingerprint: CString,
    entries: HashMap<u32, Entry>,
    on_free: Option<FreeHook>,
    runtime: Option<Runtime>,
    in_flight: Arc<DashMap<u64, InFlight>>,
    next_serial: AtomicU64,
    events: EventEmitter,
    frees: AtomicU64,
    closed: AtomicBool,
}

impl EmbeddedCore {
    pub fn builder(contract: &ContractManifest) -> EmbeddedCoreBuilder {
        EmbeddedCoreBuilder::new(contract)
    }

    /// ABI version as a C string
    pub fn version_cstr(&self) -> &CStr {
        &self.version
    }

    /// Contract fingerprint as a C string
    pub fn fingerprint_cstr(&self) -> &CStr {
        &self.fingerprint
    }

    /// Number of native frees received
    pub fn frees(&self) -> u64 {
        self.frees.load(Ordering::SeqCst)
    }

    /// Async calls currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Stop accepting async calls
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Publish a notification
    pub fn emit(&self, topic: &str, payload: &Value) {
        self.events.emit(topic, payload);
    }

    fn prepare(&self, descriptor: &CallDescriptor) -> std::result::Result<(&Entry, Invocation), Envelope> {
        let entry = self.entries.get(&descriptor.selector).ok_or_else(|| {
            Envelope::failure(GENERIC_KIND, format!("unknown selector {}", descriptor.selector))
        })?;

        let args = crate::marshal::decode_args(&entry.function, &descriptor.args)
            .map_err(|e| Envelope::failure(GENERIC_KIND, e.to_string()))?;

        Ok((
            entry,
            Invocation {
                handle: descriptor.handle,
                args,
            },
        ))
    }
}

fn into_envelope(result: HandlerResult) -> Envelope {
    match result {
        Ok(value) => Envelope::success(&value),
        Err(failure) => Envelope::failure(failure.kind, failure.message),
    }
}

impl NativeCore for EmbeddedCore {
    fn abi_version(&self) -> Result<String> {
        Ok(self.version.to_string_lossy().into_owned())
    }

    fn contract_fingerprint(&self) -> Result<String> {
        Ok(self.fingerprint.to_string_lossy().into_owned())
    }

    fn call(&self, descriptor: &CallDescriptor) -> Envelope {
        let (entry, invocation) = match self.prepare(descriptor) {
            Ok(prepared) => prepared,
            Err(envelope) => return envelope,
        };

        match &entry.handler {
            Some(Handler::Sync(handler)) => match catch_unwind(AssertUnwindSafe(|| handler(invocation))) {
                Ok(result) => into_envelope(result),
                Err(_) => Envelope::failure(GENERIC_KIND, format!("`{}` panicked", entry.function.name)),
            },
            Some(Handler::Async(_)) => {
                Envelope::failure(GENERIC_KIND, format!("`{}` is async", entry.function.name))
            }
            None => Envelope::failure(
                GENERIC_KIND,
                format!("`{}` is not implemented", entry.function.name),
            ),
        }
    }

    fn call_async(&self, descriptor: &CallDescriptor, token: u64, sink: CompletionSink) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::CoreUnavailable("core is shut down".into()));
        }
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::CoreUnavailable("core runtime stopped".into()))?;

        let entry = self
            .entries
            .get(&descriptor.selector)
            .ok_or_else(|| Error::UnknownFunction(format!("selector {}", descriptor.selector)))?;

        let handler = match &entry.handler {
            Some(Handler::Async(handler)) => handler.clone(),
            Some(Handler::Sync(_)) => {
                return Err(Error::CallStyle {
                    function: entry.function.name.clone(),
                    actual: "sync",
                })
            }
            None => return Err(Error::UnknownFunction(entry.function.name.clone())),
        };

        let work: BoxFuture<'static, HandlerResult> = match self.prepare(descriptor) {
            Ok((_, invocation)) => handler(invocation),
            Err(Envelope::Failure { kind, message }) => {
                async move { Err(NativeFailure { kind, message }) }.boxed()
            }
            Err(Envelope::Success(_)) => {
                async { Err(NativeFailure::new(GENERIC_KIND, "invalid call")) }.boxed()
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        match self.in_flight.entry(token) {
            MapEntry::Occupied(_) => {
                tracing::warn!(token, "Refusing async call: token already in flight");
                return Err(Error::Internal(format!("token {} is already in flight", token)));
            }
            MapEntry::Vacant(slot) => {
                slot.insert(InFlight {
                    serial,
                    cancel: cancel_tx,
                });
            }
        }
        let in_flight = self.in_flight.clone();
        let name = entry.function.name.clone();

        runtime.spawn(async move {
            let envelope = tokio::select! {
                biased;
                Ok(()) = cancel_rx => Envelope::failure(CANCELLED_KIND, "cancelled"),
                result = AssertUnwindSafe(work).catch_unwind() => match result {
                    Ok(result) => into_envelope(result),
                    Err(_) => Envelope::failure(GENERIC_KIND, format!("`{}` panicked", name)),
                },
            };
            in_flight.remove_if(&token, |_, running| running.serial == serial);

            if catch_unwind(AssertUnwindSafe(move || sink(envelope))).is_err() {
                tracing::error!(token, "Completion sink panicked");
            }
        });

        Ok(())
    }

    fn cancel(&self, token: u64) -> bool {
        match self.in_flight.remove(&token) {
            Some((_, running)) => {
                let _ = running.cancel.send(());
                true
            }
            None => false,
        }
    }

    fn free_handle(&self, handle: u64) -> Result<()> {
        self.frees.fetch_add(1, Ordering::SeqCst);
        match &self.on_free {
            Some(hook) if !hook(handle) => Err(Error::DoubleFree(handle)),
            _ => Ok(()),
        }
    }

    fn set_event_sink(&self, sink: Option<EventSink>) {
        *self.events.sink.write() = sink;
    }

    fn describe(&self) -> String {
        format!("embedded core v{}", self.version.to_string_lossy())
    }
}

impl Drop for EmbeddedCore {
    fn drop(&mut self) {
        // May run on one of the core's own workers.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
