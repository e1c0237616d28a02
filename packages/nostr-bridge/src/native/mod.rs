//! # Native Core
//!
//! The adapter's view of the native protocol engine.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          NATIVE CORES                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  NativeCore (trait)                                                     │
//! │  │                                                                      │
//! │  ├── DynamicCore   shared library via libloading, C ABI symbols         │
//! │  │                                                                      │
//! │  └── EmbeddedCore  in-process handler table, own tokio runtime          │
//! │        │                                                                │
//! │        └── export_native_core!  same core behind the C ABI              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Async contract
//!
//! When `call_async` returns `Ok`, the completion sink runs exactly once,
//! on a thread owned by the core, including when the call is cancelled
//! (it then carries [`CANCELLED_KIND`](crate::ffi::CANCELLED_KIND)). When
//! it returns `Err`, the sink is dropped without running.

mod dynamic;
mod embedded;
#[cfg(any(test, feature = "loopback"))]
#[cfg_attr(docsrs, doc(cfg(feature = "loopback")))]
pub mod loopback;

pub use dynamic::DynamicCore;
pub use embedded::{
    EmbeddedCore, EmbeddedCoreBuilder, EventEmitter, HandlerResult, Invocation, NativeFailure,
};

use std::sync::Arc;

use crate::descriptor::CallDescriptor;
use crate::envelope::Envelope;
use crate::error::Result;

/// Receives the envelope of one async call
pub type CompletionSink = Box<dyn FnOnce(Envelope) + Send + 'static>;

/// Receives core notifications as `(topic, JSON payload)`
pub type EventSink = Arc<dyn Fn(&str, &[u8]) + Send + Sync + 'static>;

/// A loaded native core
pub trait NativeCore: Send + Sync {
    /// ABI version the core was built for
    fn abi_version(&self) -> Result<String>;

    /// Contract fingerprint the core was built for
    fn contract_fingerprint(&self) -> Result<String>;

    /// Blocking call on the caller's thread
    fn call(&self, descriptor: &CallDescriptor) -> Envelope;

    /// Issue an async call; `sink` receives its single completion
    fn call_async(&self, descriptor: &CallDescriptor, token: u64, sink: CompletionSink) -> Result<()>;

    /// Ask the core to stop work for `token`; false if it didn't know it
    fn cancel(&self, token: u64) -> bool;

    /// Release a native object
    fn free_handle(&self, handle: u64) -> Result<()>;

    /// Route notifications to `sink`, or stop routing with `None`
    fn set_event_sink(&self, sink: Option<EventSink>);

    /// Where the core came from, for logs
    fn describe(&self) -> String;
}
