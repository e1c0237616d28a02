//! Native core behind the C ABI, loaded from a shared library or from a
//! statically linked [`AbiTable`].

use std::ffi::c_void;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use libloading::Library;
use parking_lot::RwLock;

use super::{CompletionSink, EventSink, NativeCore};
use crate::descriptor::CallDescriptor;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::ffi::{cstr_to_string, status, AbiTable, FfiBuffer, FfiResult, SYMBOL_PREFIX};

/// State handed to the core as `user_data` for one async call
struct AsyncCall {
    sink: CompletionSink,
    buffer_free: unsafe extern "C" fn(FfiBuffer),
}

/// Target of the registered event callback
struct EventRoute {
    sink: RwLock<Option<EventSink>>,
}

/// A core reached through its C ABI function table
pub struct DynamicCore {
    table: AbiTable,
    source: String,
    events: Arc<EventRoute>,
    // Declared last: the library must outlive every other field.
    _library: Option<Library>,
}

impl DynamicCore {
    /// Open a shared library and resolve every ABI symbol
    pub fn open(path: &Path) -> Result<Self> {
        tracing::info!("Opening native core at {}", path.display());

        let library = unsafe { Library::new(path) }
            .map_err(|e| Error::LibraryOpen(format!("{}: {}", path.display(), e)))?;

        let table = unsafe {
            AbiTable {
                abi_version: symbol(&library, "abi_version")?,
                contract_fingerprint: symbol(&library, "contract_fingerprint")?,
                call: symbol(&library, "call")?,
                call_async: symbol(&library, "call_async")?,
                cancel: symbol(&library, "cancel")?,
                handle_free: symbol(&library, "handle_free")?,
                buffer_free: symbol(&library, "buffer_free")?,
                set_event_callback: symbol(&library, "set_event_callback")?,
            }
        };

        Ok(Self {
            table,
            source: path.display().to_string(),
            events: Arc::new(EventRoute {
                sink: RwLock::new(None),
            }),
            _library: Some(library),
        })
    }

    /// Use a function table linked into this binary
    pub fn from_table(table: AbiTable, source: impl Into<String>) -> Self {
        Self {
            table,
            source: source.into(),
            events: Arc::new(EventRoute {
                sink: RwLock::new(None),
            }),
            _library: None,
        }
    }

    fn read_cstr(&self, f: unsafe extern "C" fn() -> *const c_char, what: &str) -> Result<String> {
        unsafe { cstr_to_string(f()) }
            .ok_or_else(|| Error::InvalidPayload(format!("native core reported no {}", what)))
    }
}

/// Resolve `nostr_sdk_ffi_<name>`
unsafe fn symbol<T: Copy>(library: &Library, name: &str) -> Result<T> {
    let full = format!("{}{}", SYMBOL_PREFIX, name);
    let mut bytes = full.clone().into_bytes();
    bytes.push(0);
    library
        .get::<T>(&bytes)
        .map(|sym| *sym)
        .map_err(|_| Error::MissingSymbol(full))
}

extern "C" fn complete_trampoline(token: u64, result: FfiResult, user_data: *mut c_void) {
    if user_data.is_null() {
        tracing::error!(token, "Completion arrived without user data");
        return;
    }

    let call = unsafe { Box::from_raw(user_data as *mut AsyncCall) };
    let AsyncCall { sink, buffer_free } = *call;
    let free = |buffer| unsafe { buffer_free(buffer) };
    let envelope = unsafe { Envelope::from_ffi(result, free) };

    if catch_unwind(AssertUnwindSafe(move || sink(envelope))).is_err() {
        tracing::error!(token, "Completion handler panicked");
    }
}

extern "C" fn event_trampoline(topic: *const c_char, payload: *const u8, len: usize, user_data: *mut c_void) {
    if user_data.is_null() {
        return;
    }

    let route = unsafe { &*(user_data as *const EventRoute) };
    let Some(topic) = (unsafe { cstr_to_string(topic) }) else {
        tracing::warn!("Dropping notification with invalid topic");
        return;
    };
    let payload = if payload.is_null() || len == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(payload, len) }
    };

    let sink = route.sink.read().clone();
    if let Some(sink) = sink {
        if catch_unwind(AssertUnwindSafe(|| sink(&topic, payload))).is_err() {
            tracing::error!(topic = %topic, "Notification handler panicked");
        }
    }
}

impl NativeCore for DynamicCore {
    fn abi_version(&self) -> Result<String> {
        self.read_cstr(self.table.abi_version, "ABI version")
    }

    fn contract_fingerprint(&self) -> Result<String> {
        self.read_cstr(self.table.contract_fingerprint, "contract fingerprint")
    }

    fn call(&self, descriptor: &CallDescriptor) -> Envelope {
        let result = unsafe {
            (self.table.call)(
                descriptor.selector,
                descriptor.handle,
                descriptor.args.as_ptr(),
                descriptor.args.len(),
            )
        };
        let free = |buffer| unsafe { (self.table.buffer_free)(buffer) };
        unsafe { Envelope::from_ffi(result, free) }
    }

    fn call_async(&self, descriptor: &CallDescriptor, token: u64, sink: CompletionSink) -> Result<()> {
        let state = Box::into_raw(Box::new(AsyncCall {
            sink,
            buffer_free: self.table.buffer_free,
        })) as *mut c_void;

        let code = unsafe {
            (self.table.call_async)(
                descriptor.selector,
                descriptor.handle,
                descriptor.args.as_ptr(),
                descriptor.args.len(),
                token,
                complete_trampoline,
                state,
            )
        };

        if code == status::OK {
            return Ok(());
        }

        // Not accepted: the core will never call back with this state.
        drop(unsafe { Box::from_raw(state as *mut AsyncCall) });
        Err(match code {
            status::UNKNOWN => Error::UnknownFunction(format!(
                "{} (selector {})",
                descriptor.function, descriptor.selector
            )),
            _ => Error::CoreUnavailable(format!(
                "core rejected `{}` (status {})",
                descriptor.function, code
            )),
        })
    }

    fn cancel(&self, token: u64) -> bool {
        unsafe { (self.table.cancel)(token) == status::OK }
    }

    fn free_handle(&self, handle: u64) -> Result<()> {
        match unsafe { (self.table.handle_free)(handle) } {
            status::OK => Ok(()),
            status::UNKNOWN => Err(Error::DoubleFree(handle)),
            code => Err(Error::CoreUnavailable(format!(
                "core refused to free handle {} (status {})",
                handle, code
            ))),
        }
    }

    fn set_event_sink(&self, sink: Option<EventSink>) {
        match sink {
            Some(sink) => {
                *self.events.sink.write() = Some(sink);
                let route = Arc::as_ptr(&self.events) as *mut c_void;
                unsafe { (self.table.set_event_callback)(Some(event_trampoline), route) };
            }
            None => {
                unsafe { (self.table.set_event_callback)(None, std::ptr::null_mut()) };
                *self.events.sink.write() = None;
            }
        }
    }

    fn describe(&self) -> String {
        format!("dynamic core ({})", self.source)
    }
}

impl Drop for DynamicCore {
    fn drop(&mut self) {
        if self.events.sink.read().is_some() {
            unsafe { (self.table.set_event_callback)(None, std::ptr::null_mut()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_missing_file() {
        let err = DynamicCore::open(Path::new("/definitely/not/here/libnostr_sdk_ffi.so"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::LibraryOpen(_)));
    }

    #[test]
    fn test_open_garbage_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this is not a shared library").unwrap();
        let err = DynamicCore::open(file.path()).err().unwrap();
        assert!(matches!(err, Error::LibraryOpen(_)));
    }
}
