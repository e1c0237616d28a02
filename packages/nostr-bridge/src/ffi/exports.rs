//! # C ABI Exports
//!
//! Bodies of the `nostr_sdk_ffi_*` functions generated by
//! [`export_native_core!`](crate::export_native_core). Each takes the
//! exported core, or `None` when the factory failed, in which case the
//! library reports no version and refuses every call.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use super::types::*;
use crate::contract::nostr_sdk::kinds;
use crate::contract::TypeTag;
use crate::descriptor::CallDescriptor;
use crate::error::{Error, Result};
use crate::native::{EmbeddedCore, NativeCore};

/// Host pointer carried to core threads
#[derive(Clone, Copy)]
struct UserData(*mut c_void);

// The host promises `user_data` may be used from the core's threads.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn get(self) -> *mut c_void {
        self.0
    }
}

/// Run the factory once; a failure leaves the library inert
pub fn instantiate<F>(factory: F) -> Option<EmbeddedCore>
where
    F: FnOnce() -> Result<EmbeddedCore>,
{
    match factory() {
        Ok(core) => {
            tracing::info!("Exported native core ready");
            Some(core)
        }
        Err(e) => {
            tracing::error!("Failed to create exported native core: {}", e);
            None
        }
    }
}

unsafe fn descriptor(selector: u32, handle: u64, args: *const u8, len: usize) -> CallDescriptor {
    let bytes = if args.is_null() || len == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(args, len).to_vec()
    };
    let handle = (handle != NO_HANDLE).then_some(handle);
    CallDescriptor::new(selector, format!("selector {}", selector), handle, bytes, TypeTag::Json)
}

pub fn abi_version(core: Option<&EmbeddedCore>) -> *const c_char {
    core.map_or(std::ptr::null(), |core| core.version_cstr().as_ptr())
}

pub fn contract_fingerprint(core: Option<&EmbeddedCore>) -> *const c_char {
    core.map_or(std::ptr::null(), |core| core.fingerprint_cstr().as_ptr())
}

/// # Safety
/// `args` must be valid for `len` bytes.
pub unsafe fn call(core: Option<&EmbeddedCore>, selector: u32, handle: u64, args: *const u8, len: usize) -> FfiResult {
    let Some(core) = core else {
        return FfiResult::err(kinds::GENERIC, "native core unavailable");
    };
    core.call(&descriptor(selector, handle, args, len)).into_ffi()
}

/// # Safety
/// `args` must be valid for `len` bytes; `user_data` must stay valid until
/// `callback` runs.
#[allow(clippy::too_many_arguments)]
pub unsafe fn call_async(
    core: Option<&EmbeddedCore>,
    selector: u32,
    handle: u64,
    args: *const u8,
    len: usize,
    token: u64,
    callback: CompletionCallback,
    user_data: *mut c_void,
) -> i32 {
    let Some(core) = core else {
        return status::REJECTED;
    };

    let user_data = UserData(user_data);
    let sink = Box::new(move |envelope: crate::envelope::Envelope| {
        callback(token, envelope.into_ffi(), user_data.get());
    });

    match core.call_async(&descriptor(selector, handle, args, len), token, sink) {
        Ok(()) => status::OK,
        Err(Error::UnknownFunction(_)) => status::UNKNOWN,
        Err(e) => {
            tracing::debug!(selector, token, "Rejecting async call: {}", e);
            status::REJECTED
        }
    }
}

pub fn cancel(core: Option<&EmbeddedCore>, token: u64) -> i32 {
    match core {
        Some(core) if core.cancel(token) => status::OK,
        _ => status::UNKNOWN,
    }
}

pub fn handle_free(core: Option<&EmbeddedCore>, handle: u64) -> i32 {
    let Some(core) = core else {
        return status::REJECTED;
    };
    match core.free_handle(handle) {
        Ok(()) => status::OK,
        Err(Error::DoubleFree(_)) => status::UNKNOWN,
        Err(_) => status::REJECTED,
    }
}

/// # Safety
/// `buffer` must have been handed out by this library and not freed before.
pub unsafe fn buffer_free(buffer: FfiBuffer) {
    drop(buffer.into_vec());
}

pub fn set_event_callback(core: Option<&EmbeddedCore>, callback: Option<EventCallback>, user_data: *mut c_void) {
    let Some(core) = core else {
        return;
    };
    let Some(callback) = callback else {
        core.set_event_sink(None);
        return;
    };

    let user_data = UserData(user_data);
    core.set_event_sink(Some(Arc::new(move |topic: &str, payload: &[u8]| {
        let Ok(topic) = CString::new(topic) else {
            tracing::warn!("Dropping notification with NUL in topic");
            return;
        };
        callback(topic.as_ptr(), payload.as_ptr(), payload.len(), user_data.get());
    })));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::loopback;
    use std::ffi::CStr;

    #[test]
    fn test_inert_library() {
        assert!(abi_version(None).is_null());
        assert!(contract_fingerprint(None).is_null());
        assert_eq!(cancel(None, 1), status::UNKNOWN);
        assert_eq!(handle_free(None, 1), status::REJECTED);
        let result = unsafe { call(None, 1, NO_HANDLE, std::ptr::null(), 0) };
        assert!(!result.is_ok());
        unsafe { buffer_free(result.payload) };
    }

    #[test]
    fn test_version_strings() {
        let core = loopback::core().unwrap();
        let version = unsafe { CStr::from_ptr(abi_version(Some(&core))) };
        assert_eq!(version.to_str().unwrap(), crate::contract::nostr_sdk::ABI_VERSION);
        let fingerprint = unsafe { CStr::from_ptr(contract_fingerprint(Some(&core))) };
        assert_eq!(fingerprint.to_str().unwrap().len(), 64);
    }

    #[test]
    fn test_instantiate_failure_is_none() {
        assert!(instantiate(|| Err(Error::Internal("boom".into()))).is_none());
    }
}
